//! H.265 access-unit parser.
//!
//! Same access-unit rules as the AVC parser, plus the VPS/SPS/PPS fields
//! needed to write an `hvcC` record.

use tracing::debug;

use super::avc::SAR_TABLE;
use super::nal::{discard_epb, AccessUnitBuilder};
use super::sei::parse_sei_message_from_nal_unit;
use crate::error::Warnings;
use crate::exp_golomb::{ExpGolomb, Exhausted};
use crate::track::{HevcParams, PesPacket, UserdataTrack, VideoTrack};

const NAL_CRA_NUT: u8 = 21;
const NAL_IDR_W_RADL: u8 = 19;
const NAL_IDR_N_LP: u8 = 20;
const NAL_VPS: u8 = 32;
const NAL_SPS: u8 = 33;
const NAL_PPS: u8 = 34;
const NAL_AUD: u8 = 35;
const NAL_PREFIX_SEI: u8 = 39;

pub fn nal_type(header: u8) -> u8 {
    (header & 0x7E) >> 1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcSpsInfo {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: (u32, u32),
    pub codec: String,
    pub params: HevcParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcVpsInfo {
    pub num_temporal_layers: u8,
    pub temporal_id_nested: u8,
}

#[derive(Debug, Default)]
pub struct HevcParser {
    builder: AccessUnitBuilder,
}

impl HevcParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_pes(
        &mut self,
        track: &mut VideoTrack,
        text: &mut UserdataTrack,
        pes: PesPacket,
        end_of_segment: bool,
        warnings: &mut Warnings,
    ) {
        let units = self.builder.parse_nal_units(&mut track.samples, &pes.data, nal_type);
        let mut sps_found = false;

        if self.builder.sample.is_some() && !units.is_empty() && !self.builder.aud_found {
            self.builder.close(track);
            self.builder.open(false, pes.pts, pes.dts);
        }

        for unit in units {
            let push = match unit.kind {
                // trailing, TSA, STSA, RADL and RASL pictures
                0..=9 => {
                    self.builder.open(false, pes.pts, pes.dts).frame = true;
                    true
                }
                // BLA and CRA random access pictures
                16..=18 | NAL_CRA_NUT => {
                    if sps_found {
                        self.builder.close_if_non_key_frame(track);
                    }
                    let sample = self.builder.open(true, pes.pts, pes.dts);
                    sample.key = true;
                    sample.frame = true;
                    true
                }
                NAL_IDR_W_RADL | NAL_IDR_N_LP => {
                    self.builder.close_if_non_key_frame(track);
                    let sample = self.builder.open(true, pes.pts, pes.dts);
                    sample.key = true;
                    sample.frame = true;
                    true
                }
                NAL_PREFIX_SEI => {
                    let pts = pes.pts.unwrap_or_default() as f64;
                    parse_sei_message_from_nal_unit(&unit.data, 2, pts, &mut text.samples, warnings);
                    true
                }
                NAL_VPS => {
                    if track.vps.is_empty() {
                        match read_vps(&unit.data) {
                            Ok(info) => {
                                let params = track.hevc_params.get_or_insert_with(HevcParams::default);
                                params.num_temporal_layers = info.num_temporal_layers;
                                params.temporal_id_nested = info.temporal_id_nested;
                            }
                            Err(_) => debug!("Truncated VPS ({} bytes)", unit.data.len()),
                        }
                    }
                    track.vps = vec![unit.data.clone()];
                    true
                }
                NAL_SPS => {
                    sps_found = true;
                    apply_sps(track, &unit.data);
                    self.builder.open(true, pes.pts, pes.dts).key = true;
                    true
                }
                NAL_PPS => {
                    if track.hevc_params.is_some() && track.pps.is_empty() {
                        if let (Some(params), Ok(parallelism_type)) = (track.hevc_params.as_mut(), read_pps(&unit.data)) {
                            params.parallelism_type = parallelism_type;
                        }
                        track.pps = vec![unit.data.clone()];
                    }
                    true
                }
                NAL_AUD => {
                    self.builder.aud_found = true;
                    if matches!(&self.builder.sample, Some(s) if s.frame) {
                        self.builder.close(track);
                    }
                    self.builder.open(false, pes.pts, pes.dts);
                    true
                }
                _ => false,
            };
            if push {
                self.builder.add_unit(unit);
            }
        }

        if end_of_segment {
            self.builder.close(track);
        }
    }
}

/// SPS bodies are compared past the NAL header and VPS id so a repeated
/// SPS under a new VPS does not reset the decoder config.
fn match_sps(a: &[u8], b: &[u8]) -> bool {
    a.get(3..) == b.get(3..)
}

fn apply_sps(track: &mut VideoTrack, sps: &[u8]) {
    if let Some(current) = track.sps.first() {
        if match_sps(current, sps) {
            return;
        }
        // new stream configuration; PPS must follow again
        track.sps.clear();
        track.pps.clear();
    }
    match read_sps(sps) {
        Ok(info) => {
            track.width = info.width;
            track.height = info.height;
            track.pixel_ratio = info.pixel_ratio;
            track.codec = Some(info.codec);
            let previous = track.hevc_params.take().unwrap_or_default();
            track.hevc_params = Some(HevcParams {
                parallelism_type: previous.parallelism_type,
                num_temporal_layers: previous.num_temporal_layers,
                temporal_id_nested: previous.temporal_id_nested,
                ..info.params
            });
            track.sps = vec![sps.to_vec()];
        }
        Err(_) => debug!("Unreadable SPS ({} bytes), keeping previous config", sps.len()),
    }
}

pub fn read_vps(vps: &[u8]) -> Result<HevcVpsInfo, Exhausted> {
    let rbsp = discard_epb(vps);
    let mut eg = ExpGolomb::new(&rbsp);
    eg.read_ushort()?; // NAL header
    eg.skip_bits(4)?; // vps_video_parameter_set_id
    eg.skip_bits(2)?; // vps_base_layer_internal_flag, vps_base_layer_available_flag
    eg.skip_bits(6)?; // vps_max_layers_minus1
    let max_sub_layers_minus1 = eg.read_bits(3)? as u8;
    let temporal_id_nested = eg.read_bits(1)? as u8;
    Ok(HevcVpsInfo {
        num_temporal_layers: max_sub_layers_minus1 + 1,
        temporal_id_nested,
    })
}

/// `parallelismType` for the `hvcC` record.
pub fn read_pps(pps: &[u8]) -> Result<u8, Exhausted> {
    let rbsp = discard_epb(pps);
    let mut eg = ExpGolomb::new(&rbsp);
    eg.read_ushort()?; // NAL header
    eg.skip_ueg()?; // pps_pic_parameter_set_id
    eg.skip_ueg()?; // pps_seq_parameter_set_id
    eg.skip_bits(2)?; // dependent_slice_segments_enabled_flag, output_flag_present_flag
    eg.skip_bits(3)?; // num_extra_slice_header_bits
    eg.skip_bits(2)?; // sign_data_hiding_enabled_flag, cabac_init_present_flag
    eg.skip_ueg()?; // num_ref_idx_l0_default_active_minus1
    eg.skip_ueg()?; // num_ref_idx_l1_default_active_minus1
    eg.skip_eg()?; // init_qp_minus26
    eg.skip_bits(2)?; // constrained_intra_pred_flag, transform_skip_enabled_flag
    if eg.read_boolean()? {
        eg.skip_ueg()?; // diff_cu_qp_delta_depth
    }
    eg.skip_eg()?; // pps_cb_qp_offset
    eg.skip_eg()?; // pps_cr_qp_offset
    eg.skip_bits(4)?; // chroma qp offsets, weighted pred/bipred, transquant bypass
    let tiles_enabled = eg.read_boolean()?;
    let entropy_coding_sync_enabled = eg.read_boolean()?;
    Ok(match (tiles_enabled, entropy_coding_sync_enabled) {
        (true, true) => 0,
        (false, true) => 3,
        (true, false) => 2,
        (false, false) => 1,
    })
}

fn skip_sub_layer_hrd(eg: &mut ExpGolomb<'_>, cpb_cnt: u32, sub_pic_hrd_params: bool) -> Result<(), Exhausted> {
    for _ in 0..cpb_cnt {
        eg.skip_ueg()?; // bit_rate_value_minus1
        eg.skip_ueg()?; // cpb_size_value_minus1
        if sub_pic_hrd_params {
            eg.skip_ueg()?; // cpb_size_du_value_minus1
            eg.skip_ueg()?; // bit_rate_du_value_minus1
        }
        eg.skip_bits(1)?; // cbr_flag
    }
    Ok(())
}

/// Decode dimensions, aspect ratio, codec string and `hvcC` fields from an
/// SPS NAL unit (two-byte header included).
pub fn read_sps(sps: &[u8]) -> Result<HevcSpsInfo, Exhausted> {
    let rbsp = discard_epb(sps);
    let mut eg = ExpGolomb::new(&rbsp);
    eg.read_ushort()?; // NAL header
    eg.skip_bits(4)?; // sps_video_parameter_set_id
    let max_sub_layers_minus1 = eg.read_bits(3)?;
    eg.skip_bits(1)?; // sps_temporal_id_nesting_flag

    // profile_tier_level
    let general_profile_space = eg.read_bits(2)? as u8;
    let general_tier_flag = eg.read_bits(1)? as u8;
    let general_profile_idc = eg.read_bits(5)? as u8;
    let mut compatibility = [0u8; 4];
    for b in compatibility.iter_mut() {
        *b = eg.read_ubyte()?;
    }
    let mut constraints = [0u8; 6];
    for b in constraints.iter_mut() {
        *b = eg.read_ubyte()?;
    }
    let general_level_idc = eg.read_ubyte()?;
    let mut sub_layer_flags = Vec::with_capacity(max_sub_layers_minus1 as usize);
    for _ in 0..max_sub_layers_minus1 {
        let profile_present = eg.read_boolean()?;
        let level_present = eg.read_boolean()?;
        sub_layer_flags.push((profile_present, level_present));
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            eg.skip_bits(2)?; // reserved_zero_2bits
        }
    }
    for (profile_present, level_present) in sub_layer_flags {
        if profile_present {
            eg.skip_bits(88)?;
        }
        if level_present {
            eg.skip_bits(8)?;
        }
    }

    eg.skip_ueg()?; // sps_seq_parameter_set_id
    let chroma_format_idc = eg.read_ueg()?;
    if chroma_format_idc == 3 {
        eg.skip_bits(1)?; // separate_colour_plane_flag
    }
    let pic_width = eg.read_ueg()?;
    let pic_height = eg.read_ueg()?;
    let (mut left, mut right, mut top, mut bottom) = (0u32, 0u32, 0u32, 0u32);
    let conformance_window = eg.read_boolean()?;
    if conformance_window {
        left = left.checked_add(eg.read_ueg()?).ok_or(Exhausted)?;
        right = right.checked_add(eg.read_ueg()?).ok_or(Exhausted)?;
        top = top.checked_add(eg.read_ueg()?).ok_or(Exhausted)?;
        bottom = bottom.checked_add(eg.read_ueg()?).ok_or(Exhausted)?;
    }
    let bit_depth_luma_minus8 = eg.read_ueg()? as u8;
    let bit_depth_chroma_minus8 = eg.read_ueg()? as u8;
    let log2_max_pic_order_cnt_lsb_minus4 = eg.read_ueg()?;
    let ordering_info_present = eg.read_boolean()?;
    let first = if ordering_info_present { 0 } else { max_sub_layers_minus1 };
    for _ in first..=max_sub_layers_minus1 {
        eg.skip_ueg()?; // sps_max_dec_pic_buffering_minus1
        eg.skip_ueg()?; // sps_max_num_reorder_pics
        eg.skip_ueg()?; // sps_max_latency_increase_plus1
    }
    eg.skip_ueg()?; // log2_min_luma_coding_block_size_minus3
    eg.skip_ueg()?; // log2_diff_max_min_luma_coding_block_size
    eg.skip_ueg()?; // log2_min_luma_transform_block_size_minus2
    eg.skip_ueg()?; // log2_diff_max_min_luma_transform_block_size
    eg.skip_ueg()?; // max_transform_hierarchy_depth_inter
    eg.skip_ueg()?; // max_transform_hierarchy_depth_intra
    if eg.read_boolean()? && eg.read_boolean()? {
        // scaling_list_data
        for size_id in 0..4u32 {
            let matrices = if size_id == 3 { 2 } else { 6 };
            for _ in 0..matrices {
                if !eg.read_boolean()? {
                    eg.skip_ueg()?; // scaling_list_pred_matrix_id_delta
                } else {
                    let coef_num = 64.min(1u32 << (4 + (size_id << 1)));
                    if size_id > 1 {
                        eg.skip_eg()?; // scaling_list_dc_coef_minus8
                    }
                    for _ in 0..coef_num {
                        eg.skip_eg()?;
                    }
                }
            }
        }
    }
    eg.skip_bits(1)?; // amp_enabled_flag
    eg.skip_bits(1)?; // sample_adaptive_offset_enabled_flag
    if eg.read_boolean()? {
        // pcm_enabled_flag
        eg.skip_bits(8)?;
        eg.skip_ueg()?;
        eg.skip_ueg()?;
        eg.skip_bits(1)?;
    }

    let num_short_term_ref_pic_sets = eg.read_ueg()?;
    let mut num_delta_pocs = 0u32;
    for i in 0..num_short_term_ref_pic_sets {
        let inter_ref_pic_set_prediction = i != 0 && eg.read_boolean()?;
        if inter_ref_pic_set_prediction {
            eg.skip_bits(1)?; // delta_rps_sign
            eg.skip_ueg()?; // abs_delta_rps_minus1
            let mut next = 0;
            for _ in 0..=num_delta_pocs {
                let used_by_curr_pic = eg.read_boolean()?;
                let use_delta = !used_by_curr_pic && eg.read_boolean()?;
                if used_by_curr_pic || use_delta {
                    next += 1;
                }
            }
            num_delta_pocs = next;
        } else {
            let negative = eg.read_ueg()?;
            let positive = eg.read_ueg()?;
            num_delta_pocs = negative.checked_add(positive).ok_or(Exhausted)?;
            for _ in 0..num_delta_pocs {
                eg.skip_ueg()?; // delta_poc_sX_minus1
                eg.skip_bits(1)?; // used_by_curr_pic_sX_flag
            }
        }
    }
    if eg.read_boolean()? {
        // long_term_ref_pics_present_flag
        let num_long_term = eg.read_ueg()?;
        for _ in 0..num_long_term {
            eg.skip_bits(log2_max_pic_order_cnt_lsb_minus4 as usize + 4)?; // lt_ref_pic_poc_lsb_sps
            eg.skip_bits(1)?; // used_by_curr_pic_lt_sps_flag
        }
    }
    eg.skip_bits(1)?; // sps_temporal_mvp_enabled_flag
    eg.skip_bits(1)?; // strong_intra_smoothing_enabled_flag

    let mut pixel_ratio = (1u32, 1u32);
    let mut min_spatial_segmentation_idc = 0u16;
    let mut fps_fixed = true;
    let mut fps_num = 0u32;
    let mut fps_den = 1u32;
    let mut default_display_window = false;
    if eg.read_boolean()? {
        // vui_parameters
        if eg.read_boolean()? {
            let idc = eg.read_ubyte()?;
            pixel_ratio = match idc {
                1..=16 => SAR_TABLE[idc as usize],
                255 => (eg.read_bits(16)?, eg.read_bits(16)?),
                _ => (1, 1),
            };
        }
        if eg.read_boolean()? {
            eg.skip_bits(1)?; // overscan_appropriate_flag
        }
        if eg.read_boolean()? {
            eg.skip_bits(4)?; // video_format, video_full_range_flag
            if eg.read_boolean()? {
                eg.skip_bits(24)?; // colour primaries, transfer, matrix
            }
        }
        if eg.read_boolean()? {
            eg.skip_ueg()?; // chroma_sample_loc_type_top_field
            eg.skip_ueg()?; // chroma_sample_loc_type_bottom_field
        }
        eg.skip_bits(3)?; // neutral_chroma_indication, field_seq, frame_field_info_present
        default_display_window = eg.read_boolean()?;
        if default_display_window {
            left = left.checked_add(eg.read_ueg()?).ok_or(Exhausted)?;
            right = right.checked_add(eg.read_ueg()?).ok_or(Exhausted)?;
            top = top.checked_add(eg.read_ueg()?).ok_or(Exhausted)?;
            bottom = bottom.checked_add(eg.read_ueg()?).ok_or(Exhausted)?;
        }
        if eg.read_boolean()? {
            // vui_timing_info_present_flag
            fps_den = eg.read_bits(32)?;
            fps_num = eg.read_bits(32)?;
            if eg.read_boolean()? {
                eg.skip_ueg()?; // vui_num_ticks_poc_diff_one_minus1
            }
            if eg.read_boolean()? {
                // hrd_parameters with commonInfPresentFlag set
                let nal_hrd = eg.read_boolean()?;
                let vcl_hrd = eg.read_boolean()?;
                let mut sub_pic_hrd_params = false;
                if nal_hrd || vcl_hrd {
                    sub_pic_hrd_params = eg.read_boolean()?;
                    if sub_pic_hrd_params {
                        eg.skip_bits(8 + 5 + 1 + 5)?;
                    }
                    eg.skip_bits(8)?; // bit_rate_scale, cpb_size_scale
                    if sub_pic_hrd_params {
                        eg.skip_bits(4)?; // cpb_size_du_scale
                    }
                    eg.skip_bits(15)?; // delay and length fields
                }
                for _ in 0..=max_sub_layers_minus1 {
                    fps_fixed = eg.read_boolean()?; // fixed_pic_rate_general_flag
                    let fixed_within_cvs = fps_fixed || eg.read_boolean()?;
                    let mut low_delay_hrd = false;
                    if fixed_within_cvs {
                        eg.skip_ueg()?; // elemental_duration_in_tc_minus1
                    } else {
                        low_delay_hrd = eg.read_boolean()?;
                    }
                    let cpb_cnt = if low_delay_hrd { 1 } else { eg.read_ueg()? + 1 };
                    if nal_hrd {
                        skip_sub_layer_hrd(&mut eg, cpb_cnt, sub_pic_hrd_params)?;
                    }
                    if vcl_hrd {
                        skip_sub_layer_hrd(&mut eg, cpb_cnt, sub_pic_hrd_params)?;
                    }
                }
            }
        }
        if eg.read_boolean()? {
            // bitstream_restriction_flag
            eg.skip_bits(3)?; // tiles_fixed_structure, motion_vectors_over_pic_boundaries, restricted_ref_pic_lists
            min_spatial_segmentation_idc = eg.read_ueg()? as u16;
        }
    }

    let (mut width, mut height) = (pic_width, pic_height);
    if conformance_window || default_display_window {
        let (scale_w, scale_h) = match chroma_format_idc {
            1 => (2, 2),
            2 => (2, 1),
            _ => (1, 1),
        };
        let crop_x = left.checked_add(right).and_then(|crop| crop.checked_mul(scale_w));
        let crop_y = top.checked_add(bottom).and_then(|crop| crop.checked_mul(scale_h));
        width = pic_width.saturating_sub(crop_x.ok_or(Exhausted)?);
        height = pic_height.saturating_sub(crop_y.ok_or(Exhausted)?);
    }

    let params = HevcParams {
        general_profile_space,
        general_tier_flag,
        general_profile_idc,
        general_profile_compatibility_flags: compatibility,
        general_constraint_indicator_flags: constraints,
        general_level_idc,
        min_spatial_segmentation_idc,
        chroma_format_idc: chroma_format_idc as u8,
        bit_depth_luma_minus8,
        bit_depth_chroma_minus8,
        avg_frame_rate: if fps_den > 0 { (fps_num / fps_den) as u16 } else { 0 },
        constant_frame_rate: fps_fixed,
        ..HevcParams::default()
    };

    Ok(HevcSpsInfo {
        width,
        height,
        pixel_ratio,
        codec: codec_string(&params),
        params,
    })
}

/// `hvc1.[A|B|C]<profile>.<reversed compat flags>.<L|H><level>.B0`
pub fn codec_string(params: &HevcParams) -> String {
    let space = match params.general_profile_space {
        1 => "A",
        2 => "B",
        3 => "C",
        _ => "",
    };
    let reversed = u32::from_be_bytes(params.general_profile_compatibility_flags).reverse_bits();
    let mut compatibility = format!("{reversed:x}");
    if params.general_profile_idc == 1 && compatibility == "2" {
        compatibility = "6".to_string();
    }
    let tier = if params.general_tier_flag == 1 { "H" } else { "L" };
    format!(
        "hvc1.{}{}.{}.{}{}.B0",
        space, params.general_profile_idc, compatibility, tier, params.general_level_idc
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const VPS: [u8; 6] = [0x40, 0x01, 0x0C, 0x01, 0xFF, 0xFF];
    /// Main profile, level 4, 1920x1088 coded with an 8-line bottom crop.
    pub(crate) const SPS_1080P: [u8; 30] = [
        0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0x90, 0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x00, 0x78,
        0xA0, 0x03, 0xC0, 0x80, 0x11, 0x07, 0xCB, 0x96, 0x5E, 0x49, 0x36, 0xB2,
    ];
    /// Wavefront parallel processing enabled.
    pub(crate) const PPS: [u8; 6] = [0x44, 0x01, 0xC0, 0x71, 0x82, 0x08];

    fn annexb(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(unit);
        }
        out
    }

    #[test]
    fn test_nal_type() {
        assert_eq!(nal_type(VPS[0]), NAL_VPS);
        assert_eq!(nal_type(SPS_1080P[0]), NAL_SPS);
        assert_eq!(nal_type(PPS[0]), NAL_PPS);
        assert_eq!(nal_type(0x26), NAL_IDR_W_RADL);
    }

    #[test]
    fn test_read_sps() {
        let info = read_sps(&SPS_1080P).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.pixel_ratio, (1, 1));
        assert_eq!(info.codec, "hvc1.1.6.L120.B0");
        assert_eq!(info.params.general_profile_idc, 1);
        assert_eq!(info.params.chroma_format_idc, 1);
        assert_eq!(info.params.general_constraint_indicator_flags, [0x90, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_read_sps_rejects_overflowing_crop() {
        // SPS_1080P with left and right conformance offsets of 2^30 each.
        const SPS_HUGE_CROP: [u8; 49] = [
            0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0x90, 0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x00,
            0x78, 0xA0, 0x03, 0xC0, 0x80, 0x11, 0x06, 0x00, 0x00, 0x03, 0x00, 0x04, 0x00, 0x00, 0x03, 0x00, 0x10,
            0x00, 0x00, 0x03, 0x00, 0x20, 0x00, 0x00, 0x03, 0x00, 0xCB, 0x96, 0x5E, 0x49, 0x36, 0xB2,
        ];
        assert!(matches!(read_sps(&SPS_HUGE_CROP), Err(Exhausted)));
    }

    #[test]
    fn test_read_vps_and_pps() {
        let vps = read_vps(&VPS).unwrap();
        assert_eq!(vps.num_temporal_layers, 1);
        assert_eq!(vps.temporal_id_nested, 1);
        assert_eq!(read_pps(&PPS).unwrap(), 3);
    }

    #[test]
    fn test_codec_string_tiers_and_spaces() {
        let params = HevcParams {
            general_profile_space: 0,
            general_tier_flag: 1,
            general_profile_idc: 2,
            general_profile_compatibility_flags: [0x20, 0, 0, 0],
            general_level_idc: 153,
            ..HevcParams::default()
        };
        assert_eq!(codec_string(&params), "hvc1.2.4.H153.B0");
    }

    #[test]
    fn test_parse_pes_fills_decoder_config() {
        let mut parser = HevcParser::new();
        let mut track = VideoTrack::new(1, Some(0x100), 0.0);
        let mut text = UserdataTrack::default();
        let aud: &[u8] = &[0x46, 0x01, 0x50];
        let idr: &[u8] = &[0x26, 0x01, 0xAF, 0x10];
        let trail: &[u8] = &[0x02, 0x01, 0xD0, 0x20];

        let first = annexb(&[aud, &VPS, &SPS_1080P, &PPS, idr]);
        parser.parse_pes(
            &mut track,
            &mut text,
            PesPacket { data: first, pts: Some(0), dts: Some(0) },
            false,
            &mut Warnings::default(),
        );
        parser.parse_pes(
            &mut track,
            &mut text,
            PesPacket { data: annexb(&[aud, trail]), pts: Some(3600), dts: Some(3600) },
            true,
            &mut Warnings::default(),
        );

        assert_eq!(track.samples.len(), 2);
        assert!(track.samples[0].key);
        assert_eq!(track.samples[0].units.len(), 5);
        assert!(!track.samples[1].key);
        assert_eq!(track.codec.as_deref(), Some("hvc1.1.6.L120.B0"));
        assert_eq!(track.vps, vec![VPS.to_vec()]);
        assert_eq!(track.sps, vec![SPS_1080P.to_vec()]);
        assert_eq!(track.pps, vec![PPS.to_vec()]);
        let params = track.hevc_params.as_ref().unwrap();
        assert_eq!(params.parallelism_type, 3);
        assert_eq!(params.num_temporal_layers, 1);
        assert_eq!(track.height, 1080);
    }
}
