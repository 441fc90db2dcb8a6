//! H.264 access-unit parser.

use tracing::debug;

use super::nal::{discard_epb, AccessUnitBuilder};
use super::sei::parse_sei_message_from_nal_unit;
use crate::error::Warnings;
use crate::exp_golomb::{ExpGolomb, Exhausted};
use crate::track::{PesPacket, UserdataTrack, VideoTrack};

const NAL_SLICE: u8 = 1;
const NAL_IDR: u8 = 5;
const NAL_SEI: u8 = 6;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;
const NAL_FILLER: u8 = 12;

/// Sample aspect ratios indexed by `aspect_ratio_idc` (Table E-1).
pub(crate) const SAR_TABLE: [(u32, u32); 17] = [
    (0, 0),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvcSpsInfo {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: (u32, u32),
}

pub fn nal_type(header: u8) -> u8 {
    header & 0x1F
}

#[derive(Debug, Default)]
pub struct AvcParser {
    builder: AccessUnitBuilder,
}

impl AvcParser {
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

        // streams without AUDs: every PES carrying NAL units starts a new access unit
        if self.builder.sample.is_some() && !units.is_empty() && !self.builder.aud_found {
            self.builder.close(track);
            self.builder.open(false, pes.pts, pes.dts);
        }

        for unit in units {
            let push = match unit.kind {
                NAL_SLICE => {
                    let mut is_key = false;
                    // slice type is only worth reading when an SPS precedes the slice
                    if sps_found && unit.data.len() > 4 {
                        if let Ok(slice_type) = read_slice_type(&unit.data) {
                            // I and SI slices
                            is_key = matches!(slice_type, 2 | 4 | 7 | 9);
                        }
                    }
                    if is_key {
                        self.builder.close_if_non_key_frame(track);
                    }
                    let sample = self.builder.open(true, pes.pts, pes.dts);
                    sample.frame = true;
                    sample.key = is_key;
                    true
                }
                NAL_IDR => {
                    self.builder.close_if_non_key_frame(track);
                    let sample = self.builder.open(true, pes.pts, pes.dts);
                    sample.key = true;
                    sample.frame = true;
                    true
                }
                NAL_SEI => {
                    let pts = pes.pts.unwrap_or_default() as f64;
                    parse_sei_message_from_nal_unit(&unit.data, 1, pts, &mut text.samples, warnings);
                    true
                }
                NAL_SPS => {
                    sps_found = true;
                    match read_sps(&unit.data) {
                        Ok(info) => apply_sps(track, &unit.data, info),
                        Err(_) => debug!("Unreadable SPS ({} bytes), keeping previous config", unit.data.len()),
                    }
                    true
                }
                NAL_PPS => {
                    track.pps = vec![unit.data.clone()];
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
                NAL_FILLER => true,
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

fn apply_sps(track: &mut VideoTrack, sps: &[u8], info: AvcSpsInfo) {
    let changed = track.sps.is_empty()
        || track.width != info.width
        || track.height != info.height
        || track.pixel_ratio != info.pixel_ratio;
    if !changed || sps.len() < 4 {
        return;
    }
    track.width = info.width;
    track.height = info.height;
    track.pixel_ratio = info.pixel_ratio;
    track.sps = vec![sps.to_vec()];
    track.codec = Some(codec_string(sps));
}

/// `avc1.PPCCLL` from profile_idc, constraint flags and level_idc.
pub fn codec_string(sps: &[u8]) -> String {
    format!("avc1.{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3])
}

fn read_slice_type(data: &[u8]) -> Result<u32, Exhausted> {
    let mut eg = ExpGolomb::new(data);
    eg.read_ubyte()?; // NAL header
    eg.read_ueg()?; // first_mb_in_slice
    eg.read_ueg()
}

fn skip_scaling_list(eg: &mut ExpGolomb<'_>, count: usize) -> Result<(), Exhausted> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..count {
        if next_scale != 0 {
            let delta_scale = eg.read_eg()?;
            next_scale = (last_scale + delta_scale + 256).rem_euclid(256);
        }
        last_scale = if next_scale == 0 { last_scale } else { next_scale };
    }
    Ok(())
}

/// Decode picture size and sample aspect ratio from an SPS NAL unit
/// (header byte included).
pub fn read_sps(sps: &[u8]) -> Result<AvcSpsInfo, Exhausted> {
    let rbsp = discard_epb(sps);
    let mut eg = ExpGolomb::new(&rbsp);

    eg.read_ubyte()?; // NAL header
    let profile_idc = eg.read_ubyte()?;
    eg.read_bits(5)?; // constraint_set[0-4]_flag
    eg.skip_bits(3)?; // reserved_zero_3bits
    eg.read_ubyte()?; // level_idc
    eg.skip_ueg()?; // seq_parameter_set_id

    if matches!(profile_idc, 100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128) {
        let chroma_format_idc = eg.read_ueg()?;
        if chroma_format_idc == 3 {
            eg.skip_bits(1)?; // separate_colour_plane_flag
        }
        eg.skip_ueg()?; // bit_depth_luma_minus8
        eg.skip_ueg()?; // bit_depth_chroma_minus8
        eg.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        if eg.read_boolean()? {
            let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..list_count {
                if eg.read_boolean()? {
                    skip_scaling_list(&mut eg, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    eg.skip_ueg()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = eg.read_ueg()?;
    if pic_order_cnt_type == 0 {
        eg.read_ueg()?; // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        eg.skip_bits(1)?; // delta_pic_order_always_zero_flag
        eg.skip_eg()?; // offset_for_non_ref_pic
        eg.skip_eg()?; // offset_for_top_to_bottom_field
        let cycle = eg.read_ueg()?;
        for _ in 0..cycle {
            eg.skip_eg()?; // offset_for_ref_frame[i]
        }
    }
    eg.skip_ueg()?; // max_num_ref_frames
    eg.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag
    let pic_width_in_mbs_minus1 = eg.read_ueg()?;
    let pic_height_in_map_units_minus1 = eg.read_ueg()?;
    let frame_mbs_only_flag = eg.read_bits(1)?;
    if frame_mbs_only_flag == 0 {
        eg.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }
    eg.skip_bits(1)?; // direct_8x8_inference_flag

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
    if eg.read_boolean()? {
        crop_left = eg.read_ueg()?;
        crop_right = eg.read_ueg()?;
        crop_top = eg.read_ueg()?;
        crop_bottom = eg.read_ueg()?;
    }

    let mut pixel_ratio = (1, 1);
    // VUI is optional; a truncated one keeps the square default
    if eg.read_boolean().unwrap_or(false) && eg.read_boolean().unwrap_or(false) {
        if let Ok(idc) = eg.read_ubyte() {
            pixel_ratio = match idc {
                1..=16 => SAR_TABLE[idc as usize],
                255 => {
                    let w = eg.read_ushort().unwrap_or(1) as u32;
                    let h = eg.read_ushort().unwrap_or(1) as u32;
                    (w, h)
                }
                _ => (1, 1),
            };
        }
    }

    // Out-of-range fields reject the SPS the same way a truncated one does.
    let coded_width = pic_width_in_mbs_minus1
        .checked_add(1)
        .and_then(|mbs| mbs.checked_mul(16))
        .ok_or(Exhausted)?;
    let crop_x = crop_left
        .checked_add(crop_right)
        .and_then(|crop| crop.checked_mul(2))
        .ok_or(Exhausted)?;
    let crop_unit_y = if frame_mbs_only_flag == 1 { 2 } else { 4 };
    let coded_height = pic_height_in_map_units_minus1
        .checked_add(1)
        .and_then(|units| units.checked_mul(16 * (2 - frame_mbs_only_flag)))
        .ok_or(Exhausted)?;
    let crop_y = crop_top
        .checked_add(crop_bottom)
        .and_then(|crop| crop.checked_mul(crop_unit_y))
        .ok_or(Exhausted)?;
    let width = coded_width.saturating_sub(crop_x);
    let height = coded_height.saturating_sub(crop_y);

    Ok(AvcSpsInfo {
        width,
        height,
        pixel_ratio,
    })
}
