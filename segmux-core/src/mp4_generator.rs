// ============================================================================
// MP4 GENERATOR - Fragmented ISO-BMFF box construction
//
// Pure functions, no state. Two outputs:
//   init segment: ftyp + moov(mvhd, trak.., mvex(trex..))
//   fragment:     moof(mfhd, traf(tfhd, tfdt, trun, sdtp)) + mdat
//
// Sample entries: avc1+avcC, hvc1+hvcC, mp4a+esds, .mp3, ac-3+dac3.
// ============================================================================

use thiserror::Error;

use crate::mp4_tools::FourCc;
use crate::track::{AudioCodec, AudioTrack, VideoCodec, VideoTrack};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("video sample description needs both SPS and PPS")]
    MissingParameterSets,
    #[error("HEVC sample description needs VPS and decoder parameters")]
    MissingHevcParameters,
    #[error("no sample description for codec {0}")]
    UnsupportedCodec(String),
    #[error("fail allocating {kind} mdat {size}")]
    Allocation { kind: &'static str, size: usize },
    #[error("box of {0} bytes exceeds 32-bit size")]
    BoxTooLarge(usize),
}

// ============================================================================
// Box types
// ============================================================================

pub mod types {
    use super::FourCc;

    pub const AC_3: FourCc = *b"ac-3";
    pub const AVC1: FourCc = *b"avc1";
    pub const AVCC: FourCc = *b"avcC";
    pub const BTRT: FourCc = *b"btrt";
    pub const DAC3: FourCc = *b"dac3";
    pub const DINF: FourCc = *b"dinf";
    pub const DREF: FourCc = *b"dref";
    pub const ESDS: FourCc = *b"esds";
    pub const FTYP: FourCc = *b"ftyp";
    pub const HDLR: FourCc = *b"hdlr";
    pub const HVC1: FourCc = *b"hvc1";
    pub const HVCC: FourCc = *b"hvcC";
    pub const MDAT: FourCc = *b"mdat";
    pub const MDHD: FourCc = *b"mdhd";
    pub const MDIA: FourCc = *b"mdia";
    pub const MFHD: FourCc = *b"mfhd";
    pub const MINF: FourCc = *b"minf";
    pub const MOOF: FourCc = *b"moof";
    pub const MOOV: FourCc = *b"moov";
    pub const MP3: FourCc = *b".mp3";
    pub const MP4A: FourCc = *b"mp4a";
    pub const MVEX: FourCc = *b"mvex";
    pub const MVHD: FourCc = *b"mvhd";
    pub const PASP: FourCc = *b"pasp";
    pub const SDTP: FourCc = *b"sdtp";
    pub const SMHD: FourCc = *b"smhd";
    pub const STBL: FourCc = *b"stbl";
    pub const STCO: FourCc = *b"stco";
    pub const STSC: FourCc = *b"stsc";
    pub const STSD: FourCc = *b"stsd";
    pub const STSZ: FourCc = *b"stsz";
    pub const STTS: FourCc = *b"stts";
    pub const TFDT: FourCc = *b"tfdt";
    pub const TFHD: FourCc = *b"tfhd";
    pub const TKHD: FourCc = *b"tkhd";
    pub const TRAF: FourCc = *b"traf";
    pub const TRAK: FourCc = *b"trak";
    pub const TREX: FourCc = *b"trex";
    pub const TRUN: FourCc = *b"trun";
    pub const VMHD: FourCc = *b"vmhd";
}

use types::*;

const MAJOR_BRAND: &[u8; 4] = b"isom";
const MINOR_VERSION: u32 = 1;
const COMPATIBLE_BRANDS: [&[u8; 4]; 4] = [b"isom", b"avc1", b"mp41", b"dash"];

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Empty full box body followed by a zero entry count.
const EMPTY_TABLE: [u8; 8] = [0; 8];

// ============================================================================
// Samples
// ============================================================================

/// `trun`/`sdtp` sample flags (ISO/IEC 14496-12 8.8.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFlags {
    pub is_leading: u8,
    pub is_depended_on: u8,
    pub has_redundancy: u8,
    pub degrad_prio: u16,
    pub depends_on: u8,
    pub is_non_sync: u8,
    pub padding_value: u8,
}

impl SampleFlags {
    pub fn new(keyframe: bool) -> Self {
        Self {
            is_leading: 0,
            is_depended_on: 0,
            has_redundancy: 0,
            degrad_prio: 0,
            depends_on: if keyframe { 2 } else { 1 },
            is_non_sync: if keyframe { 0 } else { 1 },
            padding_value: 0,
        }
    }
}

/// One `trun` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp4Sample {
    pub size: u32,
    pub duration: u32,
    /// Composition offset (PTS - DTS) in track timescale.
    pub cts: i32,
    pub flags: SampleFlags,
}

impl Mp4Sample {
    pub fn new(keyframe: bool, duration: u32, size: u32, cts: i32) -> Self {
        Self {
            size,
            duration,
            cts,
            flags: SampleFlags::new(keyframe),
        }
    }
}

/// Track description for the init segment.
#[derive(Debug, Clone, Copy)]
pub enum TrackConfig<'a> {
    Video(&'a VideoTrack),
    Audio(&'a AudioTrack),
}

impl TrackConfig<'_> {
    fn id(&self) -> u32 {
        match self {
            Self::Video(t) => t.id,
            Self::Audio(t) => t.id,
        }
    }

    fn timescale(&self) -> u32 {
        match self {
            Self::Video(t) => t.timescale,
            Self::Audio(t) => t.timescale,
        }
    }

    /// Duration in track timescale units.
    fn duration(&self) -> u64 {
        let (seconds, timescale) = match self {
            Self::Video(t) => (t.duration, t.timescale),
            Self::Audio(t) => (t.duration, t.timescale),
        };
        if seconds.is_finite() && seconds > 0.0 {
            (seconds * timescale as f64) as u64
        } else {
            0
        }
    }
}

// ============================================================================
// Primitives
// ============================================================================

/// Length-prefixed box from concatenated payloads.
pub fn mp4_box(kind: FourCc, payloads: &[&[u8]]) -> Vec<u8> {
    let size = 8 + payloads.iter().map(|p| p.len()).sum::<usize>();
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&(size as u32).to_be_bytes());
    out.extend_from_slice(&kind);
    for payload in payloads {
        out.extend_from_slice(payload);
    }
    out
}

fn full_box_header(version: u8, flags: u32) -> [u8; 4] {
    let f = flags.to_be_bytes();
    [version, f[1], f[2], f[3]]
}

fn split_u64(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

// ============================================================================
// Init segment
// ============================================================================

pub fn ftyp() -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + COMPATIBLE_BRANDS.len() * 4);
    payload.extend_from_slice(MAJOR_BRAND);
    payload.extend_from_slice(&MINOR_VERSION.to_be_bytes());
    for brand in COMPATIBLE_BRANDS {
        payload.extend_from_slice(brand);
    }
    mp4_box(FTYP, &[&payload])
}

/// `ftyp` + `moov` for the given tracks.
pub fn init_segment(tracks: &[TrackConfig<'_>]) -> Result<Vec<u8>, GenerateError> {
    let movie = moov(tracks)?;
    let mut out = ftyp();
    out.extend_from_slice(&movie);
    Ok(out)
}

pub fn moov(tracks: &[TrackConfig<'_>]) -> Result<Vec<u8>, GenerateError> {
    let (timescale, duration) = tracks
        .first()
        .map(|t| (t.timescale(), t.duration()))
        .unwrap_or((90_000, 0));
    let mut children = vec![mvhd(timescale, duration)];
    for track in tracks {
        children.push(trak(track)?);
    }
    let trexs: Vec<Vec<u8>> = tracks.iter().map(|t| trex(t.id())).collect();
    let trex_refs: Vec<&[u8]> = trexs.iter().map(Vec::as_slice).collect();
    children.push(mp4_box(MVEX, &trex_refs));
    let refs: Vec<&[u8]> = children.iter().map(Vec::as_slice).collect();
    Ok(mp4_box(MOOV, &refs))
}

fn mvhd(timescale: u32, duration: u64) -> Vec<u8> {
    let mut p = Vec::with_capacity(112);
    p.extend_from_slice(&full_box_header(1, 0));
    p.extend_from_slice(&2u64.to_be_bytes()); // creation_time
    p.extend_from_slice(&3u64.to_be_bytes()); // modification_time
    p.extend_from_slice(&timescale.to_be_bytes());
    p.extend_from_slice(&split_u64(duration));
    p.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
    p.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
    p.extend_from_slice(&[0u8; 10]); // reserved
    for value in UNITY_MATRIX {
        p.extend_from_slice(&value.to_be_bytes());
    }
    p.extend_from_slice(&[0u8; 24]); // pre_defined
    p.extend_from_slice(&u32::MAX.to_be_bytes()); // next_track_ID
    mp4_box(MVHD, &[&p])
}

fn trak(track: &TrackConfig<'_>) -> Result<Vec<u8>, GenerateError> {
    let header = tkhd(track);
    let media = mdia(track)?;
    Ok(mp4_box(TRAK, &[&header, &media]))
}

fn tkhd(track: &TrackConfig<'_>) -> Vec<u8> {
    let (width, height, volume) = match track {
        TrackConfig::Video(t) => (t.width, t.height, 0u16),
        TrackConfig::Audio(_) => (0, 0, 0x0100u16),
    };
    let mut p = Vec::with_capacity(96);
    p.extend_from_slice(&full_box_header(1, 0x07)); // enabled, in movie, in preview
    p.extend_from_slice(&2u64.to_be_bytes()); // creation_time
    p.extend_from_slice(&3u64.to_be_bytes()); // modification_time
    p.extend_from_slice(&track.id().to_be_bytes());
    p.extend_from_slice(&[0u8; 4]); // reserved
    p.extend_from_slice(&split_u64(track.duration()));
    p.extend_from_slice(&[0u8; 8]); // reserved
    p.extend_from_slice(&0u16.to_be_bytes()); // layer
    p.extend_from_slice(&0u16.to_be_bytes()); // alternate_group
    p.extend_from_slice(&volume.to_be_bytes());
    p.extend_from_slice(&[0u8; 2]); // reserved
    for value in UNITY_MATRIX {
        p.extend_from_slice(&value.to_be_bytes());
    }
    // 16.16 fixed point
    p.extend_from_slice(&((width & 0xFFFF) << 16).to_be_bytes());
    p.extend_from_slice(&((height & 0xFFFF) << 16).to_be_bytes());
    mp4_box(TKHD, &[&p])
}

fn mdia(track: &TrackConfig<'_>) -> Result<Vec<u8>, GenerateError> {
    let header = mdhd(track.timescale(), track.duration());
    let handler = hdlr(matches!(track, TrackConfig::Video(_)));
    let info = minf(track)?;
    Ok(mp4_box(MDIA, &[&header, &handler, &info]))
}

fn mdhd(timescale: u32, duration: u64) -> Vec<u8> {
    let mut p = Vec::with_capacity(36);
    p.extend_from_slice(&full_box_header(1, 0));
    p.extend_from_slice(&2u64.to_be_bytes());
    p.extend_from_slice(&3u64.to_be_bytes());
    p.extend_from_slice(&timescale.to_be_bytes());
    p.extend_from_slice(&split_u64(duration));
    p.extend_from_slice(&[0x55, 0xC4]); // 'und'
    p.extend_from_slice(&[0, 0]);
    mp4_box(MDHD, &[&p])
}

fn hdlr(video: bool) -> Vec<u8> {
    let (handler, name): (&[u8; 4], &[u8]) = if video {
        (b"vide", b"VideoHandler\0")
    } else {
        (b"soun", b"SoundHandler\0")
    };
    let mut p = Vec::with_capacity(24 + name.len());
    p.extend_from_slice(&full_box_header(0, 0));
    p.extend_from_slice(&[0u8; 4]); // pre_defined
    p.extend_from_slice(handler);
    p.extend_from_slice(&[0u8; 12]); // reserved
    p.extend_from_slice(name);
    mp4_box(HDLR, &[&p])
}

fn minf(track: &TrackConfig<'_>) -> Result<Vec<u8>, GenerateError> {
    let header = match track {
        TrackConfig::Video(_) => mp4_box(VMHD, &[&[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]]),
        TrackConfig::Audio(_) => mp4_box(SMHD, &[&[0, 0, 0, 0, 0, 0, 0, 0]]),
    };
    let table = stbl(track)?;
    Ok(mp4_box(MINF, &[&header, &dinf(), &table]))
}

fn dinf() -> Vec<u8> {
    let url = [0u8, 0, 0, 0x0C, b'u', b'r', b'l', b' ', 0, 0, 0, 1];
    let dref = mp4_box(DREF, &[&[0, 0, 0, 0, 0, 0, 0, 1], &url]);
    mp4_box(DINF, &[&dref])
}

fn stbl(track: &TrackConfig<'_>) -> Result<Vec<u8>, GenerateError> {
    let description = stsd(track)?;
    Ok(mp4_box(
        STBL,
        &[
            &description,
            &mp4_box(STTS, &[&EMPTY_TABLE]),
            &mp4_box(STSC, &[&EMPTY_TABLE]),
            &mp4_box(STSZ, &[&[0u8; 12]]),
            &mp4_box(STCO, &[&EMPTY_TABLE]),
        ],
    ))
}

fn stsd(track: &TrackConfig<'_>) -> Result<Vec<u8>, GenerateError> {
    let entry = match track {
        TrackConfig::Video(t) => match t.segment_codec {
            Some(VideoCodec::Hevc) => hvc1(t)?,
            Some(VideoCodec::Avc) | None => avc1(t)?,
        },
        TrackConfig::Audio(t) => match t.segment_codec {
            Some(AudioCodec::Aac) => mp4a(t),
            Some(AudioCodec::Mp3) => mp3(t),
            Some(AudioCodec::Ac3) => ac3(t),
            None => return Err(GenerateError::UnsupportedCodec(t.codec.clone().unwrap_or_default())),
        },
    };
    Ok(mp4_box(STSD, &[&[0, 0, 0, 0, 0, 0, 0, 1], &entry]))
}

fn visual_sample_entry(width: u32, height: u32) -> Vec<u8> {
    let mut p = Vec::with_capacity(78);
    p.extend_from_slice(&[0u8; 6]); // reserved
    p.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    p.extend_from_slice(&[0u8; 16]); // pre_defined + reserved
    p.extend_from_slice(&(width as u16).to_be_bytes());
    p.extend_from_slice(&(height as u16).to_be_bytes());
    p.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi
    p.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    p.extend_from_slice(&0u32.to_be_bytes()); // reserved
    p.extend_from_slice(&1u16.to_be_bytes()); // frame_count
    let mut compressor = [0u8; 32];
    let name = b"segmux";
    compressor[0] = name.len() as u8;
    compressor[1..=name.len()].copy_from_slice(name);
    p.extend_from_slice(&compressor);
    p.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
    p.extend_from_slice(&0xFFFFu16.to_be_bytes()); // pre_defined = -1
    p
}

fn pasp(track: &VideoTrack) -> Vec<u8> {
    let (h, v) = track.pixel_ratio;
    let mut p = Vec::with_capacity(8);
    p.extend_from_slice(&h.to_be_bytes());
    p.extend_from_slice(&v.to_be_bytes());
    mp4_box(PASP, &[&p])
}

fn btrt() -> Vec<u8> {
    mp4_box(BTRT, &[&[0x00, 0x1C, 0x9C, 0x80, 0x00, 0x2D, 0xC6, 0xC0, 0x00, 0x2D, 0xC6, 0xC0]])
}

fn length_prefixed(out: &mut Vec<u8>, unit: &[u8]) {
    out.extend_from_slice(&(unit.len() as u16).to_be_bytes());
    out.extend_from_slice(unit);
}

fn avc1(track: &VideoTrack) -> Result<Vec<u8>, GenerateError> {
    let first_sps = track.sps.first().filter(|s| s.len() >= 4);
    let Some(sps) = first_sps.filter(|_| !track.pps.is_empty()) else {
        return Err(GenerateError::MissingParameterSets);
    };

    let mut config = vec![
        0x01, // configurationVersion
        sps[1], // AVCProfileIndication
        sps[2], // profile_compatibility
        sps[3], // AVCLevelIndication
        0xFC | 3, // lengthSizeMinusOne
        0xE0 | track.sps.len() as u8,
    ];
    for unit in &track.sps {
        length_prefixed(&mut config, unit);
    }
    config.push(track.pps.len() as u8);
    for unit in &track.pps {
        length_prefixed(&mut config, unit);
    }

    let entry = visual_sample_entry(track.width, track.height);
    let avcc = mp4_box(AVCC, &[&config]);
    Ok(mp4_box(AVC1, &[&entry, &avcc, &btrt(), &pasp(track)]))
}

fn hvc1(track: &VideoTrack) -> Result<Vec<u8>, GenerateError> {
    if !track.has_parameter_sets() {
        return Err(GenerateError::MissingParameterSets);
    }
    let Some(params) = track.hevc_params.as_ref().filter(|_| !track.vps.is_empty()) else {
        return Err(GenerateError::MissingHevcParameters);
    };

    let mut config = Vec::with_capacity(23);
    config.push(0x01);
    config.push((params.general_profile_space << 6) | (params.general_tier_flag << 5) | params.general_profile_idc);
    config.extend_from_slice(&params.general_profile_compatibility_flags);
    config.extend_from_slice(&params.general_constraint_indicator_flags);
    config.push(params.general_level_idc);
    config.extend_from_slice(&(0xF000 | params.min_spatial_segmentation_idc).to_be_bytes());
    config.push(0xFC | params.parallelism_type);
    config.push(0xFC | params.chroma_format_idc);
    config.push(0xF8 | params.bit_depth_luma_minus8);
    config.push(0xF8 | params.bit_depth_chroma_minus8);
    config.extend_from_slice(&params.avg_frame_rate.to_be_bytes());
    config.push(
        (u8::from(params.constant_frame_rate) << 6)
            | ((params.num_temporal_layers & 0x07) << 3)
            | ((params.temporal_id_nested & 0x01) << 2)
            | 3,
    );
    config.push(3); // numOfArrays
    for (nal_type, units) in [(32u8, &track.vps), (33, &track.sps), (34, &track.pps)] {
        config.push(0x80 | nal_type);
        config.extend_from_slice(&(units.len() as u16).to_be_bytes());
        for unit in units {
            length_prefixed(&mut config, unit);
        }
    }

    let entry = visual_sample_entry(track.width, track.height);
    let hvcc = mp4_box(HVCC, &[&config]);
    Ok(mp4_box(HVC1, &[&entry, &hvcc, &pasp(track)]))
}

fn audio_sample_entry(track: &AudioTrack) -> Vec<u8> {
    let mut p = Vec::with_capacity(28);
    p.extend_from_slice(&[0u8; 6]); // reserved
    p.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    p.extend_from_slice(&[0u8; 8]); // reserved
    p.extend_from_slice(&(track.channel_count as u16).to_be_bytes());
    p.extend_from_slice(&16u16.to_be_bytes()); // samplesize
    p.extend_from_slice(&[0u8; 4]); // pre_defined + reserved
    p.extend_from_slice(&((track.samplerate & 0xFFFF) << 16).to_be_bytes());
    p
}

fn esds(config: &[u8]) -> Vec<u8> {
    let len = config.len() as u8;
    let mut p = vec![
        0, 0, 0, 0, // version + flags
        0x03, // ES_DescrTag
        0x17 + len,
        0x00, 0x01, // ES_ID
        0x00, // flags
        0x04, // DecoderConfigDescrTag
        0x0F + len,
        0x40, // MPEG-4 audio
        0x15, // AudioStream
        0x00, 0x00, 0x00, // bufferSizeDB
        0x00, 0x00, 0x00, 0x00, // maxBitrate
        0x00, 0x00, 0x00, 0x00, // avgBitrate
        0x05, // DecSpecificInfoTag
        len,
    ];
    p.extend_from_slice(config);
    p.extend_from_slice(&[0x06, 0x01, 0x02]); // SLConfigDescriptor
    mp4_box(ESDS, &[&p])
}

fn mp4a(track: &AudioTrack) -> Vec<u8> {
    mp4_box(MP4A, &[&audio_sample_entry(track), &esds(&track.config)])
}

fn mp3(track: &AudioTrack) -> Vec<u8> {
    mp4_box(MP3, &[&audio_sample_entry(track)])
}

fn ac3(track: &AudioTrack) -> Vec<u8> {
    mp4_box(AC_3, &[&audio_sample_entry(track), &mp4_box(DAC3, &[&track.config])])
}

fn trex(track_id: u32) -> Vec<u8> {
    let mut p = Vec::with_capacity(24);
    p.extend_from_slice(&full_box_header(0, 0));
    p.extend_from_slice(&track_id.to_be_bytes());
    p.extend_from_slice(&1u32.to_be_bytes()); // default_sample_description_index
    p.extend_from_slice(&0u32.to_be_bytes()); // default_sample_duration
    p.extend_from_slice(&0u32.to_be_bytes()); // default_sample_size
    p.extend_from_slice(&0x0001_0001u32.to_be_bytes()); // default_sample_flags
    mp4_box(TREX, &[&p])
}

// ============================================================================
// Fragments
// ============================================================================

/// `moof` for one track. `trun.data_offset` points just past the `mdat`
/// header that must immediately follow.
pub fn moof(sequence_number: u32, base_media_decode_time: u64, track_id: u32, samples: &[Mp4Sample]) -> Vec<u8> {
    let header = mp4_box(MFHD, &[&full_box_header(0, 0), &sequence_number.to_be_bytes()]);
    let fragment = traf(track_id, base_media_decode_time, samples);
    mp4_box(MOOF, &[&header, &fragment])
}

fn traf(track_id: u32, base_media_decode_time: u64, samples: &[Mp4Sample]) -> Vec<u8> {
    let dependency = sdtp(samples);
    let tfhd = mp4_box(TFHD, &[&full_box_header(0, 0), &track_id.to_be_bytes()]);
    let tfdt = mp4_box(TFDT, &[&full_box_header(1, 0), &split_u64(base_media_decode_time)]);
    // moof(8) + mfhd(16) + traf(8) + tfhd(16) + tfdt(20) + sdtp + mdat header(8)
    let offset = dependency.len() + 16 + 20 + 8 + 16 + 8 + 8;
    let run = trun(samples, offset);
    mp4_box(TRAF, &[&tfhd, &tfdt, &run, &dependency])
}

fn sdtp(samples: &[Mp4Sample]) -> Vec<u8> {
    let mut p = Vec::with_capacity(4 + samples.len());
    p.extend_from_slice(&full_box_header(0, 0));
    for sample in samples {
        let f = sample.flags;
        p.push((f.depends_on << 4) | (f.is_depended_on << 2) | f.has_redundancy);
    }
    mp4_box(SDTP, &[&p])
}

fn trun(samples: &[Mp4Sample], offset: usize) -> Vec<u8> {
    let body_len = 12 + 16 * samples.len();
    let data_offset = (offset + 8 + body_len) as u32;
    let mut p = Vec::with_capacity(body_len);
    // data-offset, duration, size, flags, composition offset present
    p.extend_from_slice(&full_box_header(0, 0x000F01));
    p.extend_from_slice(&(samples.len() as u32).to_be_bytes());
    p.extend_from_slice(&data_offset.to_be_bytes());
    for sample in samples {
        let f = sample.flags;
        p.extend_from_slice(&sample.duration.to_be_bytes());
        p.extend_from_slice(&sample.size.to_be_bytes());
        p.push((f.is_leading << 2) | f.depends_on);
        p.push((f.is_depended_on << 6) | (f.has_redundancy << 4) | (f.padding_value << 1) | f.is_non_sync);
        p.extend_from_slice(&f.degrad_prio.to_be_bytes());
        p.extend_from_slice(&sample.cts.to_be_bytes());
    }
    mp4_box(TRUN, &[&p])
}

/// Pre-sized `mdat` with its header written; payload is appended by the caller.
/// Allocation failure is reported instead of aborting.
pub fn allocate_mdat(kind: &'static str, payload_size: usize) -> Result<Vec<u8>, GenerateError> {
    let size = payload_size + 8;
    let box_size = u32::try_from(size).map_err(|_| GenerateError::BoxTooLarge(size))?;
    let mut mdat = Vec::new();
    mdat.try_reserve_exact(size)
        .map_err(|_| GenerateError::Allocation { kind, size })?;
    mdat.extend_from_slice(&box_size.to_be_bytes());
    mdat.extend_from_slice(&MDAT);
    Ok(mdat)
}
