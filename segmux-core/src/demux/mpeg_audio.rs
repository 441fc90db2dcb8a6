//! MPEG-1/2/2.5 audio (MP3, MP2) frame headers.

use crate::track::{AudioSample, AudioTrack, MPEG_TS_CLOCK};

// kbps, rows of 14: V1L1, V1L2, V1L3, V2L1, V2L2/L3
const BITRATES: [u32; 70] = [
    32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, //
    32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, //
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, //
    32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, //
    8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160,
];

// MPEG1, MPEG2, MPEG2.5
const SAMPLE_RATES: [u32; 9] = [44_100, 48_000, 32_000, 22_050, 24_000, 16_000, 11_025, 12_000, 8_000];

// [version][layer]
const SAMPLE_COEFFICIENTS: [[u32; 4]; 4] = [
    [0, 72, 144, 12], // MPEG 2.5
    [0, 0, 0, 0],     // reserved
    [0, 72, 144, 12], // MPEG 2
    [0, 144, 144, 12], // MPEG 1
];

const BYTES_IN_SLOT: [u32; 4] = [0, 1, 1, 4];

/// Header bytes needed before a frame can be sized.
const HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpegFrameHeader {
    pub sample_rate: u32,
    pub channel_count: u32,
    pub frame_length: usize,
    pub samples_per_frame: u32,
}

fn is_header_pattern(data: &[u8], offset: usize) -> bool {
    data[offset] == 0xFF && data[offset + 1] & 0xE0 == 0xE0 && data[offset + 1] & 0x06 != 0x00
}

pub fn is_header(data: &[u8], offset: usize) -> bool {
    offset + 1 < data.len() && is_header_pattern(data, offset)
}

pub fn can_parse(data: &[u8], offset: usize) -> bool {
    offset + HEADER_SIZE <= data.len() && is_header_pattern(data, offset)
}

pub fn parse_header(data: &[u8], offset: usize) -> Option<MpegFrameHeader> {
    if offset + HEADER_SIZE > data.len() {
        return None;
    }
    let version = ((data[offset + 1] >> 3) & 0x03) as usize;
    let layer = ((data[offset + 1] >> 1) & 0x03) as usize;
    let bitrate_index = ((data[offset + 2] >> 4) & 0x0F) as usize;
    let sample_rate_index = ((data[offset + 2] >> 2) & 0x03) as usize;
    if version == 1 || bitrate_index == 0 || bitrate_index == 15 || sample_rate_index == 3 {
        return None;
    }

    let padding = ((data[offset + 2] >> 1) & 0x01) as u32;
    let channel_mode = data[offset + 3] >> 6;
    let bitrate_column = match (version, layer) {
        (3, _) => 3 - layer,
        (_, 3) => 3,
        _ => 4,
    };
    let bitrate = BITRATES[bitrate_column * 14 + bitrate_index - 1] * 1000;
    let sample_rate_column = match version {
        3 => 0,
        2 => 1,
        _ => 2,
    };
    let sample_rate = SAMPLE_RATES[sample_rate_column * 3 + sample_rate_index];
    let coefficient = SAMPLE_COEFFICIENTS[version][layer];
    let bytes_in_slot = BYTES_IN_SLOT[layer];
    let frame_length = ((coefficient * bitrate) / sample_rate + padding) * bytes_in_slot;

    Some(MpegFrameHeader {
        sample_rate,
        channel_count: if channel_mode == 3 { 1 } else { 2 },
        frame_length: frame_length as usize,
        samples_per_frame: coefficient * 8 * bytes_in_slot,
    })
}

/// A frame starts at `offset` and is followed by another header or the end.
pub fn probe(data: &[u8], offset: usize) -> bool {
    if !is_header(data, offset) {
        return false;
    }
    let frame_length = parse_header(data, offset)
        .map(|header| header.frame_length)
        .filter(|len| *len > 0)
        .unwrap_or(HEADER_SIZE);
    let next = offset + frame_length;
    next == data.len() || is_header(data, next)
}

/// Push the frame at `offset` onto `track`. Returns the frame length, or
/// `None` when the frame is not complete in `data`.
pub fn append_frame(track: &mut AudioTrack, data: &[u8], offset: usize, pts: i64, frame_index: usize) -> Option<usize> {
    let header = parse_header(data, offset)?;
    let end = offset + header.frame_length;
    if header.frame_length == 0 || end > data.len() {
        return None;
    }
    let frame_duration = (header.samples_per_frame as f64 * MPEG_TS_CLOCK as f64) / header.sample_rate as f64;
    let stamp = pts + (frame_index as f64 * frame_duration).round() as i64;

    track.config.clear();
    track.channel_count = header.channel_count;
    track.samplerate = header.sample_rate;
    track.samples.push(AudioSample {
        pts: stamp,
        dts: stamp,
        unit: data[offset..end].to_vec(),
    });
    Some(header.frame_length)
}
