//! AC-3 syncframes and the `dac3` configuration triplet.

use crate::id3;
use crate::track::{AudioSample, AudioTrack, MPEG_TS_CLOCK};

const SYNC_WORD: [u8; 2] = [0x0B, 0x77];
const SAMPLE_RATES: [u32; 3] = [48_000, 44_100, 32_000];
const SAMPLES_PER_FRAME: u32 = 1536;

/// 16-bit words per frame, indexed by `frmsizecod * 3 + fscod`.
const FRAME_SIZES: [u16; 114] = [
    64, 69, 96, 64, 70, 96, 80, 87, 120, 80, 88, 120, 96, 104, 144, 96, 105, 144, 112, 121, 168, 112, 122, 168, 128,
    139, 192, 128, 140, 192, 160, 174, 240, 160, 175, 240, 192, 208, 288, 192, 209, 288, 224, 243, 336, 224, 244, 336,
    256, 278, 384, 256, 279, 384, 320, 348, 480, 320, 349, 480, 384, 417, 576, 384, 418, 576, 448, 487, 672, 448, 488,
    672, 512, 557, 768, 512, 558, 768, 640, 696, 960, 640, 697, 960, 768, 835, 1152, 768, 836, 1152, 896, 975, 1344,
    896, 976, 1344, 1024, 1114, 1536, 1024, 1115, 1536, 1152, 1253, 1728, 1152, 1254, 1728, 1280, 1393, 1920, 1280,
    1394, 1920,
];

/// Full-bandwidth channels per `acmod`.
const CHANNELS: [u32; 8] = [2, 1, 2, 3, 3, 4, 4, 5];

/// Bytes the raw-audio demuxer wants before it tries a frame.
pub const MIN_PROBE_BYTES: usize = 64;

pub fn is_sync(data: &[u8], offset: usize) -> bool {
    offset + 1 < data.len() && data[offset..offset + 2] == SYNC_WORD
}

pub fn can_parse(data: &[u8], offset: usize) -> bool {
    offset + MIN_PROBE_BYTES < data.len() && is_sync(data, offset)
}

/// Raw AC-3 must start with an ID3 tag carrying a transport timestamp.
pub fn probe(data: &[u8]) -> bool {
    let Some(id3_data) = id3::get_id3_data(data, 0) else {
        return false;
    };
    let offset = id3_data.len();
    is_sync(data, offset)
        && offset + 5 < data.len()
        && id3::get_id3_timestamp(id3_data).is_some()
        && (data[offset + 5] >> 3) < 16
}

/// 90kHz ticks per syncframe.
pub fn frame_duration(samplerate: u32) -> f64 {
    (SAMPLES_PER_FRAME as f64 * MPEG_TS_CLOCK as f64) / samplerate.max(1) as f64
}

/// Push the syncframe at `start` onto `track`. Returns its length, or `None`
/// when the header is invalid or the frame is incomplete.
pub fn append_frame(track: &mut AudioTrack, data: &[u8], start: usize, pts: i64, frame_index: usize) -> Option<usize> {
    if start + 8 > data.len() || !is_sync(data, start) {
        return None;
    }
    let fscod = (data[start + 4] >> 6) as usize;
    if fscod >= SAMPLE_RATES.len() {
        return None;
    }
    let samplerate = SAMPLE_RATES[fscod];
    let frmsizecod = (data[start + 4] & 0x3F) as usize;
    let frame_length = *FRAME_SIZES.get(frmsizecod * 3 + fscod)? as usize * 2;
    if start + frame_length > data.len() {
        return None;
    }

    let acmod = data[start + 6] >> 5;
    let mut skip = 0;
    if acmod == 2 {
        skip += 2;
    } else {
        if acmod & 1 != 0 && acmod != 1 {
            skip += 2;
        }
        if acmod & 4 != 0 {
            skip += 2;
        }
    }
    let lfe = ((u16::from_be_bytes([data[start + 6], data[start + 7]]) >> (12 - skip)) & 1) as u8;
    let bsid = data[start + 5] >> 3;
    let bsmod = data[start + 5] & 0x07;

    track.config = vec![
        ((fscod as u8) << 6) | (bsid << 1) | (bsmod >> 2),
        ((bsmod & 0x03) << 6) | (acmod << 3) | (lfe << 2) | ((frmsizecod as u8) >> 4),
        ((frmsizecod as u8) << 4) & 0xE0,
    ];
    track.channel_count = CHANNELS[acmod as usize] + lfe as u32;
    track.samplerate = samplerate;

    let stamp = pts + (frame_index as f64 * frame_duration(samplerate)).round() as i64;
    track.samples.push(AudioSample {
        pts: stamp,
        dts: stamp,
        unit: data[start..start + frame_length].to_vec(),
    });
    Some(frame_length)
}
