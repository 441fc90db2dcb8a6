//! ADTS framing for raw AAC.

use tracing::info;

use crate::error::Warnings;
use crate::track::{AudioSample, AudioTrack, MPEG_TS_CLOCK};

const SAMPLING_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000, 7_350,
];

/// Samples per AAC frame.
pub const AAC_FRAME_SAMPLES: u32 = 1024;

/// Decoder parameters read from an ADTS header.
#[derive(Debug, Clone, PartialEq)]
pub struct AdtsConfig {
    /// Two-byte AudioSpecificConfig.
    pub config: Vec<u8>,
    pub samplerate: u32,
    pub channel_count: u32,
    pub codec: String,
}

/// Outcome of reading one frame at an offset.
#[derive(Debug)]
pub enum AppendedFrame {
    /// Frame pushed onto the track; `length` includes the header.
    Complete { length: usize, pts: i64 },
    /// Frame runs past the end of the data.
    Overflow(AdtsOverflow),
}

/// A frame split across two PES packets.
#[derive(Debug, Clone)]
pub enum AdtsOverflow {
    /// Payload allocated at full size, `filled` bytes present.
    Payload { sample: AudioSample, filled: usize },
    /// The header itself is cut; the bytes are re-parsed with the next packet.
    Header { bytes: Vec<u8>, pts: i64 },
}

impl AdtsOverflow {
    pub fn pts(&self) -> i64 {
        match self {
            Self::Payload { sample, .. } => sample.pts,
            Self::Header { pts, .. } => *pts,
        }
    }
}

pub fn header_length(data: &[u8], offset: usize) -> usize {
    if data[offset + 1] & 0x01 != 0 {
        7
    } else {
        9
    }
}

/// Frame length including the header.
pub fn full_frame_length(data: &[u8], offset: usize) -> usize {
    (((data[offset + 3] & 0x03) as usize) << 11)
        | ((data[offset + 4] as usize) << 3)
        | (((data[offset + 5] & 0xE0) as usize) >> 5)
}

fn can_get_frame_length(data: &[u8], offset: usize) -> bool {
    offset + 5 < data.len()
}

fn is_header_pattern(data: &[u8], offset: usize) -> bool {
    data[offset] == 0xFF && data[offset + 1] & 0xF6 == 0xF0
}

pub fn is_header(data: &[u8], offset: usize) -> bool {
    offset + 1 < data.len() && is_header_pattern(data, offset)
}

/// A complete frame starts at `offset`.
pub fn can_parse(data: &[u8], offset: usize) -> bool {
    can_get_frame_length(data, offset)
        && is_header_pattern(data, offset)
        && full_frame_length(data, offset) <= data.len() - offset
}

/// A frame starts at `offset` and is followed by another header or the end.
pub fn probe(data: &[u8], offset: usize) -> bool {
    if !is_header(data, offset) {
        return false;
    }
    let header_length = header_length(data, offset);
    if offset + header_length >= data.len() || !can_get_frame_length(data, offset) {
        return false;
    }
    let frame_length = full_frame_length(data, offset);
    if frame_length <= header_length {
        return false;
    }
    let next = offset + frame_length;
    next == data.len() || is_header(data, next)
}

/// 90kHz ticks per AAC frame (fractional).
pub fn frame_duration(samplerate: u32) -> f64 {
    (AAC_FRAME_SAMPLES as f64 * MPEG_TS_CLOCK as f64) / samplerate.max(1) as f64
}

pub fn audio_config(data: &[u8], offset: usize) -> Result<AdtsConfig, String> {
    if offset + 3 >= data.len() {
        return Err("truncated ADTS header".to_string());
    }
    let byte2 = data[offset + 2];
    let sampling_index = ((byte2 >> 2) & 0x0F) as usize;
    if sampling_index > 12 {
        return Err(format!("invalid ADTS sampling index:{sampling_index}"));
    }
    let object_type = ((byte2 >> 6) & 0x03) + 1;
    let channel_count = (((data[offset + 3] >> 6) & 0x03) | ((byte2 & 0x01) << 2)) as u32;
    let samplerate = SAMPLING_RATES[sampling_index];

    // HE-AAC signals the core (half) rate.
    let mut aac_sample_index = sampling_index as u8;
    if object_type == 5 || object_type == 29 {
        aac_sample_index = aac_sample_index.saturating_sub(3);
    }
    let config = vec![
        (object_type << 3) | ((aac_sample_index & 0x0E) >> 1),
        ((aac_sample_index & 0x01) << 7) | ((channel_count as u8) << 3),
    ];

    Ok(AdtsConfig {
        config,
        samplerate,
        channel_count,
        codec: format!("mp4a.40.{object_type}"),
    })
}

/// Fill the track's decoder config from the first frame seen.
pub fn init_track_config(track: &mut AudioTrack, data: &[u8], offset: usize, warnings: &mut Warnings) {
    if track.samplerate != 0 {
        return;
    }
    match audio_config(data, offset) {
        Ok(config) => {
            info!(
                "manifest codec:{}, parsed codec:{}, channels:{}, rate:{}",
                track.manifest_codec.as_deref().unwrap_or("none"),
                config.codec,
                config.channel_count,
                config.samplerate
            );
            track.config = config.config;
            track.samplerate = config.samplerate;
            track.channel_count = config.channel_count;
            track.codec = Some(config.codec);
        }
        Err(reason) => warnings.parsing(reason),
    }
}

/// Read the frame at `offset`, stamped `pts + frame_index` frame durations.
pub fn append_frame(track: &mut AudioTrack, data: &[u8], offset: usize, pts: i64, frame_index: usize) -> AppendedFrame {
    let stamp = pts + (frame_index as f64 * frame_duration(track.samplerate)).round() as i64;

    if can_get_frame_length(data, offset) {
        let header_length = header_length(data, offset);
        let length = full_frame_length(data, offset);
        if offset + header_length <= data.len() && length > header_length {
            let end = offset + length;
            if end <= data.len() {
                track.samples.push(AudioSample {
                    pts: stamp,
                    dts: stamp,
                    unit: data[offset + header_length..end].to_vec(),
                });
                return AppendedFrame::Complete { length, pts: stamp };
            }
            let mut unit = vec![0u8; length - header_length];
            let present = &data[offset + header_length..];
            unit[..present.len()].copy_from_slice(present);
            return AppendedFrame::Overflow(AdtsOverflow::Payload {
                sample: AudioSample { pts: stamp, dts: stamp, unit },
                filled: present.len(),
            });
        }
    }

    AppendedFrame::Overflow(AdtsOverflow::Header {
        bytes: data[offset..].to_vec(),
        pts: stamp,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// One ADTS frame: AAC-LC, 44.1kHz, stereo, `payload_len` bytes of payload.
    pub(crate) fn adts_frame(payload_len: usize) -> Vec<u8> {
        adts_frame_with(4, 2, payload_len)
    }

    pub(crate) fn adts_frame_with(sampling_index: u8, channels: u8, payload_len: usize) -> Vec<u8> {
        let length = payload_len + 7;
        let mut frame = vec![
            0xFF,
            0xF1,
            (1 << 6) | (sampling_index << 2) | (channels >> 2),
            ((channels & 0x03) << 6) | ((length >> 11) & 0x03) as u8,
            ((length >> 3) & 0xFF) as u8,
            (((length & 0x07) << 5) as u8) | 0x1F,
            0xFC,
        ];
        frame.extend((0..payload_len).map(|i| (i % 200) as u8 + 1));
        frame
    }

    #[test]
    fn test_audio_config_lc_stereo() {
        let frame = adts_frame(20);
        let config = audio_config(&frame, 0).unwrap();
        assert_eq!(config.samplerate, 44_100);
        assert_eq!(config.channel_count, 2);
        assert_eq!(config.codec, "mp4a.40.2");
        assert_eq!(config.config, vec![0x12, 0x10]);
    }

    #[test]
    fn test_invalid_sampling_index_reported() {
        let frame = adts_frame_with(13, 2, 20);
        let err = audio_config(&frame, 0).unwrap_err();
        assert_eq!(err, "invalid ADTS sampling index:13");

        let mut track = AudioTrack::new(2, None, 0.0);
        let mut warnings = Warnings::default();
        init_track_config(&mut track, &frame, 0, &mut warnings);
        assert_eq!(track.samplerate, 0);
        assert_eq!(warnings.drain().len(), 1);
    }

    #[test]
    fn test_probe_needs_following_header() {
        let mut data = adts_frame(30);
        data.extend(adts_frame(30));
        assert!(probe(&data, 0));
        assert!(can_parse(&data, 0));
        data.truncate(36);
        assert!(!probe(&data, 0));
        assert!(!can_parse(&data, 0));
    }

    #[test]
    fn test_append_frames_and_overflow() {
        let mut data = adts_frame(10);
        data.extend(adts_frame(10));
        data.extend(&adts_frame(10)[..12]);
        let mut track = AudioTrack::new(2, None, 0.0);
        track.samplerate = 44_100;

        let mut offset = 0;
        for index in 0..2 {
            match append_frame(&mut track, &data, offset, 1000, index) {
                AppendedFrame::Complete { length, .. } => offset += length,
                AppendedFrame::Overflow(_) => panic!("frame {index} should be complete"),
            }
        }
        assert_eq!(track.samples.len(), 2);
        assert_eq!(track.samples[1].pts, 1000 + 2090);

        match append_frame(&mut track, &data, offset, 1000, 2) {
            AppendedFrame::Overflow(AdtsOverflow::Payload { sample, filled }) => {
                assert_eq!(sample.unit.len(), 10);
                assert_eq!(filled, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
        match append_frame(&mut track, &data[..offset + 4], offset, 1000, 2) {
            AppendedFrame::Overflow(AdtsOverflow::Header { bytes, .. }) => assert_eq!(bytes.len(), 4),
            other => panic!("unexpected {other:?}"),
        }
    }
}
