// ============================================================================
// REMUX - Elementary samples to fragmented MP4
// ============================================================================
//
//   Full         TS / raw audio input: builds init segment, moof and mdat,
//                keeps PTS/DTS continuous across fragments
//   Passthrough  fMP4 input: forwards the bytes, reads timing from moof
//
// All output times are seconds relative to the session's timestamp anchor
// (initPTS), so consecutive fragments line up on one timeline.

pub mod full;
pub mod passthrough;
pub mod silence;

use bytes::Bytes;
use serde::Serialize;

use crate::config::{MuxConfig, PlaylistType, Quirks, RationalTimestamp, TypeSupported};
use crate::decrypt::DecryptData;
use crate::error::MuxError;
use crate::track::{DemuxerResult, MetadataSample, MetadataTrack, UserdataSample, UserdataTrack};

pub use full::FullRemuxer;
pub use passthrough::PassthroughRemuxer;

/// 2^32: timestamps further apart than this straddle a 33-bit wrap.
const PTS_WRAP_THRESHOLD: i64 = 1 << 32;
/// 2^33: the MPEG-2 PTS/DTS range.
const PTS_ROLLOVER: i64 = 1 << 33;

/// Unwrap a 33-bit timestamp so it lands within 2^32 of `reference`.
pub fn normalize_pts(value: i64, reference: Option<i64>) -> i64 {
    let Some(reference) = reference else {
        return value;
    };
    let offset = if reference < value { -PTS_ROLLOVER } else { PTS_ROLLOVER };
    let mut value = value;
    while (value - reference).abs() > PTS_WRAP_THRESHOLD {
        value += offset;
    }
    value
}

/// [`normalize_pts`] over fractional ticks.
pub fn normalize_pts_f64(value: f64, reference: f64) -> f64 {
    let (threshold, rollover) = (PTS_WRAP_THRESHOLD as f64, PTS_ROLLOVER as f64);
    let offset = if reference < value { -rollover } else { rollover };
    let mut value = value;
    while (value - reference).abs() > threshold {
        value += offset;
    }
    value
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Audio,
    Video,
    /// One fMP4 stream carrying both.
    Audiovideo,
}

/// One media fragment ready to append.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemuxedTrack {
    /// `moof`, or the whole fMP4 range for passthrough.
    #[serde(with = "crate::config::base64_bytes")]
    pub data1: Bytes,
    /// `mdat`; absent for passthrough.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_opt_bytes")]
    pub data2: Option<Bytes>,
    pub start_pts: f64,
    pub end_pts: f64,
    pub start_dts: f64,
    pub end_dts: f64,
    #[serde(rename = "type")]
    pub kind: TrackType,
    pub has_audio: bool,
    pub has_video: bool,
    pub nb: usize,
    pub dropped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub independent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_key_frame: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_key_frame_pts: Option<f64>,
}

fn serialize_opt_bytes<S: serde::Serializer>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(bytes) => crate::config::base64_bytes::serialize(bytes, serializer),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Init segment of one source buffer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSegmentTrack {
    pub id: &'static str,
    pub container: &'static str,
    pub codec: Option<String>,
    #[serde(with = "crate::config::base64_bytes")]
    pub init_segment: Bytes,
    pub encrypted: bool,
    pub metadata: TrackMetadata,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InitTracks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<InitSegmentTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<InitSegmentTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audiovideo: Option<InitSegmentTrack>,
}

impl InitTracks {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none() && self.audiovideo.is_none()
    }
}

/// New init segment(s) and, when it changed, the timestamp anchor.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSegmentData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracks: Option<InitTracks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_pts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u32>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemuxerResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<RemuxedTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<RemuxedTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_segment: Option<InitSegmentData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub independent: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub id3: Vec<MetadataSample>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub text: Vec<UserdataSample>,
}

impl RemuxerResult {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none()
            && self.video.is_none()
            && self.init_segment.is_none()
            && self.id3.is_empty()
            && self.text.is_empty()
    }
}

// ============================================================================
// Cue re-basing
// ============================================================================

fn anchor_ticks(anchor: &RationalTimestamp, input_timescale: u32) -> f64 {
    anchor.base_time as f64 * input_timescale as f64 / anchor.timescale.max(1) as f64
}

/// Move metadata samples onto the anchored timeline, in seconds.
pub fn flush_metadata_cues(
    track: &mut MetadataTrack,
    time_offset: f64,
    init_pts: &RationalTimestamp,
    init_dts: &RationalTimestamp,
) -> Vec<MetadataSample> {
    let input_timescale = track.input_timescale.max(1);
    let scale = input_timescale as f64;
    let reference = time_offset * scale;
    let pts_base = anchor_ticks(init_pts, input_timescale);
    let dts_base = anchor_ticks(init_dts, input_timescale);
    let mut samples = std::mem::take(&mut track.samples);
    for sample in &mut samples {
        sample.pts = normalize_pts_f64(sample.pts - pts_base, reference) / scale;
        sample.dts = normalize_pts_f64(sample.dts - dts_base, reference) / scale;
    }
    samples
}

/// Move caption samples onto the anchored timeline, in seconds, sorted.
pub fn flush_userdata_cues(
    track: &mut UserdataTrack,
    time_offset: f64,
    init_pts: &RationalTimestamp,
) -> Vec<UserdataSample> {
    let input_timescale = track.input_timescale.max(1);
    let scale = input_timescale as f64;
    let reference = time_offset * scale;
    let base = anchor_ticks(init_pts, input_timescale);
    let mut samples = std::mem::take(&mut track.samples);
    for sample in &mut samples {
        sample.pts = normalize_pts_f64(sample.pts - base, reference) / scale;
    }
    samples.sort_by(|a, b| a.pts.total_cmp(&b.pts));
    samples
}

// ============================================================================
// Remuxer
// ============================================================================

/// Per-call timing flags.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RemuxParams {
    /// Seconds.
    pub time_offset: f64,
    pub accurate_time_offset: bool,
    pub flush: bool,
    pub playlist_type: PlaylistType,
}

#[derive(Debug)]
pub enum Remuxer {
    Full(FullRemuxer),
    Passthrough(PassthroughRemuxer),
}

impl Remuxer {
    pub fn new(passthrough: bool, config: &MuxConfig, type_supported: TypeSupported, quirks: Quirks) -> Self {
        if passthrough {
            Self::Passthrough(PassthroughRemuxer::new(quirks))
        } else {
            Self::Full(FullRemuxer::new(config.clone(), type_supported, quirks))
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough(_))
    }

    pub fn reset_init_segment(
        &mut self,
        init_segment: Option<&[u8]>,
        audio_codec: Option<&str>,
        video_codec: Option<&str>,
        decrypt_data: Option<&DecryptData>,
    ) {
        match self {
            Self::Full(r) => r.reset_init_segment(),
            Self::Passthrough(r) => r.reset_init_segment(init_segment, audio_codec, video_codec, decrypt_data),
        }
    }

    pub fn reset_timestamp(&mut self, default_init_pts: Option<RationalTimestamp>) {
        match self {
            Self::Full(r) => r.reset_timestamp(default_init_pts),
            Self::Passthrough(r) => r.reset_timestamp(default_init_pts),
        }
    }

    pub fn reset_next_timestamp(&mut self) {
        match self {
            Self::Full(r) => r.reset_next_timestamp(),
            Self::Passthrough(r) => r.reset_next_timestamp(),
        }
    }

    pub fn remux(&mut self, demuxed: DemuxerResult, params: RemuxParams) -> Result<RemuxerResult, MuxError> {
        match self {
            Self::Full(r) => r.remux(demuxed, params),
            Self::Passthrough(r) => Ok(r.remux(demuxed, params)),
        }
    }

    pub fn drain_warnings(&mut self) -> Vec<MuxError> {
        match self {
            Self::Full(r) => r.drain_warnings(),
            Self::Passthrough(r) => r.drain_warnings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{MetadataSchema, UserdataPayload};
    use rstest::rstest;

    #[rstest]
    #[case::no_wrap(1_000, 2_000, 1_000)]
    #[case::value_wrapped(100, (1 << 33) - 100, (1 << 33) + 100)]
    #[case::reference_wrapped((1 << 33) - 100, 100, -100)]
    fn test_normalize_pts(#[case] value: i64, #[case] reference: i64, #[case] expected: i64) {
        let normalized = normalize_pts(value, Some(reference));
        assert_eq!(normalized, expected);
        assert!((normalized - reference).abs() <= PTS_WRAP_THRESHOLD);
    }

    #[test]
    fn test_normalize_without_reference_is_identity() {
        assert_eq!(normalize_pts(12345, None), 12345);
    }

    #[test]
    fn test_metadata_cues_rebased_to_seconds() {
        let mut track = MetadataTrack::new(3, Some(0x102));
        track.samples.push(MetadataSample {
            pts: 190_000.0,
            dts: 190_000.0,
            data: vec![1],
            schema: MetadataSchema::Id3,
            duration: None,
        });
        let anchor = RationalTimestamp::new(10_000, 90_000);
        let samples = flush_metadata_cues(&mut track, 2.0, &anchor, &anchor);
        assert!(track.samples.is_empty());
        assert!((samples[0].pts - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_userdata_cues_sorted() {
        let mut track = UserdataTrack::new(90_000);
        for pts in [180_000.0, 90_000.0] {
            track.samples.push(UserdataSample {
                pts,
                payload: UserdataPayload::Cea608 { bytes: vec![0xFC] },
            });
        }
        let samples = flush_userdata_cues(&mut track, 0.0, &RationalTimestamp::new(0, 90_000));
        assert_eq!(samples.iter().map(|s| s.pts).collect::<Vec<_>>(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_remuxed_track_serializes_base64() {
        let track = RemuxedTrack {
            data1: Bytes::from_static(&[0, 1, 2]),
            data2: None,
            start_pts: 0.0,
            end_pts: 1.0,
            start_dts: 0.0,
            end_dts: 1.0,
            kind: TrackType::Audiovideo,
            has_audio: true,
            has_video: true,
            nb: 1,
            dropped: 0,
            independent: None,
            first_key_frame: None,
            first_key_frame_pts: None,
        };
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["data1"], "AAEC");
        assert_eq!(json["type"], "audiovideo");
        assert!(json.get("data2").is_none());
    }
}
