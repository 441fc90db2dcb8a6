//! Passthrough remuxer for fragmented MP4 input.
//!
//! Media bytes go out untouched; the remuxer only tracks the init segment,
//! the timestamp anchor and each fragment's start and duration.

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{InitSegmentData, InitSegmentTrack, InitTracks, RemuxParams, RemuxedTrack, RemuxerResult, TrackType};
use crate::config::{Quirks, RationalTimestamp};
use crate::decrypt::DecryptData;
use crate::error::{MuxError, Warnings};
use crate::mp4_tools::{self, InitData, InitTrack, TrackKind};
use crate::track::{DemuxerResult, MPEG_TS_CLOCK};

/// Short audio codec strings that are complete on their own.
const SHORT_AUDIO_CODECS: [&str; 5] = ["ac-3", "ec-3", "alac", "fLaC", "Opus"];

fn track_codec(track: &InitTrack, manifest_codec: Option<&str>) -> String {
    let parsed = track.codec.as_str();
    if parsed.len() > 4 || (track.kind == TrackKind::Audio && SHORT_AUDIO_CODECS.contains(&parsed)) {
        return parsed.to_string();
    }
    if let Some(codec) = manifest_codec.filter(|codec| !codec.is_empty()) {
        return codec.to_string();
    }
    match track.kind {
        TrackKind::Audio => "mp4a".to_string(),
        TrackKind::Video => "avc1".to_string(),
    }
}

#[derive(Debug)]
pub struct PassthroughRemuxer {
    quirks: Quirks,
    emit_init_segment: bool,
    audio_codec: Option<String>,
    video_codec: Option<String>,
    init_data: Option<InitData>,
    init_tracks: Option<InitTracks>,
    /// Always in the MPEG-TS clock.
    init_pts: Option<RationalTimestamp>,
    last_end_time: Option<f64>,
    warnings: Warnings,
}

impl PassthroughRemuxer {
    pub fn new(quirks: Quirks) -> Self {
        Self {
            quirks,
            emit_init_segment: false,
            audio_codec: None,
            video_codec: None,
            init_data: None,
            init_tracks: None,
            init_pts: None,
            last_end_time: None,
            warnings: Warnings::default(),
        }
    }

    pub fn reset_init_segment(
        &mut self,
        init_segment: Option<&[u8]>,
        audio_codec: Option<&str>,
        video_codec: Option<&str>,
        decrypt_data: Option<&DecryptData>,
    ) {
        self.audio_codec = audio_codec.map(str::to_owned);
        self.video_codec = video_codec.map(str::to_owned);
        self.generate_init_segment(init_segment, decrypt_data);
        self.emit_init_segment = true;
    }

    pub fn reset_timestamp(&mut self, default_init_pts: Option<RationalTimestamp>) {
        debug!(?default_init_pts, "passthrough initPTS reset");
        self.init_pts = default_init_pts;
        self.last_end_time = None;
    }

    pub fn reset_next_timestamp(&mut self) {
        self.last_end_time = None;
    }

    pub fn drain_warnings(&mut self) -> Vec<MuxError> {
        self.warnings.drain()
    }

    fn generate_init_segment(&mut self, init_segment: Option<&[u8]>, decrypt_data: Option<&DecryptData>) {
        self.init_data = None;
        self.init_tracks = None;
        let Some(init_segment) = init_segment.filter(|init| !init.is_empty()) else {
            return;
        };

        let mut init_segment = init_segment.to_vec();
        if let Some(decrypt_data) = decrypt_data.filter(|d| d.method.is_common_encryption()) {
            if let Some(key_id) = decrypt_data.key_id() {
                let patched = mp4_tools::patch_encryption_data(&mut init_segment, &key_id);
                debug!(patched, "key ID written into init segment");
            }
        }

        let init_data = mp4_tools::parse_init_segment(&init_segment);
        let init_bytes = Bytes::from(init_segment);
        let audio_codec = init_data.audio().map(|t| track_codec(t, self.audio_codec.as_deref()));
        let video_codec = init_data.video().map(|t| track_codec(t, self.video_codec.as_deref()));
        let encrypted = init_data.tracks.iter().any(|t| t.encrypted);

        let mut tracks = InitTracks::default();
        match (audio_codec, video_codec) {
            (Some(audio), Some(video)) => {
                tracks.audiovideo = Some(InitSegmentTrack {
                    id: "main",
                    container: "video/mp4",
                    codec: Some(format!("{audio},{video}")),
                    init_segment: init_bytes,
                    encrypted,
                    metadata: Default::default(),
                });
            }
            (Some(audio), None) => {
                tracks.audio = Some(InitSegmentTrack {
                    id: "audio",
                    container: "audio/mp4",
                    codec: Some(audio),
                    init_segment: init_bytes,
                    encrypted,
                    metadata: Default::default(),
                });
            }
            (None, Some(video)) => {
                tracks.video = Some(InitSegmentTrack {
                    id: "main",
                    container: "video/mp4",
                    codec: Some(video),
                    init_segment: init_bytes,
                    encrypted,
                    metadata: Default::default(),
                });
            }
            (None, None) => {
                warn!("initSegment does not contain moov or trak boxes.");
                return;
            }
        }
        self.init_data = Some(init_data);
        self.init_tracks = Some(tracks);
    }

    pub fn remux(&mut self, demuxed: DemuxerResult, params: RemuxParams) -> RemuxerResult {
        let DemuxerResult { fragment, id3, text, .. } = demuxed;
        // Cue times come out of the demuxer already on the playlist timeline.
        let mut result = RemuxerResult {
            id3: id3.samples,
            text: text.samples,
            ..Default::default()
        };
        let Some(mut fragment) = fragment.filter(|data| !data.is_empty()) else {
            return result;
        };
        let time_offset = params.time_offset;

        if self.init_data.is_none() {
            self.generate_init_segment(Some(&fragment), None);
            self.emit_init_segment = true;
        }
        let Some(init_data) = self.init_data.as_ref() else {
            self.warnings.parsing("Failed to generate initSegment.");
            return result;
        };

        let mut init_segment = InitSegmentData::default();
        if self.emit_init_segment {
            init_segment.tracks = self.init_tracks.clone();
            self.emit_init_segment = false;
        }

        let duration = mp4_tools::get_duration(&fragment, init_data);
        let start_dts = mp4_tools::get_start_dts(init_data, &fragment);
        let decode_time = start_dts.unwrap_or(time_offset);

        let anchor_invalid = match self.init_pts {
            None => true,
            Some(anchor) => (decode_time - anchor.seconds() - time_offset).abs() > duration.max(1.0),
        };
        if anchor_invalid {
            let base_time = ((decode_time - time_offset) * MPEG_TS_CLOCK as f64).round() as i64;
            info!(base_time, decode_time, time_offset, "passthrough timestamp anchor set");
            self.init_pts = Some(RationalTimestamp::new(base_time, MPEG_TS_CLOCK));
            init_segment.init_pts = Some(base_time);
            init_segment.timescale = Some(MPEG_TS_CLOCK);
        }
        let anchor = self.init_pts.map_or(0.0, |anchor| anchor.seconds());

        if self.quirks.requires_positive_dts {
            mp4_tools::offset_start_dts(init_data, &mut fragment, anchor);
        }

        let start_time = match start_dts {
            Some(dts) => dts - anchor,
            None => self.last_end_time.unwrap_or(time_offset),
        };
        let end_time = start_time + duration;
        if duration > 0.0 {
            self.last_end_time = Some(end_time);
        } else {
            self.warnings.parsing("Duration parsed from mp4 should be greater than zero");
            self.last_end_time = None;
        }

        let has_audio = init_data.audio().is_some();
        let has_video = init_data.video().is_some();
        let kind = match (has_audio, has_video) {
            (true, true) => TrackType::Audiovideo,
            (true, false) => TrackType::Audio,
            _ => TrackType::Video,
        };
        let track = RemuxedTrack {
            data1: Bytes::from(fragment),
            data2: None,
            start_pts: start_time,
            end_pts: end_time,
            start_dts: start_time,
            end_dts: end_time,
            kind,
            has_audio,
            has_video,
            nb: 1,
            dropped: 0,
            independent: None,
            first_key_frame: None,
            first_key_frame_pts: None,
        };
        if has_audio && !has_video {
            result.audio = Some(track);
        } else {
            result.video = Some(track);
        }
        if init_segment.tracks.is_some() || init_segment.init_pts.is_some() {
            result.init_segment = Some(init_segment);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decrypt::EncryptionMethod;
    use crate::mp4_tools::tests::{encrypted_video_entry, fragment, init_track, mp4_box};
    use crate::mp4_tools::{find_box, find_box_in, read_u32};

    fn avc_entry() -> Vec<u8> {
        let avcc = mp4_box(b"avcC", &[1, 0x64, 0x00, 0x1F, 0xFF, 0xE0, 0x00]);
        mp4_box(b"avc1", &[vec![0u8; 78], avcc].concat())
    }

    fn video_init() -> Vec<u8> {
        mp4_box(b"moov", &init_track(1, 90_000, b"vide", avc_entry()))
    }

    fn remux_at(remuxer: &mut PassthroughRemuxer, data: Vec<u8>, time_offset: f64) -> RemuxerResult {
        let demuxed = DemuxerResult {
            fragment: Some(data),
            ..Default::default()
        };
        remuxer.remux(
            demuxed,
            RemuxParams {
                time_offset,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_key_id_patched_into_init_segment() {
        let init = mp4_box(b"moov", &init_track(1, 90_000, b"vide", encrypted_video_entry([0; 16])));
        let decrypt_data = DecryptData {
            method: EncryptionMethod::SampleAesCtr,
            key: None,
            iv: None,
            key_id: Some(vec![0xAB; 16]),
        };
        let mut remuxer = PassthroughRemuxer::new(Quirks::default());
        remuxer.reset_init_segment(Some(&init), None, None, Some(&decrypt_data));

        let result = remux_at(&mut remuxer, fragment(1, 0, &[90_000], &[vec![0; 4]]), 0.0);
        let tracks = result.init_segment.unwrap().tracks.unwrap();
        let video = tracks.video.unwrap();
        assert!(video.encrypted);
        assert_eq!(video.codec.as_deref(), Some("avc1.64001f"));

        let patched = &video.init_segment;
        let stsd = find_box(patched, &[b"moov", b"trak", b"mdia", b"minf", b"stbl", b"stsd"])[0].clone();
        let encv = find_box_in(patched, stsd.start + 8..stsd.end, &[b"encv"])[0].clone();
        let tenc = find_box_in(patched, encv.start + 78..encv.end, &[b"sinf", b"schi", b"tenc"])[0].clone();
        assert_eq!(&patched[tenc.start + 8..tenc.start + 24], &[0xAB; 16]);
    }

    #[test]
    fn test_anchor_follows_decode_time() {
        let mut remuxer = PassthroughRemuxer::new(Quirks::default());
        remuxer.reset_init_segment(Some(&video_init()), None, None, None);

        let first = remux_at(&mut remuxer, fragment(1, 900_000, &[90_000], &[vec![0; 4]]), 0.0);
        let init = first.init_segment.unwrap();
        assert_eq!(init.init_pts, Some(900_000));
        assert!(init.tracks.is_some());
        let video = first.video.unwrap();
        assert_eq!((video.start_pts, video.end_pts), (0.0, 1.0));
        assert_eq!(video.kind, TrackType::Video);
        assert!(video.data2.is_none());

        let second = remux_at(&mut remuxer, fragment(1, 990_000, &[90_000], &[vec![0; 4]]), 1.0);
        assert!(second.init_segment.is_none());
        assert_eq!(second.video.unwrap().start_pts, 1.0);

        // Timestamps jump back: the anchor is rebuilt around the new decode time.
        let third = remux_at(&mut remuxer, fragment(1, 0, &[90_000], &[vec![0; 4]]), 2.0);
        assert_eq!(third.init_segment.unwrap().init_pts, Some(-180_000));
        assert_eq!(third.video.unwrap().start_pts, 2.0);
    }

    #[test]
    fn test_muxed_init_is_audiovideo() {
        let audio = init_track(2, 48_000, b"soun", mp4_box(b"mp4a", &[0u8; 28]));
        let video = init_track(1, 90_000, b"vide", avc_entry());
        let init = mp4_box(b"moov", &[video, audio].concat());
        let mut remuxer = PassthroughRemuxer::new(Quirks::default());
        remuxer.reset_init_segment(Some(&init), Some("mp4a.40.2"), None, None);

        let result = remux_at(&mut remuxer, fragment(1, 0, &[3_000], &[vec![0; 4]]), 0.0);
        let tracks = result.init_segment.unwrap().tracks.unwrap();
        let muxed = tracks.audiovideo.unwrap();
        assert_eq!(muxed.codec.as_deref(), Some("mp4a.40.2,avc1.64001f"));
        assert!(tracks.audio.is_none() && tracks.video.is_none());
        let track = result.video.unwrap();
        assert_eq!(track.kind, TrackType::Audiovideo);
        assert!(track.has_audio && track.has_video);
    }

    #[test]
    fn test_positive_dts_quirk_rebases_tfdt() {
        let quirks = Quirks {
            requires_positive_dts: true,
            ..Default::default()
        };
        let mut remuxer = PassthroughRemuxer::new(quirks);
        remuxer.reset_init_segment(Some(&video_init()), None, None, None);
        let result = remux_at(&mut remuxer, fragment(1, 900_000, &[90_000], &[vec![0; 4]]), 0.0);
        let data = result.video.unwrap().data1;
        let tfdt = find_box(&data, &[b"moof", b"traf", b"tfdt"])[0].clone();
        assert_eq!(read_u32(&data[tfdt], 4), Some(0));
    }

    #[test]
    fn test_missing_init_warns() {
        let mut remuxer = PassthroughRemuxer::new(Quirks::default());
        let result = remux_at(&mut remuxer, fragment(1, 0, &[3_000], &[vec![0; 4]]), 0.0);
        assert!(result.video.is_none());
        let warnings = remuxer.drain_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].reason.contains("initSegment"));
    }

    #[test]
    fn test_zero_duration_fragment_clears_next_timestamp() {
        let mut remuxer = PassthroughRemuxer::new(Quirks::default());
        remuxer.reset_init_segment(Some(&video_init()), None, None, None);
        remux_at(&mut remuxer, fragment(1, 0, &[90_000], &[vec![0; 4]]), 0.0);
        assert_eq!(remuxer.last_end_time, Some(1.0));

        let result = remux_at(&mut remuxer, fragment(1, 90_000, &[0], &[vec![0; 4]]), 1.0);
        let video = result.video.unwrap();
        assert_eq!((video.start_pts, video.end_pts), (1.0, 1.0));
        assert!(remuxer.last_end_time.is_none());
        let warnings = remuxer.drain_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].reason.contains("greater than zero"));
    }
}
