//! Elementary audio streams (ADTS AAC, MPEG audio, AC-3) with ID3 framing.

use tracing::debug;

use super::{ac3, adts, mpeg_audio};
use crate::config::RationalTimestamp;
use crate::error::{MuxError, Warnings};
use crate::id3;
use crate::track::{
    AudioCodec, AudioTrack, DemuxerResult, MetadataSample, MetadataSchema, MetadataTrack, UserdataTrack, VideoTrack,
    MPEG_TS_CLOCK,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawAudioFormat {
    Aac,
    Mp3,
    Ac3,
}

impl RawAudioFormat {
    pub fn codec(self) -> AudioCodec {
        match self {
            Self::Aac => AudioCodec::Aac,
            Self::Mp3 => AudioCodec::Mp3,
            Self::Ac3 => AudioCodec::Ac3,
        }
    }

    /// Whether `data` looks like this format, after any leading ID3 tags.
    pub fn probe(self, data: &[u8]) -> bool {
        match self {
            Self::Aac => probe_aac(data),
            Self::Mp3 => probe_mp3(data),
            Self::Ac3 => ac3::probe(data),
        }
    }

    fn can_parse(self, data: &[u8], offset: usize) -> bool {
        match self {
            Self::Aac => adts::can_parse(data, offset),
            Self::Mp3 => mpeg_audio::can_parse(data, offset),
            Self::Ac3 => ac3::can_parse(data, offset),
        }
    }
}

fn id3_prefix_len(data: &[u8]) -> usize {
    id3::get_id3_data(data, 0).map_or(0, <[u8]>::len)
}

fn probe_aac(data: &[u8]) -> bool {
    let start = id3_prefix_len(data);
    // MPEG audio layer headers share the 0xFFF sync.
    if mpeg_audio::probe(data, start) {
        return false;
    }
    (start..data.len()).any(|offset| adts::probe(data, offset))
}

fn probe_mp3(data: &[u8]) -> bool {
    if ac3::probe(data) {
        return false;
    }
    let start = id3_prefix_len(data);
    (start..data.len()).any(|offset| mpeg_audio::probe(data, offset))
}

/// Timestamp the first frame of a segment, in 90kHz ticks.
fn base_pts(id3_timestamp: Option<i64>, time_offset: f64, init_pts: Option<&RationalTimestamp>) -> i64 {
    if let Some(timestamp) = id3_timestamp {
        return timestamp;
    }
    let init = init_pts.map_or(0, |ts| ts.to_timescale(MPEG_TS_CLOCK));
    (time_offset * MPEG_TS_CLOCK as f64).round() as i64 + init
}

/// Demuxer for one of the raw audio formats.
///
/// Frames are timed from the ID3 transport timestamp, or from the segment's
/// time offset, then advanced by one frame duration per frame.
#[derive(Debug)]
pub struct RawAudioDemuxer {
    format: RawAudioFormat,
    audio: AudioTrack,
    id3: MetadataTrack,
    cached: Option<Vec<u8>>,
    init_pts: Option<RationalTimestamp>,
    base_pts: Option<i64>,
    last_pts: Option<i64>,
    frame_index: usize,
    warnings: Warnings,
}

impl RawAudioDemuxer {
    pub fn new(format: RawAudioFormat) -> Self {
        let mut demuxer = Self {
            format,
            audio: AudioTrack::default(),
            id3: MetadataTrack::default(),
            cached: None,
            init_pts: None,
            base_pts: None,
            last_pts: None,
            frame_index: 0,
            warnings: Warnings::default(),
        };
        demuxer.reset_init_segment(None, 0.0);
        demuxer
    }

    pub fn format(&self) -> RawAudioFormat {
        self.format
    }

    pub fn reset_init_segment(&mut self, audio_codec: Option<&str>, duration: f64) {
        self.audio = AudioTrack::new(2, None, duration);
        self.audio.segment_codec = Some(self.format.codec());
        self.audio.manifest_codec = audio_codec.map(str::to_owned);
        self.id3 = MetadataTrack::new(3, None);
    }

    pub fn reset_timestamp(&mut self, default_init_pts: Option<RationalTimestamp>) {
        self.init_pts = default_init_pts;
        self.reset_contiguity();
    }

    pub fn reset_contiguity(&mut self) {
        self.base_pts = None;
        self.last_pts = None;
        self.frame_index = 0;
    }

    pub fn demux(&mut self, data: &[u8], time_offset: f64) -> DemuxerResult {
        let data = match self.cached.take() {
            Some(mut cached) => {
                cached.extend_from_slice(data);
                cached
            }
            None => data.to_vec(),
        };
        self.demux_buffer(&data, time_offset);
        self.result()
    }

    pub fn flush(&mut self) -> DemuxerResult {
        if let Some(cached) = self.cached.take() {
            debug!(bytes = cached.len(), "raw audio: flushing cached tail");
            self.demux_buffer(&cached, 0.0);
            self.cached = None;
        }
        self.result()
    }

    pub fn drain_warnings(&mut self) -> Vec<MuxError> {
        self.warnings.drain()
    }

    fn result(&mut self) -> DemuxerResult {
        DemuxerResult {
            audio: self.audio.take_samples(),
            video: VideoTrack::default(),
            id3: self.id3.take_samples(),
            text: UserdataTrack::default(),
            fragment: None,
        }
    }

    fn push_id3(&mut self, data: &[u8]) {
        let pts = self.last_pts.unwrap_or_default() as f64;
        self.id3.samples.push(MetadataSample {
            pts,
            dts: pts,
            data: data.to_vec(),
            schema: MetadataSchema::Id3,
            duration: None,
        });
    }

    fn demux_buffer(&mut self, data: &[u8], time_offset: f64) {
        let leading_id3 = id3::get_id3_data(data, 0);
        let timestamp = leading_id3.and_then(id3::get_id3_timestamp);
        let mut offset = leading_id3.map_or(0, <[u8]>::len);

        if self.base_pts.is_none() || (self.frame_index == 0 && timestamp.is_some()) {
            let base = base_pts(timestamp, time_offset, self.init_pts.as_ref());
            self.base_pts = Some(base);
            self.last_pts = Some(base);
        }
        let base = self.base_pts.unwrap_or_default();
        if let Some(tag) = leading_id3.filter(|tag| !tag.is_empty()) {
            self.push_id3(tag);
        }

        let length = data.len();
        let mut last_data_index = offset;
        while offset < length {
            if self.format.can_parse(data, offset) {
                match self.append_frame(data, offset, base) {
                    Some((frame_length, pts)) => {
                        self.frame_index += 1;
                        self.last_pts = Some(pts);
                        offset += frame_length;
                        last_data_index = offset;
                    }
                    None => offset = length,
                }
            } else if id3::can_parse(data, offset) {
                let Some(tag) = id3::get_id3_data(data, offset) else {
                    break;
                };
                let tag_len = tag.len();
                self.push_id3(tag);
                offset += tag_len;
                last_data_index = offset;
            } else {
                offset += 1;
            }
        }

        if last_data_index < length {
            let tail = &data[last_data_index..];
            match &mut self.cached {
                Some(cached) => cached.extend_from_slice(tail),
                None => self.cached = Some(tail.to_vec()),
            }
        }
    }

    /// Returns the frame length and its presentation time.
    fn append_frame(&mut self, data: &[u8], offset: usize, base: i64) -> Option<(usize, i64)> {
        let index = self.frame_index;
        match self.format {
            RawAudioFormat::Aac => {
                adts::init_track_config(&mut self.audio, data, offset, &mut self.warnings);
                match adts::append_frame(&mut self.audio, data, offset, base, index) {
                    adts::AppendedFrame::Complete { length, pts } => Some((length, pts)),
                    adts::AppendedFrame::Overflow(_) => None,
                }
            }
            RawAudioFormat::Mp3 => {
                let length = mpeg_audio::append_frame(&mut self.audio, data, offset, base, index)?;
                self.audio.samples.last().map(|sample| (length, sample.pts))
            }
            RawAudioFormat::Ac3 => {
                let length = ac3::append_frame(&mut self.audio, data, offset, base, index)?;
                self.audio.samples.last().map(|sample| (length, sample.pts))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::ac3::tests::ac3_frame;
    use crate::demux::adts::tests::adts_frame;
    use crate::demux::mpeg_audio::tests::mp3_frame;
    use crate::id3::tests::{build_tag, timestamp_tag};

    fn adts_stream(frames: usize) -> Vec<u8> {
        (0..frames).flat_map(|_| adts_frame(100)).collect()
    }

    #[test]
    fn test_probe_distinguishes_formats() {
        let aac = adts_stream(3);
        let mut mp3 = mp3_frame();
        mp3.extend(mp3_frame());
        let mut ac3 = timestamp_tag(0);
        ac3.extend(ac3_frame());

        assert!(RawAudioFormat::Aac.probe(&aac));
        assert!(!RawAudioFormat::Aac.probe(&mp3));
        assert!(RawAudioFormat::Mp3.probe(&mp3));
        assert!(!RawAudioFormat::Mp3.probe(&ac3));
        assert!(RawAudioFormat::Ac3.probe(&ac3));
        assert!(!RawAudioFormat::Ac3.probe(&aac));
    }

    #[test]
    fn test_id3_timestamp_sets_base_pts() {
        let mut data = timestamp_tag(900_000);
        data.extend(adts_stream(3));
        let mut demuxer = RawAudioDemuxer::new(RawAudioFormat::Aac);
        let result = demuxer.demux(&data, 5.0);

        assert_eq!(result.audio.samples.len(), 3);
        assert_eq!(result.audio.samples[0].pts, 900_000);
        assert_eq!(result.audio.samples[1].pts, 900_000 + 2090);
        assert_eq!(result.audio.samplerate, 44_100);
        assert_eq!(result.audio.segment_codec, Some(AudioCodec::Aac));
        assert_eq!(result.id3.samples.len(), 1);
        assert_eq!(result.id3.samples[0].pts, 900_000.0);
    }

    #[test]
    fn test_time_offset_and_init_pts_without_id3() {
        let mut demuxer = RawAudioDemuxer::new(RawAudioFormat::Aac);
        demuxer.reset_timestamp(Some(RationalTimestamp::new(1000, 1000)));
        let result = demuxer.demux(&adts_stream(1), 2.0);
        assert_eq!(result.audio.samples[0].pts, 2 * 90_000 + 90_000);
    }

    #[test]
    fn test_partial_frame_cached_until_flush() {
        let stream = adts_stream(2);
        let split = 150;
        let mut demuxer = RawAudioDemuxer::new(RawAudioFormat::Aac);

        let first = demuxer.demux(&stream[..split], 0.0);
        assert_eq!(first.audio.samples.len(), 1);
        let second = demuxer.demux(&stream[split..], 0.0);
        assert_eq!(second.audio.samples.len(), 1);
        assert_eq!(second.audio.samples[0].pts, 2090);

        demuxer.demux(&stream[..50], 0.0);
        let flushed = demuxer.flush();
        assert!(flushed.audio.samples.is_empty());
    }

    #[test]
    fn test_inline_id3_between_frames() {
        let mut data = mp3_frame();
        data.extend(build_tag(&[("TIT2", b"\x03song".to_vec())]));
        data.extend(mp3_frame());
        let mut demuxer = RawAudioDemuxer::new(RawAudioFormat::Mp3);
        let result = demuxer.demux(&data, 0.0);
        assert_eq!(result.audio.samples.len(), 2);
        assert_eq!(result.id3.samples.len(), 1);
        // Stamped with the frame before it.
        assert_eq!(result.id3.samples[0].pts, 0.0);
    }
}
