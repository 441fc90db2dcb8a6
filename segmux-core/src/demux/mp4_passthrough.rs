//! Fragmented MP4 input: media is forwarded untouched, only `emsg` events
//! and SEI captions are pulled out.

use tracing::debug;

use crate::config::MuxConfig;
use crate::error::{MuxError, Warnings};
use crate::mp4_tools::{self, CaptionSource};
use crate::track::{
    DemuxerResult, MetadataSample, MetadataSchema, MetadataTrack, UserdataTrack, VideoCodec, VideoTrack,
    AudioTrack,
};

use super::ts::{AUDIO_TRACK_ID, ID3_TRACK_ID, VIDEO_TRACK_ID};

pub fn probe(data: &[u8]) -> bool {
    mp4_tools::has_moof_data(data)
}

#[derive(Debug)]
pub struct Mp4PassthroughDemuxer {
    config: MuxConfig,
    video: VideoTrack,
    audio: AudioTrack,
    id3: MetadataTrack,
    text: UserdataTrack,
    captions: Option<CaptionSource>,
    time_offset: f64,
    remainder: Option<Vec<u8>>,
    warnings: Warnings,
}

impl Mp4PassthroughDemuxer {
    pub fn new(config: MuxConfig) -> Self {
        let mut demuxer = Self {
            config,
            video: VideoTrack::default(),
            audio: AudioTrack::default(),
            id3: MetadataTrack::default(),
            text: UserdataTrack::default(),
            captions: None,
            time_offset: 0.0,
            remainder: None,
            warnings: Warnings::default(),
        };
        demuxer.reset_init_segment(None, 0.0);
        demuxer
    }

    pub fn reset_init_segment(&mut self, init_segment: Option<&[u8]>, duration: f64) {
        self.video = VideoTrack::new(VIDEO_TRACK_ID, None, duration);
        self.video.input_timescale = 1;
        self.audio = AudioTrack::new(AUDIO_TRACK_ID, None, duration);
        self.audio.input_timescale = 1;
        self.id3 = MetadataTrack::new(ID3_TRACK_ID, None);
        self.id3.input_timescale = 1;
        self.text = UserdataTrack::new(1);
        self.captions = None;
        self.time_offset = 0.0;

        let Some(init_segment) = init_segment.filter(|init| !init.is_empty()) else {
            return;
        };
        let init_data = mp4_tools::parse_init_segment(init_segment);
        if let Some(video) = init_data.video() {
            self.video.id = video.id;
            self.video.timescale = video.timescale;
            self.video.codec = Some(video.codec.clone());
            let hevc = video.codec.starts_with("hvc1") || video.codec.starts_with("hev1");
            self.video.segment_codec = Some(if hevc { VideoCodec::Hevc } else { VideoCodec::Avc });
            self.captions = Some(CaptionSource {
                track_id: video.id,
                timescale: video.timescale,
                hevc,
            });
        }
        if let Some(audio) = init_data.audio() {
            self.audio.id = audio.id;
            self.audio.timescale = audio.timescale;
            self.audio.codec = Some(audio.codec.clone());
        }
        debug!(
            video = ?self.video.codec,
            audio = ?self.audio.codec,
            "fmp4 init segment parsed"
        );
    }

    pub fn reset_contiguity(&mut self) {
        self.remainder = None;
    }

    pub fn drain_warnings(&mut self) -> Vec<MuxError> {
        self.warnings.drain()
    }

    pub fn demux(&mut self, data: &[u8], time_offset: f64) -> DemuxerResult {
        self.time_offset = time_offset;
        let fragment = if self.config.progressive {
            let mut buffered = self.remainder.take().unwrap_or_default();
            buffered.extend_from_slice(data);
            let (valid, remainder) = mp4_tools::segment_valid_range(&buffered);
            self.remainder = remainder.map(|range| buffered[range].to_vec());
            buffered.truncate(valid.end);
            buffered
        } else {
            data.to_vec()
        };
        self.extract(fragment)
    }

    pub fn flush(&mut self) -> DemuxerResult {
        let fragment = self.remainder.take().unwrap_or_default();
        self.extract(fragment)
    }

    fn extract(&mut self, fragment: Vec<u8>) -> DemuxerResult {
        if !fragment.is_empty() {
            if self.config.enable_emsg_metadata_cues {
                self.extract_emsg(&fragment);
            }
            if let Some(source) = self.captions.filter(|_| self.config.enable_cea708_captions) {
                self.text.samples = mp4_tools::parse_samples(self.time_offset, &fragment, source, &mut self.warnings);
            }
        }
        DemuxerResult {
            audio: self.audio.take_samples(),
            video: self.video.take_samples(),
            id3: self.id3.take_samples(),
            text: self.text.take_samples(),
            fragment: Some(fragment),
        }
    }

    fn extract_emsg(&mut self, fragment: &[u8]) {
        for range in mp4_tools::find_box(fragment, &[b"emsg"]) {
            let Some(info) = mp4_tools::parse_emsg(&fragment[range]) else {
                self.warnings.parsing("unreadable emsg box");
                continue;
            };
            if !info.is_id3() {
                debug!(scheme = %info.scheme_id_uri, "ignoring emsg");
                continue;
            }
            let pts = info.start_time(self.time_offset);
            self.id3.samples.push(MetadataSample {
                pts,
                dts: pts,
                duration: info.duration(),
                data: info.payload,
                schema: MetadataSchema::Emsg,
            });
        }
    }
}
