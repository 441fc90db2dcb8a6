//! Full remuxer: elementary audio/video samples in, `moof`+`mdat` out.
//!
//! Owns the session's timestamp anchor and the continuity state that keeps
//! consecutive fragments gapless.

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{
    flush_metadata_cues, flush_userdata_cues, normalize_pts, normalize_pts_f64, silence, InitSegmentData,
    InitSegmentTrack, InitTracks, RemuxParams, RemuxedTrack, RemuxerResult, TrackMetadata, TrackType,
    PTS_WRAP_THRESHOLD,
};
use crate::config::{MuxConfig, PlaylistType, Quirks, RationalTimestamp, TypeSupported};
use crate::demux::adts::AAC_FRAME_SAMPLES;
use crate::error::{MuxError, Warnings};
use crate::mp4_generator::{self, Mp4Sample, TrackConfig};
use crate::track::{AudioCodec, AudioSample, AudioTrack, DemuxerResult, VideoSample, VideoTrack};

const MPEG_AUDIO_FRAME_SAMPLES: u32 = 1152;
const AC3_FRAME_SAMPLES: u32 = 1536;
/// Longest audio gap filled with silence.
const MAX_SILENT_FRAME_DURATION_MS: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VideoTrackConfig {
    width: u32,
    height: u32,
    pixel_ratio: (u32, u32),
}

impl VideoTrackConfig {
    fn of(track: &VideoTrack) -> Self {
        Self {
            width: track.width,
            height: track.height,
            pixel_ratio: track.pixel_ratio,
        }
    }
}

/// Lowest PTS of the access units, unwrapping a rollover inside the list.
fn video_start_pts(samples: &[VideoSample]) -> i64 {
    let Some(first) = samples.first() else {
        return 0;
    };
    let mut rollover = false;
    let start = samples.iter().fold(first.pts, |min_pts, sample| {
        let delta = sample.pts - min_pts;
        if delta < -PTS_WRAP_THRESHOLD {
            rollover = true;
            normalize_pts(min_pts, Some(sample.pts))
        } else if delta > 0 {
            min_pts
        } else {
            sample.pts
        }
    });
    if rollover {
        debug!("PTS rollover detected");
    }
    start
}

#[derive(Debug)]
pub struct FullRemuxer {
    config: MuxConfig,
    type_supported: TypeSupported,
    quirks: Quirks,
    is_generated: bool,
    init_pts: Option<RationalTimestamp>,
    init_dts: Option<RationalTimestamp>,
    /// Input timescale ticks, relative to the anchor.
    next_video_dts: Option<i64>,
    next_audio_pts: Option<f64>,
    video_sample_duration: Option<i64>,
    is_audio_contiguous: bool,
    is_video_contiguous: bool,
    video_track_config: Option<VideoTrackConfig>,
    audio_sequence: u32,
    video_sequence: u32,
    /// Samples not yet remuxed, carried into the next call.
    pending_audio: Vec<AudioSample>,
    pending_video: Vec<VideoSample>,
    pending_dropped: usize,
    warnings: Warnings,
}

impl FullRemuxer {
    pub fn new(config: MuxConfig, type_supported: TypeSupported, quirks: Quirks) -> Self {
        Self {
            config,
            type_supported,
            quirks,
            is_generated: false,
            init_pts: None,
            init_dts: None,
            next_video_dts: None,
            next_audio_pts: None,
            video_sample_duration: None,
            is_audio_contiguous: false,
            is_video_contiguous: false,
            video_track_config: None,
            audio_sequence: 0,
            video_sequence: 0,
            pending_audio: Vec::new(),
            pending_video: Vec::new(),
            pending_dropped: 0,
            warnings: Warnings::default(),
        }
    }

    pub fn init_pts(&self) -> Option<RationalTimestamp> {
        self.init_pts
    }

    pub fn reset_init_segment(&mut self) {
        self.invalidate_init_segment();
        self.audio_sequence = 0;
        self.video_sequence = 0;
        self.pending_audio.clear();
        self.pending_video.clear();
        self.pending_dropped = 0;
    }

    fn invalidate_init_segment(&mut self) {
        debug!("init segment invalidated");
        self.is_generated = false;
        self.video_track_config = None;
    }

    pub fn reset_timestamp(&mut self, default_init_pts: Option<RationalTimestamp>) {
        debug!(?default_init_pts, "initPTS & initDTS reset");
        self.init_pts = default_init_pts;
        self.init_dts = default_init_pts;
    }

    pub fn reset_next_timestamp(&mut self) {
        debug!("reset next timestamp");
        self.is_video_contiguous = false;
        self.is_audio_contiguous = false;
    }

    pub fn drain_warnings(&mut self) -> Vec<MuxError> {
        self.warnings.drain()
    }

    pub fn remux(&mut self, demuxed: DemuxerResult, params: RemuxParams) -> Result<RemuxerResult, MuxError> {
        let DemuxerResult {
            mut audio,
            mut video,
            mut id3,
            mut text,
            ..
        } = demuxed;
        if !self.pending_video.is_empty() {
            let mut held = std::mem::take(&mut self.pending_video);
            held.append(&mut video.samples);
            video.samples = held;
        }
        if !self.pending_audio.is_empty() {
            let mut held = std::mem::take(&mut self.pending_audio);
            held.append(&mut audio.samples);
            audio.samples = held;
        }
        video.dropped += std::mem::take(&mut self.pending_dropped);

        let time_offset = params.time_offset;
        let mut result = RemuxerResult::default();
        let mut audio_time_offset = time_offset;
        let mut video_time_offset = time_offset;

        let has_audio = audio.pid.is_some();
        let has_video = video.pid.is_some();
        let length = video.samples.len();
        let enough_audio = !audio.samples.is_empty();
        let enough_video = (params.flush && length > 0) || length > 1;
        let can_generate =
            ((!has_audio || enough_audio) && (!has_video || enough_video)) || self.is_generated || params.flush;

        if can_generate {
            if self.is_generated {
                let video_changed = match self.video_track_config {
                    Some(config) => config != VideoTrackConfig::of(&video),
                    None => enough_video,
                };
                if video_changed || (self.next_audio_pts.is_none() && enough_audio) {
                    self.invalidate_init_segment();
                }
            }
            if !self.is_generated {
                result.init_segment =
                    self.generate_init_segment(&mut audio, &mut video, time_offset, params.accurate_time_offset)?;
            }

            let is_video_contiguous = self.is_video_contiguous;
            let mut first_key_frame = None;
            let mut first_key_frame_pts = None;
            if enough_video {
                first_key_frame = video.samples.iter().position(|sample| sample.key);
                if !is_video_contiguous && self.config.force_key_frame_on_discontinuity {
                    result.independent = Some(true);
                    match first_key_frame {
                        Some(index) if index > 0 => {
                            warn!("Dropped {index} out of {length} video samples due to a missing keyframe");
                            let start_pts = video_start_pts(&video.samples);
                            video.samples.drain(..index);
                            video.dropped += index;
                            video_time_offset +=
                                (video.samples[0].pts - start_pts) as f64 / video.input_timescale.max(1) as f64;
                            first_key_frame_pts = Some(video_time_offset);
                        }
                        Some(_) => {}
                        None => {
                            warn!("No keyframe found out of {length} video samples");
                            result.independent = Some(false);
                        }
                    }
                }
            }

            if self.is_generated {
                if enough_audio && enough_video {
                    let start_pts = video_start_pts(&video.samples);
                    let ts_delta = normalize_pts(audio.samples[0].pts, Some(start_pts)) - start_pts;
                    let av_delta = ts_delta as f64 / video.input_timescale.max(1) as f64;
                    audio_time_offset += av_delta.max(0.0);
                    video_time_offset += (-av_delta).max(0.0);
                }

                if enough_audio {
                    let aligned =
                        has_video || enough_video || params.playlist_type == PlaylistType::Audio;
                    let remuxed_audio = self.remux_audio(
                        &mut audio,
                        audio_time_offset,
                        self.is_audio_contiguous,
                        params.accurate_time_offset,
                        aligned.then_some(video_time_offset),
                    );
                    if enough_video {
                        let audio_length = remuxed_audio.as_ref().map_or(0.0, |a| a.end_pts - a.start_pts);
                        result.video = self.remux_video(&mut video, video_time_offset, is_video_contiguous, audio_length);
                    }
                    result.audio = remuxed_audio;
                } else if enough_video {
                    result.video = self.remux_video(&mut video, video_time_offset, is_video_contiguous, 0.0);
                }

                if let Some(remuxed) = result.video.as_mut() {
                    remuxed.first_key_frame = first_key_frame;
                    remuxed.independent = Some(first_key_frame.is_some());
                    remuxed.first_key_frame_pts = first_key_frame_pts;
                }
            }
        }

        if let (true, Some(init_pts), Some(init_dts)) = (self.is_generated, self.init_pts, self.init_dts) {
            if self.config.enable_id3_metadata_cues && !id3.samples.is_empty() {
                result.id3 = flush_metadata_cues(&mut id3, time_offset, &init_pts, &init_dts);
            }
            if self.config.enable_cea708_captions && !text.samples.is_empty() {
                result.text = flush_userdata_cues(&mut text, time_offset, &init_pts);
            }
        }

        if !video.samples.is_empty() || !audio.samples.is_empty() {
            debug!(
                video = video.samples.len(),
                audio = audio.samples.len(),
                "holding samples for the next fragment"
            );
        }
        self.pending_video = std::mem::take(&mut video.samples);
        self.pending_audio = std::mem::take(&mut audio.samples);
        if !self.pending_video.is_empty() {
            self.pending_dropped = video.dropped;
        }
        Ok(result)
    }

    // ========================================================================
    // Init segment
    // ========================================================================

    fn generate_init_segment(
        &mut self,
        audio: &mut AudioTrack,
        video: &mut VideoTrack,
        time_offset: f64,
        accurate_time_offset: bool,
    ) -> Result<Option<InitSegmentData>, MuxError> {
        let current = self.init_pts;
        let mut compute = current.is_none() || accurate_time_offset;
        let mut init_pts: Option<i64> = None;
        let mut init_dts: Option<i64> = None;
        let mut timescale = 0;
        let mut track_id = 0;
        let mut tracks = InitTracks::default();

        if audio.is_configured() && !audio.samples.is_empty() {
            audio.timescale = audio.samplerate;
            let raw_mpeg = audio.segment_codec == Some(AudioCodec::Mp3) && self.type_supported.mpeg;
            let mut container = "audio/mp4";
            match audio.segment_codec {
                Some(AudioCodec::Mp3) if raw_mpeg => {
                    container = "audio/mpeg";
                    audio.codec = Some(String::new());
                }
                Some(AudioCodec::Mp3) => audio.codec = Some("mp3".to_string()),
                Some(AudioCodec::Ac3) => audio.codec = Some("ac-3".to_string()),
                _ => {}
            }
            let init_segment = if raw_mpeg {
                Bytes::new()
            } else {
                Bytes::from(mp4_generator::init_segment(&[TrackConfig::Audio(&*audio)])?)
            };
            tracks.audio = Some(InitSegmentTrack {
                id: "audio",
                container,
                codec: audio.codec.clone(),
                init_segment,
                encrypted: false,
                metadata: TrackMetadata {
                    channel_count: Some(audio.channel_count),
                    ..Default::default()
                },
            });
            if compute {
                track_id = audio.id;
                timescale = audio.input_timescale;
                if current.map_or(true, |anchor| anchor.timescale != timescale) {
                    let start = audio.samples[0].pts - (timescale as f64 * time_offset).round() as i64;
                    init_pts = Some(start);
                    init_dts = Some(start);
                } else {
                    compute = false;
                }
            }
        }

        if video.has_parameter_sets() && !video.samples.is_empty() {
            video.timescale = video.input_timescale;
            let init_segment = Bytes::from(mp4_generator::init_segment(&[TrackConfig::Video(&*video)])?);
            tracks.video = Some(InitSegmentTrack {
                id: "main",
                container: "video/mp4",
                codec: video.codec.clone(),
                init_segment,
                encrypted: false,
                metadata: TrackMetadata {
                    width: Some(video.width),
                    height: Some(video.height),
                    ..Default::default()
                },
            });
            if compute {
                track_id = video.id;
                timescale = video.input_timescale;
                if current.map_or(true, |anchor| anchor.timescale != timescale) {
                    let start_pts = video_start_pts(&video.samples);
                    let start_offset = (timescale as f64 * time_offset).round() as i64;
                    let dts = normalize_pts(video.samples[0].dts, Some(start_pts)) - start_offset;
                    let pts = start_pts - start_offset;
                    init_dts = Some(init_dts.map_or(dts, |current| current.min(dts)));
                    init_pts = Some(init_pts.map_or(pts, |current| current.min(pts)));
                } else {
                    compute = false;
                }
            }
            self.video_track_config = Some(VideoTrackConfig::of(video));
        }

        if tracks.is_empty() {
            return Ok(None);
        }
        self.is_generated = true;
        let mut data = InitSegmentData {
            tracks: Some(tracks),
            ..Default::default()
        };
        if let (true, Some(pts), Some(dts)) = (compute, init_pts, init_dts) {
            info!(init_pts = pts, init_dts = dts, timescale, track_id, "timestamp anchor set");
            self.init_pts = Some(RationalTimestamp {
                base_time: pts,
                timescale,
                track_id: Some(track_id),
            });
            self.init_dts = Some(RationalTimestamp {
                base_time: dts,
                timescale,
                track_id: Some(track_id),
            });
            data.init_pts = Some(pts);
            data.timescale = Some(timescale);
            data.track_id = Some(track_id);
        }
        Ok(Some(data))
    }

    // ========================================================================
    // Video
    // ========================================================================

    fn remux_video(
        &mut self,
        track: &mut VideoTrack,
        time_offset: f64,
        mut contiguous: bool,
        audio_track_length: f64,
    ) -> Option<RemuxedTrack> {
        let init_pts = self.init_pts?;
        let mut samples = std::mem::take(&mut track.samples);
        if samples.is_empty() {
            return None;
        }
        let timescale = track.input_timescale.max(1);
        let scale = timescale as f64;
        let init_time = init_pts.to_timescale(timescale);
        let nb_samples = samples.len();

        let next_dts = match self.next_video_dts {
            Some(next) if contiguous => next,
            _ => {
                contiguous = contiguous && self.next_video_dts.is_some();
                let pts = (time_offset * scale).round() as i64;
                let cts = samples[0].pts - normalize_pts(samples[0].dts, Some(samples[0].pts));
                pts - cts
            }
        };

        let mut sort_samples = false;
        for i in 0..nb_samples {
            let sample = &mut samples[i];
            sample.pts = normalize_pts(sample.pts - init_time, Some(next_dts));
            sample.dts = normalize_pts(sample.dts - init_time, Some(next_dts));
            if i > 0 && samples[i].dts < samples[i - 1].dts {
                sort_samples = true;
            }
        }
        if sort_samples {
            samples.sort_by(|a, b| a.dts.cmp(&b.dts).then(a.pts.cmp(&b.pts)));
        }

        let mut first_dts = samples[0].dts;
        let last_input_dts = samples[nb_samples - 1].dts;
        let input_duration = last_input_dts - first_dts;
        let average_duration = if input_duration != 0 {
            (input_duration as f64 / (nb_samples - 1) as f64).round() as i64
        } else {
            self.video_sample_duration.unwrap_or(timescale as i64 / 30)
        };

        if contiguous {
            let delta = first_dts - next_dts;
            let found_hole = delta > average_duration;
            let found_overlap = delta < -1;
            if found_hole || found_overlap {
                let ms = (delta.abs() as f64 * 1000.0 / scale).round();
                if found_hole {
                    warn!("AVC: {ms} ms ({delta}dts) hole between fragments detected at {time_offset:.3}");
                } else {
                    warn!("AVC: {ms} ms ({delta}dts) overlapping between fragments detected at {time_offset:.3}");
                }
                if !found_overlap || next_dts >= samples[0].pts {
                    first_dts = next_dts;
                    let first_pts = samples[0].pts - delta;
                    if found_hole {
                        samples[0].dts = first_dts;
                        samples[0].pts = first_pts;
                    } else {
                        for sample in samples.iter_mut() {
                            if sample.dts > first_pts {
                                break;
                            }
                            sample.dts -= delta;
                            sample.pts -= delta;
                        }
                    }
                    debug!(first_pts, first_dts, "Video: initial PTS/DTS adjusted");
                }
            }
        }
        first_dts = first_dts.max(0);

        let mut payload = 0usize;
        let mut dts_step = first_dts;
        let mut min_pts = i64::MAX;
        let mut max_pts = i64::MIN;
        for sample in samples.iter_mut() {
            payload += sample.mdat_size();
            if sample.dts < dts_step {
                sample.dts = dts_step;
                dts_step += (average_duration / 4).max(1);
            } else {
                dts_step = sample.dts;
            }
            min_pts = min_pts.min(sample.pts);
            max_pts = max_pts.max(sample.pts);
        }
        let last_dts = samples[nb_samples - 1].dts;

        let mut mdat = match mp4_generator::allocate_mdat("video", payload) {
            Ok(mdat) => mdat,
            Err(e) => {
                self.warnings.push(e.into());
                return None;
            }
        };

        let mut output = Vec::with_capacity(nb_samples);
        let mut stretched_last_frame = false;
        let mut sample_duration = 0i64;
        let (mut min_dts_delta, mut max_dts_delta) = (i64::MAX, i64::MIN);
        let (mut min_pts_delta, mut max_pts_delta) = (i64::MAX, i64::MIN);
        for i in 0..nb_samples {
            let sample = &samples[i];
            for unit in &sample.units {
                mdat.extend_from_slice(&(unit.data.len() as u32).to_be_bytes());
                mdat.extend_from_slice(&unit.data);
            }

            let pts_delta;
            if i + 1 < nb_samples {
                sample_duration = samples[i + 1].dts - sample.dts;
                pts_delta = samples[i + 1].pts - sample.pts;
            } else {
                let last_frame_duration = if i > 0 { sample.dts - samples[i - 1].dts } else { average_duration };
                pts_delta = if i > 0 { sample.pts - samples[i - 1].pts } else { average_duration };
                sample_duration = last_frame_duration;
                if let Some(next_audio) = self.next_audio_pts.filter(|_| self.config.stretch_short_video_track) {
                    let gap_tolerance = (self.config.max_buffer_hole * scale).floor();
                    let frame_end = if audio_track_length > 0.0 {
                        min_pts as f64 + audio_track_length * scale
                    } else {
                        next_audio
                    };
                    let delta_to_frame_end = frame_end - sample.pts as f64;
                    if delta_to_frame_end > gap_tolerance {
                        let stretched = delta_to_frame_end as i64 - last_frame_duration;
                        if stretched >= 0 {
                            sample_duration = stretched;
                            stretched_last_frame = true;
                        }
                        debug!(
                            "It is approximately {} ms to the next segment; using duration {} ms for the last video frame.",
                            delta_to_frame_end / 90.0,
                            sample_duration as f64 / 90.0
                        );
                    }
                }
            }
            let cts = (sample.pts - sample.dts) as i32;
            min_dts_delta = min_dts_delta.min(sample_duration);
            max_dts_delta = max_dts_delta.max(sample_duration);
            min_pts_delta = min_pts_delta.min(pts_delta);
            max_pts_delta = max_pts_delta.max(pts_delta);
            output.push(Mp4Sample::new(
                sample.key,
                sample_duration.max(0) as u32,
                sample.mdat_size() as u32,
                cts,
            ));
        }

        if self.quirks.safari_webkit
            && max_pts_delta - min_pts_delta < max_dts_delta - min_dts_delta
            && (average_duration as f64 / max_dts_delta.max(1) as f64) < 0.025
            && output.first().is_some_and(|s| s.cts == 0)
        {
            warn!("Found irregular gaps in sample duration. Using PTS instead of DTS to determine MP4 sample duration.");
            let mut dts = first_dts;
            let len = output.len();
            for i in 0..len {
                let next_dts = dts + output[i].duration as i64;
                let pts = dts + output[i].cts as i64;
                output[i].duration = if i + 1 < len {
                    let next_pts = next_dts + output[i + 1].cts as i64;
                    (next_pts - pts).max(0) as u32
                } else if i > 0 {
                    output[i - 1].duration
                } else {
                    average_duration.max(0) as u32
                };
                output[i].cts = 0;
                dts = next_dts;
            }
        }

        let sample_duration = if stretched_last_frame || sample_duration == 0 {
            average_duration
        } else {
            sample_duration
        };
        let next_dts = last_dts + sample_duration;
        self.next_video_dts = Some(next_dts);
        self.video_sample_duration = Some(sample_duration);
        self.is_video_contiguous = true;

        let sequence = self.video_sequence;
        self.video_sequence += 1;
        let moof = mp4_generator::moof(sequence, first_dts as u64, track.id, &output);
        let dropped = std::mem::take(&mut track.dropped);
        Some(RemuxedTrack {
            data1: Bytes::from(moof),
            data2: Some(Bytes::from(mdat)),
            start_pts: min_pts as f64 / scale,
            end_pts: (max_pts + sample_duration) as f64 / scale,
            start_dts: first_dts as f64 / scale,
            end_dts: next_dts as f64 / scale,
            kind: TrackType::Video,
            has_audio: false,
            has_video: true,
            nb: output.len(),
            dropped,
            independent: None,
            first_key_frame: None,
            first_key_frame_pts: None,
        })
    }

    // ========================================================================
    // Audio
    // ========================================================================

    fn remux_audio(
        &mut self,
        track: &mut AudioTrack,
        time_offset: f64,
        contiguous: bool,
        accurate_time_offset: bool,
        video_time_offset: Option<f64>,
    ) -> Option<RemuxedTrack> {
        let init_pts = self.init_pts?;
        let input_timescale = track.input_timescale.max(1) as f64;
        let mp4_timescale = if track.samplerate > 0 { track.samplerate as f64 } else { input_timescale };
        let scale_factor = input_timescale / mp4_timescale;
        let frame_samples = match track.segment_codec {
            Some(AudioCodec::Aac) => AAC_FRAME_SAMPLES,
            Some(AudioCodec::Ac3) => AC3_FRAME_SAMPLES,
            _ => MPEG_AUDIO_FRAME_SAMPLES,
        };
        let input_sample_duration = frame_samples as f64 * scale_factor;
        let is_aac = track.segment_codec == Some(AudioCodec::Aac);
        let raw_mpeg = track.segment_codec == Some(AudioCodec::Mp3) && self.type_supported.mpeg;
        let aligned_with_video = video_time_offset.is_some();

        let mut next_audio_pts = self.next_audio_pts.filter(|pts| *pts != 0.0).unwrap_or(-1.0);
        let time_offset_ticks = time_offset * input_timescale;
        let init_time = init_pts.base_time as f64 * input_timescale / init_pts.timescale.max(1) as f64;

        let mut samples: Vec<(f64, Vec<u8>)> = std::mem::take(&mut track.samples)
            .into_iter()
            .map(|sample| (sample.pts as f64, sample.unit))
            .collect();

        let contiguous = contiguous
            || (!samples.is_empty()
                && next_audio_pts > 0.0
                && ((accurate_time_offset && (time_offset_ticks - next_audio_pts).abs() < 9000.0)
                    || (normalize_pts_f64(samples[0].0 - init_time, time_offset_ticks) - next_audio_pts).abs()
                        < 20.0 * input_sample_duration));
        self.is_audio_contiguous = contiguous;

        for sample in &mut samples {
            sample.0 = normalize_pts_f64(sample.0 - init_time, time_offset_ticks);
        }

        if !contiguous || next_audio_pts < 0.0 {
            samples.retain(|sample| sample.0 >= 0.0);
            if samples.is_empty() {
                return None;
            }
            next_audio_pts = if video_time_offset == Some(0.0) {
                0.0
            } else if accurate_time_offset && !aligned_with_video {
                time_offset_ticks.max(0.0)
            } else {
                samples[0].0
            };
        }

        if is_aac {
            let max_drift = self.config.max_audio_frames_drift as f64;
            let codec = track.codec.clone().or_else(|| track.manifest_codec.clone());
            let mut next_pts = next_audio_pts;
            let mut i = 0;
            while i < samples.len() {
                let pts = samples[i].0;
                let delta = pts - next_pts;
                let delta_ms = 1000.0 * delta / input_timescale;

                if delta <= -max_drift * input_sample_duration && aligned_with_video {
                    if i == 0 {
                        warn!(
                            "Audio frame @ {:.3}s overlaps nextAudioPts by {} ms.",
                            pts / input_timescale,
                            delta_ms.round()
                        );
                        next_audio_pts = pts;
                        next_pts = pts;
                        self.next_audio_pts = Some(pts);
                    }
                } else if delta >= max_drift * input_sample_duration
                    && delta_ms.abs() < MAX_SILENT_FRAME_DURATION_MS
                    && aligned_with_video
                {
                    let mut missing = (delta / input_sample_duration).round() as usize;
                    next_pts = pts - missing as f64 * input_sample_duration;
                    if next_pts < 0.0 && missing > 0 {
                        missing -= 1;
                        next_pts += input_sample_duration;
                    }
                    if i == 0 {
                        next_audio_pts = next_pts;
                        self.next_audio_pts = Some(next_pts);
                    }
                    warn!(
                        "Injecting {missing} audio frame @ {:.3}s due to {} ms gap.",
                        next_pts / input_timescale,
                        delta_ms.round()
                    );
                    for _ in 0..missing {
                        let stamp = next_pts.max(0.0);
                        let fill = match silence::silent_frame(codec.as_deref(), track.channel_count) {
                            Some(frame) => frame.to_vec(),
                            None => {
                                debug!("Unable to get silent frame for given audio codec; duplicating last frame instead.");
                                samples[i].1.clone()
                            }
                        };
                        samples.insert(i, (stamp, fill));
                        next_pts += input_sample_duration;
                        i += 1;
                    }
                }
                samples[i].0 = next_pts;
                next_pts += input_sample_duration;
                i += 1;
            }
        }

        let payload: usize = samples.iter().map(|sample| sample.1.len()).sum();
        if payload == 0 {
            return None;
        }
        let mut mdat = match mp4_generator::allocate_mdat("audio", payload) {
            Ok(mdat) => mdat,
            Err(e) => {
                self.warnings.push(e.into());
                return None;
            }
        };
        if raw_mpeg {
            mdat.clear();
        }

        let mut output: Vec<Mp4Sample> = Vec::with_capacity(samples.len());
        let mut first_pts = None;
        let mut last_pts: Option<f64> = None;
        for (pts, unit) in &samples {
            let mut pts = *pts;
            match last_pts {
                Some(last) => {
                    if let Some(previous) = output.last_mut() {
                        previous.duration = ((pts - last) / scale_factor).round().max(0.0) as u32;
                    }
                }
                None => {
                    if contiguous && is_aac {
                        pts = next_audio_pts;
                    }
                    first_pts = Some(pts);
                }
            }
            mdat.extend_from_slice(unit);
            output.push(Mp4Sample::new(true, frame_samples, unit.len() as u32, 0));
            last_pts = Some(pts);
        }
        let (first_pts, last_pts) = (first_pts?, last_pts?);
        let last_duration = output.last().map_or(0, |sample| sample.duration);
        let next = last_pts + scale_factor * last_duration as f64;
        self.next_audio_pts = Some(next);

        let moof = if raw_mpeg {
            Vec::new()
        } else {
            let sequence = self.audio_sequence;
            self.audio_sequence += 1;
            let base_time = (first_pts / scale_factor).round().max(0.0) as u64;
            mp4_generator::moof(sequence, base_time, track.id, &output)
        };
        self.is_audio_contiguous = true;

        let start = first_pts / input_timescale;
        let end = next / input_timescale;
        Some(RemuxedTrack {
            data1: Bytes::from(moof),
            data2: Some(Bytes::from(mdat)),
            start_pts: start,
            end_pts: end,
            start_dts: start,
            end_dts: end,
            kind: TrackType::Audio,
            has_audio: true,
            has_video: false,
            nb: output.len(),
            dropped: 0,
            independent: None,
            first_key_frame: None,
            first_key_frame_pts: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mp4_tools::{find_box, read_u32};
    use crate::track::{MetadataSample, MetadataSchema, NalUnit, VideoCodec};
    use crate::video::avc::tests::{PPS, SPS_1280X720};

    pub(crate) fn video_track(samples: &[(i64, i64, bool)]) -> VideoTrack {
        let mut track = VideoTrack::new(1, Some(0x41), 10.0);
        track.segment_codec = Some(VideoCodec::Avc);
        track.codec = Some("avc1.64001f".to_string());
        track.sps = vec![SPS_1280X720.to_vec()];
        track.pps = vec![PPS.to_vec()];
        track.width = 1280;
        track.height = 720;
        track.samples = samples
            .iter()
            .map(|&(pts, dts, key)| VideoSample {
                pts,
                dts,
                key,
                frame: true,
                units: vec![NalUnit {
                    kind: if key { 5 } else { 1 },
                    data: vec![if key { 0x65 } else { 0x41 }, 0x88, 0x84],
                }],
            })
            .collect();
        track
    }

    pub(crate) fn aac_track(pts: &[i64]) -> AudioTrack {
        let mut track = AudioTrack::new(2, Some(0x42), 10.0);
        track.segment_codec = Some(AudioCodec::Aac);
        track.codec = Some("mp4a.40.2".to_string());
        track.samplerate = 44_100;
        track.channel_count = 2;
        track.config = vec![0x12, 0x10];
        track.samples = pts
            .iter()
            .map(|&pts| AudioSample {
                pts,
                dts: pts,
                unit: vec![0x21; 20],
            })
            .collect();
        track
    }

    fn demuxed(audio: AudioTrack, video: VideoTrack) -> DemuxerResult {
        DemuxerResult {
            audio,
            video,
            ..Default::default()
        }
    }

    fn remuxer() -> FullRemuxer {
        FullRemuxer::new(MuxConfig::default(), TypeSupported::default(), Quirks::default())
    }

    fn params(time_offset: f64) -> RemuxParams {
        RemuxParams {
            time_offset,
            ..Default::default()
        }
    }

    fn no_audio() -> AudioTrack {
        AudioTrack::new(2, None, 0.0)
    }

    #[test]
    fn test_init_segment_once_with_anchor() {
        let mut remuxer = remuxer();
        let video = video_track(&[(90_000, 90_000, true), (93_000, 93_000, false), (96_000, 96_000, false)]);
        let first = remuxer.remux(demuxed(no_audio(), video), params(0.0)).unwrap();

        let init = first.init_segment.expect("init segment");
        assert_eq!(init.init_pts, Some(90_000));
        assert_eq!(init.timescale, Some(90_000));
        let tracks = init.tracks.unwrap();
        let video_init = tracks.video.unwrap();
        assert_eq!(video_init.container, "video/mp4");
        assert_eq!(video_init.metadata.width, Some(1280));
        assert!(tracks.audio.is_none());

        let remuxed = first.video.expect("video fragment");
        assert_eq!(remuxed.nb, 3);
        assert_eq!(remuxed.independent, Some(true));
        assert_eq!(remuxed.first_key_frame, Some(0));

        let video = video_track(&[(99_000, 99_000, false), (102_000, 102_000, false)]);
        let second = remuxer.remux(demuxed(no_audio(), video), params(0.1)).unwrap();
        assert!(second.init_segment.is_none());
        let next = second.video.unwrap();
        assert!((next.start_dts - remuxed.end_dts).abs() < 1e-9);
    }

    #[test]
    fn test_single_frame_held_until_next_call() {
        let mut remuxer = remuxer();
        let first = remuxer
            .remux(demuxed(no_audio(), video_track(&[(90_000, 90_000, true)])), params(0.0))
            .unwrap();
        assert!(first.is_empty());

        let second = remuxer
            .remux(demuxed(no_audio(), video_track(&[(93_000, 93_000, false)])), params(0.0))
            .unwrap();
        assert!(second.init_segment.is_some());
        assert_eq!(second.video.unwrap().nb, 2);
    }

    #[test]
    fn test_dts_monotonic_after_reorder() {
        let mut remuxer = remuxer();
        // B-frame stream with one decode-order glitch.
        let video = video_track(&[
            (96_000, 90_000, true),
            (90_000, 96_000, false),
            (93_000, 93_000, false),
            (102_000, 99_000, false),
        ]);
        let result = remuxer.remux(demuxed(no_audio(), video), params(0.0)).unwrap();
        let remuxed = result.video.unwrap();
        let moof = &remuxed.data1;
        let trun = find_box(moof, &[b"moof", b"traf", b"trun"])[0].clone();
        let count = read_u32(&moof[trun.clone()], 4).unwrap() as usize;
        assert_eq!(count, 4);
        for i in 0..count {
            let duration = read_u32(&moof[trun.clone()], 12 + i * 16).unwrap();
            assert!(duration > 0, "sample {i} has zero duration");
        }
        assert!(remuxed.end_dts > remuxed.start_dts);
    }

    #[test]
    fn test_leading_non_keyframes_dropped() {
        let mut remuxer = remuxer();
        let video = video_track(&[(90_000, 90_000, false), (93_000, 93_000, false), (96_000, 96_000, true), (99_000, 99_000, false)]);
        let result = remuxer.remux(demuxed(no_audio(), video), params(0.0)).unwrap();
        let remuxed = result.video.unwrap();
        assert_eq!(remuxed.nb, 2);
        assert_eq!(remuxed.dropped, 2);
        assert_eq!(remuxed.first_key_frame, Some(2));
        assert!((remuxed.first_key_frame_pts.unwrap() - 6_000.0 / 90_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_audio_gap_filled_with_silence() {
        let mut remuxer = remuxer();
        let frame = adts_ticks();
        // 50ms hole after the second frame.
        let gap = 4_500.0;
        let pts: Vec<i64> = vec![
            0,
            frame.round() as i64,
            (2.0 * frame + gap).round() as i64,
            (3.0 * frame + gap).round() as i64,
        ];
        let params = RemuxParams {
            playlist_type: PlaylistType::Audio,
            ..params(0.0)
        };
        let mut audio = aac_track(&pts);
        audio.pid = Some(0x42);
        let result = remuxer.remux(demuxed(audio, VideoTrack::default()), params).unwrap();
        let remuxed = result.audio.expect("audio fragment");

        let missing = (gap / frame).round() as usize;
        assert_eq!(missing, 2);
        assert_eq!(remuxed.nb, pts.len() + missing);
        let expected_end = (pts[3] as f64 + frame) / 90_000.0;
        assert!((remuxed.end_pts - expected_end).abs() <= frame / 90_000.0);

        let mdat = remuxed.data2.unwrap();
        let silent = silence::silent_frame(Some("mp4a.40.2"), 2).unwrap();
        let body = &mdat[8..];
        assert_eq!(&body[40..40 + silent.len()], silent);
    }

    fn adts_ticks() -> f64 {
        AAC_FRAME_SAMPLES as f64 * 90_000.0 / 44_100.0
    }

    #[test]
    fn test_raw_mpeg_audio_skips_mp4_boxes() {
        let type_supported = TypeSupported {
            mpeg: true,
            ..Default::default()
        };
        let mut remuxer = FullRemuxer::new(MuxConfig::default(), type_supported, Quirks::default());
        let mut audio = aac_track(&[0, 2_351, 4_702]);
        audio.segment_codec = Some(AudioCodec::Mp3);
        audio.config.clear();
        let result = remuxer.remux(demuxed(audio, VideoTrack::default()), params(0.0)).unwrap();
        let init = result.init_segment.unwrap().tracks.unwrap().audio.unwrap();
        assert_eq!(init.container, "audio/mpeg");
        assert!(init.init_segment.is_empty());
        let remuxed = result.audio.unwrap();
        assert!(remuxed.data1.is_empty());
        assert_eq!(remuxed.data2.unwrap().len(), 60);
    }

    #[test]
    fn test_id3_cues_rebased_on_anchor() {
        let mut remuxer = remuxer();
        let mut id3 = crate::track::MetadataTrack::new(3, Some(0x43));
        id3.samples.push(MetadataSample {
            pts: 183_000.0,
            dts: 183_000.0,
            data: vec![1, 2],
            schema: MetadataSchema::Id3,
            duration: None,
        });
        let input = DemuxerResult {
            video: video_track(&[(93_000, 93_000, true), (96_000, 96_000, false)]),
            id3,
            ..Default::default()
        };
        let result = remuxer.remux(input, params(0.0)).unwrap();
        assert_eq!(result.id3.len(), 1);
        assert!((result.id3[0].pts - 1.0).abs() < 1e-9);
    }
}
