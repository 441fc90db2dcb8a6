// ============================================================================
// DEMUX - Container probing and elementary-stream extraction
// ============================================================================
//
// One demuxer per source container, selected by content probing and then
// held for the life of the session:
//
//   Ts              MPEG-2 transport stream (PAT/PMT, PES per PID)
//   Aac/Mp3/Ac3     raw elementary audio, optionally ID3-prefixed
//   Mp4Passthrough  fragmented MP4, forwarded as-is
//
// Probe order matters: fMP4 first, AC-3 before MP3 (an ID3-prefixed AC-3
// stream also passes the MPEG audio scan).

pub mod ac3;
pub mod adts;
pub mod mp4_passthrough;
pub mod mpeg_audio;
pub mod raw_audio;
pub mod ts;

use crate::config::{MuxConfig, RationalTimestamp, TypeSupported};
use crate::decrypt::{CipherRoute, DecryptError, DecryptOutcome, EncryptionMethod, KeyData};
use crate::error::MuxError;
use crate::track::DemuxerResult;

pub use mp4_passthrough::Mp4PassthroughDemuxer;
pub use raw_audio::{RawAudioDemuxer, RawAudioFormat};
pub use ts::TsDemuxer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxerKind {
    Ts,
    Aac,
    Mp3,
    Ac3,
    Mp4Passthrough,
}

impl DemuxerKind {
    const PROBE_ORDER: [DemuxerKind; 5] = [Self::Mp4Passthrough, Self::Ts, Self::Aac, Self::Ac3, Self::Mp3];

    /// First container in probe order that claims `data`.
    pub fn probe(data: &[u8]) -> Option<Self> {
        Self::PROBE_ORDER.into_iter().find(|kind| kind.matches(data))
    }

    fn matches(self, data: &[u8]) -> bool {
        match self {
            Self::Ts => ts::probe(data),
            Self::Mp4Passthrough => mp4_passthrough::probe(data),
            Self::Aac => RawAudioFormat::Aac.probe(data),
            Self::Mp3 => RawAudioFormat::Mp3.probe(data),
            Self::Ac3 => RawAudioFormat::Ac3.probe(data),
        }
    }

    /// The demuxed output is already fragmented MP4.
    pub fn is_passthrough(self) -> bool {
        self == Self::Mp4Passthrough
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ts => "mpeg-ts",
            Self::Aac => "aac",
            Self::Mp3 => "mp3",
            Self::Ac3 => "ac3",
            Self::Mp4Passthrough => "fmp4",
        }
    }
}

#[derive(Debug)]
pub enum Demuxer {
    Ts(TsDemuxer),
    Aac(RawAudioDemuxer),
    Mp3(RawAudioDemuxer),
    Ac3(RawAudioDemuxer),
    Mp4Passthrough(Mp4PassthroughDemuxer),
}

impl Demuxer {
    pub fn new(kind: DemuxerKind, config: &MuxConfig, type_supported: TypeSupported) -> Self {
        match kind {
            DemuxerKind::Ts => Self::Ts(TsDemuxer::new(type_supported)),
            DemuxerKind::Aac => Self::Aac(RawAudioDemuxer::new(RawAudioFormat::Aac)),
            DemuxerKind::Mp3 => Self::Mp3(RawAudioDemuxer::new(RawAudioFormat::Mp3)),
            DemuxerKind::Ac3 => Self::Ac3(RawAudioDemuxer::new(RawAudioFormat::Ac3)),
            DemuxerKind::Mp4Passthrough => Self::Mp4Passthrough(Mp4PassthroughDemuxer::new(config.clone())),
        }
    }

    pub fn kind(&self) -> DemuxerKind {
        match self {
            Self::Ts(_) => DemuxerKind::Ts,
            Self::Aac(_) => DemuxerKind::Aac,
            Self::Mp3(_) => DemuxerKind::Mp3,
            Self::Ac3(_) => DemuxerKind::Ac3,
            Self::Mp4Passthrough(_) => DemuxerKind::Mp4Passthrough,
        }
    }

    pub fn reset_init_segment(
        &mut self,
        init_segment: Option<&[u8]>,
        audio_codec: Option<&str>,
        video_codec: Option<&str>,
        duration: f64,
    ) {
        match self {
            Self::Ts(d) => d.reset_init_segment(audio_codec, video_codec, duration),
            Self::Aac(d) | Self::Mp3(d) | Self::Ac3(d) => d.reset_init_segment(audio_codec, duration),
            Self::Mp4Passthrough(d) => d.reset_init_segment(init_segment, duration),
        }
    }

    /// Only the raw-audio demuxers time frames themselves.
    pub fn reset_timestamp(&mut self, default_init_pts: Option<RationalTimestamp>) {
        if let Self::Aac(d) | Self::Mp3(d) | Self::Ac3(d) = self {
            d.reset_timestamp(default_init_pts);
        }
    }

    pub fn reset_contiguity(&mut self) {
        match self {
            Self::Ts(d) => d.reset_contiguity(),
            Self::Aac(d) | Self::Mp3(d) | Self::Ac3(d) => d.reset_contiguity(),
            Self::Mp4Passthrough(d) => d.reset_contiguity(),
        }
    }

    pub fn demux(&mut self, data: &[u8], time_offset: f64, flush: bool) -> DemuxerResult {
        match self {
            Self::Ts(d) => d.demux(data, false, flush),
            Self::Aac(d) | Self::Mp3(d) | Self::Ac3(d) => d.demux(data, time_offset),
            Self::Mp4Passthrough(d) => d.demux(data, time_offset),
        }
    }

    /// Demux and decrypt SAMPLE-AES protected samples. Transport streams only.
    pub fn demux_sample_aes(
        &mut self,
        data: &[u8],
        key_data: &KeyData,
        route: CipherRoute,
        flush: bool,
    ) -> Result<DecryptOutcome<DemuxerResult>, MuxError> {
        match self {
            Self::Ts(d) => Ok(d.demux_sample_aes(data, key_data, route, flush)?),
            _ => Err(DecryptError::Unsupported(EncryptionMethod::SampleAes).into()),
        }
    }

    pub fn flush(&mut self) -> Result<DecryptOutcome<DemuxerResult>, MuxError> {
        match self {
            Self::Ts(d) => Ok(d.flush()?),
            Self::Aac(d) | Self::Mp3(d) | Self::Ac3(d) => Ok(DecryptOutcome::Sync(d.flush())),
            Self::Mp4Passthrough(d) => Ok(DecryptOutcome::Sync(d.flush())),
        }
    }

    pub fn drain_warnings(&mut self) -> Vec<MuxError> {
        match self {
            Self::Ts(d) => d.drain_warnings(),
            Self::Aac(d) | Self::Mp3(d) | Self::Ac3(d) => d.drain_warnings(),
            Self::Mp4Passthrough(d) => d.drain_warnings(),
        }
    }
}
