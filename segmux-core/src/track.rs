//! Demuxed tracks and samples.
//!
//! Demuxers own their tracks across pushes (parameter sets, codec config) and
//! hand out snapshots whose sample lists are moved out, so nothing a remuxer
//! consumes is retained by the demuxer.

use serde::Serialize;

/// MPEG-2 system clock used for every PES timestamp.
pub const MPEG_TS_CLOCK: u32 = 90_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Mp3,
    Ac3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Avc,
    Hevc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSchema {
    /// ID3 payload from a TS metadata PID or a raw-audio prefix.
    #[serde(rename = "org.id3")]
    Id3,
    /// Event message box from fragmented MP4.
    #[serde(rename = "https://aomedia.org/emsg/ID3")]
    Emsg,
}

// ============================================================================
// Samples
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    pub kind: u8,
    pub data: Vec<u8>,
}

/// Reassembled PES payload with its header timestamps (90kHz).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PesPacket {
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
}

/// One access unit. Timestamps in the track's input timescale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoSample {
    pub pts: i64,
    pub dts: i64,
    pub key: bool,
    /// At least one coded slice was seen.
    pub frame: bool,
    pub units: Vec<NalUnit>,
}

impl VideoSample {
    /// Payload size once each unit is length-prefixed for `mdat`.
    pub fn mdat_size(&self) -> usize {
        self.units.iter().map(|unit| unit.data.len() + 4).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    pub pts: i64,
    pub dts: i64,
    pub unit: Vec<u8>,
}

/// Timestamps are in the track's input timescale until remuxed, seconds after.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSample {
    pub pts: f64,
    pub dts: f64,
    #[serde(with = "crate::config::base64_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "type")]
    pub schema: MetadataSchema,
    /// Seconds; `None` means open ended.
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UserdataPayload {
    /// ATSC A/53 `cc_data` triples.
    Cea608 {
        #[serde(with = "crate::config::base64_bytes")]
        bytes: Vec<u8>,
    },
    /// ITU-T T.35 unregistered user data.
    Uuid {
        uuid: String,
        user_data: String,
        #[serde(with = "crate::config::base64_bytes")]
        user_data_bytes: Vec<u8>,
    },
}

/// `pts` follows the same convention as [`MetadataSample`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserdataSample {
    pub pts: f64,
    #[serde(flatten)]
    pub payload: UserdataPayload,
}

// ============================================================================
// Tracks
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct VideoTrack {
    pub id: u32,
    pub pid: Option<u16>,
    pub input_timescale: u32,
    pub timescale: u32,
    pub codec: Option<String>,
    pub manifest_codec: Option<String>,
    pub segment_codec: Option<VideoCodec>,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
    pub vps: Vec<Vec<u8>>,
    pub hevc_params: Option<HevcParams>,
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: (u32, u32),
    pub samples: Vec<VideoSample>,
    pub dropped: usize,
    /// Seconds.
    pub duration: f64,
}

/// Fields of the HEVC decoder configuration record recovered from VPS/SPS/PPS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HevcParams {
    pub general_profile_space: u8,
    pub general_tier_flag: u8,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: [u8; 4],
    pub general_constraint_indicator_flags: [u8; 6],
    pub general_level_idc: u8,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    /// Whole frames per second.
    pub avg_frame_rate: u16,
    pub constant_frame_rate: bool,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: u8,
}

#[derive(Debug, Clone, Default)]
pub struct AudioTrack {
    pub id: u32,
    pub pid: Option<u16>,
    pub input_timescale: u32,
    pub timescale: u32,
    pub codec: Option<String>,
    pub manifest_codec: Option<String>,
    pub segment_codec: Option<AudioCodec>,
    pub samplerate: u32,
    pub channel_count: u32,
    /// AAC AudioSpecificConfig or the AC-3 `dac3` triplet.
    pub config: Vec<u8>,
    pub samples: Vec<AudioSample>,
    pub dropped: usize,
    /// Seconds.
    pub duration: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataTrack {
    pub id: u32,
    pub pid: Option<u16>,
    pub input_timescale: u32,
    pub samples: Vec<MetadataSample>,
}

#[derive(Debug, Clone, Default)]
pub struct UserdataTrack {
    pub input_timescale: u32,
    pub samples: Vec<UserdataSample>,
}

macro_rules! impl_take_samples {
    ($($track:ty),*) => {
        $(impl $track {
            /// Snapshot of the track with its samples moved out.
            pub fn take_samples(&mut self) -> Self {
                let samples = std::mem::take(&mut self.samples);
                let mut snapshot = self.clone();
                snapshot.samples = samples;
                snapshot
            }
        })*
    };
}

impl_take_samples!(VideoTrack, AudioTrack, MetadataTrack, UserdataTrack);

impl VideoTrack {
    pub fn new(id: u32, pid: Option<u16>, duration: f64) -> Self {
        Self {
            id,
            pid,
            input_timescale: MPEG_TS_CLOCK,
            timescale: MPEG_TS_CLOCK,
            pixel_ratio: (1, 1),
            duration,
            ..Default::default()
        }
    }

    pub fn has_parameter_sets(&self) -> bool {
        !self.sps.is_empty() && !self.pps.is_empty()
    }
}

impl AudioTrack {
    pub fn new(id: u32, pid: Option<u16>, duration: f64) -> Self {
        Self {
            id,
            pid,
            input_timescale: MPEG_TS_CLOCK,
            timescale: MPEG_TS_CLOCK,
            duration,
            ..Default::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        self.samplerate > 0 && self.channel_count > 0
    }
}

impl MetadataTrack {
    pub fn new(id: u32, pid: Option<u16>) -> Self {
        Self {
            id,
            pid,
            input_timescale: MPEG_TS_CLOCK,
            samples: Vec::new(),
        }
    }
}

impl UserdataTrack {
    pub fn new(input_timescale: u32) -> Self {
        Self {
            input_timescale,
            samples: Vec::new(),
        }
    }
}

/// What a demuxer yields per `demux`/`flush` call.
#[derive(Debug, Default)]
pub struct DemuxerResult {
    pub audio: AudioTrack,
    pub video: VideoTrack,
    pub id3: MetadataTrack,
    pub text: UserdataTrack,
    /// Untouched fragmented-MP4 range forwarded by the passthrough demuxer.
    pub fragment: Option<Vec<u8>>,
}
