//! Engine configuration, host capabilities and per-push transmux state.
//!
//! All of these arrive from the host as JSON (camelCase) and are plain data.

use serde::{Deserialize, Serialize};

/// Tuning knobs for the demuxers and remuxers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MuxConfig {
    /// Audio gaps/overlaps smaller than this many frames are ignored.
    pub max_audio_frames_drift: u32,
    pub force_key_frame_on_discontinuity: bool,
    pub stretch_short_video_track: bool,
    /// Seconds.
    pub max_buffer_hole: f64,
    /// Seconds.
    pub max_seek_hole: f64,
    pub progressive: bool,
    #[serde(rename = "enableSoftwareAES")]
    pub enable_software_aes: bool,
    pub enable_emsg_metadata_cues: bool,
    pub enable_id3_metadata_cues: bool,
    #[serde(rename = "enableCEA708Captions")]
    pub enable_cea708_captions: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_audio_frames_drift: 1,
            force_key_frame_on_discontinuity: true,
            stretch_short_video_track: false,
            max_buffer_hole: 0.1,
            max_seek_hole: 2.0,
            progressive: false,
            enable_software_aes: true,
            enable_emsg_metadata_cues: true,
            enable_id3_metadata_cues: true,
            enable_cea708_captions: true,
        }
    }
}

/// Raw (non-MP4) audio containers the host can append directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeSupported {
    pub mpeg: bool,
    pub mp3: bool,
    pub ac3: bool,
}

/// Host engine quirks, populated once by the host at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Quirks {
    /// The host rejects negative decode timestamps in `tfdt`.
    pub requires_positive_dts: bool,
    /// The host stretches the last video frame itself and tolerates a leading
    /// audio frame that starts before the video.
    pub safari_webkit: bool,
}

/// Which playlist a transmuxer instance serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistType {
    #[default]
    Main,
    Audio,
    Subtitle,
}

/// A timestamp expressed as `base_time / timescale` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RationalTimestamp {
    pub base_time: i64,
    pub timescale: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u32>,
}

impl RationalTimestamp {
    pub fn new(base_time: i64, timescale: u32) -> Self {
        Self {
            base_time,
            timescale,
            track_id: None,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.base_time as f64 / self.timescale.max(1) as f64
    }

    /// Rescale to another timescale, rounding to nearest tick.
    pub fn to_timescale(&self, timescale: u32) -> i64 {
        if timescale == self.timescale {
            return self.base_time;
        }
        (self.base_time as f64 * timescale as f64 / self.timescale.max(1) as f64).round() as i64
    }
}

/// Per-session configuration sent with the `configure` command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransmuxConfig {
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    #[serde(with = "base64_opt")]
    pub init_segment_data: Option<Vec<u8>>,
    /// Seconds.
    pub duration: f64,
    pub default_init_pts: Option<RationalTimestamp>,
}

/// Flags describing how a push relates to the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransmuxState {
    pub discontinuity: bool,
    pub contiguous: bool,
    pub accurate_time_offset: bool,
    pub track_switch: bool,
    /// Seconds.
    pub time_offset: f64,
    pub init_segment_change: bool,
}

/// Identifies which fragment/part a result belongs to. Echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub level: u32,
    pub sn: i64,
    #[serde(default = "ChunkMetadata::whole_segment")]
    pub part: i32,
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub size: usize,
}

impl ChunkMetadata {
    pub fn new(level: u32, sn: i64, id: u32) -> Self {
        Self {
            level,
            sn,
            part: Self::whole_segment(),
            id,
            size: 0,
        }
    }

    fn whole_segment() -> i32 {
        -1
    }

    pub fn is_part(&self) -> bool {
        self.part > -1
    }
}

/// Serde adapter for optional byte buffers carried as base64 strings.
pub mod base64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde adapter for byte buffers carried as base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, T: AsRef<[u8]>>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}
