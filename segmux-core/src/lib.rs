//! # SEGMUX Core
//!
//! HLS segment transmuxing and decryption: MPEG-TS, raw audio and fMP4 in,
//! fragmented MP4 out.

// ============================================================================
// Configuration / Errors
// ============================================================================
pub mod config;
pub mod error;

// ============================================================================
// Bitstream / Tracks
// ============================================================================
pub mod exp_golomb;
pub mod id3;
pub mod track;
pub mod video;

// ============================================================================
// ISO-BMFF
// ============================================================================
pub mod mp4_generator;
pub mod mp4_tools;

// ============================================================================
// Pipeline
// ============================================================================
pub mod decrypt;
pub mod demux;
pub mod remux;
pub mod transmuxer;

pub use config::{ChunkMetadata, MuxConfig, PlaylistType, Quirks, RationalTimestamp, TransmuxConfig, TransmuxState, TypeSupported};
pub use error::{ErrorDetails, ErrorType, MuxError};
pub use transmuxer::{PendingWork, PushOutcome, ResolvedWork, TransmuxResult, Transmuxer};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
