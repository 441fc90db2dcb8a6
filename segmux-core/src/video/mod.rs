//! Elementary video stream parsing (Annex-B H.264 / H.265).

pub mod avc;
pub mod hevc;
pub mod nal;
pub mod sei;

use crate::error::Warnings;
use crate::track::{PesPacket, UserdataTrack, VideoCodec, VideoTrack};

pub use avc::AvcParser;
pub use hevc::HevcParser;

/// Parser selected from the PMT stream type.
#[derive(Debug)]
pub enum VideoParser {
    Avc(AvcParser),
    Hevc(HevcParser),
}

impl VideoParser {
    pub fn for_codec(codec: VideoCodec) -> Self {
        match codec {
            VideoCodec::Avc => Self::Avc(AvcParser::new()),
            VideoCodec::Hevc => Self::Hevc(HevcParser::new()),
        }
    }

    pub fn codec(&self) -> VideoCodec {
        match self {
            Self::Avc(_) => VideoCodec::Avc,
            Self::Hevc(_) => VideoCodec::Hevc,
        }
    }

    /// Split `pes` into NAL units and fold them into access units on `track`.
    /// With `end_of_segment` the open access unit is closed too. Malformed
    /// SEI messages are reported to `warnings`.
    pub fn parse_pes(
        &mut self,
        track: &mut VideoTrack,
        text: &mut UserdataTrack,
        pes: PesPacket,
        end_of_segment: bool,
        warnings: &mut Warnings,
    ) {
        match self {
            Self::Avc(parser) => parser.parse_pes(track, text, pes, end_of_segment, warnings),
            Self::Hevc(parser) => parser.parse_pes(track, text, pes, end_of_segment, warnings),
        }
    }

    /// NAL unit type from the first header byte.
    pub fn nal_type(&self, header: u8) -> u8 {
        match self {
            Self::Avc(_) => avc::nal_type(header),
            Self::Hevc(_) => hevc::nal_type(header),
        }
    }
}
