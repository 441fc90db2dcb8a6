//! Error taxonomy shared by every stage of the transmux pipeline.
//!
//! Component errors (`DecryptError`, `GenerateError`) convert into
//! [`MuxError`], which is what callers receive and what the worker forwards
//! as an `error` event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decrypt::DecryptError;
use crate::mp4_generator::GenerateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    #[serde(rename = "networkError")]
    Network,
    #[serde(rename = "mediaError")]
    Media,
    #[serde(rename = "keySystemError")]
    KeySystem,
    #[serde(rename = "muxError")]
    Mux,
    #[serde(rename = "otherError")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorDetails {
    FragParsingError,
    FragDecryptError,
    RemuxAllocError,
    KeySystemNoKey,
    InternalException,
}

#[derive(Debug, Error)]
#[error("{reason}")]
pub struct MuxError {
    pub kind: ErrorType,
    pub details: ErrorDetails,
    pub fatal: bool,
    pub reason: String,
    #[source]
    pub error: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl MuxError {
    pub fn new(kind: ErrorType, details: ErrorDetails, fatal: bool, reason: impl Into<String>) -> Self {
        Self {
            kind,
            details,
            fatal,
            reason: reason.into(),
            error: None,
        }
    }

    /// Non-fatal container/bitstream problem for the current fragment.
    pub fn parsing(reason: impl Into<String>) -> Self {
        Self::new(ErrorType::Media, ErrorDetails::FragParsingError, false, reason)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(ErrorType::Other, ErrorDetails::InternalException, false, reason)
    }

    pub fn with_source(mut self, error: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(error));
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl From<DecryptError> for MuxError {
    fn from(e: DecryptError) -> Self {
        let reason = e.to_string();
        Self::new(ErrorType::Media, ErrorDetails::FragDecryptError, false, reason).with_source(e)
    }
}

impl From<GenerateError> for MuxError {
    fn from(e: GenerateError) -> Self {
        let reason = e.to_string();
        Self::new(ErrorType::Mux, ErrorDetails::RemuxAllocError, false, reason).with_source(e)
    }
}

/// Non-fatal notifications collected while a component runs.
///
/// Owned by each demuxer/remuxer and drained by the transmuxer after every call.
#[derive(Debug, Default)]
pub struct Warnings {
    pending: Vec<MuxError>,
}

impl Warnings {
    pub fn push(&mut self, warning: MuxError) {
        tracing::warn!("{}", warning.reason);
        self.pending.push(warning);
    }

    pub fn parsing(&mut self, reason: impl Into<String>) {
        self.push(MuxError::parsing(reason));
    }

    pub fn drain(&mut self) -> Vec<MuxError> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_serializes_like_event_payload() {
        let json = serde_json::to_string(&ErrorType::Media).unwrap();
        assert_eq!(json, "\"mediaError\"");
        let json = serde_json::to_string(&ErrorDetails::RemuxAllocError).unwrap();
        assert_eq!(json, "\"remuxAllocError\"");
    }

    #[test]
    fn test_decrypt_error_maps_to_media() {
        let err: MuxError = DecryptError::InvalidIvLength(8).into();
        assert_eq!(err.kind, ErrorType::Media);
        assert_eq!(err.details, ErrorDetails::FragDecryptError);
        assert!(!err.fatal);
        assert!(err.error.is_some());
    }

    #[test]
    fn test_warnings_drain_empties_buffer() {
        let mut warnings = Warnings::default();
        warnings.parsing("bad sync");
        assert!(!warnings.is_empty());
        let drained = warnings.drain();
        assert_eq!(drained.len(), 1);
        assert!(warnings.is_empty());
    }
}
