//! Newline-delimited JSON messages exchanged with the host.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use segmux_core::config::base64_bytes;
use segmux_core::decrypt::{AesMode, DecryptData};
use segmux_core::{ChunkMetadata, MuxConfig, MuxError, PlaylistType, Quirks, TransmuxConfig, TransmuxResult, TransmuxState, TypeSupported};

// ============================================================================
// Inbound
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    /// Create the transmuxer instance `id`, replacing any previous one.
    Init {
        id: String,
        #[serde(default)]
        config: MuxConfig,
        #[serde(default)]
        type_supported: TypeSupported,
        #[serde(default)]
        quirks: Quirks,
        #[serde(default)]
        playlist_type: PlaylistType,
    },
    Reset {
        id: String,
    },
    Configure {
        id: String,
        config: TransmuxConfig,
    },
    Demux {
        id: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        #[serde(default)]
        decrypt_data: Option<DecryptData>,
        chunk_meta: ChunkMetadata,
        #[serde(default)]
        state: Option<TransmuxState>,
    },
    Flush {
        id: String,
        chunk_meta: ChunkMetadata,
    },
    /// Standalone whole-buffer decrypt, answered with `decrypted`.
    Decrypt {
        id: Value,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        #[serde(with = "base64_bytes")]
        key: Vec<u8>,
        #[serde(with = "base64_bytes")]
        iv: Vec<u8>,
        #[serde(default)]
        mode: Option<AesMode>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Reset { .. } => "reset",
            Self::Configure { .. } => "configure",
            Self::Demux { .. } => "demux",
            Self::Flush { .. } => "flush",
            Self::Decrypt { .. } => "decrypt",
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event<'a> {
    TransmuxComplete {
        id: &'a str,
        data: &'a TransmuxResult,
    },
    Flush {
        id: &'a str,
        data: &'a ChunkMetadata,
    },
    WorkerLog {
        data: LogData,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        data: ErrorData,
    },
    Decrypted {
        id: &'a Value,
        #[serde(serialize_with = "base64_bytes::serialize")]
        data: Vec<u8>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogData {
    pub log_type: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorData {
    #[serde(rename = "type")]
    pub kind: segmux_core::ErrorType,
    pub details: segmux_core::ErrorDetails,
    pub fatal: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&MuxError> for ErrorData {
    fn from(e: &MuxError) -> Self {
        Self {
            kind: e.kind,
            details: e.details,
            fatal: e.fatal,
            reason: e.reason.clone(),
            error: e.error.as_ref().map(|source| source.to_string()),
        }
    }
}

/// Shared line writer for events. Cloned into the log-forwarding layer.
#[derive(Clone)]
pub struct Outbox {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Outbox {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Write one event line. Must not log: the forwarding layer calls this
    /// and the lock is not reentrant.
    pub fn send(&self, event: &Event<'_>) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"cmd":"init","id":"main"}"#, "init")]
    #[case(r#"{"cmd":"reset","id":"main"}"#, "reset")]
    #[case(r#"{"cmd":"configure","id":"audio","config":{"audioCodec":"mp4a.40.2","duration":6.0}}"#, "configure")]
    #[case(r#"{"cmd":"flush","id":"main","chunkMeta":{"level":0,"sn":4}}"#, "flush")]
    #[case(r#"{"cmd":"decrypt","id":3,"data":"","key":"","iv":""}"#, "decrypt")]
    fn test_commands_parse(#[case] json: &str, #[case] name: &str) {
        let command: Command = serde_json::from_str(json).unwrap();
        assert_eq!(command.name(), name);
    }

    #[test]
    fn test_demux_command_fields() {
        let json = r#"{"cmd":"demux","id":"main","data":"R0BA","chunkMeta":{"level":1,"sn":7,"part":2},
            "decryptData":{"method":"AES-128","key":"AAAAAAAAAAAAAAAAAAAAAA==","iv":"AAAAAAAAAAAAAAAAAAAAAA=="},
            "state":{"discontinuity":true,"timeOffset":12.5}}"#;
        let Command::Demux {
            data,
            decrypt_data,
            chunk_meta,
            state,
            ..
        } = serde_json::from_str(json).unwrap()
        else {
            panic!("expected demux");
        };
        assert_eq!(data, vec![0x47, 0x40, 0x40]);
        assert_eq!(decrypt_data.unwrap().key.unwrap().len(), 16);
        assert!(chunk_meta.is_part());
        let state = state.unwrap();
        assert!(state.discontinuity);
        assert_eq!(state.time_offset, 12.5);
    }

    #[test]
    fn test_error_event_shape() {
        let error = MuxError::parsing("No ADTS header found in AAC PES");
        let event = Event::Error {
            id: None,
            data: ErrorData::from(&error),
        };
        let json: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["type"], "mediaError");
        assert_eq!(json["data"]["details"], "fragParsingError");
        assert_eq!(json["data"]["fatal"], false);
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_worker_log_event_shape() {
        let event = Event::WorkerLog {
            data: LogData {
                log_type: "warn",
                message: "gap".into(),
            },
        };
        let json: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "workerLog");
        assert_eq!(json["data"]["logType"], "warn");
    }
}
