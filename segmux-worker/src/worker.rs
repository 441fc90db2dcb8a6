//! Transmuxer instances keyed by id, driven one command at a time.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use segmux_core::decrypt::{AesMode, DecryptError, DecryptProvider, SoftwareDecrypter, SoftwareProvider};
use segmux_core::{ChunkMetadata, MuxError, PushOutcome, TransmuxResult, Transmuxer};

use crate::protocol::{Command, ErrorData, Event, Outbox};

pub struct Worker {
    instances: HashMap<String, Transmuxer>,
    outbox: Outbox,
}

impl Worker {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            instances: HashMap::new(),
            outbox,
        }
    }

    /// Run one command to completion, including any decrypt it waits on.
    /// Only output failures are returned; everything else becomes an event.
    pub async fn handle(&mut self, command: Command) -> std::io::Result<()> {
        debug!(cmd = command.name(), "command received");
        match command {
            Command::Init {
                id,
                config,
                type_supported,
                quirks,
                playlist_type,
            } => {
                // With software AES off, whole-buffer decrypts go through the
                // async provider instead of the progressive cipher.
                let provider = (!config.enable_software_aes)
                    .then(|| Arc::new(SoftwareProvider) as Arc<dyn DecryptProvider>);
                let transmuxer = Transmuxer::new(config, type_supported, quirks, playlist_type, provider);
                info!(id = %id, "transmuxer created");
                self.instances.insert(id, transmuxer);
                Ok(())
            }
            Command::Reset { id } => match self.instances.get_mut(&id) {
                Some(transmuxer) => {
                    transmuxer.reset();
                    Ok(())
                }
                None => self.missing_instance(&id),
            },
            Command::Configure { id, config } => match self.instances.get_mut(&id) {
                Some(transmuxer) => {
                    transmuxer.configure(config);
                    Ok(())
                }
                None => self.missing_instance(&id),
            },
            Command::Demux {
                id,
                data,
                decrypt_data,
                chunk_meta,
                state,
            } => {
                let Some(transmuxer) = self.instances.get_mut(&id) else {
                    return self.missing_instance(&id);
                };
                let outcome = transmuxer.push(data, decrypt_data.as_ref(), chunk_meta, state);
                let results = drive(transmuxer, outcome).await;
                self.emit_results(&id, results)
            }
            Command::Flush { id, chunk_meta } => {
                let Some(transmuxer) = self.instances.get_mut(&id) else {
                    return self.missing_instance(&id);
                };
                let outcome = transmuxer.flush(chunk_meta.clone());
                let results = drive(transmuxer, outcome).await;
                self.emit_results(&id, results)?;
                self.outbox.send(&Event::Flush {
                    id: &id,
                    data: &chunk_meta,
                })
            }
            Command::Decrypt {
                id,
                data,
                key,
                iv,
                mode,
            } => match decrypt_buffer(&data, &key, &iv, mode.unwrap_or(AesMode::Cbc)) {
                Ok(plain) => self.outbox.send(&Event::Decrypted { id: &id, data: plain }),
                Err(e) => {
                    warn!(id = %id, "decrypt request failed: {e}");
                    self.send_error(Some(id), &MuxError::from(e))
                }
            },
        }
    }

    fn emit_results(&self, id: &str, results: Result<Vec<TransmuxResult>, MuxError>) -> std::io::Result<()> {
        let results = match results {
            Ok(results) => results,
            Err(e) => return self.send_error(None, &e),
        };
        for result in &results {
            for warning in &result.warnings {
                self.send_error(None, warning)?;
            }
            if result.remux_result.is_empty() {
                continue;
            }
            self.outbox.send(&Event::TransmuxComplete { id, data: result })?;
        }
        Ok(())
    }

    fn send_error(&self, id: Option<Value>, error: &MuxError) -> std::io::Result<()> {
        self.outbox.send(&Event::Error {
            id,
            data: ErrorData::from(error),
        })
    }

    fn missing_instance(&self, id: &str) -> std::io::Result<()> {
        warn!(id, "no transmuxer instance");
        self.send_error(None, &MuxError::internal(format!("no transmuxer instance for id '{id}'")))
    }
}

/// Resolve pending decrypts until the transmuxer has results.
async fn drive(
    transmuxer: &mut Transmuxer,
    mut outcome: Result<PushOutcome, MuxError>,
) -> Result<Vec<TransmuxResult>, MuxError> {
    loop {
        match outcome? {
            PushOutcome::Ready(results) => return Ok(results),
            PushOutcome::Pending(work) => {
                let sn = work.chunk_meta().sn;
                debug!(sn, "awaiting decrypt");
                outcome = transmuxer.resume(work.resolve().await);
            }
        }
    }
}

fn decrypt_buffer(data: &[u8], key: &[u8], iv: &[u8], mode: AesMode) -> Result<Vec<u8>, DecryptError> {
    let mut decrypter = SoftwareDecrypter::new();
    let mut plain = decrypter.decrypt(data, key, iv, mode)?;
    plain.extend(decrypter.flush(true));
    Ok(plain)
}
