// ============================================================================
// TRANSMUXER - Per-session orchestration of decrypt, demux and remux
// ============================================================================
//
// push:  [full-segment decrypt] -> probe -> resets -> demux -> remux
// flush: decrypter remainder -> demuxer flush -> final remux (flush=true)
//
// Everything runs synchronously except provider decrypts. Those surface as
// `PushOutcome::Pending`; the caller awaits `PendingWork::resolve` and hands
// the result back through `resume`. A `reset` in between bumps the
// generation so the late result is dropped.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ChunkMetadata, MuxConfig, PlaylistType, Quirks, TransmuxConfig, TransmuxState, TypeSupported};
use crate::decrypt::{DecryptData, DecryptError, DecryptOutcome, DecryptProvider, Decrypter, EncryptionMethod, KeyData};
use crate::demux::{Demuxer, DemuxerKind};
use crate::error::MuxError;
use crate::remux::{RemuxParams, Remuxer, RemuxerResult};
use crate::track::DemuxerResult;

/// One remux output, tagged with the chunk it came from.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmuxResult {
    pub remux_result: RemuxerResult,
    pub chunk_meta: ChunkMetadata,
    /// Non-fatal problems hit while producing this result.
    #[serde(skip)]
    pub warnings: Vec<MuxError>,
}

#[derive(Debug)]
pub enum PushOutcome {
    Ready(Vec<TransmuxResult>),
    Pending(PendingWork),
}

enum PendingTask {
    /// Full-segment decrypt; the plaintext continues as a new push.
    Segment(BoxFuture<'static, Result<Vec<u8>, DecryptError>>),
    /// SAMPLE-AES demux; the samples continue into remux.
    Samples {
        future: BoxFuture<'static, Result<DemuxerResult, DecryptError>>,
        flush: bool,
    },
}

/// Work parked on an asynchronous decrypt.
pub struct PendingWork {
    generation: u64,
    chunk_meta: ChunkMetadata,
    /// Results already produced by the same call (flush only).
    completed: Vec<TransmuxResult>,
    task: PendingTask,
}

impl fmt::Debug for PendingWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task = match self.task {
            PendingTask::Segment(_) => "segment",
            PendingTask::Samples { .. } => "samples",
        };
        f.debug_struct("PendingWork")
            .field("generation", &self.generation)
            .field("chunk_meta", &self.chunk_meta)
            .field("completed", &self.completed.len())
            .field("task", &task)
            .finish()
    }
}

impl PendingWork {
    pub fn chunk_meta(&self) -> &ChunkMetadata {
        &self.chunk_meta
    }

    pub async fn resolve(self) -> ResolvedWork {
        let result = match self.task {
            PendingTask::Segment(future) => ResolvedTask::Segment(future.await),
            PendingTask::Samples { future, flush } => ResolvedTask::Samples {
                result: future.await,
                flush,
            },
        };
        ResolvedWork {
            generation: self.generation,
            chunk_meta: self.chunk_meta,
            completed: self.completed,
            result,
        }
    }
}

enum ResolvedTask {
    Segment(Result<Vec<u8>, DecryptError>),
    Samples {
        result: Result<DemuxerResult, DecryptError>,
        flush: bool,
    },
}

/// A finished decrypt, ready to be fed back through [`Transmuxer::resume`].
pub struct ResolvedWork {
    generation: u64,
    chunk_meta: ChunkMetadata,
    completed: Vec<TransmuxResult>,
    result: ResolvedTask,
}

impl fmt::Debug for ResolvedWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedWork")
            .field("generation", &self.generation)
            .field("chunk_meta", &self.chunk_meta)
            .finish_non_exhaustive()
    }
}

pub struct Transmuxer {
    config: MuxConfig,
    type_supported: TypeSupported,
    quirks: Quirks,
    playlist_type: PlaylistType,
    provider: Option<Arc<dyn DecryptProvider>>,
    transmux_config: TransmuxConfig,
    state: TransmuxState,
    decrypter: Decrypter,
    demuxer: Option<Demuxer>,
    remuxer: Option<Remuxer>,
    generation: u64,
    warnings: Vec<MuxError>,
}

impl fmt::Debug for Transmuxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transmuxer")
            .field("playlist_type", &self.playlist_type)
            .field("demuxer", &self.demuxer.as_ref().map(Demuxer::kind))
            .field("generation", &self.generation)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Transmuxer {
    pub fn new(
        config: MuxConfig,
        type_supported: TypeSupported,
        quirks: Quirks,
        playlist_type: PlaylistType,
        provider: Option<Arc<dyn DecryptProvider>>,
    ) -> Self {
        let decrypter = Decrypter::new(provider.clone(), config.enable_software_aes);
        Self {
            config,
            type_supported,
            quirks,
            playlist_type,
            provider,
            transmux_config: TransmuxConfig::default(),
            state: TransmuxState::default(),
            decrypter,
            demuxer: None,
            remuxer: None,
            generation: 0,
            warnings: Vec::new(),
        }
    }

    /// Drop all session state. Decrypts still in flight become no-ops.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.demuxer = None;
        self.remuxer = None;
        self.state = TransmuxState::default();
        self.decrypter = Decrypter::new(self.provider.clone(), self.config.enable_software_aes);
        self.warnings.clear();
        debug!(generation = self.generation, "transmuxer reset");
    }

    pub fn configure(&mut self, transmux_config: TransmuxConfig) {
        debug!(
            audio_codec = ?transmux_config.audio_codec,
            video_codec = ?transmux_config.video_codec,
            duration = transmux_config.duration,
            "transmuxer configured"
        );
        self.transmux_config = transmux_config;
        self.decrypter.reset();
    }

    /// Feed one segment (or part). `state` replaces the stored transmux state
    /// when given.
    pub fn push(
        &mut self,
        data: Vec<u8>,
        decrypt_data: Option<&DecryptData>,
        chunk_meta: ChunkMetadata,
        state: Option<TransmuxState>,
    ) -> Result<PushOutcome, MuxError> {
        if let Some(state) = state {
            self.state = state;
        }
        let key_data = decrypt_data.and_then(|d| d.key_data(data.len()));

        let mut data = data;
        if let Some(key_data) = key_data.as_ref().filter(|k| k.method.is_full_segment()) {
            let mode = key_data.method.aes_mode();
            if self.decrypter.is_sync() {
                let mut plain = self.decrypter.software_decrypt(&data, &key_data.key, &key_data.iv, mode)?;
                if chunk_meta.is_part() {
                    plain.extend(self.decrypter.flush());
                }
                if plain.is_empty() {
                    return Ok(PushOutcome::Ready(vec![self.empty_result(chunk_meta)]));
                }
                data = plain;
            } else {
                match self.decrypter.decrypt(data, &key_data.key, &key_data.iv, mode)? {
                    DecryptOutcome::Sync(plain) => data = plain,
                    DecryptOutcome::Pending(future) => {
                        debug!(sn = chunk_meta.sn, "segment decrypt pending on provider");
                        return Ok(PushOutcome::Pending(PendingWork {
                            generation: self.generation,
                            chunk_meta,
                            completed: Vec::new(),
                            task: PendingTask::Segment(future),
                        }));
                    }
                }
            }
        }

        self.push_decrypted(data, decrypt_data, key_data, chunk_meta)
    }

    /// Continue work parked by `push` or `flush`.
    pub fn resume(&mut self, resolved: ResolvedWork) -> Result<PushOutcome, MuxError> {
        if resolved.generation != self.generation {
            debug!(
                stale = resolved.generation,
                current = self.generation,
                "dropping decrypt result from before reset"
            );
            return Ok(PushOutcome::Ready(Vec::new()));
        }
        let ResolvedWork {
            chunk_meta,
            mut completed,
            result,
            ..
        } = resolved;
        match result {
            ResolvedTask::Segment(result) => {
                let plain = result?;
                self.push(plain, None, chunk_meta, None)
            }
            ResolvedTask::Samples { result, flush } => {
                let demuxed = result?;
                completed.push(self.remux(demuxed, chunk_meta, flush)?);
                Ok(PushOutcome::Ready(completed))
            }
        }
    }

    pub fn flush(&mut self, chunk_meta: ChunkMetadata) -> Result<PushOutcome, MuxError> {
        let mut results = Vec::new();

        let remainder = self.decrypter.flush();
        if !remainder.is_empty() {
            // Without key data the push is synchronous.
            match self.push_decrypted(remainder, None, None, chunk_meta.clone())? {
                PushOutcome::Ready(ready) => results.extend(ready),
                pending @ PushOutcome::Pending(_) => return Ok(pending),
            }
        }

        let Some(demuxer) = self.demuxer.as_mut() else {
            results.push(self.empty_result(chunk_meta));
            return Ok(PushOutcome::Ready(results));
        };
        match demuxer.flush()? {
            DecryptOutcome::Sync(demuxed) => {
                results.push(self.remux(demuxed, chunk_meta, true)?);
                Ok(PushOutcome::Ready(results))
            }
            DecryptOutcome::Pending(future) => Ok(PushOutcome::Pending(PendingWork {
                generation: self.generation,
                chunk_meta,
                completed: results,
                task: PendingTask::Samples { future, flush: true },
            })),
        }
    }

    fn push_decrypted(
        &mut self,
        data: Vec<u8>,
        decrypt_data: Option<&DecryptData>,
        key_data: Option<KeyData>,
        chunk_meta: ChunkMetadata,
    ) -> Result<PushOutcome, MuxError> {
        let state = self.state;
        let reset_muxers = self.demuxer.is_none() || state.discontinuity || state.track_switch;
        if reset_muxers {
            if let Err(e) = self.configure_muxers(&data) {
                self.warnings.push(e);
                return Ok(PushOutcome::Ready(vec![self.empty_result(chunk_meta)]));
            }
        }
        if state.discontinuity || state.track_switch || state.init_segment_change || reset_muxers {
            self.reset_init_segment(decrypt_data);
        }
        if state.discontinuity || state.init_segment_change || reset_muxers {
            self.reset_initial_timestamp();
        }

        let progressive = self.config.progressive;
        let route = self.decrypter.route().clone();
        let (Some(demuxer), Some(remuxer)) = (self.demuxer.as_mut(), self.remuxer.as_mut()) else {
            return Err(MuxError::internal("transmuxer has no demuxer/remuxer pair"));
        };
        if !state.contiguous {
            demuxer.reset_contiguity();
            remuxer.reset_next_timestamp();
        }

        let sample_aes = key_data.filter(|k| k.method == EncryptionMethod::SampleAes);
        let outcome = match sample_aes {
            Some(key_data) => demuxer.demux_sample_aes(&data, &key_data, route, false)?,
            None => DecryptOutcome::Sync(demuxer.demux(&data, state.time_offset, !progressive)),
        };

        self.state.contiguous = true;
        self.state.discontinuity = false;
        self.state.track_switch = false;

        match outcome {
            DecryptOutcome::Sync(demuxed) => Ok(PushOutcome::Ready(vec![self.remux(demuxed, chunk_meta, false)?])),
            DecryptOutcome::Pending(future) => Ok(PushOutcome::Pending(PendingWork {
                generation: self.generation,
                chunk_meta,
                completed: Vec::new(),
                task: PendingTask::Samples { future, flush: false },
            })),
        }
    }

    /// Pick the demuxer/remuxer pair for `data`; an already-selected pair of
    /// the same kind is kept.
    fn configure_muxers(&mut self, data: &[u8]) -> Result<(), MuxError> {
        let kind = DemuxerKind::probe(data)
            .ok_or_else(|| MuxError::parsing("Failed to find demuxer by probing fragment data"))?;
        let current = self.demuxer.as_ref().map(Demuxer::kind);
        if current == Some(kind) && self.remuxer.is_some() {
            return Ok(());
        }
        info!(demuxer = kind.name(), previous = ?current.map(DemuxerKind::name), "demuxer selected");
        self.demuxer = Some(Demuxer::new(kind, &self.config, self.type_supported));
        self.remuxer = Some(Remuxer::new(
            kind.is_passthrough(),
            &self.config,
            self.type_supported,
            self.quirks,
        ));
        Ok(())
    }

    fn reset_init_segment(&mut self, decrypt_data: Option<&DecryptData>) {
        let config = &self.transmux_config;
        let init_segment = config.init_segment_data.as_deref();
        let audio_codec = config.audio_codec.as_deref();
        let video_codec = config.video_codec.as_deref();
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.reset_init_segment(init_segment, audio_codec, video_codec, config.duration);
        }
        if let Some(remuxer) = self.remuxer.as_mut() {
            remuxer.reset_init_segment(init_segment, audio_codec, video_codec, decrypt_data);
        }
    }

    fn reset_initial_timestamp(&mut self) {
        let default_init_pts = self.transmux_config.default_init_pts;
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.reset_timestamp(default_init_pts);
        }
        if let Some(remuxer) = self.remuxer.as_mut() {
            remuxer.reset_timestamp(default_init_pts);
        }
    }

    fn remux(&mut self, demuxed: DemuxerResult, chunk_meta: ChunkMetadata, flush: bool) -> Result<TransmuxResult, MuxError> {
        let params = RemuxParams {
            time_offset: self.state.time_offset,
            accurate_time_offset: self.state.accurate_time_offset,
            flush,
            playlist_type: self.playlist_type,
        };
        let remuxer = self
            .remuxer
            .as_mut()
            .ok_or_else(|| MuxError::internal("transmuxer has no remuxer"))?;
        let remux_result = match remuxer.remux(demuxed, params) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, sn = chunk_meta.sn, "remux failed");
                self.drain_warnings();
                return Err(e);
            }
        };
        Ok(TransmuxResult {
            remux_result,
            chunk_meta,
            warnings: self.drain_warnings(),
        })
    }

    fn empty_result(&mut self, chunk_meta: ChunkMetadata) -> TransmuxResult {
        TransmuxResult {
            remux_result: RemuxerResult::default(),
            chunk_meta,
            warnings: self.drain_warnings(),
        }
    }

    fn drain_warnings(&mut self) -> Vec<MuxError> {
        let mut warnings = std::mem::take(&mut self.warnings);
        if let Some(demuxer) = self.demuxer.as_mut() {
            warnings.extend(demuxer.drain_warnings());
        }
        if let Some(remuxer) = self.remuxer.as_mut() {
            warnings.extend(remuxer.drain_warnings());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decrypt::tests::encrypt_cbc;
    use crate::decrypt::SoftwareProvider;
    use crate::demux::ts::tests::av_segment;

    const KEY: [u8; 16] = [0x2B; 16];
    const IV: [u8; 16] = [0x07; 16];

    fn transmuxer(provider: Option<Arc<dyn DecryptProvider>>) -> Transmuxer {
        Transmuxer::new(
            MuxConfig::default(),
            TypeSupported::default(),
            Quirks::default(),
            PlaylistType::Main,
            provider,
        )
    }

    fn first_state() -> Option<TransmuxState> {
        Some(TransmuxState {
            discontinuity: true,
            ..Default::default()
        })
    }

    fn aes_128() -> DecryptData {
        DecryptData {
            method: EncryptionMethod::Aes128,
            key: Some(KEY.to_vec()),
            iv: Some(IV.to_vec()),
            key_id: None,
        }
    }

    fn ready(outcome: PushOutcome) -> Vec<TransmuxResult> {
        match outcome {
            PushOutcome::Ready(results) => results,
            PushOutcome::Pending(work) => panic!("unexpected pending work: {work:?}"),
        }
    }

    #[test]
    fn test_unknown_container_yields_empty_result_and_warning() {
        let mut transmuxer = transmuxer(None);
        let results = ready(
            transmuxer
                .push(vec![0x42; 400], None, ChunkMetadata::new(0, 1, 0), first_state())
                .unwrap(),
        );
        assert_eq!(results.len(), 1);
        assert!(results[0].remux_result.is_empty());
        assert_eq!(results[0].warnings.len(), 1);
        assert!(results[0].warnings[0].reason.contains("Failed to find demuxer"));
    }

    #[test]
    fn test_ts_push_then_flush() {
        let mut transmuxer = transmuxer(None);
        let results = ready(
            transmuxer
                .push(av_segment(), None, ChunkMetadata::new(0, 1, 0), first_state())
                .unwrap(),
        );
        let result = &results[0].remux_result;
        let init = result.init_segment.as_ref().expect("init segment");
        let tracks = init.tracks.as_ref().unwrap();
        assert!(tracks.video.is_some() && tracks.audio.is_some());
        assert!(result.video.is_some());
        assert!(result.audio.is_some());

        let flushed = ready(transmuxer.flush(ChunkMetadata::new(0, 1, 0)).unwrap());
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].remux_result.init_segment.is_none());
    }

    #[test]
    fn test_software_decrypt_completes_on_flush() {
        let mut transmuxer = transmuxer(None);
        let encrypted = encrypt_cbc(&av_segment(), &KEY, &IV);
        let mut results = ready(
            transmuxer
                .push(encrypted, Some(&aes_128()), ChunkMetadata::new(0, 1, 0), first_state())
                .unwrap(),
        );
        assert_eq!(transmuxer.demuxer.as_ref().map(Demuxer::kind), Some(DemuxerKind::Ts));
        results.extend(ready(transmuxer.flush(ChunkMetadata::new(0, 1, 0)).unwrap()));

        let init_segments = results.iter().filter(|r| r.remux_result.init_segment.is_some()).count();
        assert_eq!(init_segments, 1);
        let video_samples: usize = results
            .iter()
            .filter_map(|r| r.remux_result.video.as_ref())
            .map(|v| v.nb)
            .sum();
        assert_eq!(video_samples, 2);
    }

    #[tokio::test]
    async fn test_provider_decrypt_resumes_push() {
        let mut transmuxer = transmuxer(Some(Arc::new(SoftwareProvider)));
        let encrypted = encrypt_cbc(&av_segment(), &KEY, &IV);
        let outcome = transmuxer
            .push(encrypted, Some(&aes_128()), ChunkMetadata::new(0, 7, 0), first_state())
            .unwrap();
        let PushOutcome::Pending(work) = outcome else {
            panic!("provider decrypt should be pending");
        };
        assert_eq!(work.chunk_meta().sn, 7);

        let results = ready(transmuxer.resume(work.resolve().await).unwrap());
        assert_eq!(results[0].chunk_meta.sn, 7);
        assert!(results[0].remux_result.video.is_some());
    }

    #[tokio::test]
    async fn test_reset_drops_in_flight_decrypt() {
        let mut transmuxer = transmuxer(Some(Arc::new(SoftwareProvider)));
        let encrypted = encrypt_cbc(&av_segment(), &KEY, &IV);
        let PushOutcome::Pending(work) = transmuxer
            .push(encrypted, Some(&aes_128()), ChunkMetadata::new(0, 1, 0), first_state())
            .unwrap()
        else {
            panic!("provider decrypt should be pending");
        };
        transmuxer.reset();
        let results = ready(transmuxer.resume(work.resolve().await).unwrap());
        assert!(results.is_empty());
        assert!(transmuxer.demuxer.is_none());
    }

    #[test]
    fn test_flush_without_demuxer_is_empty() {
        let mut transmuxer = transmuxer(None);
        let results = ready(transmuxer.flush(ChunkMetadata::new(0, 1, 0)).unwrap());
        assert_eq!(results.len(), 1);
        assert!(results[0].remux_result.is_empty());
    }

    #[test]
    fn test_bad_key_is_decrypt_error() {
        let mut transmuxer = transmuxer(None);
        let decrypt_data = DecryptData {
            key: Some(vec![0; 5]),
            ..aes_128()
        };
        let err = transmuxer
            .push(vec![0; 32], Some(&decrypt_data), ChunkMetadata::new(0, 1, 0), first_state())
            .unwrap_err();
        assert!(err.reason.contains("key"));
    }
}
