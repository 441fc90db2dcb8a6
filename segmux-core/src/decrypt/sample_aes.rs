//! SAMPLE-AES: decrypt only the protected ranges of AAC frames and AVC slices.
//!
//! Every protected range is an independent unpadded CBC run starting from the
//! key's IV.

use std::ops::Range;

use futures::FutureExt;
use tracing::trace;

use super::software::{self, cbc_decrypt_in_place};
use super::{AesMode, CipherRoute, DecryptError, DecryptOutcome, KeyData, AES_BLOCK_SIZE};
use crate::track::{AudioCodec, DemuxerResult, NalUnit, VideoCodec};
use crate::video::nal::discard_epb;

/// Leading clear bytes of a protected AAC frame.
const AAC_CLEAR_LEADER: usize = 16;
/// Leading clear bytes of a protected AVC slice.
const AVC_CLEAR_LEADER: usize = 32;
/// One encrypted block, then nine clear ones.
const AVC_PATTERN_PERIOD: usize = 160;
const AVC_MIN_PROTECTED_LEN: usize = 48;

#[derive(Debug, Clone)]
pub struct SampleAesDecrypter {
    key: Vec<u8>,
    iv: [u8; AES_BLOCK_SIZE],
    route: CipherRoute,
}

impl SampleAesDecrypter {
    pub fn new(key_data: &KeyData, route: CipherRoute) -> Result<Self, DecryptError> {
        software::check_key(&key_data.key)?;
        Ok(Self {
            key: key_data.key.clone(),
            iv: software::check_iv(&key_data.iv)?,
            route,
        })
    }

    /// Decrypt every protected AAC and AVC sample of `result`.
    ///
    /// Runs in a tight loop on the software cipher, or returns a future that
    /// walks the samples one provider call at a time.
    pub fn decrypt(&self, mut result: DemuxerResult) -> Result<DecryptOutcome<DemuxerResult>, DecryptError> {
        if self.route.is_sync() {
            self.decrypt_sync(&mut result)?;
            return Ok(DecryptOutcome::Sync(result));
        }
        let this = self.clone();
        Ok(DecryptOutcome::Pending(
            async move {
                this.decrypt_async(&mut result).await?;
                Ok(result)
            }
            .boxed(),
        ))
    }

    fn decrypt_sync(&self, result: &mut DemuxerResult) -> Result<(), DecryptError> {
        let mut units = 0usize;
        if result.audio.segment_codec == Some(AudioCodec::Aac) {
            for sample in &mut result.audio.samples {
                if let Some(range) = aac_protected_range(sample.unit.len()) {
                    cbc_decrypt_in_place(&self.key, &self.iv, &mut sample.unit[range])?;
                    units += 1;
                }
            }
        }
        if result.video.segment_codec == Some(VideoCodec::Avc) {
            for unit in protected_avc_units(result) {
                let mut decoded = discard_epb(&unit.data);
                let mut encrypted = gather_avc_blocks(&decoded);
                cbc_decrypt_in_place(&self.key, &self.iv, &mut encrypted)?;
                scatter_avc_blocks(&mut decoded, &encrypted);
                unit.data = decoded;
                units += 1;
            }
        }
        trace!(units, "sample-aes: decrypted synchronously");
        Ok(())
    }

    async fn decrypt_async(&self, result: &mut DemuxerResult) -> Result<(), DecryptError> {
        if result.audio.segment_codec == Some(AudioCodec::Aac) {
            for sample in &mut result.audio.samples {
                if let Some(range) = aac_protected_range(sample.unit.len()) {
                    let plain = self
                        .route
                        .decrypt_raw(&sample.unit[range.clone()], &self.key, &self.iv, AesMode::Cbc)
                        .await?;
                    sample.unit[range].copy_from_slice(&plain);
                }
            }
        }
        if result.video.segment_codec == Some(VideoCodec::Avc) {
            for unit in protected_avc_units(result) {
                let mut decoded = discard_epb(&unit.data);
                let encrypted = gather_avc_blocks(&decoded);
                let plain = self.route.decrypt_raw(&encrypted, &self.key, &self.iv, AesMode::Cbc).await?;
                scatter_avc_blocks(&mut decoded, &plain);
                unit.data = decoded;
            }
        }
        Ok(())
    }
}

/// Block-aligned bytes after the clear leader; `None` when nothing is protected.
fn aac_protected_range(len: usize) -> Option<Range<usize>> {
    let end = len - len % AES_BLOCK_SIZE;
    (end > AAC_CLEAR_LEADER).then_some(AAC_CLEAR_LEADER..end)
}

fn protected_avc_units(result: &mut DemuxerResult) -> impl Iterator<Item = &mut NalUnit> {
    result
        .video
        .samples
        .iter_mut()
        .flat_map(|sample| sample.units.iter_mut())
        .filter(|unit| matches!(unit.kind, 1 | 5) && unit.data.len() > AVC_MIN_PROTECTED_LEN)
}

fn avc_block_offsets(len: usize) -> impl Iterator<Item = usize> {
    (AVC_CLEAR_LEADER..len.saturating_sub(AES_BLOCK_SIZE)).step_by(AVC_PATTERN_PERIOD)
}

fn gather_avc_blocks(decoded: &[u8]) -> Vec<u8> {
    let blocks = decoded.len().saturating_sub(AVC_MIN_PROTECTED_LEN) / AVC_PATTERN_PERIOD + 1;
    let mut encrypted = vec![0u8; blocks * AES_BLOCK_SIZE];
    for (chunk, pos) in encrypted.chunks_exact_mut(AES_BLOCK_SIZE).zip(avc_block_offsets(decoded.len())) {
        chunk.copy_from_slice(&decoded[pos..pos + AES_BLOCK_SIZE]);
    }
    encrypted
}

fn scatter_avc_blocks(decoded: &mut [u8], plain: &[u8]) {
    let len = decoded.len();
    for (chunk, pos) in plain.chunks_exact(AES_BLOCK_SIZE).zip(avc_block_offsets(len)) {
        decoded[pos..pos + AES_BLOCK_SIZE].copy_from_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decrypt::SoftwareProvider;
    use crate::track::{AudioSample, VideoSample};
    use aes::Aes128;
    use cbc::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
    use std::sync::Arc;

    const KEY: [u8; 16] = [0x2Bu8; 16];
    const IV: [u8; 16] = [0x7Eu8; 16];

    fn encrypt_in_place(data: &mut [u8]) {
        let len = data.len();
        cbc::Encryptor::<Aes128>::new_from_slices(&KEY, &IV)
            .unwrap()
            .encrypt_padded_mut::<NoPadding>(data, len)
            .unwrap();
    }

    fn add_epb(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 8);
        let mut zeros = 0;
        for &b in data {
            if zeros >= 2 && b <= 3 {
                out.push(3);
                zeros = 0;
            }
            out.push(b);
            zeros = if b == 0 { zeros + 1 } else { 0 };
        }
        out
    }

    fn protect_avc(clear: &[u8]) -> Vec<u8> {
        let mut data = clear.to_vec();
        let mut blocks = gather_avc_blocks(&data);
        encrypt_in_place(&mut blocks);
        scatter_avc_blocks(&mut data, &blocks);
        add_epb(&data)
    }

    fn key_data() -> KeyData {
        KeyData {
            method: crate::decrypt::EncryptionMethod::SampleAes,
            key: KEY.to_vec(),
            iv: IV.to_vec(),
        }
    }

    fn sample_result(aac_clear: &[u8], avc_clear: &[u8]) -> DemuxerResult {
        let mut aac = aac_clear.to_vec();
        if let Some(range) = aac_protected_range(aac.len()) {
            encrypt_in_place(&mut aac[range]);
        }
        let mut result = DemuxerResult::default();
        result.audio.segment_codec = Some(AudioCodec::Aac);
        result.audio.samples.push(AudioSample { pts: 0, dts: 0, unit: aac });
        result.audio.samples.push(AudioSample { pts: 1920, dts: 1920, unit: vec![0xAA; 16] });
        result.video.segment_codec = Some(VideoCodec::Avc);
        result.video.samples.push(VideoSample {
            pts: 0,
            dts: 0,
            key: true,
            frame: true,
            units: vec![
                NalUnit { kind: 7, data: vec![0x67; 60] },
                NalUnit { kind: 5, data: protect_avc(avc_clear) },
                NalUnit { kind: 1, data: vec![0x41; 40] },
            ],
        });
        result
    }

    fn clear_payloads() -> (Vec<u8>, Vec<u8>) {
        let aac: Vec<u8> = (0..45u8).collect();
        let avc: Vec<u8> = (0..250u32).map(|i| (i % 200 + 10) as u8).collect();
        (aac, avc)
    }

    #[test]
    fn test_aac_protected_range() {
        assert_eq!(aac_protected_range(16), None);
        assert_eq!(aac_protected_range(31), None);
        assert_eq!(aac_protected_range(45), Some(16..32));
        assert_eq!(aac_protected_range(64), Some(16..64));
    }

    #[test]
    fn test_avc_pattern_block_count() {
        // 32 and 192 are below 250 - 16; 352 is past the end.
        let decoded = vec![0u8; 250];
        assert_eq!(gather_avc_blocks(&decoded).len(), 32);
        assert_eq!(avc_block_offsets(250).collect::<Vec<_>>(), vec![32, 192]);
    }

    #[test]
    fn test_sync_decrypt_restores_samples() {
        let (aac, avc) = clear_payloads();
        let decrypter = SampleAesDecrypter::new(&key_data(), CipherRoute::new(None, true)).unwrap();
        let outcome = decrypter.decrypt(sample_result(&aac, &avc)).unwrap();
        let DecryptOutcome::Sync(result) = outcome else {
            panic!("software path must be synchronous");
        };
        assert_eq!(result.audio.samples[0].unit, aac);
        assert_eq!(result.audio.samples[1].unit, vec![0xAA; 16]);
        let units = &result.video.samples[0].units;
        assert_eq!(units[0].data, vec![0x67; 60]);
        assert_eq!(units[1].data, avc);
        assert_eq!(units[2].data, vec![0x41; 40]);
    }

    #[tokio::test]
    async fn test_provider_decrypt_matches_software() {
        let (aac, avc) = clear_payloads();
        let route = CipherRoute::new(Some(Arc::new(SoftwareProvider)), false);
        let decrypter = SampleAesDecrypter::new(&key_data(), route).unwrap();
        let outcome = decrypter.decrypt(sample_result(&aac, &avc)).unwrap();
        assert!(outcome.is_pending());
        let result = outcome.resolve().await.unwrap();
        assert_eq!(result.audio.samples[0].unit, aac);
        assert_eq!(result.video.samples[0].units[1].data, avc);
    }

    #[test]
    fn test_bad_iv_rejected() {
        let mut data = key_data();
        data.iv.truncate(12);
        let err = SampleAesDecrypter::new(&data, CipherRoute::new(None, true)).unwrap_err();
        assert!(matches!(err, DecryptError::InvalidIvLength(12)));
    }
}
