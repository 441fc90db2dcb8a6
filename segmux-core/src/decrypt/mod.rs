// ============================================================================
// DECRYPT - Whole-segment and sample-level AES
// ============================================================================
//
// Two execution paths share one interface:
//   - software AES (aes/cbc/ctr crates), always synchronous
//   - an optional asynchronous `DecryptProvider`, preferred while it works
//
// A provider failure flips a sticky flag; from then on every decrypt of the
// session runs in software (when software AES is enabled).

#![forbid(unsafe_code)]

pub mod provider;
pub mod sample_aes;
pub mod software;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::base64_opt;

pub use provider::{DecryptProvider, SoftwareProvider};
pub use sample_aes::SampleAesDecrypter;
pub use software::{SoftwareDecrypter, AES_BLOCK_SIZE};

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("Invalid IV length: expected 16, got {0}")]
    InvalidIvLength(usize),

    #[error("AES key must be 16, 24 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("ciphertext length {0} is not a multiple of the AES block size")]
    Unaligned(usize),

    #[error("{provider} failed to decrypt data: {reason}")]
    Provider { provider: String, reason: String },

    #[error("invalid PKCS#7 padding")]
    InvalidPadding,

    #[error("{0} decryption is not supported by this demuxer")]
    Unsupported(EncryptionMethod),
}

/// Key method as declared by the playlist `EXT-X-KEY` tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionMethod {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "AES-128")]
    Aes128,
    #[serde(rename = "AES-256")]
    Aes256,
    #[serde(rename = "AES-256-CTR")]
    Aes256Ctr,
    #[serde(rename = "SAMPLE-AES")]
    SampleAes,
    #[serde(rename = "SAMPLE-AES-CTR")]
    SampleAesCtr,
    #[serde(rename = "SAMPLE-AES-CENC")]
    SampleAesCenc,
    #[serde(rename = "ISO-23001-7")]
    Iso23001_7,
}

impl EncryptionMethod {
    /// The whole segment is encrypted and must be decrypted before parsing.
    pub fn is_full_segment(self) -> bool {
        matches!(self, Self::Aes128 | Self::Aes256 | Self::Aes256Ctr)
    }

    /// Common encryption: samples stay encrypted, only key IDs are patched.
    pub fn is_common_encryption(self) -> bool {
        matches!(self, Self::SampleAesCtr | Self::SampleAesCenc | Self::Iso23001_7)
    }

    pub fn aes_mode(self) -> AesMode {
        match self {
            Self::Aes256Ctr => AesMode::Ctr,
            _ => AesMode::Cbc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Aes128 => "AES-128",
            Self::Aes256 => "AES-256",
            Self::Aes256Ctr => "AES-256-CTR",
            Self::SampleAes => "SAMPLE-AES",
            Self::SampleAesCtr => "SAMPLE-AES-CTR",
            Self::SampleAesCenc => "SAMPLE-AES-CENC",
            Self::Iso23001_7 => "ISO-23001-7",
        }
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AesMode {
    Cbc,
    Ctr,
}

/// Key material supplied with a `demux` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecryptData {
    pub method: EncryptionMethod,
    #[serde(with = "base64_opt")]
    pub key: Option<Vec<u8>>,
    #[serde(with = "base64_opt")]
    pub iv: Option<Vec<u8>>,
    #[serde(with = "base64_opt")]
    pub key_id: Option<Vec<u8>>,
}

/// Key, IV and method, all present.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyData {
    pub method: EncryptionMethod,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

impl DecryptData {
    /// Complete key material, if any. Decryption only applies to non-empty
    /// payloads with a method other than `NONE`.
    pub fn key_data(&self, payload_len: usize) -> Option<KeyData> {
        if payload_len == 0 || self.method == EncryptionMethod::None {
            return None;
        }
        Some(KeyData {
            method: self.method,
            key: self.key.clone()?,
            iv: self.iv.clone()?,
        })
    }

    pub fn key_id(&self) -> Option<[u8; 16]> {
        self.key_id.as_deref().and_then(|id| id.try_into().ok())
    }
}

/// Result of a decrypt call: finished now, or waiting on the provider.
pub enum DecryptOutcome<T> {
    Sync(T),
    Pending(BoxFuture<'static, Result<T, DecryptError>>),
}

impl<T> DecryptOutcome<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Await either arm.
    pub async fn resolve(self) -> Result<T, DecryptError> {
        match self {
            Self::Sync(value) => Ok(value),
            Self::Pending(future) => future.await,
        }
    }
}

impl<T> fmt::Debug for DecryptOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("DecryptOutcome::Sync"),
            Self::Pending(_) => f.write_str("DecryptOutcome::Pending"),
        }
    }
}

/// Routes raw (unpadded) block decrypts to the provider or to software.
///
/// Cheap to clone; clones share the sticky failure flag.
#[derive(Clone)]
pub struct CipherRoute {
    provider: Option<Arc<dyn DecryptProvider>>,
    provider_failed: Arc<AtomicBool>,
    enable_software_aes: bool,
}

impl CipherRoute {
    pub fn new(provider: Option<Arc<dyn DecryptProvider>>, enable_software_aes: bool) -> Self {
        Self {
            provider,
            provider_failed: Arc::new(AtomicBool::new(false)),
            enable_software_aes,
        }
    }

    pub fn is_sync(&self) -> bool {
        self.active_provider().is_none()
    }

    fn active_provider(&self) -> Option<&Arc<dyn DecryptProvider>> {
        self.provider
            .as_ref()
            .filter(|_| !self.provider_failed.load(Ordering::Acquire))
    }

    /// Decrypt without touching padding. Falls back to software when the
    /// provider errors and software AES is enabled.
    pub async fn decrypt_raw(
        &self,
        data: &[u8],
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        mode: AesMode,
    ) -> Result<Vec<u8>, DecryptError> {
        if let Some(provider) = self.active_provider() {
            match provider.decrypt(data, key, iv, mode).await {
                Ok(plain) => return Ok(plain),
                Err(e) if self.enable_software_aes => {
                    warn!(provider = provider.name(), error = %e, "decrypt provider failed, switching to software AES");
                    self.provider_failed.store(true, Ordering::Release);
                }
                Err(e) => return Err(e),
            }
        }
        software::decrypt_raw(data, key, iv, mode)
    }
}

impl fmt::Debug for CipherRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherRoute")
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("provider_failed", &self.provider_failed.load(Ordering::Relaxed))
            .field("enable_software_aes", &self.enable_software_aes)
            .finish()
    }
}

/// Whole-segment decrypter owned by one transmuxer.
#[derive(Debug)]
pub struct Decrypter {
    software: SoftwareDecrypter,
    route: CipherRoute,
}

impl Decrypter {
    pub fn new(provider: Option<Arc<dyn DecryptProvider>>, enable_software_aes: bool) -> Self {
        Self {
            software: SoftwareDecrypter::new(),
            route: CipherRoute::new(provider, enable_software_aes),
        }
    }

    /// No provider is in play, so `software_decrypt` is the path to use.
    pub fn is_sync(&self) -> bool {
        self.route.is_sync()
    }

    pub fn route(&self) -> &CipherRoute {
        &self.route
    }

    /// Progressive software decrypt. CBC output trails the input by one block.
    pub fn software_decrypt(&mut self, data: &[u8], key: &[u8], iv: &[u8], mode: AesMode) -> Result<Vec<u8>, DecryptError> {
        self.software.decrypt(data, key, iv, mode)
    }

    /// Release withheld plaintext with PKCS#7 padding removed.
    pub fn flush(&mut self) -> Vec<u8> {
        self.software.flush(true)
    }

    pub fn reset(&mut self) {
        self.software.reset();
    }

    /// Decrypt a complete buffer in one go, padding stripped for CBC.
    pub fn decrypt(&self, data: Vec<u8>, key: &[u8], iv: &[u8], mode: AesMode) -> Result<DecryptOutcome<Vec<u8>>, DecryptError> {
        let iv = software::check_iv(iv)?;
        software::check_key(key)?;
        if self.is_sync() {
            return software::decrypt_whole(&data, key, &iv, mode).map(DecryptOutcome::Sync);
        }

        let route = self.route.clone();
        let key = key.to_vec();
        Ok(DecryptOutcome::Pending(
            async move {
                let mut plain = route.decrypt_raw(&data, &key, &iv, mode).await?;
                if mode == AesMode::Cbc {
                    software::strip_padding(&mut plain);
                }
                Ok(plain)
            }
            .boxed(),
        ))
    }
}
