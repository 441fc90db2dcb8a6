//! Asynchronous decrypt providers.

use async_trait::async_trait;

use super::{software, AesMode, DecryptError, AES_BLOCK_SIZE};

/// A host-side crypto engine reached asynchronously.
///
/// Implementations perform the raw block transform only: no PKCS#7 removal,
/// no chaining state kept between calls.
#[async_trait]
pub trait DecryptProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn decrypt(
        &self,
        data: &[u8],
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        mode: AesMode,
    ) -> Result<Vec<u8>, DecryptError>;
}

/// Runs the software cipher behind the provider interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareProvider;

#[async_trait]
impl DecryptProvider for SoftwareProvider {
    fn name(&self) -> &str {
        "software"
    }

    async fn decrypt(
        &self,
        data: &[u8],
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        mode: AesMode,
    ) -> Result<Vec<u8>, DecryptError> {
        software::decrypt_raw(data, key, iv, mode)
    }
}
