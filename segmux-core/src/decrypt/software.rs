//! Software AES: progressive CBC with withheld padding block, stateful CTR.

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use ctr::cipher::StreamCipher;
use std::fmt;
use tracing::{trace, warn};

use super::{AesMode, DecryptError};

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

type Ctr128<C> = ctr::Ctr128BE<C>;

// Binds `$cipher` to the AES variant matching the key length.
macro_rules! with_aes_key {
    ($key:expr, $cipher:ident => $body:expr) => {
        match $key.len() {
            16 => {
                type $cipher = Aes128;
                $body
            }
            24 => {
                type $cipher = Aes192;
                $body
            }
            32 => {
                type $cipher = Aes256;
                $body
            }
            len => Err(DecryptError::InvalidKeyLength(len)),
        }
    };
}

pub(crate) fn check_iv(iv: &[u8]) -> Result<[u8; AES_BLOCK_SIZE], DecryptError> {
    iv.try_into().map_err(|_| DecryptError::InvalidIvLength(iv.len()))
}

pub(crate) fn check_key(key: &[u8]) -> Result<(), DecryptError> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        len => Err(DecryptError::InvalidKeyLength(len)),
    }
}

/// CBC-decrypt block-aligned `data` in place. Padding is left alone.
pub fn cbc_decrypt_in_place(key: &[u8], iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]) -> Result<(), DecryptError> {
    let len = data.len();
    if len % AES_BLOCK_SIZE != 0 {
        return Err(DecryptError::Unaligned(len));
    }
    with_aes_key!(key, Cipher => {
        cbc::Decryptor::<Cipher>::new_from_slices(key, iv)
            .map_err(|_| DecryptError::InvalidKeyLength(key.len()))?
            .decrypt_padded_mut::<NoPadding>(data)
            .map_err(|_| DecryptError::Unaligned(len))?;
        Ok(())
    })
}

/// One-shot decrypt without padding removal.
pub fn decrypt_raw(data: &[u8], key: &[u8], iv: &[u8; AES_BLOCK_SIZE], mode: AesMode) -> Result<Vec<u8>, DecryptError> {
    let mut out = data.to_vec();
    match mode {
        AesMode::Cbc => cbc_decrypt_in_place(key, iv, &mut out)?,
        AesMode::Ctr => CtrCipher::new(key, iv)?.apply(&mut out),
    }
    Ok(out)
}

/// One-shot decrypt of a complete segment; CBC padding is stripped.
pub fn decrypt_whole(data: &[u8], key: &[u8], iv: &[u8; AES_BLOCK_SIZE], mode: AesMode) -> Result<Vec<u8>, DecryptError> {
    let mut out = decrypt_raw(data, key, iv, mode)?;
    if mode == AesMode::Cbc {
        strip_padding(&mut out);
    }
    Ok(out)
}

/// Length of `data` once a valid PKCS#7 trailer is removed.
pub fn pkcs7_unpadded_len(data: &[u8]) -> Result<usize, DecryptError> {
    let k = *data.last().ok_or(DecryptError::InvalidPadding)? as usize;
    if k == 0 || k > AES_BLOCK_SIZE || k > data.len() {
        return Err(DecryptError::InvalidPadding);
    }
    let body = data.len() - k;
    if data[body..].iter().any(|&b| b as usize != k) {
        return Err(DecryptError::InvalidPadding);
    }
    Ok(body)
}

/// Strip PKCS#7 padding in place; invalid padding leaves the data untouched.
pub fn strip_padding(data: &mut Vec<u8>) {
    match pkcs7_unpadded_len(data) {
        Ok(len) => data.truncate(len),
        Err(e) => warn!(len = data.len(), "{e}, leaving trailing bytes in place"),
    }
}

enum CtrCipher {
    Aes128(Ctr128<Aes128>),
    Aes192(Ctr128<Aes192>),
    Aes256(Ctr128<Aes256>),
}

impl CtrCipher {
    fn new(key: &[u8], iv: &[u8; AES_BLOCK_SIZE]) -> Result<Self, DecryptError> {
        let len = key.len();
        let invalid = |_| DecryptError::InvalidKeyLength(len);
        Ok(match len {
            16 => Self::Aes128(Ctr128::new_from_slices(key, iv).map_err(invalid)?),
            24 => Self::Aes192(Ctr128::new_from_slices(key, iv).map_err(invalid)?),
            32 => Self::Aes256(Ctr128::new_from_slices(key, iv).map_err(invalid)?),
            _ => return Err(DecryptError::InvalidKeyLength(len)),
        })
    }

    fn apply(&mut self, data: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(data),
            Self::Aes192(c) => c.apply_keystream(data),
            Self::Aes256(c) => c.apply_keystream(data),
        }
    }
}

/// Stateful decrypter for one segment delivered in chunks.
///
/// CBC chains across calls on the last ciphertext block, caches any partial
/// trailing block, and holds back the final plaintext block until `flush`.
/// CTR keeps its counter position between calls.
#[derive(Default)]
pub struct SoftwareDecrypter {
    remainder: Vec<u8>,
    withheld: Vec<u8>,
    next_iv: Option<[u8; AES_BLOCK_SIZE]>,
    ctr: Option<CtrCipher>,
}

impl SoftwareDecrypter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decrypt(&mut self, data: &[u8], key: &[u8], iv: &[u8], mode: AesMode) -> Result<Vec<u8>, DecryptError> {
        let iv = check_iv(iv)?;
        check_key(key)?;
        match mode {
            AesMode::Cbc => self.decrypt_cbc(data, key, &iv),
            AesMode::Ctr => self.decrypt_ctr(data, key, &iv),
        }
    }

    fn decrypt_cbc(&mut self, data: &[u8], key: &[u8], iv: &[u8; AES_BLOCK_SIZE]) -> Result<Vec<u8>, DecryptError> {
        let mut chunk = std::mem::take(&mut self.remainder);
        chunk.extend_from_slice(data);
        let aligned = chunk.len() - chunk.len() % AES_BLOCK_SIZE;
        self.remainder = chunk.split_off(aligned);
        if chunk.is_empty() {
            return Ok(Vec::new());
        }

        let iv = self.next_iv.unwrap_or(*iv);
        let mut next_iv = [0u8; AES_BLOCK_SIZE];
        next_iv.copy_from_slice(&chunk[aligned - AES_BLOCK_SIZE..]);
        cbc_decrypt_in_place(key, &iv, &mut chunk)?;
        self.next_iv = Some(next_iv);

        let last = chunk.split_off(aligned - AES_BLOCK_SIZE);
        let mut out = std::mem::replace(&mut self.withheld, last);
        out.append(&mut chunk);
        trace!(
            encrypted = data.len(),
            decrypted = out.len(),
            cached = self.remainder.len(),
            "aes cbc: chunk decrypted"
        );
        Ok(out)
    }

    fn decrypt_ctr(&mut self, data: &[u8], key: &[u8], iv: &[u8; AES_BLOCK_SIZE]) -> Result<Vec<u8>, DecryptError> {
        let cipher = match self.ctr.take() {
            Some(cipher) => cipher,
            None => CtrCipher::new(key, iv)?,
        };
        let cipher = self.ctr.insert(cipher);
        let mut out = data.to_vec();
        cipher.apply(&mut out);
        trace!(decrypted = out.len(), "aes ctr: chunk decrypted");
        Ok(out)
    }

    /// Release the withheld block and reset. With `strip_pkcs7` the block
    /// loses its padding; a trailing partial block is dropped.
    pub fn flush(&mut self, strip_pkcs7: bool) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.withheld);
        if !self.remainder.is_empty() {
            warn!(bytes = self.remainder.len(), "aes cbc: dropping unaligned ciphertext tail");
        }
        self.reset();
        if strip_pkcs7 && !out.is_empty() {
            strip_padding(&mut out);
        }
        out
    }

    pub fn reset(&mut self) {
        self.remainder.clear();
        self.withheld.clear();
        self.next_iv = None;
        self.ctr = None;
    }
}

impl fmt::Debug for SoftwareDecrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareDecrypter")
            .field("remainder", &self.remainder.len())
            .field("withheld", &self.withheld.len())
            .field("chained", &self.next_iv.is_some())
            .field("ctr", &self.ctr.is_some())
            .finish()
    }
}
