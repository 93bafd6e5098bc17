//! Authenticated symmetric encryption for Daruma
//!
//! AES-256-GCM with a fresh random nonce per call. The nonce is bundled
//! in front of the ciphertext, so a ciphertext is self-contained:
//!
//! ```text
//! [ nonce: 12 bytes ][ ciphertext ][ tag: 16 bytes ]
//! ```

use crate::error::{DarumaError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::fmt;

/// AES-256-GCM key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Total overhead per encryption (nonce + tag)
pub const OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// AES-256-GCM encryption key
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a new random encryption key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(DarumaError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self(key))
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        // Accumulate instead of short-circuiting on the first differing byte.
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for EncryptionKey {}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        // Zeroize key on drop
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// Generate a fresh random key suitable for [`encrypt`]
pub fn generate_key() -> EncryptionKey {
    EncryptionKey::generate()
}

/// Encrypt data using AES-256-GCM
///
/// Returns the nonce followed by the ciphertext and tag.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| DarumaError::Library(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| DarumaError::Library(format!("encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt data produced by [`encrypt`] and verify its authentication tag
///
/// Fails with [`DarumaError::Decrypt`] on a wrong key or any tampering;
/// never returns partially decrypted data.
pub fn decrypt(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if data.len() < OVERHEAD {
        return Err(DarumaError::Decrypt);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| DarumaError::Library(e.to_string()))?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| DarumaError::Decrypt)
}
