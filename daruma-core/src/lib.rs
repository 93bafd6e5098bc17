//! Daruma Core Library
//!
//! Primitives for storing a file tree across untrusted providers.
//! This crate provides:
//! - AES-256-GCM authenticated encryption with bundled nonces
//! - Shamir secret sharing over GF(2^8) for the bootstrap record
//! - Systematic Reed-Solomon erasure coding with self-describing shares
//! - The fixed-width bootstrap record and random object names
//! - Common error handling

pub mod bootstrap;
pub mod crypto;
pub mod erasure;
pub mod error;
pub mod shamir;

pub use bootstrap::{Bootstrap, BOOTSTRAP_SIZE};
pub use crypto::{decrypt, encrypt, generate_key, EncryptionKey, KEY_SIZE};
pub use erasure::{ErasureConfig, ErasureEncoder};
pub use error::{DarumaError, Result};

/// Length of a generated object name
pub const FILENAME_SIZE: usize = 32;

/// Generate a fresh random object name: 32 uppercase alphanumerics
pub fn generate_filename() -> String {
    uuid::Uuid::new_v4().simple().to_string().to_uppercase()
}

/// True if `name` has the shape produced by [`generate_filename`]
pub fn is_valid_filename(name: &str) -> bool {
    name.len() == FILENAME_SIZE
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_filenames() {
        let a = generate_filename();
        let b = generate_filename();
        assert_eq!(a.len(), FILENAME_SIZE);
        assert!(is_valid_filename(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn test_filename_validation() {
        assert!(!is_valid_filename("abc"));
        assert!(!is_valid_filename(&"a".repeat(FILENAME_SIZE)));
        assert!(is_valid_filename(&"Z9".repeat(FILENAME_SIZE / 2)));
    }
}
