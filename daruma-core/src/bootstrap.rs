//! Bootstrap record
//!
//! The root secret of an installation: the master key that encrypts the
//! manifest, the manifest's object name, and the file reconstruction
//! threshold. It is secret-shared across all providers, so its encoded size
//! is fixed and known before reconstruction.
//!
//! Wire layout (network byte order):
//!
//! ```text
//! [ master_key: 32 bytes ][ manifest_name: 32 bytes ][ threshold: i32 BE ]
//! ```

use crate::crypto::{EncryptionKey, KEY_SIZE};
use crate::error::{DarumaError, Result};
use crate::{is_valid_filename, FILENAME_SIZE};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Encoded size of a bootstrap record
pub const BOOTSTRAP_SIZE: usize = KEY_SIZE + FILENAME_SIZE + 4;

/// Root record recovered from the providers on load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub master_key: EncryptionKey,
    pub manifest_name: String,
    pub file_reconstruction_threshold: usize,
}

#[derive(Serialize, Deserialize)]
struct BootstrapWire {
    master_key: [u8; KEY_SIZE],
    manifest_name: [u8; FILENAME_SIZE],
    file_reconstruction_threshold: i32,
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

impl Bootstrap {
    pub fn new(
        master_key: EncryptionKey,
        manifest_name: String,
        file_reconstruction_threshold: usize,
    ) -> Result<Self> {
        if !is_valid_filename(&manifest_name) {
            return Err(DarumaError::IllegalArgument(format!(
                "invalid manifest name: {:?}",
                manifest_name
            )));
        }
        if file_reconstruction_threshold == 0 || file_reconstruction_threshold > i32::MAX as usize
        {
            return Err(DarumaError::IllegalArgument(format!(
                "invalid file reconstruction threshold: {}",
                file_reconstruction_threshold
            )));
        }
        Ok(Self {
            master_key,
            manifest_name,
            file_reconstruction_threshold,
        })
    }

    /// Serialize into the fixed-width wire format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut manifest_name = [0u8; FILENAME_SIZE];
        manifest_name.copy_from_slice(self.manifest_name.as_bytes());
        let wire = BootstrapWire {
            master_key: *self.master_key.as_bytes(),
            manifest_name,
            file_reconstruction_threshold: self.file_reconstruction_threshold as i32,
        };
        let bytes = wire_options().serialize(&wire)?;
        debug_assert_eq!(bytes.len(), BOOTSTRAP_SIZE);
        Ok(bytes)
    }

    /// Parse a record produced by [`Bootstrap::to_bytes`]
    ///
    /// A record with the wrong size, a malformed manifest name, or a
    /// non-positive threshold is a [`DarumaError::Parse`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BOOTSTRAP_SIZE {
            return Err(DarumaError::Parse(format!(
                "bootstrap record is {} bytes, expected {}",
                bytes.len(),
                BOOTSTRAP_SIZE
            )));
        }
        let wire: BootstrapWire = wire_options()
            .deserialize(bytes)
            .map_err(|e| DarumaError::Parse(e.to_string()))?;

        let manifest_name = std::str::from_utf8(&wire.manifest_name)
            .ok()
            .filter(|name| is_valid_filename(name))
            .ok_or_else(|| DarumaError::Parse("malformed manifest name".to_string()))?
            .to_string();

        if wire.file_reconstruction_threshold < 1 {
            return Err(DarumaError::Parse(format!(
                "invalid file reconstruction threshold: {}",
                wire.file_reconstruction_threshold
            )));
        }

        Ok(Self {
            master_key: EncryptionKey::from_bytes(wire.master_key),
            manifest_name,
            file_reconstruction_threshold: wire.file_reconstruction_threshold as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::generate_key, generate_filename};

    fn sample() -> Bootstrap {
        Bootstrap::new(generate_key(), generate_filename(), 3).unwrap()
    }

    #[test]
    fn test_fixed_size() {
        assert_eq!(BOOTSTRAP_SIZE, 68);
        assert_eq!(sample().to_bytes().unwrap().len(), BOOTSTRAP_SIZE);
    }

    #[test]
    fn test_roundtrip() {
        let bootstrap = sample();
        let parsed = Bootstrap::from_bytes(&bootstrap.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, bootstrap);
    }

    #[test]
    fn test_threshold_is_big_endian_tail() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(&bytes[BOOTSTRAP_SIZE - 4..], &[0, 0, 0, 3]);
    }

    #[test]
    fn test_key_and_name_layout() {
        let bootstrap = sample();
        let bytes = bootstrap.to_bytes().unwrap();
        assert_eq!(&bytes[..KEY_SIZE], bootstrap.master_key.as_bytes());
        assert_eq!(
            &bytes[KEY_SIZE..KEY_SIZE + FILENAME_SIZE],
            bootstrap.manifest_name.as_bytes()
        );
    }

    #[test]
    fn test_rejects_wrong_length() {
        let bytes = sample().to_bytes().unwrap();
        assert!(matches!(
            Bootstrap::from_bytes(&bytes[1..]),
            Err(DarumaError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_bad_name() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[KEY_SIZE] = b'!';
        assert!(matches!(
            Bootstrap::from_bytes(&bytes),
            Err(DarumaError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[BOOTSTRAP_SIZE - 1] = 0;
        assert!(matches!(
            Bootstrap::from_bytes(&bytes),
            Err(DarumaError::Parse(_))
        ));
    }

    #[test]
    fn test_new_validates() {
        assert!(Bootstrap::new(generate_key(), "short".to_string(), 2).is_err());
        assert!(Bootstrap::new(generate_key(), generate_filename(), 0).is_err());
    }
}
