//! Error types for Daruma
//!
//! Provides a unified error type for the cryptographic and coding primitives.

use thiserror::Error;

/// Result type alias for Daruma core operations
pub type Result<T> = std::result::Result<T, DarumaError>;

/// Unified error type for Daruma core
#[derive(Error, Debug)]
pub enum DarumaError {
    // ===== Erasure Coding Errors =====
    /// Too few shares, or shares of inconsistent size or format
    #[error("Erasure decode error: {0}")]
    Decode(String),

    // ===== Cryptography Errors =====
    #[error("Decryption or authentication failed")]
    Decrypt,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    // ===== Secret Sharing Errors =====
    #[error("Secret reconstruction error: {0}")]
    Reconstruction(String),

    // ===== Backing Library Errors =====
    #[error("Library error: {0}")]
    Library(String),

    // ===== Parsing Errors =====
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DarumaError {
    /// True for errors that mean the input shares or ciphertext were bad,
    /// as opposed to a misconfiguration or a library fault.
    pub fn is_corrupt_input(&self) -> bool {
        matches!(
            self,
            DarumaError::Decode(_)
                | DarumaError::Decrypt
                | DarumaError::Reconstruction(_)
                | DarumaError::Parse(_)
        )
    }
}

impl From<reed_solomon_erasure::Error> for DarumaError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        use reed_solomon_erasure::Error as RsError;
        match err {
            RsError::TooFewShardsPresent
            | RsError::IncorrectShardSize
            | RsError::EmptyShard
            | RsError::InvalidIndex
            | RsError::TooFewShards
            | RsError::TooManyShards => DarumaError::Decode(err.to_string()),
            _ => DarumaError::Library(err.to_string()),
        }
    }
}

impl From<bincode::Error> for DarumaError {
    fn from(err: bincode::Error) -> Self {
        DarumaError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DarumaError::Decode("have 2 shares, need 3".to_string());
        assert_eq!(err.to_string(), "Erasure decode error: have 2 shares, need 3");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DarumaError = io_err.into();
        assert!(matches!(err, DarumaError::Io(_)));
    }

    #[test]
    fn test_corrupt_input_classification() {
        assert!(DarumaError::Decrypt.is_corrupt_input());
        assert!(DarumaError::Decode("bad".into()).is_corrupt_input());
        assert!(!DarumaError::Library("boom".into()).is_corrupt_input());
        assert!(!DarumaError::IllegalArgument("k".into()).is_corrupt_input());
    }

    #[test]
    fn test_error_from_reed_solomon() {
        let err: DarumaError = reed_solomon_erasure::Error::TooFewShardsPresent.into();
        assert!(matches!(err, DarumaError::Decode(_)));

        let err: DarumaError = reed_solomon_erasure::Error::TooFewDataShards.into();
        assert!(matches!(err, DarumaError::Library(_)));
    }
}
