//! Per-provider failures
//!
//! The resilience layer scores providers by the kind of failure they
//! produce, so each failure names its provider.

use crate::provider::ProviderId;
use std::fmt;
use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = std::result::Result<T, ProviderFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Provider unreachable or timed out
    Connection,
    /// Credentials rejected; not held against the provider's score
    Auth,
    /// Reachable, but the operation failed or the object is missing
    Operation,
    /// Returned data that disagreed with the other providers
    InvalidShare,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Connection => "connection",
            FailureKind::Auth => "authentication",
            FailureKind::Operation => "operation",
            FailureKind::InvalidShare => "invalid share",
        };
        f.write_str(name)
    }
}

/// A failure attributed to one provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} failure on {provider}: {message}")]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(provider: &ProviderId, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.clone(),
            kind,
            message: message.into(),
        }
    }

    pub fn connection(provider: &ProviderId, message: impl Into<String>) -> Self {
        Self::new(provider, FailureKind::Connection, message)
    }

    pub fn auth(provider: &ProviderId, message: impl Into<String>) -> Self {
        Self::new(provider, FailureKind::Auth, message)
    }

    pub fn operation(provider: &ProviderId, message: impl Into<String>) -> Self {
        Self::new(provider, FailureKind::Operation, message)
    }

    pub fn invalid_share(provider: &ProviderId, message: impl Into<String>) -> Self {
        Self::new(provider, FailureKind::InvalidShare, message)
    }

    pub fn is_auth(&self) -> bool {
        self.kind == FailureKind::Auth
    }

    /// Map an I/O error from a storage backend onto a failure kind
    pub fn from_io(provider: &ProviderId, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::PermissionDenied => FailureKind::Auth,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::TimedOut => FailureKind::Connection,
            _ => FailureKind::Operation,
        };
        Self::new(provider, kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let id = ProviderId::new("memory", "p1");
        let failure = ProviderFailure::connection(&id, "offline");
        assert_eq!(failure.to_string(), "connection failure on memory:p1: offline");
    }

    #[test]
    fn test_from_io_classification() {
        let id = ProviderId::new("local", "/x");
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(ProviderFailure::from_io(&id, &denied).is_auth());

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(
            ProviderFailure::from_io(&id, &missing).kind,
            FailureKind::Operation
        );

        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(
            ProviderFailure::from_io(&id, &timeout).kind,
            FailureKind::Connection
        );
    }
}
