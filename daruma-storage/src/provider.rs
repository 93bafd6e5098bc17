//! Provider capability trait
//!
//! A provider is an untrusted object store. The driver only ever needs four
//! operations from it, so every backend implements this one trait.

use crate::failure::ProviderResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Stable identity of a provider: backend type plus a backend-specific uid
/// (a path, an account, a URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId {
    pub provider_type: String,
    pub uid: String,
}

impl ProviderId {
    pub fn new(provider_type: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            uid: uid.into(),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider_type, self.uid)
    }
}

/// Async object store keyed by name
///
/// Every failure carries the provider's identity. Deleting an object that
/// does not exist succeeds.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Identity of this provider
    fn id(&self) -> &ProviderId;

    /// Fetch an object
    async fn get(&self, name: &str) -> ProviderResult<Bytes>;

    /// Store an object, replacing any previous value
    async fn put(&self, name: &str, data: Bytes) -> ProviderResult<()>;

    /// Remove an object
    async fn delete(&self, name: &str) -> ProviderResult<()>;

    /// Remove every object
    async fn wipe(&self) -> ProviderResult<()>;
}

/// Providers are shared between the orchestrator and its fan-out tasks
pub type SharedProvider = Arc<dyn Provider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_display() {
        let id = ProviderId::new("local", "/tmp/p0");
        assert_eq!(id.to_string(), "local:/tmp/p0");
    }

    #[test]
    fn test_provider_id_ordering() {
        let a = ProviderId::new("local", "a");
        let b = ProviderId::new("local", "b");
        let c = ProviderId::new("memory", "a");
        assert!(a < b);
        assert!(b < c);
    }
}
