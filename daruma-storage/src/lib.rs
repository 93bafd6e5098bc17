//! Daruma Storage Providers
//!
//! Provides the storage capability consumed by the driver:
//! - `Provider` trait: get/put/delete/wipe keyed by object name
//! - `ProviderId` and `ProviderFailure` for blame attribution
//! - `MemoryProvider` with fault injection, for testing
//! - `LocalFilesystemProvider` storing objects as files in a directory

pub mod failure;
pub mod local;
pub mod memory;
pub mod provider;

pub use failure::{FailureKind, ProviderFailure, ProviderResult};
pub use local::LocalFilesystemProvider;
pub use memory::{MemoryProvider, MemoryStats, ProviderState};
pub use provider::{Provider, ProviderId, SharedProvider};
