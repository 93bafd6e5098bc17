//! Daruma Driver
//!
//! Stores a file tree across untrusted providers:
//! - `BootstrapManager`: secret-shares the root record and recovers it by vote
//! - `FileDistributor`: encrypts, erasure-codes and scatters one object
//! - `Manifest` / `FileManager`: the path index and file operations
//! - `ResilienceManager`: provider scoring and repair
//! - `Daruma`: the orchestrator tying them together

pub mod bootstrap;
pub mod config;
pub mod daruma;
pub mod distributor;
pub mod error;
pub mod fanout;
pub mod file_manager;
pub mod manifest;
pub mod resilience;

pub use config::{ConfigError, DarumaConfig, WritePolicy};
pub use daruma::Daruma;
pub use error::{FatalFailure, OperationError, Recovered, Result};
pub use manifest::{Manifest, ManifestEntry, Node};
pub use resilience::{ProviderHealth, ProviderStatus, RepairState};

pub use daruma_storage::{
    FailureKind, LocalFilesystemProvider, MemoryProvider, Provider, ProviderFailure, ProviderId,
    ProviderState, SharedProvider,
};
