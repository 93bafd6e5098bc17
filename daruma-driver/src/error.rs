//! Error types for the Daruma driver
//!
//! Multi-provider operations have two failure shapes. A degraded success
//! still produced its value but some providers misbehaved; it is returned as
//! `Ok(Recovered { value, failures })`. A fatal failure produced nothing
//! usable and is returned as `Err(OperationError::Fatal(..))`.

use daruma_core::DarumaError;
use daruma_storage::{ProviderFailure, ProviderId};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, OperationError>;

/// A multi-provider operation that could not produce a result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FatalFailure {
    pub failures: Vec<ProviderFailure>,
}

impl FatalFailure {
    pub fn new(failures: Vec<ProviderFailure>) -> Self {
        Self { failures }
    }

    /// Identities of the providers named in this failure, without repeats
    pub fn providers(&self) -> Vec<ProviderId> {
        unique_providers(&self.failures)
    }
}

impl fmt::Display for FatalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal operation failure")?;
        if !self.failures.is_empty() {
            let names: Vec<String> = self.failures.iter().map(|e| e.to_string()).collect();
            write!(f, ": [{}]", names.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for FatalFailure {}

/// Unified error type for driver operations
#[derive(Error, Debug)]
pub enum OperationError {
    #[error(transparent)]
    Fatal(#[from] FatalFailure),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Read-only mode: {} provider(s) missing", .missing.len())]
    ReadOnlyMode { missing: Vec<ProviderId> },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Core(#[from] DarumaError),
}

impl OperationError {
    pub fn fatal(failures: Vec<ProviderFailure>) -> Self {
        OperationError::Fatal(FatalFailure::new(failures))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, OperationError::Fatal(_))
    }

    /// Provider failures carried by a fatal error
    pub fn failures(&self) -> &[ProviderFailure] {
        match self {
            OperationError::Fatal(fatal) => &fatal.failures,
            _ => &[],
        }
    }
}

/// A result recovered despite some provider failures
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered<T> {
    pub value: T,
    pub failures: Vec<ProviderFailure>,
}

impl<T> Recovered<T> {
    /// A result with no provider failures
    pub fn clean(value: T) -> Self {
        Self {
            value,
            failures: Vec::new(),
        }
    }

    pub fn new(value: T, failures: Vec<ProviderFailure>) -> Self {
        Self { value, failures }
    }

    /// True if any provider failed along the way
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Recovered<U> {
        Recovered {
            value: f(self.value),
            failures: self.failures,
        }
    }

    /// Append failures from a later step of the same operation
    pub fn with_failures(mut self, failures: impl IntoIterator<Item = ProviderFailure>) -> Self {
        self.failures.extend(failures);
        self
    }

    pub fn into_parts(self) -> (T, Vec<ProviderFailure>) {
        (self.value, self.failures)
    }
}

/// Distinct providers in a failure list, in first-seen order
pub fn unique_providers(failures: &[ProviderFailure]) -> Vec<ProviderId> {
    let mut seen = HashSet::new();
    failures
        .iter()
        .filter(|f| seen.insert(f.provider.clone()))
        .map(|f| f.provider.clone())
        .collect()
}
