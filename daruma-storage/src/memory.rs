//! In-memory provider
//!
//! Used for testing and development. Not persistent. Faults can be injected
//! to simulate an unreachable, unauthenticated, failing or corrupting
//! provider, either for a fixed number of requests or until reset.

use crate::failure::{ProviderFailure, ProviderResult};
use crate::provider::{Provider, ProviderId};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Injected behaviour of a [`MemoryProvider`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Active,
    /// Every request is a connection failure
    Offline,
    /// Every request is an authentication failure
    Unauthenticated,
    /// Every request is an operation failure
    Failing,
    /// Reads succeed but return every byte inverted
    Corrupting,
}

#[derive(Debug)]
struct Fault {
    state: ProviderState,
    /// Requests left before returning to Active; None means forever
    remaining: Option<usize>,
}

/// Operation counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub objects: u64,
    pub bytes_used: u64,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

/// In-memory provider with fault injection
#[derive(Debug)]
pub struct MemoryProvider {
    id: ProviderId,

    /// Object storage
    objects: RwLock<HashMap<String, Bytes>>,

    fault: Mutex<Fault>,

    /// Operation counters
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryProvider {
    /// Create an empty provider with identity `memory:<uid>`
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            id: ProviderId::new("memory", uid),
            objects: RwLock::new(HashMap::new()),
            fault: Mutex::new(Fault {
                state: ProviderState::Active,
                remaining: None,
            }),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Create a provider already wrapped for sharing
    pub fn shared(uid: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(uid))
    }

    /// Inject a state for the next `requests` requests, or forever if `None`
    pub fn set_state(&self, state: ProviderState, requests: Option<usize>) {
        debug!(provider = %self.id, ?state, ?requests, "Injecting provider state");
        let mut fault = self.fault.lock();
        fault.state = state;
        fault.remaining = requests;
    }

    pub fn state(&self) -> ProviderState {
        self.fault.lock().state
    }

    /// Raw access to a stored object, bypassing fault injection
    pub fn object(&self, name: &str) -> Option<Bytes> {
        self.objects.read().get(name).cloned()
    }

    /// Store an object directly, bypassing fault injection
    pub fn insert_object(&self, name: &str, data: Bytes) {
        self.objects.write().insert(name.to_string(), data);
    }

    pub fn object_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> MemoryStats {
        let objects = self.objects.read();
        MemoryStats {
            objects: objects.len() as u64,
            bytes_used: objects.values().map(|v| v.len() as u64).sum(),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    /// Account for one request and return the state it runs under
    fn begin_request(&self) -> ProviderResult<ProviderState> {
        let mut fault = self.fault.lock();
        let state = fault.state;
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                fault.state = ProviderState::Active;
                fault.remaining = None;
            }
        }

        match state {
            ProviderState::Offline => Err(ProviderFailure::connection(&self.id, "provider offline")),
            ProviderState::Unauthenticated => {
                Err(ProviderFailure::auth(&self.id, "credentials rejected"))
            }
            ProviderState::Failing => {
                Err(ProviderFailure::operation(&self.id, "injected failure"))
            }
            ProviderState::Active | ProviderState::Corrupting => Ok(state),
        }
    }
}

fn corrupt(data: &Bytes) -> Bytes {
    data.iter().map(|b| !b).collect()
}

#[async_trait]
impl Provider for MemoryProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn get(&self, name: &str) -> ProviderResult<Bytes> {
        let state = self.begin_request()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let data = self
            .objects
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderFailure::operation(&self.id, format!("no object {}", name)))?;

        if state == ProviderState::Corrupting {
            return Ok(corrupt(&data));
        }
        Ok(data)
    }

    async fn put(&self, name: &str, data: Bytes) -> ProviderResult<()> {
        self.begin_request()?;
        self.objects.write().insert(name.to_string(), data);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, name: &str) -> ProviderResult<()> {
        self.begin_request()?;
        if self.objects.write().remove(name).is_some() {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn wipe(&self) -> ProviderResult<()> {
        self.begin_request()?;
        self.objects.write().clear();
        Ok(())
    }
}
