//! Provider health scoring and repair
//!
//! Each installation member carries an exponentially decayed reliability
//! score. Failures pull it toward 0, successes toward 1; authentication
//! failures are tracked separately and never touch the score. Repairs run
//! as a bounded loop over [`RepairState`].

use crate::bootstrap::BootstrapManager;
use crate::config::DarumaConfig;
use crate::error::{unique_providers, OperationError, Recovered, Result};
use crate::file_manager::FileManager;
use daruma_core::crypto::generate_key;
use daruma_core::generate_filename;
use daruma_storage::{ProviderFailure, ProviderId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

pub const DECAY_RATE: f64 = 0.7;
pub const RED_THRESHOLD: f64 = 0.5;
pub const YELLOW_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderStatus {
    Green,
    Yellow,
    Red,
    AuthFail,
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderStatus::Green => "green",
            ProviderStatus::Yellow => "yellow",
            ProviderStatus::Red => "red",
            ProviderStatus::AuthFail => "auth-fail",
        };
        f.write_str(name)
    }
}

/// Reliability record for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHealth {
    pub score: f64,
    pub authenticated: bool,
    pub failure_count: u64,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            score: 1.0,
            authenticated: true,
            failure_count: 0,
        }
    }
}

impl ProviderHealth {
    pub fn status(&self) -> ProviderStatus {
        if !self.authenticated {
            ProviderStatus::AuthFail
        } else if self.score < RED_THRESHOLD {
            ProviderStatus::Red
        } else if self.score < YELLOW_THRESHOLD {
            ProviderStatus::Yellow
        } else {
            ProviderStatus::Green
        }
    }

    fn record_success(&mut self) {
        self.score = DECAY_RATE * self.score + (1.0 - DECAY_RATE);
        self.authenticated = true;
    }

    fn record_failure(&mut self) {
        self.score *= DECAY_RATE;
        self.failure_count += 1;
    }
}

/// Progress of a repair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    /// Scoring the providers named by the last attempt
    Diagnosing,
    /// Rewriting the damaged object
    Repairing,
    /// The object was rewritten
    Stable,
    /// Gave up: a provider is no longer safe to retry against, the attempt
    /// budget ran out, or the installation cannot be written
    Exhausted,
}

/// What a repair rewrites
#[derive(Clone, Copy)]
pub enum RepairTarget<'a> {
    /// Re-store a file from data already recovered
    File { path: &'a str, data: &'a [u8] },
    /// Rotate the master key and re-share the bootstrap
    Bootstrap,
}

impl fmt::Display for RepairTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairTarget::File { path, .. } => write!(f, "file {}", path),
            RepairTarget::Bootstrap => f.write_str("bootstrap"),
        }
    }
}

/// Scores installation members and drives repairs
#[derive(Debug, Clone)]
pub struct ResilienceManager {
    order: Vec<ProviderId>,
    health: HashMap<ProviderId, ProviderHealth>,
    max_attempts: usize,
}

impl ResilienceManager {
    pub fn new(providers: Vec<ProviderId>, config: &DarumaConfig) -> Self {
        let health = providers
            .iter()
            .map(|id| (id.clone(), ProviderHealth::default()))
            .collect();
        Self {
            order: providers,
            health,
            max_attempts: config.max_repair_attempts,
        }
    }

    /// Track a new member list, keeping the records of members that remain
    pub fn set_providers(&mut self, providers: Vec<ProviderId>) {
        self.health.retain(|id, _| providers.contains(id));
        for id in &providers {
            self.health.entry(id.clone()).or_default();
        }
        self.order = providers;
    }

    pub fn health(&self, id: &ProviderId) -> Option<&ProviderHealth> {
        self.health.get(id)
    }

    /// Every member's record, in share order
    pub fn report(&self) -> Vec<(ProviderId, ProviderHealth)> {
        self.order
            .iter()
            .filter_map(|id| self.health.get(id).map(|h| (id.clone(), h.clone())))
            .collect()
    }

    /// True if any failure names a tracked member
    pub fn tracks_any(&self, failures: &[ProviderFailure]) -> bool {
        failures.iter().any(|f| self.health.contains_key(&f.provider))
    }

    /// True while no member is red or failing authentication
    pub fn can_retry(&self) -> bool {
        self.health
            .values()
            .all(|h| matches!(h.status(), ProviderStatus::Green | ProviderStatus::Yellow))
    }

    /// Record an operation in which every member responded correctly
    pub fn log_success(&mut self) {
        for health in self.health.values_mut() {
            health.record_success();
        }
    }

    /// Score every member against one operation's failures
    ///
    /// Each named provider is penalized once however many failures name it.
    /// Members not named count as successes. Returns [`Self::can_retry`].
    pub fn diagnose(&mut self, failures: &[ProviderFailure]) -> bool {
        let mut penalized = HashSet::new();
        let mut unauthenticated = HashSet::new();
        for failure in failures {
            if failure.is_auth() {
                unauthenticated.insert(&failure.provider);
            } else {
                penalized.insert(&failure.provider);
            }
        }

        for (id, health) in self.health.iter_mut() {
            let failed_auth = unauthenticated.contains(id);
            let failed = penalized.contains(id);
            if failed_auth {
                health.authenticated = false;
            }
            if failed {
                health.record_failure();
            }
            if !failed && !failed_auth {
                health.record_success();
            }
            if failed || failed_auth {
                debug!(
                    provider = %id,
                    score = health.score,
                    status = %health.status(),
                    "Diagnosed provider"
                );
            }
        }

        let can_retry = self.can_retry();
        if !can_retry {
            warn!(failures = failures.len(), "Provider health too low to retry");
        }
        can_retry
    }

    /// Rewrite `target` until it sticks or retrying is no longer safe
    ///
    /// The first attempt always runs; the triggering failures have already
    /// been diagnosed. Failures from providers in `known` are not diagnosed
    /// again when a rewrite succeeds.
    pub async fn repair(
        &mut self,
        files: &mut FileManager,
        bootstrap: &mut BootstrapManager,
        target: RepairTarget<'_>,
        known: &[ProviderId],
    ) -> RepairState {
        if files.is_read_only() {
            debug!(object = %target, "Skipping repair in read-only mode");
            return RepairState::Exhausted;
        }

        let mut state = RepairState::Repairing;
        let mut attempts = 0;
        let mut pending: Vec<ProviderFailure> = Vec::new();

        loop {
            state = match state {
                RepairState::Repairing => {
                    attempts += 1;
                    let outcome = match target {
                        RepairTarget::File { path, data } => files.put(path, data).await,
                        RepairTarget::Bootstrap => rekey(files, bootstrap).await,
                    };
                    match outcome {
                        Ok(repaired) => {
                            let fresh: Vec<ProviderFailure> = repaired
                                .failures
                                .into_iter()
                                .filter(|f| !known.contains(&f.provider))
                                .collect();
                            if !fresh.is_empty() {
                                self.diagnose(&fresh);
                            }
                            RepairState::Stable
                        }
                        Err(OperationError::Fatal(fatal)) if !fatal.failures.is_empty() => {
                            pending = fatal.failures;
                            RepairState::Diagnosing
                        }
                        Err(e) => {
                            warn!(object = %target, error = %e, "Repair failed");
                            RepairState::Exhausted
                        }
                    }
                }
                RepairState::Diagnosing => {
                    if self.diagnose(&pending) && attempts < self.max_attempts {
                        RepairState::Repairing
                    } else {
                        RepairState::Exhausted
                    }
                }
                RepairState::Stable | RepairState::Exhausted => {
                    info!(object = %target, ?state, attempts, "Repair finished");
                    return state;
                }
            };
        }
    }
}

/// Move the manifest to a fresh key and name and re-share the bootstrap
///
/// The previous manifest object is deleted only after the new bootstrap is
/// in place on every member. If the new bootstrap does not land, the
/// previous one is shared again and the new manifest is retired; the new
/// manifest is kept if even that fails, since some members may hold shares
/// pointing at it.
pub async fn rekey(files: &mut FileManager, bootstrap: &mut BootstrapManager) -> Result<Recovered<()>> {
    bootstrap.set_providers(files.writable_members()?);
    let previous = files.bootstrap()?;

    let (old_name, mut failures) = files
        .update_key_and_name(generate_key(), generate_filename())
        .await?
        .into_parts();
    let distributed = match files.bootstrap() {
        Ok(record) => bootstrap.distribute(&record).await,
        Err(e) => Err(e),
    };
    if let Err(e) = distributed {
        warn!(error = %e, "Master key rotation failed; restoring the previous bootstrap");
        let abandoned = files
            .restore_key_and_name(previous.master_key.clone(), previous.manifest_name.clone());
        match bootstrap.distribute(&previous).await {
            Ok(()) => {
                files.retire(&abandoned).await;
            }
            Err(restore) => {
                warn!(error = %restore, manifest = %abandoned, "Keeping both manifests")
            }
        }
        return Err(e);
    }

    failures.extend(files.retire(&old_name).await);
    info!(
        failures = unique_providers(&failures).len(),
        "Rotated master key"
    );
    Ok(Recovered::new((), failures))
}
