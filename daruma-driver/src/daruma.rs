//! The Daruma orchestrator
//!
//! Composes bootstrap recovery, the manifest-backed file manager and the
//! resilience layer behind one lock. Every operation reloads the manifest,
//! scores providers against the failures it saw, repairs what was degraded,
//! and retries fatal failures while the providers they name stay healthy.

use crate::bootstrap::BootstrapManager;
use crate::config::DarumaConfig;
use crate::error::{unique_providers, OperationError, Result};
use crate::fanout::{fan_out, partition};
use crate::file_manager::FileManager;
use crate::manifest::Node;
use crate::resilience::{rekey, ProviderHealth, RepairTarget, ResilienceManager};
use daruma_core::crypto::generate_key;
use daruma_core::{generate_filename, Bootstrap};
use daruma_storage::{ProviderFailure, ProviderId, SharedProvider};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Run an operation on the locked state, retrying fatal failures while the
/// resilience layer allows it
macro_rules! with_retry {
    ($state:ident, $operation:expr) => {{
        let mut attempts = 0;
        loop {
            match $operation.await {
                Err(e) if $state.should_retry(&e, &mut attempts) => continue,
                result => break result,
            }
        }
    }};
}

/// Check installation parameters before anything is touched
///
/// Both thresholds must satisfy `2 <= t < providers`, with at least three
/// distinct providers.
pub fn validate_parameters(
    providers: &[SharedProvider],
    bootstrap_threshold: usize,
    file_threshold: usize,
) -> Result<()> {
    let count = providers.len();
    if count < 3 || count > daruma_core::shamir::MAX_SHARES {
        return Err(OperationError::InvalidParameters(format!(
            "{} providers; need between 3 and {}",
            count,
            daruma_core::shamir::MAX_SHARES
        )));
    }
    for (name, threshold) in [("bootstrap", bootstrap_threshold), ("file", file_threshold)] {
        if threshold < 2 || threshold >= count {
            return Err(OperationError::InvalidParameters(format!(
                "{} threshold {} with {} providers",
                name, threshold, count
            )));
        }
    }
    let distinct: HashSet<&ProviderId> = providers.iter().map(|p| p.id()).collect();
    if distinct.len() != count {
        return Err(OperationError::InvalidParameters(
            "provider identities are not distinct".to_string(),
        ));
    }
    Ok(())
}

async fn wipe_all(providers: &[SharedProvider], deadline: Duration) -> Vec<ProviderFailure> {
    let outcomes = fan_out(providers, deadline, |_, provider| async move {
        provider.wipe().await
    })
    .await;
    partition(outcomes).1
}

/// A manifest change
#[derive(Clone, Copy)]
enum Mutation<'a> {
    Put { path: &'a str, data: &'a [u8] },
    Delete(&'a str),
    MkDir(&'a str),
    Move { old: &'a str, new: &'a str },
}

struct DarumaState {
    bootstrap: BootstrapManager,
    files: FileManager,
    resilience: ResilienceManager,
    config: DarumaConfig,
}

impl DarumaState {
    /// Diagnose a fatal failure and decide whether to try again
    ///
    /// Failures that name no member cannot be scored, so they are not
    /// retried.
    fn should_retry(&mut self, err: &OperationError, attempts: &mut usize) -> bool {
        if !self.resilience.tracks_any(err.failures()) {
            return false;
        }
        *attempts += 1;
        let healthy = self.resilience.diagnose(err.failures());
        if !healthy || *attempts >= self.config.max_repair_attempts {
            warn!(
                attempts = *attempts,
                providers = unique_providers(err.failures()).len(),
                "Giving up after fatal failure"
            );
            return false;
        }
        info!(attempt = *attempts, "Retrying after fatal failure");
        true
    }

    /// Score providers for one operation, rotating the bootstrap if the
    /// manifest or bootstrap came back degraded
    async fn settle(&mut self, failures: &[ProviderFailure], repair_bootstrap: bool) {
        if failures.is_empty() {
            self.resilience.log_success();
            return;
        }
        warn!(
            failures = failures.len(),
            providers = unique_providers(failures).len(),
            "Operation degraded"
        );
        self.resilience.diagnose(failures);

        if repair_bootstrap {
            let known = unique_providers(failures);
            self.resilience
                .repair(
                    &mut self.files,
                    &mut self.bootstrap,
                    RepairTarget::Bootstrap,
                    &known,
                )
                .await;
        }
    }

    async fn reload(&mut self) -> Result<Vec<ProviderFailure>> {
        Ok(self.files.load_manifest().await?.failures)
    }

    async fn collect_garbage(&mut self) {
        if self.files.collect_garbage().await.is_degraded() {
            debug!(
                pending = self.files.garbage_count(),
                "Garbage collection incomplete"
            );
        }
    }

    /// Return to the installation a failed reprovision started from
    ///
    /// Members get the previous bootstrap again and providers outside the
    /// previous installation lose any share they took. Once the previous
    /// bootstrap is back, the re-encoded objects are queued as garbage on
    /// the providers they were written to. Otherwise they are kept, since
    /// some providers may still vote for the record pointing at them.
    async fn roll_back(&mut self, previous: FileManager, attempted: &BootstrapManager) {
        let abandoned = std::mem::replace(&mut self.files, previous);

        let restored = match self.files.bootstrap() {
            Ok(record) => self.bootstrap.distribute(&record).await,
            Err(e) => Err(e),
        };

        let members = self.files.membership();
        let strays: Vec<SharedProvider> = attempted
            .providers()
            .iter()
            .filter(|p| !members.contains(p.id()))
            .cloned()
            .collect();
        BootstrapManager::new(strays, None, &self.config)
            .withdraw()
            .await;

        match restored {
            Ok(()) => {
                let objects = abandoned.objects();
                debug!(objects = objects.len(), "Queueing re-encoded objects for deletion");
                for name in objects {
                    self.files.queue_garbage(name, abandoned.providers());
                }
            }
            Err(e) => warn!(
                error = %e,
                "Could not restore the previous bootstrap; keeping re-encoded objects"
            ),
        }
    }

    async fn get(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut failures = self.reload().await?;
        let manifest_degraded = !failures.is_empty();

        let (data, file_failures) = self.files.get(path).await?.into_parts();
        let file_degraded = !file_failures.is_empty();
        failures.extend(file_failures);

        self.settle(&failures, manifest_degraded).await;
        if file_degraded {
            let known = unique_providers(&failures);
            let target = RepairTarget::File { path, data: &data };
            self.resilience
                .repair(&mut self.files, &mut self.bootstrap, target, &known)
                .await;
        }
        Ok(data)
    }

    async fn mutate(&mut self, mutation: Mutation<'_>) -> Result<()> {
        let mut failures = self.reload().await?;
        let manifest_degraded = !failures.is_empty();

        let applied = match mutation {
            Mutation::Put { path, data } => self.files.put(path, data).await?,
            Mutation::Delete(path) => self.files.delete(path).await?,
            Mutation::MkDir(path) => self.files.mk_dir(path).await?,
            Mutation::Move { old, new } => self.files.move_node(old, new).await?,
        };
        failures.extend(applied.failures);

        self.settle(&failures, manifest_degraded).await;
        self.collect_garbage().await;
        Ok(())
    }

    async fn ls(&mut self, path: &str) -> Result<Vec<Node>> {
        let failures = self.reload().await?;
        self.settle(&failures, true).await;
        self.files.ls(path)
    }

    async fn list_all_paths(&mut self) -> Result<Vec<String>> {
        let failures = self.reload().await?;
        self.settle(&failures, true).await;
        Ok(self.files.paths())
    }

    async fn update_master_key(&mut self) -> Result<()> {
        let mut failures = self.reload().await?;
        failures.extend(rekey(&mut self.files, &mut self.bootstrap).await?.failures);
        self.settle(&failures, false).await;
        Ok(())
    }

    async fn reprovision(
        &mut self,
        providers: &[SharedProvider],
        bootstrap_threshold: usize,
        file_threshold: usize,
    ) -> Result<()> {
        let ids: Vec<ProviderId> = providers.iter().map(|p| p.id().clone()).collect();
        if ids == self.files.membership()
            && self.bootstrap.threshold() == Some(bootstrap_threshold)
            && self.files.file_threshold() == file_threshold
        {
            debug!("Reprovision requested with unchanged parameters");
            return Ok(());
        }

        let mut failures = self.reload().await?;
        let previous = self.files.clone();
        let old_providers = self.files.providers().to_vec();

        let (old_manifest, reset_failures) = self
            .files
            .reset(providers.to_vec(), file_threshold)
            .await?
            .into_parts();
        failures.extend(reset_failures);

        let bootstrap =
            BootstrapManager::new(providers.to_vec(), Some(bootstrap_threshold), &self.config);
        let distributed = match self.files.bootstrap() {
            Ok(record) => bootstrap.distribute(&record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = distributed {
            warn!(error = %e, "Reprovision failed; restoring the previous installation");
            self.roll_back(previous, &bootstrap).await;
            return Err(e);
        }

        self.bootstrap = bootstrap;
        self.resilience.set_providers(ids.clone());
        failures.extend(self.files.retire(&old_manifest).await);
        self.settle(&failures, false).await;
        self.collect_garbage().await;

        let removed: Vec<SharedProvider> = old_providers
            .into_iter()
            .filter(|p| !ids.contains(p.id()))
            .collect();
        let wipe_failures = wipe_all(&removed, self.config.provider_timeout()).await;
        if !wipe_failures.is_empty() {
            warn!(
                failures = wipe_failures.len(),
                "Could not wipe providers removed from the installation"
            );
        }

        info!(
            providers = ids.len(),
            bootstrap_threshold,
            file_threshold,
            removed = removed.len(),
            "Reprovisioned installation"
        );
        Ok(())
    }
}

/// A file tree stored across untrusted providers
pub struct Daruma {
    state: Mutex<DarumaState>,
}

impl Daruma {
    /// Create a new installation, wiping every provider first
    ///
    /// Parameters are validated before any provider is touched.
    pub async fn provision(
        providers: Vec<SharedProvider>,
        bootstrap_threshold: usize,
        file_threshold: usize,
        config: DarumaConfig,
    ) -> Result<Self> {
        validate_parameters(&providers, bootstrap_threshold, file_threshold)?;
        debug!(
            providers = providers.len(),
            bootstrap_threshold,
            file_threshold,
            "provision"
        );

        let failures = wipe_all(&providers, config.provider_timeout()).await;
        if !failures.is_empty() {
            warn!(failures = failures.len(), "Could not wipe providers");
            return Err(OperationError::fatal(failures));
        }

        let record = Bootstrap::new(generate_key(), generate_filename(), file_threshold)?;
        let files = FileManager::provision(providers.clone(), &record, &config).await?;
        let bootstrap = BootstrapManager::new(providers, Some(bootstrap_threshold), &config);
        bootstrap.distribute(&record).await?;

        let resilience = ResilienceManager::new(files.membership().to_vec(), &config);
        info!(
            providers = files.membership().len(),
            bootstrap_threshold,
            file_threshold,
            "Provisioned installation"
        );

        Ok(Self {
            state: Mutex::new(DarumaState {
                bootstrap,
                files,
                resilience,
                config,
            }),
        })
    }

    /// Open an existing installation from whichever providers are supplied
    ///
    /// Returns the instance together with the supplied providers that are
    /// not part of the installation.
    pub async fn load(
        providers: Vec<SharedProvider>,
        config: DarumaConfig,
    ) -> Result<(Self, Vec<SharedProvider>)> {
        debug!(providers = providers.len(), "load");

        let mut bootstrap = BootstrapManager::new(providers.clone(), None, &config);
        let (record, mut failures) = bootstrap.recover().await?.into_parts();

        let mut files = FileManager::new(providers, &record, &config);
        failures.extend(files.load_manifest().await?.failures);
        let extras = files.discard_extra_providers();
        bootstrap.set_providers(files.members());

        let membership = files.membership().to_vec();
        failures.retain(|f| membership.contains(&f.provider));

        let missing = files.missing_providers();
        if !missing.is_empty() {
            warn!(missing = missing.len(), "Loaded in read-only mode");
        }

        let resilience = ResilienceManager::new(membership, &config);
        let mut state = DarumaState {
            bootstrap,
            files,
            resilience,
            config,
        };
        state.settle(&failures, true).await;

        info!(
            providers = state.files.providers().len(),
            extras = extras.len(),
            failures = failures.len(),
            "Loaded installation"
        );
        Ok((
            Self {
                state: Mutex::new(state),
            },
            extras,
        ))
    }

    /// Read the file at `path`
    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        debug!(path, "get");
        let mut state = self.state.lock().await;
        with_retry!(state, state.get(path))
    }

    /// Store `data` at `path`, creating parent directories as needed
    pub async fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        debug!(path, size = data.len(), "put");
        let mut state = self.state.lock().await;
        with_retry!(state, state.mutate(Mutation::Put { path, data }))
    }

    /// Delete a file or an empty directory
    pub async fn delete(&self, path: &str) -> Result<()> {
        debug!(path, "delete");
        let mut state = self.state.lock().await;
        with_retry!(state, state.mutate(Mutation::Delete(path)))
    }

    pub async fn mk_dir(&self, path: &str) -> Result<()> {
        debug!(path, "mk_dir");
        let mut state = self.state.lock().await;
        with_retry!(state, state.mutate(Mutation::MkDir(path)))
    }

    /// Rename a file or directory subtree
    pub async fn move_node(&self, old_path: &str, new_path: &str) -> Result<()> {
        debug!(old_path, new_path, "move");
        let mut state = self.state.lock().await;
        with_retry!(
            state,
            state.mutate(Mutation::Move {
                old: old_path,
                new: new_path
            })
        )
    }

    pub async fn ls(&self, path: &str) -> Result<Vec<Node>> {
        debug!(path, "ls");
        let mut state = self.state.lock().await;
        with_retry!(state, state.ls(path))
    }

    /// Every file and directory path, sorted
    pub async fn list_all_paths(&self) -> Result<Vec<String>> {
        debug!("list_all_paths");
        let mut state = self.state.lock().await;
        with_retry!(state, state.list_all_paths())
    }

    /// Move the installation onto a new provider set and thresholds
    ///
    /// Every file is re-encoded, the master key rotated, and providers that
    /// left the installation are wiped. Does nothing if nothing changed.
    pub async fn reprovision(
        &self,
        providers: Vec<SharedProvider>,
        bootstrap_threshold: usize,
        file_threshold: usize,
    ) -> Result<()> {
        validate_parameters(&providers, bootstrap_threshold, file_threshold)?;
        debug!(
            providers = providers.len(),
            bootstrap_threshold,
            file_threshold,
            "reprovision"
        );
        let mut state = self.state.lock().await;
        with_retry!(
            state,
            state.reprovision(&providers, bootstrap_threshold, file_threshold)
        )
    }

    /// Re-encrypt the manifest under a fresh master key and re-share the
    /// bootstrap
    pub async fn update_master_key(&self) -> Result<()> {
        debug!("update_master_key");
        let mut state = self.state.lock().await;
        with_retry!(state, state.update_master_key())
    }

    /// Installation members that were not supplied on load, in share order
    pub async fn get_missing_providers(&self) -> Vec<ProviderId> {
        self.state.lock().await.files.missing_providers()
    }

    /// Restore a missing member; returns false if `provider` is not missing
    pub async fn add_missing_provider(&self, provider: SharedProvider) -> bool {
        debug!(provider = %provider.id(), "add_missing_provider");
        let mut state = self.state.lock().await;
        if !state.files.add_missing_provider(provider) {
            return false;
        }
        let members = state.files.members();
        state.bootstrap.set_providers(members);
        true
    }

    /// Available installation members, in share order
    pub async fn get_providers(&self) -> Vec<SharedProvider> {
        self.state.lock().await.files.members()
    }

    pub async fn is_read_only(&self) -> bool {
        self.state.lock().await.files.is_read_only()
    }

    pub async fn bootstrap_threshold(&self) -> Option<usize> {
        self.state.lock().await.bootstrap.threshold()
    }

    pub async fn file_threshold(&self) -> usize {
        self.state.lock().await.files.file_threshold()
    }

    /// Health of every installation member, in share order
    pub async fn provider_health(&self) -> Vec<(ProviderId, ProviderHealth)> {
        self.state.lock().await.resilience.report()
    }

    /// Retry deletion of orphaned objects, returning how many remain queued
    pub async fn collect_garbage(&self) -> usize {
        debug!("collect_garbage");
        let mut state = self.state.lock().await;
        state.collect_garbage().await;
        state.files.garbage_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daruma_storage::MemoryProvider;

    fn providers(count: usize) -> Vec<SharedProvider> {
        (0..count)
            .map(|i| MemoryProvider::shared(format!("p{}", i)) as SharedProvider)
            .collect()
    }

    #[test]
    fn test_validate_parameters() {
        assert!(validate_parameters(&providers(5), 3, 3).is_ok());
        assert!(validate_parameters(&providers(3), 2, 2).is_ok());
        assert!(validate_parameters(&providers(5), 5, 5).is_err());
        assert!(validate_parameters(&providers(5), 1, 3).is_err());
        assert!(validate_parameters(&providers(5), 3, 1).is_err());
        assert!(validate_parameters(&providers(2), 2, 2).is_err());

        let mut repeated = providers(3);
        repeated.push(repeated[0].clone());
        assert!(matches!(
            validate_parameters(&repeated, 2, 2),
            Err(OperationError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_reprovision_unchanged_is_noop() {
        let set = providers(4);
        let daruma = Daruma::provision(set.clone(), 2, 3, DarumaConfig::default())
            .await
            .unwrap();
        daruma.put("f", b"x").await.unwrap();
        let before = daruma.list_all_paths().await.unwrap();

        daruma.reprovision(set, 2, 3).await.unwrap();
        assert_eq!(daruma.list_all_paths().await.unwrap(), before);
        assert_eq!(daruma.bootstrap_threshold().await, Some(2));
        assert_eq!(daruma.file_threshold().await, 3);
    }

    #[tokio::test]
    async fn test_update_master_key_keeps_files() {
        let set = providers(3);
        let daruma = Daruma::provision(set.clone(), 2, 2, DarumaConfig::default())
            .await
            .unwrap();
        daruma.put("f", b"x").await.unwrap();
        daruma.update_master_key().await.unwrap();
        assert_eq!(daruma.get("f").await.unwrap(), b"x");

        let (reloaded, extras) = Daruma::load(set, DarumaConfig::default()).await.unwrap();
        assert!(extras.is_empty());
        assert_eq!(reloaded.get("f").await.unwrap(), b"x");
    }
}
