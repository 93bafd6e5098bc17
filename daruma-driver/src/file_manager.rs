//! File operations over the manifest
//!
//! The manifest is itself an object stored through a [`FileDistributor`]
//! under the bootstrap's manifest name and master key. Callers reload it
//! with [`FileManager::load_manifest`] before each operation; the methods
//! here act on the loaded copy and write it back.

use crate::config::DarumaConfig;
use crate::distributor::FileDistributor;
use crate::error::{OperationError, Recovered, Result};
use crate::fanout::{fan_out, partition};
use crate::manifest::{Manifest, ManifestEntry, Node};
use daruma_core::crypto::{generate_key, EncryptionKey};
use daruma_core::{generate_filename, Bootstrap};
use daruma_storage::{ProviderFailure, ProviderId, SharedProvider};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delete `name` from `providers`, returning the providers that still hold
/// it along with their failures
async fn delete_from(
    name: &str,
    providers: &[SharedProvider],
    deadline: Duration,
) -> (Vec<SharedProvider>, Vec<ProviderFailure>) {
    let outcomes = fan_out(providers, deadline, |_, provider| async move {
        provider.delete(name).await
    })
    .await;
    let remaining = outcomes
        .iter()
        .filter(|outcome| outcome.result.is_err())
        .map(|outcome| outcome.provider.clone())
        .collect();
    (remaining, partition(outcomes).1)
}

/// Path-level file operations for one installation
#[derive(Clone)]
pub struct FileManager {
    /// Providers supplied by the caller that are currently reachable
    providers: Vec<SharedProvider>,
    /// Installation members in share order, as recorded in the manifest
    membership: Vec<ProviderId>,
    file_threshold: usize,
    master_key: EncryptionKey,
    manifest_name: String,
    manifest: Manifest,
    /// Objects whose deletion has not yet succeeded, with the providers
    /// still holding them
    garbage: BTreeMap<String, Vec<SharedProvider>>,
    config: DarumaConfig,
}

impl FileManager {
    /// A file manager for the installation described by `bootstrap`
    ///
    /// Membership is unknown until the manifest is loaded.
    pub fn new(providers: Vec<SharedProvider>, bootstrap: &Bootstrap, config: &DarumaConfig) -> Self {
        Self {
            providers,
            membership: Vec::new(),
            file_threshold: bootstrap.file_reconstruction_threshold,
            master_key: bootstrap.master_key.clone(),
            manifest_name: bootstrap.manifest_name.clone(),
            manifest: Manifest::default(),
            garbage: BTreeMap::new(),
            config: config.clone(),
        }
    }

    /// Create a fresh installation over `providers` with an empty manifest
    pub async fn provision(
        providers: Vec<SharedProvider>,
        bootstrap: &Bootstrap,
        config: &DarumaConfig,
    ) -> Result<Self> {
        let mut files = Self::new(providers, bootstrap, config);
        files.membership = files.providers.iter().map(|p| p.id().clone()).collect();
        files.manifest = Manifest::new(files.membership.clone());
        files.distribute_manifest().await?;
        Ok(files)
    }

    /// The bootstrap record pointing at the current manifest
    pub fn bootstrap(&self) -> Result<Bootstrap> {
        Ok(Bootstrap::new(
            self.master_key.clone(),
            self.manifest_name.clone(),
            self.file_threshold,
        )?)
    }

    pub fn file_threshold(&self) -> usize {
        self.file_threshold
    }

    pub fn manifest_name(&self) -> &str {
        &self.manifest_name
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn membership(&self) -> &[ProviderId] {
        &self.membership
    }

    pub fn providers(&self) -> &[SharedProvider] {
        &self.providers
    }

    /// Number of objects still waiting to be deleted
    pub fn garbage_count(&self) -> usize {
        self.garbage.len()
    }

    pub fn is_garbage(&self, name: &str) -> bool {
        self.garbage.contains_key(name)
    }

    /// Queue `name` for deletion from `providers`
    pub fn queue_garbage(&mut self, name: String, providers: &[SharedProvider]) {
        let holders = self.garbage.entry(name).or_default();
        for provider in providers {
            if !holders.iter().any(|p| p.id() == provider.id()) {
                holders.push(provider.clone());
            }
        }
    }

    /// Every object the loaded manifest refers to, the manifest included
    pub fn objects(&self) -> Vec<String> {
        let mut names = vec![self.manifest_name.clone()];
        names.extend(self.manifest.files().map(|(_, entry)| entry.code_name.clone()));
        names
    }

    fn is_member(&self, id: &ProviderId) -> bool {
        self.membership.is_empty() || self.membership.contains(id)
    }

    /// Keep only failures attributed to installation members
    fn relevant(&self, failures: Vec<ProviderFailure>) -> Vec<ProviderFailure> {
        failures
            .into_iter()
            .filter(|f| self.is_member(&f.provider))
            .collect()
    }

    /// Members missing from the available providers, in share order
    pub fn missing_providers(&self) -> Vec<ProviderId> {
        self.membership
            .iter()
            .filter(|id| !self.providers.iter().any(|p| p.id() == *id))
            .cloned()
            .collect()
    }

    pub fn is_read_only(&self) -> bool {
        !self.missing_providers().is_empty()
    }

    /// Add a provider that belongs to the installation but was not supplied
    /// on load; returns false if it is not missing
    pub fn add_missing_provider(&mut self, provider: SharedProvider) -> bool {
        if !self.missing_providers().contains(provider.id()) {
            return false;
        }
        info!(provider = %provider.id(), "Restored missing provider");
        self.providers.push(provider);
        true
    }

    /// Drop available providers that are not installation members,
    /// returning them
    pub fn discard_extra_providers(&mut self) -> Vec<SharedProvider> {
        let (members, extras): (Vec<_>, Vec<_>) = std::mem::take(&mut self.providers)
            .into_iter()
            .partition(|p| self.membership.contains(p.id()));
        self.providers = members;
        if !extras.is_empty() {
            debug!(extras = extras.len(), "Discarding providers outside the installation");
        }
        extras
    }

    /// Available members in share order
    pub fn members(&self) -> Vec<SharedProvider> {
        self.membership
            .iter()
            .filter_map(|id| self.providers.iter().find(|p| p.id() == id).cloned())
            .collect()
    }

    /// Every member in share order, or read-only mode if any is missing
    pub fn writable_members(&self) -> Result<Vec<SharedProvider>> {
        let missing = self.missing_providers();
        if !missing.is_empty() {
            return Err(OperationError::ReadOnlyMode { missing });
        }
        Ok(self.members())
    }

    fn reader(&self) -> Result<FileDistributor> {
        if self.providers.len() < self.file_threshold {
            warn!(
                available = self.providers.len(),
                threshold = self.file_threshold,
                "Too few providers to read"
            );
            return Err(OperationError::fatal(Vec::new()));
        }
        FileDistributor::new(self.providers.clone(), self.file_threshold, &self.config)
    }

    fn writer(&self) -> Result<FileDistributor> {
        FileDistributor::new(self.writable_members()?, self.file_threshold, &self.config)
    }

    /// Fetch and parse the manifest, adopting its membership list
    ///
    /// Failures from providers outside the installation are dropped.
    pub async fn load_manifest(&mut self) -> Result<Recovered<()>> {
        let fetched = match self.reader()?.get(&self.manifest_name, &self.master_key).await {
            Ok(fetched) => fetched,
            Err(OperationError::Fatal(fatal)) => {
                return Err(OperationError::fatal(self.relevant(fatal.failures)))
            }
            Err(e) => return Err(e),
        };
        let (content, failures) = fetched.into_parts();

        let manifest = Manifest::parse(&content)?;
        self.membership = manifest.providers().to_vec();
        self.manifest = manifest;

        let failures = self.relevant(failures);
        debug!(
            files = self.manifest.file_count(),
            failures = failures.len(),
            "Loaded manifest"
        );
        Ok(Recovered::new((), failures))
    }

    /// Write the loaded manifest to every member
    pub async fn distribute_manifest(&self) -> Result<Recovered<()>> {
        let content = self.manifest.to_bytes()?;
        let written = self
            .writer()?
            .put(&self.manifest_name, &content, Some(self.master_key.clone()))
            .await?;
        Ok(written.map(|_| ()))
    }

    /// Write the manifest under a new key and name
    ///
    /// Returns the previous manifest name, which the caller retires once the
    /// new bootstrap is in place. On failure the old key and name stay in
    /// effect.
    pub async fn update_key_and_name(
        &mut self,
        master_key: EncryptionKey,
        manifest_name: String,
    ) -> Result<Recovered<String>> {
        let old_key = std::mem::replace(&mut self.master_key, master_key);
        let old_name = std::mem::replace(&mut self.manifest_name, manifest_name);

        match self.distribute_manifest().await {
            Ok(written) => Ok(written.map(|_| old_name)),
            Err(e) => {
                self.restore_key_and_name(old_key, old_name);
                Err(e)
            }
        }
    }

    /// Go back to an earlier key and manifest name, returning the name
    /// that was in effect
    pub fn restore_key_and_name(
        &mut self,
        master_key: EncryptionKey,
        manifest_name: String,
    ) -> String {
        self.master_key = master_key;
        std::mem::replace(&mut self.manifest_name, manifest_name)
    }

    /// Write the manifest after a mutation, restoring `snapshot` if that
    /// fails
    async fn commit(&mut self, snapshot: Manifest) -> Result<Vec<ProviderFailure>> {
        match self.distribute_manifest().await {
            Ok(written) => Ok(written.failures),
            Err(e) => {
                self.manifest = snapshot;
                Err(e)
            }
        }
    }

    /// Delete an object from every available member, queueing it as
    /// garbage on the members that did not confirm
    pub async fn retire(&mut self, name: &str) -> Vec<ProviderFailure> {
        let members = self.members();
        let (remaining, failures) =
            delete_from(name, &members, self.config.provider_timeout()).await;
        if !remaining.is_empty() {
            debug!(name, providers = remaining.len(), "Queueing object for deletion");
            self.queue_garbage(name.to_string(), &remaining);
        }
        failures
    }

    /// Store `data` at `path`, replacing any existing file
    pub async fn put(&mut self, path: &str, data: &[u8]) -> Result<Recovered<()>> {
        let writer = self.writer()?;
        let path = self.manifest.validate_file_path(path)?;

        let code_name = generate_filename();
        let (key, mut failures) = match writer.put(&code_name, data, None).await {
            Ok(written) => written.into_parts(),
            Err(e) => {
                self.queue_garbage(code_name, writer.providers());
                return Err(e);
            }
        };

        let snapshot = self.manifest.clone();
        let entry = ManifestEntry {
            code_name: code_name.clone(),
            size: data.len() as u64,
            key,
        };
        let replaced = self.manifest.update_file(&path, entry)?;

        match self.commit(snapshot).await {
            Ok(written) => failures.extend(written),
            Err(e) => {
                self.queue_garbage(code_name, writer.providers());
                return Err(e);
            }
        }

        if let Some(old) = replaced {
            failures.extend(self.retire(&old.code_name).await);
        }
        debug!(path = %path, code_name = %code_name, size = data.len(), "Stored file");
        Ok(Recovered::new((), failures))
    }

    /// Fetch the file at `path`
    pub async fn get(&self, path: &str) -> Result<Recovered<Vec<u8>>> {
        let entry = self.manifest.get_file(path)?.clone();
        self.reader()?.get(&entry.code_name, &entry.key).await
    }

    /// Delete a file or an empty directory
    pub async fn delete(&mut self, path: &str) -> Result<Recovered<()>> {
        self.writable_members()?;
        let snapshot = self.manifest.clone();
        let removed = self.manifest.remove(path)?;
        let mut failures = self.commit(snapshot).await?;

        if let Some(entry) = removed {
            failures.extend(self.retire(&entry.code_name).await);
        }
        Ok(Recovered::new((), failures))
    }

    pub async fn mk_dir(&mut self, path: &str) -> Result<Recovered<()>> {
        self.writable_members()?;
        let snapshot = self.manifest.clone();
        self.manifest.create_directory(path)?;
        if self.manifest == snapshot {
            return Ok(Recovered::clean(()));
        }
        let failures = self.commit(snapshot).await?;
        Ok(Recovered::new((), failures))
    }

    pub async fn move_node(&mut self, old_path: &str, new_path: &str) -> Result<Recovered<()>> {
        self.writable_members()?;
        let snapshot = self.manifest.clone();
        self.manifest.move_node(old_path, new_path)?;
        let failures = self.commit(snapshot).await?;
        Ok(Recovered::new((), failures))
    }

    pub fn ls(&self, path: &str) -> Result<Vec<Node>> {
        self.manifest.ls(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.manifest.paths()
    }

    /// Retry deletion of queued objects on the providers still holding them
    ///
    /// Those may include providers that are no longer members. An object
    /// leaves the queue once every one of them has deleted it.
    pub async fn collect_garbage(&mut self) -> Recovered<()> {
        let deadline = self.config.provider_timeout();
        let mut failures = Vec::new();

        for (name, holders) in std::mem::take(&mut self.garbage) {
            let (remaining, failed) = delete_from(&name, &holders, deadline).await;
            failures.extend(failed);
            if !remaining.is_empty() {
                self.garbage.insert(name, remaining);
            }
        }

        debug!(pending = self.garbage.len(), "Collected garbage");
        Recovered::new((), failures)
    }

    /// Re-encode every file for a new provider set and threshold
    ///
    /// Each file is read with the current settings and written under a new
    /// code name; the manifest is then written to the new providers under a
    /// fresh key and name. Nothing changes in `self` unless every step
    /// succeeds, except that objects written by a failed attempt are queued
    /// as garbage on the new providers. Returns the previous manifest name;
    /// the previous file objects are queued as garbage on the previous
    /// members.
    pub async fn reset(
        &mut self,
        providers: Vec<SharedProvider>,
        file_threshold: usize,
    ) -> Result<Recovered<String>> {
        let reader = self.reader()?;
        let writer = FileDistributor::new(providers.clone(), file_threshold, &self.config)?;
        let membership: Vec<ProviderId> = providers.iter().map(|p| p.id().clone()).collect();

        let mut manifest = self.manifest.clone();
        manifest.set_providers(membership.clone());
        let mut written = Vec::new();
        let mut retired = Vec::new();
        let mut failures = Vec::new();

        let result = async {
            for (path, entry) in self.manifest.files() {
                let data = reader.get(&entry.code_name, &entry.key).await?;
                failures.extend(data.failures);

                let code_name = generate_filename();
                written.push(code_name.clone());
                let stored = writer.put(&code_name, &data.value, None).await?;
                failures.extend(stored.failures);

                manifest.update_file(
                    path,
                    ManifestEntry {
                        code_name,
                        size: entry.size,
                        key: stored.value,
                    },
                )?;
                retired.push(entry.code_name.clone());
            }

            let master_key = generate_key();
            let manifest_name = generate_filename();
            written.push(manifest_name.clone());
            let stored = writer
                .put(&manifest_name, &manifest.to_bytes()?, Some(master_key.clone()))
                .await?;
            failures.extend(stored.failures);
            Ok::<_, OperationError>((master_key, manifest_name))
        }
        .await;

        let (master_key, manifest_name) = match result {
            Ok(rotated) => rotated,
            Err(e) => {
                warn!(written = written.len(), error = %e, "Re-encoding failed");
                for name in written {
                    self.queue_garbage(name, &providers);
                }
                return Err(e);
            }
        };

        info!(
            files = retired.len(),
            providers = providers.len(),
            threshold = file_threshold,
            "Re-encoded installation"
        );

        let previous_members = self.members();
        for name in retired {
            self.queue_garbage(name, &previous_members);
        }
        let old_name = std::mem::replace(&mut self.manifest_name, manifest_name);
        self.master_key = master_key;
        self.manifest = manifest;
        self.membership = membership;
        self.providers = providers;
        self.file_threshold = file_threshold;

        Ok(Recovered::new(old_name, self.relevant(failures)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daruma_storage::{MemoryProvider, Provider, ProviderState};
    use std::sync::Arc;

    fn memory_providers(count: usize) -> (Vec<Arc<MemoryProvider>>, Vec<SharedProvider>) {
        let memory: Vec<Arc<MemoryProvider>> = (0..count)
            .map(|i| MemoryProvider::shared(format!("p{}", i)))
            .collect();
        let shared = memory.iter().map(|p| p.clone() as SharedProvider).collect();
        (memory, shared)
    }

    fn bootstrap(threshold: usize) -> Bootstrap {
        Bootstrap::new(generate_key(), generate_filename(), threshold).unwrap()
    }

    async fn provisioned(count: usize, threshold: usize) -> (Vec<Arc<MemoryProvider>>, FileManager) {
        let (memory, providers) = memory_providers(count);
        let files = FileManager::provision(providers, &bootstrap(threshold), &DarumaConfig::default())
            .await
            .unwrap();
        (memory, files)
    }

    /// A second manager over the same providers, as after a fresh load
    async fn reloaded(files: &FileManager, providers: Vec<SharedProvider>) -> FileManager {
        let mut other = FileManager::new(providers, &files.bootstrap().unwrap(), &DarumaConfig::default());
        other.load_manifest().await.unwrap();
        other
    }

    #[tokio::test]
    async fn test_put_get_across_reload() {
        let (memory, mut files) = provisioned(4, 2).await;
        files.put("docs/a.txt", b"alpha").await.unwrap();

        let providers = memory.iter().map(|p| p.clone() as SharedProvider).collect();
        let other = reloaded(&files, providers).await;
        assert_eq!(other.get("docs/a.txt").await.unwrap().value, b"alpha");
        assert_eq!(other.membership().len(), 4);
        assert_eq!(other.paths(), vec!["docs", "docs/a.txt"]);
    }

    #[tokio::test]
    async fn test_replace_retires_old_object() {
        let (memory, mut files) = provisioned(3, 2).await;
        files.put("f", b"one").await.unwrap();
        let first = files.manifest().get_file("f").unwrap().code_name.clone();

        files.put("f", b"two").await.unwrap();
        let second = files.manifest().get_file("f").unwrap().code_name.clone();
        assert_ne!(first, second);
        assert!(memory.iter().all(|p| p.object(&first).is_none()));
        assert!(memory.iter().all(|p| p.object(&second).is_some()));
        assert_eq!(files.get("f").await.unwrap().value, b"two");
    }

    #[tokio::test]
    async fn test_failed_retire_is_collected_later() {
        let (memory, mut files) = provisioned(3, 2).await;
        files.put("f", b"one").await.unwrap();
        let code_name = files.manifest().get_file("f").unwrap().code_name.clone();

        memory[2].set_state(ProviderState::Failing, Some(1));
        let failures = files.retire(&code_name).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(&failures[0].provider, memory[2].id());
        assert!(files.is_garbage(&code_name));
        assert!(memory[2].object(&code_name).is_some());

        let collected = files.collect_garbage().await;
        assert!(!collected.is_degraded());
        assert_eq!(files.garbage_count(), 0);
        assert!(memory.iter().all(|p| p.object(&code_name).is_none()));
    }

    #[tokio::test]
    async fn test_delete_and_directories() {
        let (_, mut files) = provisioned(3, 2).await;
        files.mk_dir("a/b").await.unwrap();
        files.put("a/f", b"x").await.unwrap();

        assert!(matches!(
            files.put("a/b", b"x").await,
            Err(OperationError::InvalidPath(_))
        ));
        assert!(matches!(
            files.delete("missing").await,
            Err(OperationError::FileNotFound(_))
        ));

        files.move_node("a", "c").await.unwrap();
        assert_eq!(files.paths(), vec!["c", "c/b", "c/f"]);
        assert_eq!(files.get("c/f").await.unwrap().value, b"x");
        files.delete("c/f").await.unwrap();
        files.delete("c/b").await.unwrap();
        assert!(files.ls("c").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_manifest_write_restores_manifest() {
        let (memory, mut files) = provisioned(3, 2).await;
        files.put("f", b"x").await.unwrap();
        let before = files.manifest().clone();

        memory[1].set_state(ProviderState::Offline, None);
        assert!(files.mk_dir("d").await.unwrap_err().is_fatal());
        assert_eq!(files.manifest(), &before);
    }

    #[tokio::test]
    async fn test_read_only_and_extra_providers() {
        let (memory, files) = provisioned(3, 2).await;
        let extra = MemoryProvider::shared("extra");

        let supplied: Vec<SharedProvider> = vec![memory[0].clone(), memory[2].clone(), extra.clone()];
        let mut other = reloaded(&files, supplied).await;
        let extras = other.discard_extra_providers();
        assert_eq!(extras.len(), 1);
        assert_eq!(extras[0].id(), extra.id());

        assert_eq!(other.missing_providers(), vec![memory[1].id().clone()]);
        assert!(matches!(
            other.put("f", b"x").await,
            Err(OperationError::ReadOnlyMode { .. })
        ));
        assert!(!other.add_missing_provider(memory[0].clone()));
        assert!(other.add_missing_provider(memory[1].clone()));
        assert!(!other.is_read_only());

        let members = other.members();
        let order: Vec<&str> = members.iter().map(|p| p.id().uid.as_str()).collect();
        assert_eq!(order, vec!["p0", "p1", "p2"]);
        other.put("f", b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_key_and_name() {
        let (memory, mut files) = provisioned(3, 2).await;
        files.put("f", b"x").await.unwrap();
        let old_name = files.manifest_name().to_string();

        let rotated = files
            .update_key_and_name(generate_key(), generate_filename())
            .await
            .unwrap();
        assert_eq!(rotated.value, old_name);
        assert_ne!(files.manifest_name(), old_name);

        let providers = memory.iter().map(|p| p.clone() as SharedProvider).collect();
        let other = reloaded(&files, providers).await;
        assert_eq!(other.get("f").await.unwrap().value, b"x");

        memory[0].set_state(ProviderState::Offline, None);
        let current = files.manifest_name().to_string();
        assert!(files
            .update_key_and_name(generate_key(), generate_filename())
            .await
            .is_err());
        assert_eq!(files.manifest_name(), current);
    }

    #[tokio::test]
    async fn test_reset_moves_files_to_new_providers() {
        let (memory, mut files) = provisioned(3, 2).await;
        files.put("a", b"first").await.unwrap();
        files.put("dir/b", b"second").await.unwrap();
        let old_code = files.manifest().get_file("a").unwrap().code_name.clone();

        let mut new_set: Vec<SharedProvider> = vec![memory[0].clone()];
        new_set.extend((1..4).map(|i| MemoryProvider::shared(format!("q{}", i)) as SharedProvider));

        let old_name = files.reset(new_set.clone(), 3).await.unwrap().value;
        assert_ne!(old_name, files.manifest_name());
        assert_eq!(files.file_threshold(), 3);
        assert!(files.is_garbage(&old_code));

        let other = reloaded(&files, new_set).await;
        assert_eq!(other.get("a").await.unwrap().value, b"first");
        assert_eq!(other.get("dir/b").await.unwrap().value, b"second");
        assert_eq!(other.membership().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_reset_changes_nothing() {
        let (_, mut files) = provisioned(3, 2).await;
        files.put("a", b"first").await.unwrap();
        let before_name = files.manifest_name().to_string();

        let fresh_memory: Vec<Arc<MemoryProvider>> = (0..3)
            .map(|i| MemoryProvider::shared(format!("q{}", i)))
            .collect();
        fresh_memory[2].set_state(ProviderState::Offline, None);
        let fresh: Vec<SharedProvider> = fresh_memory.iter().map(|p| p.clone() as SharedProvider).collect();
        assert!(files.reset(fresh, 2).await.is_err());
        assert_eq!(files.manifest_name(), before_name);
        assert_eq!(files.membership().len(), 3);
        assert!(files.garbage_count() > 0);
        assert_eq!(files.get("a").await.unwrap().value, b"first");

        // The partial writes sit on providers outside the installation
        assert!(!fresh_memory[0].object_names().is_empty());
        fresh_memory[2].set_state(ProviderState::Active, None);
        assert!(!files.collect_garbage().await.is_degraded());
        assert_eq!(files.garbage_count(), 0);
        assert!(fresh_memory.iter().all(|p| p.object_names().is_empty()));
    }

    #[tokio::test]
    async fn test_load_failure_filtered_to_members() {
        let (memory, files) = provisioned(3, 2).await;
        let outsider = MemoryProvider::shared("outsider");
        outsider.set_state(ProviderState::Offline, None);

        let mut supplied: Vec<SharedProvider> = memory.iter().map(|p| p.clone() as SharedProvider).collect();
        supplied.push(outsider);
        let mut other = FileManager::new(supplied, &files.bootstrap().unwrap(), &DarumaConfig::default());
        let loaded = other.load_manifest().await.unwrap();
        assert!(!loaded.is_degraded());

        memory[0].wipe().await.unwrap();
        let loaded = other.load_manifest().await.unwrap();
        assert_eq!(loaded.failures.len(), 1);
        assert_eq!(&loaded.failures[0].provider, memory[0].id());
    }
}
