//! Per-object distribution
//!
//! An object is encrypted under its own key, erasure-coded into one share per
//! provider, and written to all providers in parallel. Reads gather whatever
//! shares come back, check that disjoint groups of shares agree, and only
//! when they do not, search for the providers responsible.

use crate::config::{DarumaConfig, WritePolicy};
use crate::error::{OperationError, Recovered, Result};
use crate::fanout::{fan_out, partition};
use bytes::Bytes;
use daruma_core::crypto::{decrypt, encrypt, generate_key, EncryptionKey};
use daruma_core::erasure;
use daruma_storage::{ProviderFailure, SharedProvider};
use rayon::prelude::*;
use std::time::Duration;
use tracing::{debug, warn};

/// Encrypts, erasure-codes and scatters objects across a fixed provider list
pub struct FileDistributor {
    providers: Vec<SharedProvider>,
    threshold: usize,
    deadline: Duration,
    policy: WritePolicy,
}

impl FileDistributor {
    pub fn new(
        providers: Vec<SharedProvider>,
        threshold: usize,
        config: &DarumaConfig,
    ) -> Result<Self> {
        if threshold == 0 || threshold > providers.len() {
            return Err(OperationError::InvalidParameters(format!(
                "file threshold {} with {} providers",
                threshold,
                providers.len()
            )));
        }
        Ok(Self {
            providers,
            threshold,
            deadline: config.provider_timeout(),
            policy: config.write_policy,
        })
    }

    pub fn providers(&self) -> &[SharedProvider] {
        &self.providers
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Store `data` under `name`, returning the key it was encrypted with
    ///
    /// A fresh key is generated unless one is supplied. Share `i` goes to
    /// provider `i`.
    pub async fn put(
        &self,
        name: &str,
        data: &[u8],
        key: Option<EncryptionKey>,
    ) -> Result<Recovered<EncryptionKey>> {
        let key = key.unwrap_or_else(generate_key);
        let ciphertext = encrypt(data, &key)?;
        let shares: Vec<Bytes> = erasure::share(&ciphertext, self.threshold, self.providers.len())?
            .into_iter()
            .map(Bytes::from)
            .collect();

        debug!(
            name,
            size = data.len(),
            threshold = self.threshold,
            providers = self.providers.len(),
            "Distributing object"
        );

        let outcomes = fan_out(&self.providers, self.deadline, |index, provider| {
            let share = shares[index].clone();
            async move { provider.put(name, share).await }
        })
        .await;
        let (written, failures) = partition(outcomes);

        let failures = self.write_outcome(written.len(), failures)?;
        Ok(Recovered::new(key, failures))
    }

    /// Fetch and decrypt the object stored under `name`
    ///
    /// Providers whose shares disagree with the recovered object are
    /// returned as invalid-share failures alongside the data.
    pub async fn get(&self, name: &str, key: &EncryptionKey) -> Result<Recovered<Vec<u8>>> {
        let outcomes = fan_out(&self.providers, self.deadline, |_, provider| async move {
            provider.get(name).await
        })
        .await;
        let (shares, mut failures) = partition(outcomes);

        if shares.len() < self.threshold {
            warn!(
                name,
                available = shares.len(),
                threshold = self.threshold,
                "Too few shares to reconstruct object"
            );
            return Err(OperationError::fatal(failures));
        }

        let raw: Vec<&[u8]> = shares.iter().map(|(_, share)| share.as_ref()).collect();
        let Some((data, bad)) = recover(&raw, self.threshold, key) else {
            warn!(name, shares = raw.len(), "No subset of shares decodes");
            return Err(OperationError::fatal(failures));
        };

        for index in bad {
            let provider = &shares[index].0;
            warn!(name, provider = %provider.id(), "Provider returned an invalid share");
            failures.push(ProviderFailure::invalid_share(
                provider.id(),
                format!("share of {} disagrees with recovered object", name),
            ));
        }

        Ok(Recovered::new(data, failures))
    }

    /// Remove the object from every provider
    pub async fn delete(&self, name: &str) -> Result<Recovered<()>> {
        debug!(name, "Deleting object");
        let outcomes = fan_out(&self.providers, self.deadline, |_, provider| async move {
            provider.delete(name).await
        })
        .await;
        let (deleted, failures) = partition(outcomes);

        let failures = self.write_outcome(deleted.len(), failures)?;
        Ok(Recovered::clean(()).with_failures(failures))
    }

    /// Apply the write policy to a completed fan-out
    fn write_outcome(
        &self,
        succeeded: usize,
        failures: Vec<ProviderFailure>,
    ) -> Result<Vec<ProviderFailure>> {
        if failures.is_empty() {
            return Ok(failures);
        }
        match self.policy {
            WritePolicy::Threshold if succeeded >= self.threshold => Ok(failures),
            _ => Err(OperationError::fatal(failures)),
        }
    }
}

/// Decode one candidate group of shares
fn decode(shares: &[&[u8]], threshold: usize, key: &EncryptionKey) -> Option<Vec<u8>> {
    let first = shares.first()?;
    let total = erasure::share_total(first).ok()?;
    let ciphertext = erasure::reconstruct(shares, threshold, total).ok()?;
    decrypt(&ciphertext, key).ok()
}

/// Indices of the `threshold` shares starting at `start`, wrapping around
fn window(start: usize, threshold: usize, count: usize) -> Vec<usize> {
    (start..start + threshold).map(|i| i % count).collect()
}

fn select<'a>(shares: &[&'a [u8]], indices: &[usize]) -> Vec<&'a [u8]> {
    indices.iter().map(|&i| shares[i]).collect()
}

/// Recover an object from `shares`, returning it with the indices of the
/// shares that disagree with it
///
/// The shares are split into disjoint groups of `threshold` (the last group
/// wraps around to the start). If every group decodes to the same object no
/// further work is needed. Otherwise a decoding basis is found and each
/// remaining share is tested by substituting it for one member of the basis.
fn recover(
    shares: &[&[u8]],
    threshold: usize,
    key: &EncryptionKey,
) -> Option<(Vec<u8>, Vec<usize>)> {
    let count = shares.len();
    let groups: Vec<Vec<usize>> = (0..count.div_ceil(threshold))
        .map(|g| window(g * threshold, threshold, count))
        .collect();

    let decoded: Vec<Option<Vec<u8>>> = groups
        .par_iter()
        .map(|group| decode(&select(shares, group), threshold, key))
        .collect();

    if let Some(Some(first)) = decoded.first() {
        if decoded.iter().all(|d| d.as_ref() == Some(first)) {
            return Some((first.clone(), Vec::new()));
        }
    }

    // Prefer the plaintext most groups agree on
    let basis = decoded
        .iter()
        .enumerate()
        .filter_map(|(g, d)| d.as_ref().map(|d| (g, d)))
        .max_by_key(|(g, d)| {
            let votes = decoded.iter().filter(|o| o.as_ref() == Some(*d)).count();
            (votes, std::cmp::Reverse(*g))
        })
        .map(|(g, d)| (groups[g].clone(), d.clone()))
        .or_else(|| {
            // No disjoint group decodes; slide a window over the shares
            (0..count).find_map(|start| {
                let members = window(start, threshold, count);
                decode(&select(shares, &members), threshold, key).map(|d| (members, d))
            })
        });

    let (members, data) = basis?;
    let (kept, _) = members.split_at(threshold - 1);

    let bad: Vec<usize> = (0..count)
        .into_par_iter()
        .filter(|i| !members.contains(i))
        .filter(|&i| {
            let mut candidate: Vec<&[u8]> = select(shares, kept);
            candidate.push(shares[i]);
            decode(&candidate, threshold, key).as_ref() != Some(&data)
        })
        .collect();

    Some((data, bad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use daruma_storage::{FailureKind, MemoryProvider, Provider, ProviderState};
    use std::sync::Arc;

    fn memory_providers(count: usize) -> (Vec<Arc<MemoryProvider>>, Vec<SharedProvider>) {
        let memory: Vec<Arc<MemoryProvider>> = (0..count)
            .map(|i| MemoryProvider::shared(format!("p{}", i)))
            .collect();
        let shared = memory.iter().map(|p| p.clone() as SharedProvider).collect();
        (memory, shared)
    }

    fn distributor(providers: Vec<SharedProvider>, threshold: usize) -> FileDistributor {
        FileDistributor::new(providers, threshold, &DarumaConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_threshold() {
        let (_, providers) = memory_providers(3);
        assert!(matches!(
            FileDistributor::new(providers.clone(), 4, &DarumaConfig::default()),
            Err(OperationError::InvalidParameters(_))
        ));
        assert!(FileDistributor::new(providers, 0, &DarumaConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (memory, providers) = memory_providers(5);
        let dist = distributor(providers, 3);

        let put = dist.put("OBJ", b"some file contents", None).await.unwrap();
        assert!(!put.is_degraded());
        for p in &memory {
            assert!(p.object("OBJ").is_some());
        }

        let got = dist.get("OBJ", &put.value).await.unwrap();
        assert!(!got.is_degraded());
        assert_eq!(got.value, b"some file contents");
    }

    #[tokio::test]
    async fn test_supplied_key_is_used() {
        let (_, providers) = memory_providers(3);
        let dist = distributor(providers, 2);
        let key = generate_key();
        let put = dist.put("OBJ", b"x", Some(key.clone())).await.unwrap();
        assert_eq!(put.value, key);
    }

    #[tokio::test]
    async fn test_get_with_missing_shares_is_degraded() {
        let (memory, providers) = memory_providers(5);
        let dist = distributor(providers, 3);
        let key = dist.put("OBJ", b"data", None).await.unwrap().value;

        memory[0].wipe().await.unwrap();
        memory[3].set_state(ProviderState::Offline, None);

        let got = dist.get("OBJ", &key).await.unwrap();
        assert_eq!(got.value, b"data");
        assert_eq!(got.failures.len(), 2);
        assert_eq!(&got.failures[0].provider, memory[0].id());
        assert_eq!(got.failures[0].kind, FailureKind::Operation);
        assert_eq!(got.failures[1].kind, FailureKind::Connection);
    }

    #[tokio::test]
    async fn test_get_below_threshold_is_fatal() {
        let (memory, providers) = memory_providers(5);
        let dist = distributor(providers, 3);
        let key = dist.put("OBJ", b"data", None).await.unwrap().value;

        for p in &memory[..3] {
            p.wipe().await.unwrap();
        }
        let err = dist.get("OBJ", &key).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.failures().len(), 3);
    }

    #[tokio::test]
    async fn test_corrupt_share_is_localized() {
        let (memory, providers) = memory_providers(5);
        let dist = distributor(providers, 2);
        let key = dist
            .put("OBJ", b"a longer object that spans every fragment", None)
            .await
            .unwrap()
            .value;

        memory[1].set_state(ProviderState::Corrupting, None);
        memory[4].set_state(ProviderState::Corrupting, None);

        let got = dist.get("OBJ", &key).await.unwrap();
        assert_eq!(got.value, b"a longer object that spans every fragment");
        let mut blamed: Vec<&str> = got.failures.iter().map(|f| f.provider.uid.as_str()).collect();
        blamed.sort();
        assert_eq!(blamed, vec!["p1", "p4"]);
        assert!(got.failures.iter().all(|f| f.kind == FailureKind::InvalidShare));
    }

    #[tokio::test]
    async fn test_corruption_in_every_group_still_recovers() {
        let (memory, providers) = memory_providers(6);
        let dist = distributor(providers, 2);
        let key = dist.put("OBJ", b"grouped", None).await.unwrap().value;

        // Groups are {0,1} {2,3} {4,5}; spoil one share in each of the first two
        memory[0].set_state(ProviderState::Corrupting, None);
        memory[3].set_state(ProviderState::Corrupting, None);

        let got = dist.get("OBJ", &key).await.unwrap();
        assert_eq!(got.value, b"grouped");
        let blamed: Vec<&str> = got.failures.iter().map(|f| f.provider.uid.as_str()).collect();
        assert_eq!(blamed.len(), 2);
        assert!(blamed.contains(&"p0"));
        assert!(blamed.contains(&"p3"));
    }

    #[tokio::test]
    async fn test_sliding_window_when_no_group_decodes() {
        let (memory, providers) = memory_providers(4);
        let dist = distributor(providers, 2);
        let key = dist.put("OBJ", b"windowed", None).await.unwrap().value;

        // Groups {0,1} and {2,3} both contain a bad share; window {1,2} is clean
        memory[0].set_state(ProviderState::Corrupting, None);
        memory[3].set_state(ProviderState::Corrupting, None);

        let got = dist.get("OBJ", &key).await.unwrap();
        assert_eq!(got.value, b"windowed");
        assert_eq!(got.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_wrong_key_is_fatal() {
        let (_, providers) = memory_providers(3);
        let dist = distributor(providers, 2);
        dist.put("OBJ", b"data", None).await.unwrap();

        let err = dist.get("OBJ", &generate_key()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_put_failure_policy() {
        let (memory, providers) = memory_providers(4);
        memory[2].set_state(ProviderState::Offline, None);

        let strict = distributor(providers.clone(), 2);
        let err = strict.put("OBJ", b"data", None).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.failures().len(), 1);

        let config = DarumaConfig {
            write_policy: WritePolicy::Threshold,
            ..Default::default()
        };
        let tolerant = FileDistributor::new(providers, 2, &config).unwrap();
        let put = tolerant.put("OBJ", b"data", None).await.unwrap();
        assert!(put.is_degraded());
        let got = tolerant.get("OBJ", &put.value).await.unwrap();
        assert_eq!(got.value, b"data");
    }

    #[tokio::test]
    async fn test_delete() {
        let (memory, providers) = memory_providers(3);
        let dist = distributor(providers, 2);
        dist.put("OBJ", b"data", None).await.unwrap();

        let deleted = dist.delete("OBJ").await.unwrap();
        assert!(!deleted.is_degraded());
        assert!(memory.iter().all(|p| p.object("OBJ").is_none()));

        // Deleting again succeeds everywhere
        assert!(!dist.delete("OBJ").await.unwrap().is_degraded());

        memory[0].set_state(ProviderState::Failing, None);
        assert!(dist.delete("OBJ").await.unwrap_err().is_fatal());
    }

    #[test]
    fn test_groups_wrap_around() {
        assert_eq!(window(3, 3, 5), vec![3, 4, 0]);
        assert_eq!(window(0, 2, 2), vec![0, 1]);
    }
}
