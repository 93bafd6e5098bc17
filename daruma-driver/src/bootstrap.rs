//! Bootstrap distribution and recovery
//!
//! Every provider holds two objects: a Shamir share of the encoded
//! [`Bootstrap`] and a plaintext vote marker `"<threshold>,<id>"`. On
//! recovery the threshold is not known, so providers vote with their
//! markers; the largest group wins and must hold at least as many members as
//! the threshold it proposes.

use crate::config::DarumaConfig;
use crate::error::{OperationError, Recovered, Result};
use crate::fanout::{fan_out, partition};
use bytes::Bytes;
use daruma_core::{shamir, Bootstrap, BOOTSTRAP_SIZE};
use daruma_storage::{ProviderFailure, SharedProvider};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Object holding a provider's bootstrap share
pub const BOOTSTRAP_OBJECT: &str = "bootstrap";

/// Object holding a provider's plaintext vote marker
pub const VOTE_OBJECT: &str = "bootstrap_vote";

/// A provider's vote marker
#[derive(Debug, Clone, PartialEq, Eq)]
struct Vote {
    threshold: usize,
    id: String,
}

impl Vote {
    fn random(threshold: usize) -> Self {
        Self {
            threshold,
            id: format!("{:016X}", rand::random::<u64>()),
        }
    }

    fn encode(&self) -> Bytes {
        Bytes::from(format!("{},{}", self.threshold, self.id))
    }

    fn parse(data: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(data).ok()?;
        let (threshold, id) = text.split_once(',')?;
        if !threshold.bytes().all(|b| b.is_ascii_digit())
            || id.is_empty()
            || !id.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return None;
        }
        let threshold: usize = threshold.parse().ok()?;
        if threshold == 0 {
            return None;
        }
        Some(Self {
            threshold,
            id: id.to_string(),
        })
    }
}

/// What one provider returned
struct Ballot {
    provider: SharedProvider,
    vote: Vote,
    share: Bytes,
}

/// Secret-shares the bootstrap record across an ordered provider list
pub struct BootstrapManager {
    providers: Vec<SharedProvider>,
    threshold: Option<usize>,
    deadline: Duration,
}

impl BootstrapManager {
    /// `threshold` may be unknown until [`BootstrapManager::recover`] runs
    pub fn new(providers: Vec<SharedProvider>, threshold: Option<usize>, config: &DarumaConfig) -> Self {
        Self {
            providers,
            threshold,
            deadline: config.provider_timeout(),
        }
    }

    pub fn providers(&self) -> &[SharedProvider] {
        &self.providers
    }

    pub fn set_providers(&mut self, providers: Vec<SharedProvider>) {
        self.providers = providers;
    }

    /// Reconstruction threshold in force, once known
    pub fn threshold(&self) -> Option<usize> {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = Some(threshold);
    }

    /// Share `bootstrap` across every provider
    ///
    /// Any provider failure is fatal: the record is not known to be
    /// recoverable everywhere it is expected.
    pub async fn distribute(&self, bootstrap: &Bootstrap) -> Result<()> {
        let threshold = self.threshold.ok_or_else(|| {
            OperationError::InvalidParameters("bootstrap threshold is not known".to_string())
        })?;
        if threshold == 0 || threshold > self.providers.len() {
            return Err(OperationError::InvalidParameters(format!(
                "bootstrap threshold {} with {} providers",
                threshold,
                self.providers.len()
            )));
        }

        let encoded = bootstrap.to_bytes()?;
        let shares: Vec<Bytes> = shamir::share(&encoded, threshold, self.providers.len())?
            .into_iter()
            .map(Bytes::from)
            .collect();

        debug!(
            threshold,
            providers = self.providers.len(),
            "Distributing bootstrap"
        );

        let outcomes = fan_out(&self.providers, self.deadline, |index, provider| {
            let share = shares[index].clone();
            let marker = Vote::random(threshold).encode();
            async move {
                provider.put(VOTE_OBJECT, marker).await?;
                provider.put(BOOTSTRAP_OBJECT, share).await
            }
        })
        .await;
        let (_, failures) = partition(outcomes);

        if !failures.is_empty() {
            warn!(failures = failures.len(), "Bootstrap distribution failed");
            return Err(OperationError::fatal(failures));
        }
        Ok(())
    }

    /// Remove the share and vote marker from every provider
    ///
    /// Used on providers that took a bootstrap for an installation they
    /// did not end up joining, so they never vote for it.
    pub async fn withdraw(&self) -> Vec<ProviderFailure> {
        let outcomes = fan_out(&self.providers, self.deadline, |_, provider| async move {
            provider.delete(VOTE_OBJECT).await?;
            provider.delete(BOOTSTRAP_OBJECT).await
        })
        .await;
        let (_, failures) = partition(outcomes);
        if !failures.is_empty() {
            warn!(failures = failures.len(), "Could not withdraw bootstrap shares");
        }
        failures
    }

    /// Recover the bootstrap record from whatever providers respond
    ///
    /// Providers that are unreachable, malformed, outvoted or hold a share
    /// inconsistent with the recovered record are returned as failures
    /// alongside it.
    pub async fn recover(&mut self) -> Result<Recovered<Bootstrap>> {
        let outcomes = fan_out(&self.providers, self.deadline, |_, provider| async move {
            let marker = provider.get(VOTE_OBJECT).await?;
            let share = provider.get(BOOTSTRAP_OBJECT).await?;
            Ok::<_, ProviderFailure>((marker, share))
        })
        .await;
        let (responses, mut failures) = partition(outcomes);

        let mut ballots = Vec::with_capacity(responses.len());
        for (provider, (marker, share)) in responses {
            match Vote::parse(&marker) {
                Some(vote) if well_formed_share(&share) => ballots.push(Ballot {
                    provider,
                    vote,
                    share,
                }),
                _ => failures.push(ProviderFailure::invalid_share(
                    provider.id(),
                    "malformed bootstrap share or vote marker",
                )),
            }
        }

        let (threshold, ballots) = tally(ballots, &mut failures)?;

        let (bootstrap, inconsistent) = reconstruct(&ballots, threshold).ok_or_else(|| {
            warn!(threshold, "No share window reconstructs the bootstrap");
            OperationError::fatal(failures.clone())
        })?;

        for index in inconsistent {
            let provider = &ballots[index].provider;
            warn!(provider = %provider.id(), "Bootstrap share is inconsistent");
            failures.push(ProviderFailure::invalid_share(
                provider.id(),
                "bootstrap share disagrees with the recovered record",
            ));
        }

        info!(
            threshold,
            failures = failures.len(),
            "Recovered bootstrap"
        );
        self.threshold = Some(threshold);
        Ok(Recovered::new(bootstrap, failures))
    }
}

fn well_formed_share(share: &[u8]) -> bool {
    share.len() == BOOTSTRAP_SIZE + 1 && shamir::share_index(share).is_some()
}

/// Pick the threshold in force and keep only the ballots that voted for it
///
/// Ties go to the larger threshold. Outvoted providers are recorded as
/// invalid-share failures.
fn tally(
    ballots: Vec<Ballot>,
    failures: &mut Vec<ProviderFailure>,
) -> Result<(usize, Vec<Ballot>)> {
    let mut groups: BTreeMap<usize, usize> = BTreeMap::new();
    for ballot in &ballots {
        *groups.entry(ballot.vote.threshold).or_default() += 1;
    }

    let winner = groups
        .iter()
        .max_by_key(|(threshold, size)| (**size, **threshold))
        .map(|(threshold, size)| (*threshold, *size));

    let Some((threshold, size)) = winner.filter(|(threshold, size)| size >= threshold) else {
        warn!(
            ballots = ballots.len(),
            groups = groups.len(),
            "No bootstrap threshold has enough votes"
        );
        for ballot in &ballots {
            if winner.is_some_and(|(t, _)| t != ballot.vote.threshold) {
                failures.push(outvoted(ballot));
            }
        }
        return Err(OperationError::fatal(failures.clone()));
    };

    debug!(threshold, votes = size, "Bootstrap threshold vote");

    let (kept, rejected): (Vec<Ballot>, Vec<Ballot>) = ballots
        .into_iter()
        .partition(|ballot| ballot.vote.threshold == threshold);
    failures.extend(rejected.iter().map(outvoted));
    Ok((threshold, kept))
}

fn outvoted(ballot: &Ballot) -> ProviderFailure {
    ProviderFailure::invalid_share(
        ballot.provider.id(),
        format!("outvoted bootstrap threshold {}", ballot.vote.threshold),
    )
}

/// Reconstruct from ballots that agree on `threshold`
///
/// One share per marker id forms the candidate pool. Threshold-sized windows
/// over the pool are ranked by how many of all shares lie on the polynomial
/// they define, and the first that decodes to a valid record wins. Returns
/// the record with the indices of ballots whose shares disagree with it.
fn reconstruct(ballots: &[Ballot], threshold: usize) -> Option<(Bootstrap, Vec<usize>)> {
    let mut seen = HashSet::new();
    let pool: Vec<usize> = (0..ballots.len())
        .filter(|&i| seen.insert(ballots[i].vote.id.as_str()))
        .collect();
    if pool.len() < threshold {
        return None;
    }

    let shares: Vec<&[u8]> = ballots.iter().map(|b| b.share.as_ref()).collect();
    let windows: Vec<Vec<&[u8]>> = (0..pool.len())
        .map(|start| {
            (start..start + threshold)
                .map(|i| shares[pool[i % pool.len()]])
                .collect()
        })
        .collect();

    let mut ranked: Vec<(usize, usize)> = windows
        .par_iter()
        .enumerate()
        .map(|(w, basis)| (w, agreement(basis, &shares)))
        .collect();
    ranked.sort_by_key(|(w, votes)| (std::cmp::Reverse(*votes), *w));

    ranked.into_iter().find_map(|(w, _)| {
        let basis = &windows[w];
        let secret = shamir::reconstruct(basis).ok()?;
        let bootstrap = Bootstrap::from_bytes(&secret).ok()?;
        let inconsistent = (0..shares.len())
            .filter(|&i| !matches!(shamir::is_consistent(basis, shares[i]), Ok(true)))
            .collect();
        Some((bootstrap, inconsistent))
    })
}

/// Number of shares consistent with `basis`; zero if the basis is unusable
fn agreement(basis: &[&[u8]], shares: &[&[u8]]) -> usize {
    shares
        .iter()
        .filter(|share| matches!(shamir::is_consistent(basis, share), Ok(true)))
        .count()
}
