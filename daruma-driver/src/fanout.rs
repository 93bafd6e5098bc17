//! Parallel fan-out over providers
//!
//! Runs one call per provider concurrently, each under its own deadline, and
//! joins every result before returning. Results keep provider order, so
//! decisions made on them never depend on arrival order.

use daruma_storage::{ProviderFailure, ProviderResult, SharedProvider};
use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Outcome of one provider call
pub struct ProviderOutcome<T> {
    pub provider: SharedProvider,
    pub result: ProviderResult<T>,
}

/// Run `operation(index, provider)` on every provider concurrently
///
/// A call that outlives `deadline` is reported as a connection failure for
/// that provider.
pub async fn fan_out<T, F, Fut>(
    providers: &[SharedProvider],
    deadline: Duration,
    operation: F,
) -> Vec<ProviderOutcome<T>>
where
    F: Fn(usize, SharedProvider) -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let futures: Vec<_> = providers
        .iter()
        .enumerate()
        .map(|(index, provider)| {
            let call = operation(index, provider.clone());
            let provider = provider.clone();
            async move {
                let result = match timeout(deadline, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderFailure::connection(
                        provider.id(),
                        format!("timed out after {:?}", deadline),
                    )),
                };
                ProviderOutcome { provider, result }
            }
        })
        .collect();

    join_all(futures).await
}

/// Split outcomes into successes and failures, logging each failure
pub fn partition<T>(
    outcomes: Vec<ProviderOutcome<T>>,
) -> (Vec<(SharedProvider, T)>, Vec<ProviderFailure>) {
    let mut successes = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(value) => successes.push((outcome.provider, value)),
            Err(failure) => {
                debug!(
                    provider = %failure.provider,
                    kind = %failure.kind,
                    message = %failure.message,
                    "Provider call failed"
                );
                failures.push(failure);
            }
        }
    }
    (successes, failures)
}
