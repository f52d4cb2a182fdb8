//! Runs the approval pipeline for one pull request.
//!
//! Read everything fresh, evaluate, then execute the planned effects.
//! Invocations for the same pull request are serialized by `PrLocks` so a
//! slow run never publishes after a faster, newer one.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use approve_core::{evaluate, ApprovalConfig, Evaluation, OwnersOracle, PullRequestId};
use tokio::sync::Mutex;
use tracing::info;

use crate::interpreter::execute_effects;
use crate::platform::Platform;


/// Per-pull-request mutexes.
#[derive(Default)]
pub struct PrLocks {
    locks: Mutex<HashMap<PullRequestId, Arc<Mutex<()>>>>,
}

impl PrLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, pr: &PullRequestId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(pr.clone()).or_default().clone()
    }

    /// Drop the entry for `pr` once no other run holds or awaits it.
    async fn release(&self, pr: &PullRequestId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks.get(pr).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(pr);
        }
    }

    /// Number of pull requests with a live lock entry.
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Evaluate `pr` and publish the result.
///
/// Returns an error only when a platform call or the ownership oracle fails.
/// A fully resolved state, approved or not, is `Ok` whether or not anything
/// was written.
pub async fn handle_pull_request<P, O>(
    platform: &P,
    owners: &O,
    config: &ApprovalConfig,
    pr: &PullRequestId,
) -> Result<Evaluation>
where
    P: Platform + ?Sized,
    O: OwnersOracle + ?Sized,
{
    let snapshot = platform
        .fetch_snapshot(pr)
        .await
        .with_context(|| format!("Failed to read {}", pr))?;

    let evaluation = evaluate(&snapshot, owners, config)
        .with_context(|| format!("Failed to evaluate {}", pr))?;

    if evaluation.effects.is_empty() {
        info!("{}: no material transition, nothing to do", pr);
        return Ok(evaluation);
    }

    execute_effects(platform, pr, &evaluation.effects).await?;
    Ok(evaluation)
}

/// `handle_pull_request` under the pull request's lock.
pub async fn handle_pull_request_serialized<P, O>(
    locks: &PrLocks,
    platform: &P,
    owners: &O,
    config: &ApprovalConfig,
    pr: &PullRequestId,
) -> Result<Evaluation>
where
    P: Platform + ?Sized,
    O: OwnersOracle + ?Sized,
{
    let lock = locks.lock_for(pr).await;
    let result = {
        let _guard = lock.lock().await;
        handle_pull_request(platform, owners, config, pr).await
    };
    locks.release(pr, lock).await;
    result
}
