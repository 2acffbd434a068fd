//! Transaction request runner: snapshot, compute, complete, retry.

use super::complete::complete_transaction;
use super::retry::RetryPolicy;
use super::snapshot::{begin_transaction, Snapshot};
use crate::error::{Result, StoreError, UpdateError};
use crate::storage::Storage;
use crate::types::KeyedValue;
use std::fmt;
use std::time::Instant;
use tracing::{trace, warn};

/// Which snapshot the update function sees on a retry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// Re-read the condition keys before every retry so the update
    /// function can adapt to the values that beat it.
    #[default]
    Refresh,
    /// Pass the original snapshot on every attempt. Contention is still
    /// detected, but an update computed from stale values can never commit
    /// once a key has moved on, so bound the retries.
    Reuse,
}

/// A multi-key optimistic update.
///
/// `update` receives the snapshot of `condition_keys` and returns the values
/// to write. It may be called once per attempt and must not have side
/// effects that are unsafe to repeat. Returning an error aborts the whole
/// transaction; errors are never retried.
pub struct TransactionRequest<F> {
    pub condition_keys: Vec<String>,
    pub update: F,
    /// Retry on contention (per `retry`) instead of failing after one attempt.
    pub retry_until_resolved: bool,
    pub retry: RetryPolicy,
    pub snapshot_policy: SnapshotPolicy,
}

impl<F> TransactionRequest<F>
where
    F: Fn(&Snapshot) -> std::result::Result<Vec<KeyedValue>, UpdateError>,
{
    /// A single-attempt request over `condition_keys`.
    pub fn new<I, K>(condition_keys: I, update: F) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            condition_keys: condition_keys.into_iter().map(Into::into).collect(),
            update,
            retry_until_resolved: false,
            retry: RetryPolicy::default(),
            snapshot_policy: SnapshotPolicy::default(),
        }
    }

    /// Retry on contention under the current [`RetryPolicy`].
    pub fn retry_until_resolved(mut self, retry: bool) -> Self {
        self.retry_until_resolved = retry;
        self
    }

    /// Use `policy` for retries. This also turns on `retry_until_resolved`,
    /// since a policy has no effect on a single-attempt request.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_until_resolved = true;
        self.retry = policy;
        self
    }

    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }
}

impl<F> fmt::Debug for TransactionRequest<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRequest")
            .field("condition_keys", &self.condition_keys)
            .field("retry_until_resolved", &self.retry_until_resolved)
            .field("retry", &self.retry)
            .field("snapshot_policy", &self.snapshot_policy)
            .finish_non_exhaustive()
    }
}

/// Result of a transaction that did not hit an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecuteOutcome {
    /// Whether the final attempt committed.
    pub committed: bool,
    /// Number of completion attempts made.
    pub attempts: usize,
}

/// Run `request` against `store`.
///
/// Returns `Ok(true)` on commit and `Ok(false)` on contention (after one
/// attempt, or once the retry policy is exhausted). Backend errors and
/// update-function errors return `Err` immediately.
pub fn execute<S, F>(store: &S, request: &TransactionRequest<F>) -> Result<bool>
where
    S: Storage + ?Sized,
    F: Fn(&Snapshot) -> std::result::Result<Vec<KeyedValue>, UpdateError>,
{
    execute_detailed(store, request).map(|outcome| outcome.committed)
}

/// Like [`execute`], also reporting how many attempts were made.
pub fn execute_detailed<S, F>(store: &S, request: &TransactionRequest<F>) -> Result<ExecuteOutcome>
where
    S: Storage + ?Sized,
    F: Fn(&Snapshot) -> std::result::Result<Vec<KeyedValue>, UpdateError>,
{
    let started = Instant::now();
    let mut snapshot = begin_transaction(store, request.condition_keys.as_slice())?;
    let mut attempts = 0;

    loop {
        attempts += 1;
        trace!(attempt = attempts, keys = snapshot.len(), "Transaction attempt");

        let desired = (request.update)(&snapshot).map_err(StoreError::Update)?;

        if complete_transaction(store, &snapshot, &desired)? {
            return Ok(ExecuteOutcome {
                committed: true,
                attempts,
            });
        }

        if !request.retry_until_resolved {
            return Ok(ExecuteOutcome {
                committed: false,
                attempts,
            });
        }

        if !request.retry.allows_retry(attempts, started) {
            warn!(
                attempts,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Transaction retry policy exhausted"
            );
            return Ok(ExecuteOutcome {
                committed: false,
                attempts,
            });
        }

        let delay = request.retry.delay_for(attempts);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if request.snapshot_policy == SnapshotPolicy::Refresh {
            snapshot = begin_transaction(store, request.condition_keys.as_slice())?;
        }
    }
}
