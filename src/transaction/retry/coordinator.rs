//! Attempt orchestration
//!
//! When an attempt aborts, the coordinator decides whether the logical
//! transaction may continue, replaces the aborted attempt with a fresh one and
//! replays the flushed write set into it. The decision is a plain value
//! (`RetryDecision`) so it can be inspected and tested on its own.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::common::types::AttemptId;
use crate::statement::{result_checksum, MutationBatch, Statement};
use crate::transaction::concurrency::{SharedTransactionRegistry, TransactionHandle};
use crate::transaction::error::{Result, TxnError};
use crate::transaction::retry::policy::{ReplayMode, RetryPolicy};

/// Why a failure is handed back to the caller instead of retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceReason {
    /// Only aborts are retried
    NotAborted,
    RetriesDisabled,
    AttemptsExhausted,
    DeadlineExceeded,
    /// A joined context wrote through the aborted attempt; those writes are not logged
    JoinedWrites,
    /// The policy re-runs the whole body; the caller restarts the scope
    BodyReexecution,
    /// A verified replay read different rows than the original attempt
    ReplayDiverged,
}

/// Outcome of evaluating a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        next_attempt: AttemptId,
        delay: Duration,
    },
    Surface(SurfaceReason),
}

/// A failure the coordinator could not recover from
#[derive(Debug)]
pub(crate) struct Surfaced {
    pub error: TxnError,
    pub reason: SurfaceReason,
}

enum ReplayError {
    Failed(TxnError),
    Diverged(usize),
}

/// Drives the attempts of one logical transaction
#[derive(Debug)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
    started: Instant,
    retries: u32,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            started: Instant::now(),
            retries: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Number of attempts replaced so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Decide what to do after `attempt` failed with `failure` when the
    /// write set would be replayed into a new attempt
    pub fn decide(&self, failure: &TxnError, attempt: AttemptId, joined_writes: bool) -> RetryDecision {
        match self.evaluate(failure, attempt, joined_writes) {
            RetryDecision::Retry { .. } if self.policy.reexecute_body => {
                RetryDecision::Surface(SurfaceReason::BodyReexecution)
            }
            decision => decision,
        }
    }

    /// Decide whether the body may run again after `attempt` failed
    pub fn decide_restart(&self, failure: &TxnError, attempt: AttemptId, joined_writes: bool) -> RetryDecision {
        self.evaluate(failure, attempt, joined_writes)
    }

    fn evaluate(&self, failure: &TxnError, attempt: AttemptId, joined_writes: bool) -> RetryDecision {
        if !failure.is_aborted() {
            return RetryDecision::Surface(SurfaceReason::NotAborted);
        }
        if !self.policy.internal_retries_enabled {
            return RetryDecision::Surface(SurfaceReason::RetriesDisabled);
        }
        if attempt >= self.policy.attempt_limit() {
            return RetryDecision::Surface(SurfaceReason::AttemptsExhausted);
        }
        if let Some(limit) = self.policy.max_elapsed {
            if self.elapsed() >= limit {
                return RetryDecision::Surface(SurfaceReason::DeadlineExceeded);
            }
        }
        if joined_writes {
            return RetryDecision::Surface(SurfaceReason::JoinedWrites);
        }

        RetryDecision::Retry {
            next_attempt: attempt + 1,
            delay: self.policy.backoff.delay_for(attempt),
        }
    }

    /// Recover from an aborted attempt by replaying the flushed write set
    /// into fresh attempts until one accepts it.
    ///
    /// On success `handle` is a new Active attempt holding every flushed
    /// write; staged writes are left for the caller to flush.
    pub(crate) fn recover(
        &mut self,
        handle: &mut TransactionHandle,
        batch: &MutationBatch,
        registry: &SharedTransactionRegistry,
        failure: TxnError,
    ) -> std::result::Result<(), Surfaced> {
        let mut failure = failure;

        loop {
            let joined_writes = registry
                .lookup(handle.txn())
                .is_some_and(|entry| entry.handle_ref == handle.handle_ref() && entry.joined_writes);

            let (next_attempt, delay) = match self.decide(&failure, handle.attempt(), joined_writes) {
                RetryDecision::Retry { next_attempt, delay } => (next_attempt, delay),
                RetryDecision::Surface(reason) => {
                    warn!("Transaction {} surfaces failure ({:?}): {}", handle.txn(), reason, failure);
                    return Err(Surfaced { error: failure, reason });
                }
            };

            warn!(
                "Transaction {} attempt {} aborted, retrying as attempt {} in {:?}: {}",
                handle.txn(), handle.attempt(), next_attempt, delay, failure
            );

            if let Err(error) = self.replace_attempt(handle, registry, next_attempt, delay) {
                return Err(Surfaced { error, reason: SurfaceReason::NotAborted });
            }

            match self.replay(handle, batch) {
                Ok(()) => return Ok(()),
                Err(ReplayError::Failed(error)) if error.is_aborted() => failure = error,
                Err(ReplayError::Failed(error)) => {
                    return Err(Surfaced { error, reason: SurfaceReason::NotAborted });
                }
                Err(ReplayError::Diverged(position)) => {
                    let error = TxnError::Aborted {
                        txn: handle.txn(),
                        attempt: handle.attempt(),
                        reason: format!("read at log position {} returned different rows on replay", position),
                    };
                    warn!("{}", error);
                    return Err(Surfaced { error, reason: SurfaceReason::ReplayDiverged });
                }
            }
        }
    }

    /// Start the next attempt with nothing replayed, for body re-execution
    pub(crate) fn restart(&mut self, handle: &mut TransactionHandle, registry: &SharedTransactionRegistry) -> Result<()> {
        let attempt = handle.attempt();
        let delay = self.policy.backoff.delay_for(attempt);
        self.replace_attempt(handle, registry, attempt + 1, delay)
    }

    /// Release the old attempt, wait, then begin and publish the next one
    fn replace_attempt(
        &mut self,
        handle: &mut TransactionHandle,
        registry: &SharedTransactionRegistry,
        next_attempt: AttemptId,
        delay: Duration,
    ) -> Result<()> {
        if let Err(e) = handle.rollback() {
            debug!("Releasing transaction {} attempt {} failed: {}", handle.txn(), handle.attempt(), e);
        }

        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let fresh = TransactionHandle::begin(handle.transport(), handle.txn(), next_attempt)?;
        *handle = fresh;
        registry.register(handle.txn(), handle.handle_ref(), next_attempt);
        self.retries += 1;
        Ok(())
    }

    fn replay(&self, handle: &mut TransactionHandle, batch: &MutationBatch) -> std::result::Result<(), ReplayError> {
        let writes: Vec<Statement> = batch.flushed_writes().cloned().collect();
        let mut sent = 0;

        if self.policy.replay_mode == ReplayMode::Verified {
            for (position, entry) in batch.replay_entries() {
                if entry.statement.is_write() {
                    continue;
                }

                let visible = entry.writes_visible.min(writes.len());
                if visible > sent {
                    handle.execute_batch(&writes[sent..visible]).map_err(ReplayError::Failed)?;
                    sent = visible;
                }

                let rows = handle.execute(&entry.statement).map_err(ReplayError::Failed)?.into_rows();
                if result_checksum(&rows) != entry.checksum {
                    return Err(ReplayError::Diverged(position));
                }
            }
        }

        if sent < writes.len() {
            handle.execute_batch(&writes[sent..]).map_err(ReplayError::Failed)?;
        }

        debug!(
            "Replayed {} writes into transaction {} attempt {}",
            writes.len(), handle.txn(), handle.attempt()
        );
        Ok(())
    }
}
