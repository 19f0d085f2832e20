//! Transaction scopes
//!
//! `TransactionScope` is what application code holds: it owns the current
//! attempt, the statement log and the pending batch of one logical
//! transaction. Aborted attempts are recovered through the
//! `RetryCoordinator` without the caller noticing. A scope dropped while
//! still open rolls back.
//!
//! `JoinedTransaction` is the view another context gets when it joins a
//! transaction through the shared registry. It runs statements on the
//! owner's current attempt but can never resolve the transaction.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::common::types::{AttemptId, LogicalTxnId, FIRST_ATTEMPT};
use crate::statement::{result_checksum, MutationBatch, Statement, StatementLog};
use crate::transaction::concurrency::{SharedEntry, SharedTransactionRegistry, TransactionHandle};
use crate::transaction::error::{Result, TxnError};
use crate::transaction::retry::{ReplayMode, RetryCoordinator, RetryPolicy, SurfaceReason};
use crate::transport::{BatchOutcome, Row, Transport};

/// Scope states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Open,
    Committed,
    RolledBack,
    /// A failure ended the transaction; its attempt has been released
    Failed,
}

/// Owner of one logical transaction
#[derive(Debug)]
pub struct TransactionScope {
    /// Logical id, stable across attempts
    id: LogicalTxnId,

    /// Current attempt
    handle: TransactionHandle,

    /// Pending writes and the statement log
    batch: MutationBatch,

    coordinator: RetryCoordinator,

    registry: Arc<SharedTransactionRegistry>,

    state: ScopeState,

    /// Set when the last failure asked for the body to run again
    restartable: bool,
}

impl TransactionScope {
    /// Begin attempt 1 of a logical transaction and make it joinable
    pub(crate) fn begin(
        id: LogicalTxnId,
        transport: Arc<dyn Transport>,
        registry: Arc<SharedTransactionRegistry>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let handle = TransactionHandle::begin(transport, id, FIRST_ATTEMPT)?;
        registry.register(id, handle.handle_ref(), FIRST_ATTEMPT);
        debug!("Transaction {} began", id);

        Ok(Self {
            id,
            handle,
            batch: MutationBatch::new(),
            coordinator: RetryCoordinator::new(policy),
            registry,
            state: ScopeState::Open,
            restartable: false,
        })
    }

    pub fn id(&self) -> LogicalTxnId {
        self.id
    }

    /// Current attempt number
    pub fn attempt(&self) -> AttemptId {
        self.handle.attempt()
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ScopeState::Open
    }

    /// Number of staged writes not yet flushed
    pub fn pending_writes(&self) -> usize {
        self.batch.pending_len()
    }

    pub fn log(&self) -> &StatementLog {
        self.batch.log()
    }

    /// Attempts replaced so far
    pub fn retries(&self) -> u32 {
        self.coordinator.retries()
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.coordinator.policy()
    }

    /// Run a read against the current attempt.
    ///
    /// Sees every write already flushed in this transaction; staged writes
    /// become visible after `save_changes`.
    pub fn query(&mut self, statement: Statement) -> Result<Vec<Row>> {
        self.ensure_open()?;
        if statement.is_write() {
            return Err(TxnError::Usage(format!("Writes must be staged, not queried: {}", statement)));
        }

        let rows = loop {
            match self.handle.execute(&statement) {
                Ok(output) => break output.into_rows(),
                Err(err) if err.is_aborted() => self.recover(err)?,
                Err(err) => return Err(err),
            }
        };

        let checksum = match self.policy().replay_mode {
            ReplayMode::Verified => result_checksum(&rows),
            ReplayMode::WriteSet => None,
        };
        self.batch.record_read(statement, checksum);
        Ok(rows)
    }

    /// Stage a write for the next flush
    pub fn stage(&mut self, statement: Statement) -> Result<()> {
        self.ensure_open()?;
        self.batch.stage(statement)
    }

    /// Flush staged writes as one atomic batch.
    ///
    /// An abort is recovered transparently. Any other failure discards the
    /// staged writes (none of them were applied) and leaves the scope open.
    pub fn save_changes(&mut self) -> Result<BatchOutcome> {
        self.ensure_open()?;

        loop {
            match self.batch.flush(&mut self.handle) {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_aborted() => self.recover(err)?,
                Err(err) => {
                    let discarded = self.batch.discard_pending();
                    warn!("Transaction {} discarded {} staged writes: {}", self.id, discarded, err);
                    return Err(err);
                }
            }
        }
    }

    /// Flush anything staged and commit.
    ///
    /// Committing again after success is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        match self.state {
            ScopeState::Committed => return Ok(()),
            ScopeState::RolledBack | ScopeState::Failed => {
                return Err(TxnError::Usage(format!(
                    "Transaction {} cannot commit, it is {:?}", self.id, self.state
                )));
            }
            ScopeState::Open => {}
        }

        self.save_changes()?;

        loop {
            match self.handle.commit() {
                Ok(()) => break,
                Err(err) if err.is_aborted() => self.recover(err)?,
                Err(err) => return Err(self.fail(err)),
            }
        }

        self.state = ScopeState::Committed;
        self.batch.clear();
        self.registry.remove(self.id);
        info!("Transaction {} committed on attempt {}", self.id, self.handle.attempt());
        Ok(())
    }

    /// Roll back. A no-op once the transaction is resolved.
    pub fn rollback(&mut self) -> Result<()> {
        if self.state != ScopeState::Open {
            return Ok(());
        }

        self.state = ScopeState::RolledBack;
        self.batch.clear();
        self.registry.remove(self.id);
        info!("Transaction {} rolled back", self.id);
        self.handle.rollback()
    }

    /// Begin a fresh attempt with an empty log so the body can run again
    pub(crate) fn restart(&mut self, failure: TxnError) -> Result<()> {
        if self.state != ScopeState::Failed || !self.restartable {
            return Err(failure);
        }
        self.restartable = false;

        self.coordinator.restart(&mut self.handle, &self.registry)?;
        self.batch.clear();
        self.state = ScopeState::Open;
        debug!("Transaction {} restarted as attempt {}", self.id, self.handle.attempt());
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state != ScopeState::Open {
            return Err(TxnError::Usage(format!("Transaction {} is {:?}", self.id, self.state)));
        }
        Ok(())
    }

    fn recover(&mut self, failure: TxnError) -> Result<()> {
        match self.coordinator.recover(&mut self.handle, &self.batch, &self.registry, failure) {
            Ok(()) => Ok(()),
            Err(surfaced) => {
                self.restartable = surfaced.reason == SurfaceReason::BodyReexecution;
                Err(self.fail(surfaced.error))
            }
        }
    }

    /// Release the attempt and end the transaction with `err`
    fn fail(&mut self, err: TxnError) -> TxnError {
        if let Err(e) = self.handle.rollback() {
            warn!("Transaction {} could not release attempt {}: {}", self.id, self.handle.attempt(), e);
        }
        self.registry.remove(self.id);
        self.state = ScopeState::Failed;
        err
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.state == ScopeState::Open {
            warn!("Transaction {} dropped without commit, rolling back", self.id);
            if let Err(e) = self.rollback() {
                error!("Implicit rollback of transaction {} failed: {}", self.id, e);
            }
        } else if self.state == ScopeState::Failed {
            self.registry.remove(self.id);
        }
    }
}

/// A context attached to another scope's transaction
#[derive(Clone)]
pub struct JoinedTransaction {
    id: LogicalTxnId,
    registry: Arc<SharedTransactionRegistry>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for JoinedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinedTransaction").field("id", &self.id).finish()
    }
}

impl JoinedTransaction {
    pub(crate) fn new(id: LogicalTxnId, registry: Arc<SharedTransactionRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self { id, registry, transport }
    }

    pub fn id(&self) -> LogicalTxnId {
        self.id
    }

    /// Attempt currently backing the transaction, if it is still open
    pub fn attempt(&self) -> Option<AttemptId> {
        self.registry.lookup(self.id).map(|entry| entry.attempt)
    }

    /// Read through the owner's current attempt, seeing its flushed writes
    pub fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        if statement.is_write() {
            return Err(TxnError::Usage(format!("Use execute for writes: {}", statement)));
        }

        let entry = self.current()?;
        self.transport
            .execute(entry.handle_ref, statement)
            .map(|output| output.into_rows())
            .map_err(|e| TxnError::from_transport(e, self.id, entry.attempt))
    }

    /// Write through the owner's current attempt, returning the affected row count.
    ///
    /// An applied write is not part of the owner's log, so an abort of this
    /// attempt can no longer be retried transparently. A failed write applied
    /// nothing and leaves retries enabled.
    pub fn execute(&self, statement: &Statement) -> Result<u64> {
        if !statement.is_write() {
            return Err(TxnError::Usage(format!("Use query for reads: {}", statement)));
        }

        let entry = self.current()?;
        let count = self
            .transport
            .execute(entry.handle_ref, statement)
            .map(|output| output.count())
            .map_err(|e| TxnError::from_transport(e, self.id, entry.attempt))?;

        // The owner may have replaced the attempt while the write ran
        if !self.registry.mark_joined_write(self.id, entry.handle_ref) {
            return Err(TxnError::Aborted {
                txn: self.id,
                attempt: entry.attempt,
                reason: "attempt was replaced during the write".to_string(),
            });
        }
        Ok(count)
    }

    /// Joined contexts never resolve the transaction
    pub fn commit(&self) -> Result<()> {
        Err(TxnError::Usage(format!("Only the owning scope can commit transaction {}", self.id)))
    }

    /// Joined contexts never resolve the transaction
    pub fn rollback(&self) -> Result<()> {
        Err(TxnError::Usage(format!("Only the owning scope can roll back transaction {}", self.id)))
    }

    fn current(&self) -> Result<SharedEntry> {
        self.registry
            .lookup(self.id)
            .ok_or_else(|| TxnError::Usage(format!("Transaction {} is no longer active", self.id)))
    }
}
