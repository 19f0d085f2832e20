use log::debug;

use crate::statement::{Statement, StatementLog, LogEntry};
use crate::transaction::concurrency::TransactionHandle;
use crate::transaction::error::{Result, TxnError};
use crate::transport::BatchOutcome;

/// Pending writes of the current attempt, flushed as one atomic unit.
///
/// The batch owns the transaction's `StatementLog`: staging a write appends it
/// to the log and remembers its position, so buffering and replay bookkeeping
/// never disagree.
#[derive(Debug, Default)]
pub struct MutationBatch {
    /// Every statement of the logical transaction
    log: StatementLog,

    /// Log positions of staged writes not yet flushed (ascending)
    pending: Vec<usize>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a write statement for the next flush
    pub fn stage(&mut self, statement: Statement) -> Result<()> {
        if !statement.is_write() {
            return Err(TxnError::Usage(format!(
                "Only write statements can be staged, got read: {}", statement
            )));
        }

        self.pending.push(self.log.len());
        self.log.append(statement);
        Ok(())
    }

    /// Record an executed read in the log.
    ///
    /// Reads do not flush, so the read saw only the writes already sent.
    pub fn record_read(&mut self, statement: Statement, checksum: Option<u32>) {
        let writes_visible = self.log.writes().count() - self.pending.len();
        self.log.append_read(statement, checksum, writes_visible);
    }

    /// Writes already sent to the backing store, in issue order
    pub fn flushed_writes(&self) -> impl Iterator<Item = &Statement> {
        self.replay_entries()
            .filter(|(_, entry)| entry.statement.is_write())
            .map(|(_, entry)| &entry.statement)
    }

    /// Send all staged writes to the backing store as one batch.
    ///
    /// On success the batch is emptied but the statements stay in the log.
    /// On failure nothing was applied and the staged writes are kept; the
    /// caller decides whether to retry the attempt or discard them.
    pub fn flush(&mut self, handle: &mut TransactionHandle) -> Result<BatchOutcome> {
        if self.pending.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let statements: Vec<Statement> = self.pending_statements().cloned().collect();
        debug!(
            "Flushing {} staged writes for transaction {} attempt {}",
            statements.len(), handle.txn(), handle.attempt()
        );

        let outcome = handle.execute_batch(&statements)?;
        self.pending.clear();
        Ok(outcome)
    }

    /// Drop the staged writes from both the batch and the log
    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.log.discard(&self.pending);
        self.pending.clear();
        discarded
    }

    /// Staged writes, in issue order
    pub fn pending_statements(&self) -> impl Iterator<Item = &Statement> {
        self.pending
            .iter()
            .filter_map(|&position| self.log.get(position))
            .map(|entry| &entry.statement)
    }

    /// Log entries already sent to the backing store, in issue order
    pub fn replay_entries(&self) -> impl Iterator<Item = (usize, &LogEntry)> {
        self.log
            .replay()
            .iter()
            .enumerate()
            .filter(|(position, _)| self.pending.binary_search(position).is_err())
    }

    pub fn log(&self) -> &StatementLog {
        &self.log
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget everything, including the log
    pub fn clear(&mut self) {
        self.log.clear();
        self.pending.clear();
    }
}
