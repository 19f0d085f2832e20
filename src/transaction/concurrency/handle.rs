// One attempt of a server-side transaction

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::common::types::{AttemptId, HandleRef, LogicalTxnId};
use crate::statement::Statement;
use crate::transaction::error::{Result, TxnError};
use crate::transport::{BatchOutcome, QueryOutput, Transport};

/// Handle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Active,
    Committed,
    RolledBack,
    Aborted,
}

impl HandleState {
    pub fn is_terminal(self) -> bool {
        self != HandleState::Active
    }
}

/// TransactionHandle - wraps one attempt of a server-side transaction
pub struct TransactionHandle {
    /// Logical transaction this attempt belongs to
    txn: LogicalTxnId,

    /// Attempt number, starting at 1
    attempt: AttemptId,

    /// Server-side handle
    handle_ref: HandleRef,

    /// Current state
    state: HandleState,

    /// Transport the attempt runs on
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("txn", &self.txn)
            .field("attempt", &self.attempt)
            .field("handle_ref", &self.handle_ref)
            .field("state", &self.state)
            .finish()
    }
}

impl TransactionHandle {
    /// Begin a new attempt against the transport
    pub fn begin(transport: Arc<dyn Transport>, txn: LogicalTxnId, attempt: AttemptId) -> Result<Self> {
        let handle_ref = transport
            .begin_transaction()
            .map_err(|e| TxnError::from_transport(e, txn, attempt))?;

        debug!("Transaction {} attempt {} began as server handle {}", txn, attempt, handle_ref);

        Ok(Self {
            txn,
            attempt,
            handle_ref,
            state: HandleState::Active,
            transport,
        })
    }

    /// Execute one statement in this attempt
    pub fn execute(&mut self, statement: &Statement) -> Result<QueryOutput> {
        self.ensure_active()?;
        let result = self.transport.execute(self.handle_ref, statement);
        self.classify(result)
    }

    /// Execute statements as one atomic batch in this attempt
    pub fn execute_batch(&mut self, statements: &[Statement]) -> Result<BatchOutcome> {
        self.ensure_active()?;
        let result = self.transport.execute_batch(self.handle_ref, statements);
        self.classify(result)
    }

    /// Commit the attempt
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        let result = self.transport.commit(self.handle_ref);
        self.classify(result)?;
        self.state = HandleState::Committed;
        Ok(())
    }

    /// Roll back the attempt. Idempotent once the handle is terminal.
    ///
    /// An aborted attempt stays Aborted; the server is still told to release it.
    pub fn rollback(&mut self) -> Result<()> {
        if matches!(self.state, HandleState::Committed | HandleState::RolledBack) {
            return Ok(());
        }

        // Active until the store confirms the release
        self.transport
            .rollback(self.handle_ref)
            .map_err(|e| TxnError::from_transport(e, self.txn, self.attempt))?;
        if self.state == HandleState::Active {
            self.state = HandleState::RolledBack;
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != HandleState::Active {
            return Err(TxnError::Usage(format!(
                "Transaction {} attempt {} is {:?}", self.txn, self.attempt, self.state
            )));
        }
        Ok(())
    }

    /// Map a transport result, moving to Aborted when the store aborted us
    fn classify<T>(&mut self, result: std::result::Result<T, crate::transport::TransportError>) -> Result<T> {
        result.map_err(|e| {
            let err = TxnError::from_transport(e, self.txn, self.attempt);
            if err.is_aborted() {
                self.state = HandleState::Aborted;
            }
            err
        })
    }

    pub fn txn(&self) -> LogicalTxnId {
        self.txn
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn handle_ref(&self) -> HandleRef {
        self.handle_ref
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == HandleState::Active
    }

    /// Transport this attempt runs on
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }
}
