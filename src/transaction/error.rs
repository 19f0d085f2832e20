use thiserror::Error;

use crate::common::types::{AttemptId, LogicalTxnId};
use crate::transport::TransportError;

/// Failure classes surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Contention; recoverable with a fresh attempt
    Aborted,
    /// The store rejected a write; nothing in the batch was applied
    ConstraintFailure,
    /// The caller broke the transaction protocol
    Usage,
    /// Connectivity or session failure
    Transport,
}

/// Errors that can occur while running a logical transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    #[error("Transaction {txn} aborted on attempt {attempt}: {reason}")]
    Aborted {
        txn: LogicalTxnId,
        attempt: AttemptId,
        reason: String,
    },

    #[error("Constraint violation: {0}")]
    ConstraintFailure(String),

    #[error("Invalid usage: {0}")]
    Usage(String),

    #[error("Transport error: {0}")]
    Transport(TransportError),
}

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, TxnError>;

impl TxnError {
    /// Classify a transport failure observed by a given attempt
    pub fn from_transport(err: TransportError, txn: LogicalTxnId, attempt: AttemptId) -> Self {
        match err {
            TransportError::Aborted(reason) => TxnError::Aborted { txn, attempt, reason },
            TransportError::Constraint(msg) => TxnError::ConstraintFailure(msg),
            other => TxnError::Transport(other),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TxnError::Aborted { .. } => ErrorKind::Aborted,
            TxnError::ConstraintFailure(_) => ErrorKind::ConstraintFailure,
            TxnError::Usage(_) => ErrorKind::Usage,
            TxnError::Transport(_) => ErrorKind::Transport,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.kind() == ErrorKind::Aborted
    }

    /// Attempt that observed the abort, if this is an abort
    pub fn attempt(&self) -> Option<AttemptId> {
        match self {
            TxnError::Aborted { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }
}
