//! Transport interface to the backing transactional store
//!
//! The core only needs to begin, execute, commit and roll back server-side
//! transactions. Anything that can do that implements `Transport`;
//! `memory::MemoryStore` is the in-process implementation.

pub mod row;
pub mod memory;

pub use self::row::Row;

use thiserror::Error;

use crate::common::types::HandleRef;
use crate::statement::Statement;

/// Errors reported by a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Unknown transaction handle {0}")]
    UnknownHandle(HandleRef),

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    #[error("Session disconnected: {0}")]
    Disconnected(String),
}

/// Result of executing a single statement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Rows returned by a read
    Rows(Vec<Row>),
    /// Number of rows affected by a write
    Count(u64),
}

impl QueryOutput {
    pub fn rows(&self) -> &[Row] {
        match self {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Count(_) => &[],
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Count(_) => Vec::new(),
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            QueryOutput::Rows(rows) => rows.len() as u64,
            QueryOutput::Count(count) => *count,
        }
    }
}

/// Result of an all-or-nothing batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows affected per statement, in batch order
    pub update_counts: Vec<u64>,
}

impl BatchOutcome {
    pub fn total(&self) -> u64 {
        self.update_counts.iter().sum()
    }
}

/// A connection to a transactional store with atomic batches
pub trait Transport: Send + Sync {
    /// Start a server-side transaction
    fn begin_transaction(&self) -> Result<HandleRef, TransportError>;

    /// Execute one statement inside a transaction
    fn execute(&self, handle: HandleRef, statement: &Statement) -> Result<QueryOutput, TransportError>;

    /// Execute statements as one unit: either all apply or none do
    fn execute_batch(&self, handle: HandleRef, statements: &[Statement]) -> Result<BatchOutcome, TransportError>;

    /// Commit a transaction
    fn commit(&self, handle: HandleRef) -> Result<(), TransportError>;

    /// Roll back a transaction. Rolling back an unknown handle is not an error.
    fn rollback(&self, handle: HandleRef) -> Result<(), TransportError>;
}
