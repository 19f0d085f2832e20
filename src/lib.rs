// txscope: client-side transaction scopes with transparent retry of aborted attempts

pub mod common;
pub mod statement;
pub mod transport;
pub mod transaction;

// Re-export key items for convenient access
pub use statement::{DataValue, MutationBatch, Statement, StatementKind, StatementLog};
pub use transport::{BatchOutcome, QueryOutput, Row, Transport, TransportError};
pub use transport::memory::{MemoryStore, StoreStats, TableSchema};
pub use transaction::{
    ErrorKind, JoinedTransaction, RetryPolicy, ScopeState, SharedTransactionRegistry,
    TransactionManager, TransactionScope, TxnError,
};
