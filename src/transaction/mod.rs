// Transaction scope, attempt and retry management

pub mod error;
pub mod concurrency;
pub mod retry;
pub mod scope;

// Public exports
pub use error::{ErrorKind, Result, TxnError};
pub use concurrency::{HandleState, SharedTransactionRegistry, TransactionHandle, TransactionManager};
pub use retry::{BackoffPolicy, ReplayMode, RetryCoordinator, RetryDecision, RetryPolicy, SurfaceReason};
pub use scope::{JoinedTransaction, ScopeState, TransactionScope};
