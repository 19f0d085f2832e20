// Transaction concurrency module exports

pub mod handle;
pub mod registry;
pub mod manager;

// Public exports
pub use handle::{HandleState, TransactionHandle};
pub use registry::{SharedEntry, SharedTransactionRegistry};
pub use manager::TransactionManager;
