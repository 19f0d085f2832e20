/// Logical transaction ID type, stable across retried attempts
pub type LogicalTxnId = u64;

/// Attempt number within one logical transaction (starts at 1)
pub type AttemptId = u32;

/// Server-side transaction handle issued by a transport
pub type HandleRef = u64;

/// Commit timestamp assigned by a backing store
pub type Version = u64;

/// First attempt number of every logical transaction
pub const FIRST_ATTEMPT: AttemptId = 1;
