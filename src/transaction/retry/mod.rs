// Retry policy and attempt coordination

pub mod policy;
pub mod coordinator;

pub use policy::{BackoffPolicy, ReplayMode, RetryPolicy};
pub use coordinator::{RetryCoordinator, RetryDecision, SurfaceReason};
