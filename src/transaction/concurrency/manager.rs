use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::common::types::LogicalTxnId;
use crate::transaction::concurrency::registry::SharedTransactionRegistry;
use crate::transaction::error::Result;
use crate::transaction::retry::RetryPolicy;
use crate::transaction::scope::{JoinedTransaction, TransactionScope};
use crate::transport::Transport;

// Logical ids are unique per process so managers can share the global registry
static NEXT_LOGICAL_ID: AtomicU64 = AtomicU64::new(1);

/// Transaction manager - creates scopes and lets other contexts join them
pub struct TransactionManager {
    /// Backing store connection
    transport: Arc<dyn Transport>,

    /// Registry of joinable transactions
    registry: Arc<SharedTransactionRegistry>,

    /// Policy given to new scopes
    policy: RetryPolicy,
}

impl TransactionManager {
    /// Create a transaction manager using the global registry
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self::with_registry(transport, SharedTransactionRegistry::global(), policy)
    }

    /// Create a transaction manager with its own registry
    pub fn with_registry(
        transport: Arc<dyn Transport>,
        registry: Arc<SharedTransactionRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            registry,
            policy,
        }
    }

    /// Begin a new logical transaction
    pub fn begin(&self) -> Result<TransactionScope> {
        self.begin_with_policy(self.policy.clone())
    }

    /// Begin a new logical transaction with a specific retry policy
    pub fn begin_with_policy(&self, policy: RetryPolicy) -> Result<TransactionScope> {
        let id = NEXT_LOGICAL_ID.fetch_add(1, Ordering::SeqCst);
        TransactionScope::begin(id, self.transport.clone(), self.registry.clone(), policy)
    }

    /// Attach to an open transaction owned by another scope
    pub fn join(&self, txn: LogicalTxnId) -> Option<JoinedTransaction> {
        if !self.registry.contains(txn) {
            return None;
        }
        debug!("Joining transaction {}", txn);
        Some(JoinedTransaction::new(txn, self.registry.clone(), self.transport.clone()))
    }

    /// Run `body` in a new transaction and commit it.
    ///
    /// With body re-execution enabled, an aborted attempt restarts the scope
    /// and runs `body` again; otherwise aborts are recovered by replaying the
    /// write set and `body` runs once. The scope rolls back if `body` fails.
    pub fn run<T, F>(&self, mut body: F) -> Result<T>
    where
        F: FnMut(&mut TransactionScope) -> Result<T>,
    {
        let mut scope = self.begin()?;

        loop {
            let result = body(&mut scope);
            let result = match result {
                Ok(value) => scope.commit().map(|()| value),
                Err(err) => Err(err),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_aborted() && scope.policy().reexecute_body => scope.restart(err)?,
                Err(err) => return Err(err),
            }
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<SharedTransactionRegistry> {
        &self.registry
    }

    /// Check if a transaction is open and joinable
    pub fn transaction_exists(&self, txn: LogicalTxnId) -> bool {
        self.registry.contains(txn)
    }

    /// Get all open transaction ids
    pub fn active_transaction_ids(&self) -> Vec<LogicalTxnId> {
        self.registry.active_ids()
    }
}
