//! Process-local registry of shareable transactions
//!
//! Maps a logical transaction id to the server handle of its current attempt
//! so that other contexts can join it. An entry is a reference only: the
//! `TransactionScope` that registered it stays the sole owner and is the only
//! party that updates or removes it.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::common::types::{AttemptId, HandleRef, LogicalTxnId};

// Global registry instance using a thread-safe lazy initialization
static REGISTRY_INSTANCE: Lazy<Arc<SharedTransactionRegistry>> =
    Lazy::new(|| Arc::new(SharedTransactionRegistry::new()));

/// Registry entry for one logical transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedEntry {
    /// Server handle of the current attempt
    pub handle_ref: HandleRef,

    /// Current attempt number
    pub attempt: AttemptId,

    /// Whether a joined context has written in the current attempt
    pub joined_writes: bool,
}

/// Logical id -> current attempt of every joinable transaction
#[derive(Debug, Default)]
pub struct SharedTransactionRegistry {
    entries: RwLock<HashMap<LogicalTxnId, SharedEntry>>,
}

impl SharedTransactionRegistry {
    /// Create a new, empty registry (primarily for testing)
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the global registry instance
    pub fn global() -> Arc<SharedTransactionRegistry> {
        REGISTRY_INSTANCE.clone()
    }

    /// Publish the current attempt of a transaction, replacing any previous one
    pub(crate) fn register(&self, txn: LogicalTxnId, handle_ref: HandleRef, attempt: AttemptId) {
        self.entries.write().insert(txn, SharedEntry {
            handle_ref,
            attempt,
            joined_writes: false,
        });
    }

    /// Look up the current attempt of a transaction
    pub fn lookup(&self, txn: LogicalTxnId) -> Option<SharedEntry> {
        self.entries.read().get(&txn).copied()
    }

    /// Note that a joined context applied a write through the given attempt.
    ///
    /// Returns false if the transaction has moved on to another attempt or
    /// is no longer registered; the write was then lost with its attempt.
    pub(crate) fn mark_joined_write(&self, txn: LogicalTxnId, handle_ref: HandleRef) -> bool {
        match self.entries.write().get_mut(&txn) {
            Some(entry) if entry.handle_ref == handle_ref => {
                entry.joined_writes = true;
                true
            }
            _ => false,
        }
    }

    /// Remove a transaction once its owner resolved it
    pub(crate) fn remove(&self, txn: LogicalTxnId) -> Option<SharedEntry> {
        self.entries.write().remove(&txn)
    }

    /// Check if a transaction is joinable
    pub fn contains(&self, txn: LogicalTxnId) -> bool {
        self.entries.read().contains_key(&txn)
    }

    /// Get all registered transaction ids
    pub fn active_ids(&self) -> Vec<LogicalTxnId> {
        self.entries.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
