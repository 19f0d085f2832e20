#![allow(dead_code)]

use std::sync::Arc;
use anyhow::Result;
use txscope::transaction::{BackoffPolicy, RetryPolicy, SharedTransactionRegistry, TransactionManager};
use txscope::{DataValue, MemoryStore, Row, Statement, TableSchema};

// Create a store with parent/child tables and a counter table
pub fn create_test_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.create_table(TableSchema::new("parent"));
    store.create_table(TableSchema::new("child").with_reference("parent_id", "parent"));
    store.create_table(TableSchema::new("counter"));
    store
}

// Retry policy without backoff delays
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new().with_backoff(BackoffPolicy::none())
}

// Create a manager with its own registry so tests do not see each other
pub fn create_test_manager(policy: RetryPolicy) -> (Arc<MemoryStore>, TransactionManager) {
    let store = create_test_store();
    let manager = TransactionManager::with_registry(
        store.clone(),
        Arc::new(SharedTransactionRegistry::new()),
        policy,
    );
    (store, manager)
}

pub fn insert_parent(id: i64, name: &str) -> Statement {
    Statement::write("INSERT INTO parent").bind("id", id).bind("name", name)
}

pub fn insert_child(id: i64, parent_id: i64) -> Statement {
    Statement::write("INSERT INTO child").bind("id", id).bind("parent_id", parent_id)
}

pub fn select_parent(id: i64) -> Statement {
    Statement::read("SELECT FROM parent").bind("id", id)
}

// Look a parent up from a brand-new transaction
pub fn find_parent(manager: &TransactionManager, id: i64) -> Result<Option<Row>> {
    let rows = manager.run(|scope| scope.query(select_parent(id)))?;
    Ok(rows.into_iter().next())
}

// Seed the counter row with a value
pub fn seed_counter(manager: &TransactionManager, value: i64) -> Result<()> {
    manager.run(|scope| {
        scope.stage(Statement::write("UPSERT INTO counter").bind("id", 1).bind("value", value))
    })?;
    Ok(())
}

pub fn counter_of(rows: &[Row]) -> i64 {
    rows.first()
        .and_then(|row| row.get("value"))
        .and_then(DataValue::as_integer)
        .unwrap_or(0)
}
