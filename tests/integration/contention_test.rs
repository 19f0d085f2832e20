#[path = "../common/mod.rs"]
mod common;

use anyhow::Result;
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;
use txscope::transaction::{RetryPolicy, TransactionManager};
use txscope::common::types::AttemptId;
use txscope::{Statement, TxnError};

use common::*;

const WORKERS: usize = 8;

// Every worker reads the counter, waits until all workers have read it,
// then writes counter + 1 and its own row and commits.
fn contend(manager: &TransactionManager) -> Vec<Result<AttemptId, TxnError>> {
    let results = Mutex::new(Vec::new());
    let all_read = WaitGroup::new();

    crossbeam::scope(|s| {
        for worker in 0..WORKERS {
            let results = &results;
            let mut gate = Some(all_read.clone());

            s.spawn(move |_| {
                let result = manager.run(|scope| {
                    let value = counter_of(&scope.query(Statement::read("SELECT FROM counter").bind("id", 1))?);

                    if let Some(gate) = gate.take() {
                        gate.wait();
                    }

                    scope.stage(Statement::write("UPDATE counter").bind("id", 1).bind("value", value + 1))?;
                    scope.stage(insert_parent(worker as i64, "worker"))?;
                    Ok(scope.attempt())
                });
                results.lock().push(result);
            });
        }
        drop(all_read);
    })
    .unwrap();

    results.into_inner()
}

#[test]
fn test_contention_with_retries_all_commit() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy());
    seed_counter(&manager, 0)?;

    let results = contend(&manager);
    assert_eq!(results.len(), WORKERS);
    for result in &results {
        assert!(result.is_ok(), "abort surfaced: {:?}", result);
    }

    // Every worker's own write committed exactly once
    assert_eq!(store.committed_rows("parent").len(), WORKERS);
    assert!(store.stats().aborts >= 1);
    assert_eq!(store.active_transactions(), 0);
    Ok(())
}

#[test]
fn test_contention_without_retries_surfaces_aborts() -> Result<()> {
    let (store, manager) = create_test_manager(RetryPolicy::disabled());
    seed_counter(&manager, 0)?;

    let results = contend(&manager);
    let aborted = results
        .iter()
        .filter(|result| matches!(result, Err(err) if err.is_aborted()))
        .count();
    let committed = results.iter().filter(|result| result.is_ok()).count();

    assert!(aborted >= 1);
    assert_eq!(aborted + committed, WORKERS);
    assert_eq!(store.committed_rows("parent").len(), committed);
    assert_eq!(counter_of(&store.committed_rows("counter")), committed as i64);
    Ok(())
}

#[test]
fn test_contention_with_body_reexecution_counts_exactly() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy().with_body_reexecution());
    seed_counter(&manager, 0)?;

    let results = contend(&manager);
    assert!(results.iter().all(|result| result.is_ok()));
    assert_eq!(counter_of(&store.committed_rows("counter")), WORKERS as i64);
    assert_eq!(store.committed_rows("parent").len(), WORKERS);
    Ok(())
}
