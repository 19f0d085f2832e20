#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use anyhow::Result;
use txscope::{ErrorKind, Statement};
use txscope::transaction::{BackoffPolicy, ReplayMode, RetryCoordinator, RetryDecision, RetryPolicy, ScopeState, SurfaceReason};

use common::*;

#[test]
fn test_abort_retried_transparently() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy());

    let mut scope = manager.begin()?;
    let id = scope.id();
    scope.stage(insert_parent(1, "P"))?;
    scope.save_changes()?;
    scope.stage(insert_child(10, 1))?;

    store.abort_next_commits(3);
    scope.commit()?;

    // Same logical transaction, fourth attempt
    assert_eq!(scope.id(), id);
    assert_eq!(scope.attempt(), 4);
    assert_eq!(scope.retries(), 3);
    assert_eq!(store.stats().aborts, 3);
    assert_eq!(store.stats().commits, 1);
    Ok(())
}

#[test]
fn test_replay_applies_each_write_once() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy());
    seed_counter(&manager, 0)?;

    let mut scope = manager.begin()?;
    scope.stage(Statement::write("UPDATE counter").bind("id", 1).bind("value", 1))?;
    scope.save_changes()?;
    scope.stage(insert_parent(1, "P"))?;
    scope.save_changes()?;

    store.abort_next_commits(2);
    scope.commit()?;

    // Same committed state as one uncontended attempt
    assert_eq!(store.committed_rows("parent").len(), 1);
    assert_eq!(counter_of(&store.committed_rows("counter")), 1);
    Ok(())
}

#[test]
fn test_disabled_retries_surface_abort() -> Result<()> {
    let (store, manager) = create_test_manager(RetryPolicy::disabled());

    let mut scope = manager.begin()?;
    scope.stage(insert_parent(1, "P"))?;
    store.abort_next_commits(1);

    let err = scope.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert_eq!(err.attempt(), Some(1));
    assert_eq!(scope.state(), ScopeState::Failed);
    assert!(store.committed_row("parent", 1).is_none());
    assert_eq!(store.active_transactions(), 0);
    Ok(())
}

#[test]
fn test_exhausted_attempts_surface_last_abort() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy().with_max_attempts(3));

    let mut scope = manager.begin()?;
    scope.stage(insert_parent(1, "P"))?;
    store.abort_next_commits(10);

    let err = scope.commit().unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(err.attempt(), Some(3));
    assert!(err.to_string().contains("injected commit abort"));
    assert_eq!(store.stats().aborts, 3);
    Ok(())
}

#[test]
fn test_non_abort_failures_not_retried() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy());

    let mut scope = manager.begin()?;
    scope.stage(insert_parent(1, "P"))?;
    store.set_disconnected(true);

    let err = scope.save_changes().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(scope.attempt(), 1);
    assert_eq!(scope.retries(), 0);

    store.set_disconnected(false);
    scope.stage(insert_parent(2, "Q"))?;
    scope.commit()?;
    assert!(store.committed_row("parent", 1).is_none());
    assert!(store.committed_row("parent", 2).is_some());
    Ok(())
}

#[test]
fn test_abort_during_replay_moves_to_next_attempt() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy());

    let mut scope = manager.begin()?;
    scope.stage(insert_parent(1, "P"))?;
    scope.save_changes()?;
    scope.stage(insert_parent(2, "Q"))?;

    // The pending flush aborts, then the replay on attempt 2 aborts too
    store.abort_next_batches(2);
    scope.save_changes()?;
    assert_eq!(scope.attempt(), 3);

    scope.commit()?;
    assert_eq!(store.committed_rows("parent").len(), 2);
    assert_eq!(store.stats().aborts, 2);
    assert_eq!(store.active_transactions(), 0);
    Ok(())
}

#[test]
fn test_failed_begin_of_next_attempt_surfaces() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy());

    let mut scope = manager.begin()?;
    scope.stage(insert_parent(1, "P"))?;
    store.abort_next_commits(1);
    store.refuse_next_begins(1);

    let err = scope.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("injected begin refusal"));
    assert_eq!(scope.state(), ScopeState::Failed);
    assert_eq!(scope.attempt(), 1);
    assert!(store.committed_row("parent", 1).is_none());
    assert_eq!(store.active_transactions(), 0);
    Ok(())
}

#[test]
fn test_elapsed_limit_surfaces_abort() -> Result<()> {
    let backoff = BackoffPolicy {
        base_delay: Duration::from_millis(300),
        multiplier: 1.0,
        max_delay: Duration::from_millis(300),
        jitter: 0.0,
    };
    let policy = RetryPolicy::new()
        .with_backoff(backoff)
        .with_max_elapsed(Duration::from_millis(200));
    let (store, manager) = create_test_manager(policy);

    let mut scope = manager.begin()?;
    scope.stage(insert_parent(1, "P"))?;
    store.abort_next_commits(5);

    // The first abort is retried; the wait before attempt 2 uses up the budget
    let err = scope.commit().unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(err.attempt(), Some(2));
    assert_eq!(scope.state(), ScopeState::Failed);
    assert_eq!(store.stats().aborts, 2);
    assert!(store.committed_row("parent", 1).is_none());
    Ok(())
}

#[test]
fn test_zero_elapsed_limit_surfaces_first_abort() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy().with_max_elapsed(Duration::ZERO));

    let mut scope = manager.begin()?;
    scope.stage(insert_parent(1, "P"))?;
    store.abort_next_commits(1);

    let err = scope.commit().unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(err.attempt(), Some(1));
    assert_eq!(scope.state(), ScopeState::Failed);
    assert_eq!(store.stats().aborts, 1);
    Ok(())
}

#[test]
fn test_write_conflict_replayed_on_fresh_snapshot() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy());
    seed_counter(&manager, 5)?;

    let mut slow = manager.begin()?;
    let seen = counter_of(&slow.query(Statement::read("SELECT FROM counter").bind("id", 1))?);

    manager.run(|scope| scope.stage(Statement::write("UPDATE counter").bind("id", 1).bind("value", 100)))?;

    // The write set is replayed as logged, computed from the stale read
    slow.stage(Statement::write("UPDATE counter").bind("id", 1).bind("value", seen + 1))?;
    slow.commit()?;
    assert_eq!(slow.attempt(), 2);
    assert_eq!(counter_of(&store.committed_rows("counter")), 6);
    Ok(())
}

#[test]
fn test_verified_replay_refuses_stale_reads() -> Result<()> {
    let policy = fast_policy().with_replay_mode(ReplayMode::Verified);
    let (store, manager) = create_test_manager(policy);
    seed_counter(&manager, 5)?;

    let mut slow = manager.begin()?;
    let seen = counter_of(&slow.query(Statement::read("SELECT FROM counter").bind("id", 1))?);

    manager.run(|scope| scope.stage(Statement::write("UPDATE counter").bind("id", 1).bind("value", 100)))?;

    slow.stage(Statement::write("UPDATE counter").bind("id", 1).bind("value", seen + 1))?;
    let err = slow.commit().unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(slow.state(), ScopeState::Failed);
    assert_eq!(counter_of(&store.committed_rows("counter")), 100);
    Ok(())
}

#[test]
fn test_body_reexecution_rereads() -> Result<()> {
    let policy = fast_policy().with_body_reexecution();
    let (store, manager) = create_test_manager(policy);
    seed_counter(&manager, 5)?;

    let mut interfered = false;
    let attempt = manager.run(|scope| {
        let value = counter_of(&scope.query(Statement::read("SELECT FROM counter").bind("id", 1))?);

        if !interfered {
            interfered = true;
            let mut other = manager.begin()?;
            other.stage(Statement::write("UPDATE counter").bind("id", 1).bind("value", 100))?;
            other.commit()?;
        }

        scope.stage(Statement::write("UPDATE counter").bind("id", 1).bind("value", value + 1))?;
        Ok(scope.attempt())
    })?;

    assert_eq!(attempt, 2);
    assert_eq!(counter_of(&store.committed_rows("counter")), 101);
    Ok(())
}

#[test]
fn test_decisions_are_inspectable() {
    let backoff = BackoffPolicy {
        base_delay: Duration::from_millis(4),
        multiplier: 3.0,
        max_delay: Duration::from_millis(30),
        jitter: 0.0,
    };
    let coordinator = RetryCoordinator::new(RetryPolicy::new().with_max_attempts(4).with_backoff(backoff));
    let aborted = txscope::TxnError::Aborted { txn: 9, attempt: 3, reason: "conflict".to_string() };

    assert_eq!(
        coordinator.decide(&aborted, 3, false),
        RetryDecision::Retry { next_attempt: 4, delay: Duration::from_millis(30) }
    );
    assert_eq!(coordinator.decide(&aborted, 4, false), RetryDecision::Surface(SurfaceReason::AttemptsExhausted));
    assert_eq!(coordinator.decide(&aborted, 1, true), RetryDecision::Surface(SurfaceReason::JoinedWrites));
}
