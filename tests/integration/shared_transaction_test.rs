#[path = "../common/mod.rs"]
mod common;

use anyhow::Result;
use txscope::{ErrorKind, Statement};

use common::*;

#[test]
fn test_joined_context_reads_owner_writes() -> Result<()> {
    let (_store, manager) = create_test_manager(fast_policy());

    let mut owner = manager.begin()?;
    owner.stage(insert_parent(1, "shared"))?;
    owner.save_changes()?;

    let joined = manager.join(owner.id()).expect("transaction should be joinable");
    assert_eq!(joined.query(&select_parent(1))?.len(), 1);

    // Unrelated transactions do not see it yet
    assert!(find_parent(&manager, 1)?.is_none());

    owner.commit()?;
    assert!(find_parent(&manager, 1)?.is_some());
    assert!(find_parent(&manager, 1)?.is_some());
    Ok(())
}

#[test]
fn test_owner_reads_joined_writes() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy());

    let mut owner = manager.begin()?;
    let joined = manager.join(owner.id()).expect("transaction should be joinable");
    assert_eq!(joined.execute(&insert_parent(5, "from joined"))?, 1);

    assert_eq!(owner.query(select_parent(5))?.len(), 1);
    assert!(store.committed_row("parent", 5).is_none());

    owner.commit()?;
    assert!(store.committed_row("parent", 5).is_some());
    Ok(())
}

#[test]
fn test_joined_context_cannot_resolve() -> Result<()> {
    let (_store, manager) = create_test_manager(fast_policy());

    let mut owner = manager.begin()?;
    let joined = manager.join(owner.id()).expect("transaction should be joinable");
    assert_eq!(joined.commit().unwrap_err().kind(), ErrorKind::Usage);
    assert_eq!(joined.rollback().unwrap_err().kind(), ErrorKind::Usage);
    assert!(owner.is_open());

    owner.rollback()?;
    assert!(manager.join(owner.id()).is_none());
    assert_eq!(joined.query(&select_parent(1)).unwrap_err().kind(), ErrorKind::Usage);
    Ok(())
}

#[test]
fn test_join_from_another_thread() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy());

    let mut owner = manager.begin()?;
    owner.stage(insert_parent(1, "P"))?;
    owner.save_changes()?;
    let id = owner.id();

    crossbeam::scope(|s| {
        let manager = &manager;
        s.spawn(move |_| {
            let joined = manager.join(id).expect("transaction should be joinable");
            let rows = joined.query(&select_parent(1)).unwrap();
            assert_eq!(rows.len(), 1);
            joined.execute(&insert_child(10, 1)).unwrap();
        });
    })
    .unwrap();

    assert_eq!(owner.query(Statement::read("SELECT FROM child").bind("parent_id", 1))?.len(), 1);
    owner.commit()?;
    assert!(store.committed_row("child", 10).is_some());
    Ok(())
}

#[test]
fn test_joined_handle_follows_retry() -> Result<()> {
    let (store, manager) = create_test_manager(fast_policy());

    let mut owner = manager.begin()?;
    let joined = manager.join(owner.id()).expect("transaction should be joinable");
    owner.stage(insert_parent(1, "P"))?;
    owner.save_changes()?;
    assert_eq!(joined.attempt(), Some(1));

    store.abort_next_batches(1);
    owner.stage(insert_parent(2, "Q"))?;
    owner.save_changes()?;

    // The joined context now runs on the replacement attempt
    assert_eq!(joined.attempt(), Some(2));
    assert_eq!(joined.query(&Statement::read("SELECT FROM parent"))?.len(), 2);

    owner.commit()?;
    assert_eq!(store.committed_rows("parent").len(), 2);
    Ok(())
}
