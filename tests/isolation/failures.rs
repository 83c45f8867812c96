//! Storage failures and API misuse

use std::time::Duration;

use crate::common::*;

#[test]
fn commit_failure_releases_exclusive_lock() {
    let env = TestEnv::new();
    let writer = env.connect(IsolationLevel::WriteThrough);
    writer.begin().unwrap();
    writer.add_statement(knows("x:alice", "x:bob")).unwrap();
    env.store.inject_commit_failure();

    let err = writer.commit().unwrap_err();
    assert!(matches!(err, TxnError::Storage(_)));
    assert!(!err.is_conflict());
    assert!(!writer.is_active());
    assert!(env.store.is_empty());

    let next = env
        .connect(IsolationLevel::WriteThrough)
        .with_lock_timeout(Some(Duration::from_millis(50)));
    next.begin().unwrap();
    next.rollback().unwrap();
}

#[test]
fn prepare_failure_discards_flushed_writes() {
    let env = TestEnv::new();
    let conn = env.connect(IsolationLevel::Serializable);
    conn.begin().unwrap();
    conn.add_statement(knows("x:alice", "x:bob")).unwrap();
    env.store.inject_prepare_failure();

    assert!(matches!(conn.commit(), Err(TxnError::Storage(_))));
    assert!(!conn.is_active());
    assert!(env.store.is_empty());
    assert!(env.coordinator.active_participants().is_empty());

    // The gate is free again
    env.commit_statements(&[knows("x:carol", "x:dave")]);
    assert_eq!(env.store.len(), 1);
}

#[test]
fn explicit_prepare_then_commit() {
    let env = TestEnv::new();
    let conn = env.connect(IsolationLevel::Snapshot);
    conn.begin().unwrap();
    conn.add_statement(knows("x:alice", "x:bob")).unwrap();

    conn.prepare().unwrap();
    // Prepared but not yet visible; a second prepare is a no-op
    assert!(env.store.is_empty());
    conn.prepare().unwrap();
    assert!(matches!(conn.set_read_snapshot(false), Err(TxnError::IsolationLocked(_))));

    conn.commit().unwrap();
    assert!(env.store.contains(&knows("x:alice", "x:bob")));
}

#[test]
fn writes_after_prepare_are_rejected() {
    let env = TestEnv::new();
    env.commit_statements(&[knows("x:alice", "x:bob")]);
    let conn = env.connect(IsolationLevel::Snapshot);
    conn.begin().unwrap();
    conn.add_statement(knows("x:alice", "x:carol")).unwrap();
    conn.prepare().unwrap();

    assert!(matches!(conn.add_statement(knows("x:carol", "x:dave")), Err(TxnError::Prepared)));
    assert!(matches!(conn.remove_statement(&knows("x:alice", "x:bob")), Err(TxnError::Prepared)));
    assert!(matches!(conn.clear(&[]), Err(TxnError::Prepared)));
    assert!(matches!(conn.set_namespace("foaf", "http://xmlns.com/foaf/0.1/"), Err(TxnError::Prepared)));
    assert!(matches!(conn.remove_namespace("foaf"), Err(TxnError::Prepared)));
    assert!(matches!(conn.clear_namespaces(), Err(TxnError::Prepared)));
    // Still prepared and committable
    assert!(conn.is_active());

    conn.commit().unwrap();
    assert_eq!(
        env.store.statements(&StatementPattern::any()),
        vec![knows("x:alice", "x:bob"), knows("x:alice", "x:carol")]
    );
    assert!(env.store.namespaces().is_empty());
}

#[test]
fn write_through_rejects_writes_after_prepare() {
    let env = TestEnv::new();
    let conn = env.connect(IsolationLevel::WriteThrough);
    conn.begin().unwrap();
    conn.add_statement(knows("x:alice", "x:bob")).unwrap();
    conn.prepare().unwrap();

    assert!(matches!(conn.add_statement(knows("x:carol", "x:dave")), Err(TxnError::Prepared)));
    conn.commit().unwrap();
    assert_eq!(env.store.len(), 1);
}

#[test]
fn rollback_after_prepare_releases_gate() {
    let env = TestEnv::new();
    let conn = env.connect(IsolationLevel::Snapshot);
    conn.begin().unwrap();
    conn.add_statement(knows("x:alice", "x:bob")).unwrap();
    conn.prepare().unwrap();
    conn.rollback().unwrap();

    assert!(env.store.is_empty());
    env.commit_statements(&[knows("x:carol", "x:dave")]);
    assert_eq!(env.store.len(), 1);
}

#[test]
fn misuse_is_rejected_without_side_effects() {
    let env = TestEnv::new();
    let conn = env.connect(IsolationLevel::Snapshot);

    assert!(matches!(conn.add_statement(knows("x:a", "x:b")), Err(TxnError::NotActive)));
    assert!(matches!(conn.remove_statement(&knows("x:a", "x:b")), Err(TxnError::NotActive)));
    assert!(matches!(conn.clear_namespaces(), Err(TxnError::NotActive)));

    conn.begin().unwrap();
    assert!(matches!(conn.begin(), Err(TxnError::AlreadyActive)));
    assert!(matches!(
        conn.add(Term::iri("x:a"), Term::literal("knows"), Term::iri("x:b"), &[]),
        Err(TxnError::InvalidStatement(_))
    ));
    assert!(matches!(
        conn.add(Term::literal("a"), Term::iri("foaf:knows"), Term::iri("x:b"), &[]),
        Err(TxnError::InvalidStatement(_))
    ));
    assert!(matches!(
        conn.set_isolation(IsolationLevel::Serializable),
        Err(TxnError::IsolationLocked(_))
    ));

    assert!(conn.is_active());
    assert!(conn.pending().is_empty());
    assert_eq!(conn.isolation(), IsolationLevel::Snapshot);
    conn.commit().unwrap();
}

#[test]
fn blank_node_subjects_are_accepted() {
    let env = TestEnv::new();
    let conn = env.connect(IsolationLevel::Snapshot);
    conn.transaction(|txn| txn.add(Term::blank("b0"), Term::iri("foaf:knows"), Term::iri("x:bob"), &[]))
        .unwrap();
    assert_eq!(env.store.len(), 1);
}
