//! Staged writes: Operations, namespaces, contexts and rollback

use std::sync::Arc;

use parking_lot::Mutex;
use trellis::{ConnectionListener, Namespace, OperationKind, UpdateContext};

use crate::common::*;

#[test]
fn rollback_discards_writes_and_ledger() {
    let env = TestEnv::new();
    env.commit_statements(&[knows("x:alice", "x:bob")]);
    let conn = env.connect(IsolationLevel::Snapshot);

    conn.begin().unwrap();
    conn.get_statements(&knows_pattern(), false).unwrap();
    conn.add_statement(knows("x:alice", "x:carol")).unwrap();
    conn.remove_statement(&knows("x:alice", "x:bob")).unwrap();
    conn.set_namespace("foaf", "http://xmlns.com/foaf/0.1/").unwrap();

    env.commit_statements(&[knows("x:dave", "x:erin")]);
    assert_eq!(conn.inconsistency_count(), 1);

    conn.rollback().unwrap();
    assert!(!conn.is_active());
    assert!(conn.pending().is_empty());
    assert_eq!(conn.inconsistency_count(), 0);
    assert!(env.store.contains(&knows("x:alice", "x:bob")));
    assert!(!env.store.contains(&knows("x:alice", "x:carol")));
    assert!(env.store.namespaces().is_empty());

    // Nothing carries into the next transaction
    conn.begin().unwrap();
    assert_eq!(
        everything(&conn),
        vec![knows("x:alice", "x:bob"), knows("x:dave", "x:erin")]
    );
    conn.commit().unwrap();
}

#[test]
fn namespace_changes_apply_exactly_once() {
    let env = TestEnv::new();
    let setup = env.connect(IsolationLevel::ReadSnapshot);
    setup
        .transaction(|txn| {
            txn.set_namespace("old", "http://old/")?;
            txn.set_namespace("foaf", "http://wrong/")
        })
        .unwrap();

    let conn = env.connect(IsolationLevel::Snapshot);
    conn.begin().unwrap();
    conn.clear_namespaces().unwrap();
    conn.set_namespace("foaf", "http://xmlns.com/foaf/0.1/").unwrap();
    conn.set_namespace("ex", "http://example.org/").unwrap();
    conn.remove_namespace("ex").unwrap();

    let expected = vec![Namespace::new("foaf", "http://xmlns.com/foaf/0.1/")];
    assert_eq!(conn.namespaces().unwrap(), expected);
    assert_eq!(conn.namespace("old").unwrap(), None);
    assert_eq!(env.store.namespaces().len(), 2);

    conn.commit().unwrap();
    assert_eq!(env.store.namespaces(), expected);
}

#[test]
fn operations_flush_in_creation_order() {
    let env = TestEnv::new();
    env.commit_statements(&[knows("x:alice", "x:bob"), name("x:alice", "Al")]);
    let rename = OperationKind::Bound(UpdateContext::new(
        "DELETE { <x:alice> foaf:name ?n } INSERT { <x:alice> foaf:name \"Alice\" }",
    ));

    let conn = env.connect(IsolationLevel::Snapshot);
    conn.begin().unwrap();
    conn.remove_in(&rename, &StatementPattern::new(Some(Term::iri("x:alice")), Some(Term::iri("foaf:name")), None))
        .unwrap();
    conn.add_in(&rename, Term::iri("x:alice"), Term::iri("foaf:name"), Term::literal("Alice"), &[])
        .unwrap();
    // A later explicit write wins over the update's removal
    conn.add_statement(name("x:alice", "Al")).unwrap();

    let pending = conn.pending();
    assert_eq!(pending.operations, 2);
    assert_eq!(pending.removes, 0);

    conn.commit().unwrap();
    assert!(env.store.contains(&name("x:alice", "Al")));
    assert!(env.store.contains(&name("x:alice", "Alice")));
    assert!(env.store.contains(&knows("x:alice", "x:bob")));
}

#[test]
fn named_graphs_follow_staged_writes() {
    let env = TestEnv::new();
    let work = Term::iri("x:work");
    let home = Term::iri("x:home");
    env.commit_statements(&[knows("x:alice", "x:bob").in_context(work.clone())]);

    let conn = env.connect(IsolationLevel::Snapshot);
    conn.begin().unwrap();
    conn.add(
        Term::iri("x:alice"),
        Term::iri("foaf:knows"),
        Term::iri("x:carol"),
        &[Some(home.clone()), None],
    )
    .unwrap();

    assert_eq!(conn.context_ids().unwrap(), vec![home.clone(), work.clone()]);
    assert_eq!(conn.size(&[Some(home.clone())]).unwrap(), 1);
    assert_eq!(conn.size(&[None]).unwrap(), 1);
    assert_eq!(conn.size(&[]).unwrap(), 3);

    assert_eq!(conn.clear(&[Some(work.clone())]).unwrap(), 1);
    assert_eq!(conn.context_ids().unwrap(), vec![home.clone()]);

    conn.commit().unwrap();
    assert_eq!(env.store.len(), 2);
    assert!(env
        .store
        .statements(&StatementPattern::any().in_contexts(&[Some(work)]))
        .is_empty());
}

#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl ConnectionListener for Journal {
    fn statement_added(&self, statement: &Statement) {
        self.0.lock().push(format!("+ {}", statement.object));
    }

    fn statement_removed(&self, statement: &Statement) {
        self.0.lock().push(format!("- {}", statement.object));
    }
}

#[test]
fn listeners_observe_each_staged_write() {
    let env = TestEnv::new();
    env.commit_statements(&[knows("x:alice", "x:bob"), knows("x:alice", "x:carol")]);
    let journal = Arc::new(Journal::default());
    let conn = env.connect(IsolationLevel::Snapshot);
    conn.add_listener(journal.clone());

    conn.begin().unwrap();
    conn.add_statement(knows("x:alice", "x:dave")).unwrap();
    assert_eq!(conn.remove(Some(Term::iri("x:alice")), None, None, &[]).unwrap(), 3);
    conn.rollback().unwrap();

    assert_eq!(
        *journal.0.lock(),
        vec!["+ <x:dave>", "- <x:bob>", "- <x:carol>", "- <x:dave>"]
    );
}
