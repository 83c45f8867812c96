//! What a transaction sees: its own staged writes, and other commits

use crate::common::*;

#[test]
fn staged_writes_are_private_until_commit() {
    let env = TestEnv::new();
    let writer = env.connect(IsolationLevel::Snapshot);
    // Untracked, so re-reading after the commit is no phantom
    let reader = env.connect(IsolationLevel::ReadSnapshot);

    writer.begin().unwrap();
    writer.add_statement(knows("x:alice", "x:bob")).unwrap();
    assert_eq!(everything(&writer), vec![knows("x:alice", "x:bob")]);

    reader.begin().unwrap();
    assert!(everything(&reader).is_empty());

    writer.commit().unwrap();
    assert_eq!(everything(&reader), vec![knows("x:alice", "x:bob")]);
    reader.commit().unwrap();
}

#[test]
fn removed_statements_disappear_from_own_view() {
    let env = TestEnv::new();
    env.commit_statements(&[knows("x:alice", "x:bob"), knows("x:alice", "x:carol")]);
    let conn = env.connect(IsolationLevel::Snapshot);

    conn.begin().unwrap();
    conn.remove_statement(&knows("x:alice", "x:bob")).unwrap();
    assert_eq!(everything(&conn), vec![knows("x:alice", "x:carol")]);
    assert!(!conn
        .has_statement(&StatementPattern::exact(&knows("x:alice", "x:bob")), false)
        .unwrap());
    assert_eq!(conn.size(&[]).unwrap(), 1);

    // Still committed for everyone else
    assert!(env.store.contains(&knows("x:alice", "x:bob")));
    conn.commit().unwrap();
    assert!(!env.store.contains(&knows("x:alice", "x:bob")));
}

#[test]
fn query_joins_staged_and_committed_statements() {
    let env = TestEnv::new();
    env.commit_statements(&[knows("x:alice", "x:bob")]);
    let conn = env.connect(IsolationLevel::Serializable);

    conn.begin().unwrap();
    conn.add_statement(knows("x:bob", "x:carol")).unwrap();
    conn.remove_statement(&knows("x:alice", "x:bob")).unwrap();
    conn.add_statement(knows("x:dave", "x:bob")).unwrap();

    let query = QueryExpr::new(vec![
        TriplePattern::new(PatternTerm::var("a"), Term::iri("foaf:knows"), PatternTerm::var("b")),
        TriplePattern::new(PatternTerm::var("b"), Term::iri("foaf:knows"), PatternTerm::var("c")),
    ]);
    let solutions = conn
        .evaluate(&query, &Dataset::all(), &BindingSet::new(), false)
        .unwrap();
    assert_eq!(solutions.len(), 1);
    assert_eq!(solutions[0].get("a"), Some(&Term::iri("x:dave")));
    assert_eq!(solutions[0].get("c"), Some(&Term::iri("x:carol")));
    conn.rollback().unwrap();
}

#[test]
fn initial_bindings_restrict_the_query() {
    let env = TestEnv::new();
    env.commit_statements(&[knows("x:alice", "x:bob"), knows("x:carol", "x:bob")]);
    let conn = env.connect(IsolationLevel::Snapshot);

    conn.begin().unwrap();
    let query = QueryExpr::new(vec![TriplePattern::new(
        PatternTerm::var("who"),
        Term::iri("foaf:knows"),
        Term::iri("x:bob"),
    )]);
    let bindings = BindingSet::new().with("who", Term::iri("x:carol"));
    let solutions = conn
        .evaluate(&query, &Dataset::all(), &bindings, false)
        .unwrap();
    assert_eq!(solutions, vec![bindings]);
    conn.commit().unwrap();
}

#[test]
fn reads_outside_transaction_see_committed_state() {
    let env = TestEnv::new();
    let conn = env.connect(IsolationLevel::Snapshot);
    assert!(everything(&conn).is_empty());

    env.commit_statements(&[name("x:alice", "Alice")]);
    assert_eq!(everything(&conn), vec![name("x:alice", "Alice")]);
    assert_eq!(conn.inconsistency_count(), 0);
}
