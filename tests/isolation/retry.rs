//! Retrying conflicting transactions

use std::sync::Arc;
use std::thread;

use trellis::{Literal, RetryConfig, TxnResult};

use crate::common::*;

const THREADS: usize = 4;
const INCREMENTS: usize = 10;

fn counter(value: u64) -> Statement {
    Statement::new(
        Term::iri("x:counter"),
        Term::iri("x:value"),
        Term::typed_literal(value.to_string(), "xsd:integer"),
    )
}

fn read_counter(txn: &Conn) -> TxnResult<u64> {
    let current = txn.get_statements(&about("x:counter"), false)?;
    match current.as_slice() {
        [Statement {
            object: Term::Literal(Literal { lexical, .. }),
            ..
        }] => lexical
            .parse()
            .map_err(|e| TxnError::InvalidStatement(format!("counter value {lexical}: {e}"))),
        other => Err(TxnError::InvalidStatement(format!("expected one counter, found {}", other.len()))),
    }
}

fn increment(txn: &Conn) -> TxnResult<u64> {
    let value = read_counter(txn)?;
    txn.remove_statement(&counter(value))?;
    txn.add_statement(counter(value + 1))?;
    Ok(value + 1)
}

#[test]
fn concurrent_increments_are_not_lost() {
    let env = Arc::new(TestEnv::new());
    env.store.insert(counter(0));
    let retry = RetryConfig::new()
        .with_max_retries(10_000)
        .with_base_delay_ms(1)
        .with_max_delay_ms(5);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let env = env.clone();
            let retry = retry.clone();
            thread::spawn(move || {
                let conn = env.connect(IsolationLevel::Serializable);
                for _ in 0..INCREMENTS {
                    conn.transaction_with_retry(&retry, increment).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let values = env.store.statements(&about("x:counter"));
    assert_eq!(values, vec![counter((THREADS * INCREMENTS) as u64)]);
    assert_eq!(env.coordinator.metrics().total_committed, (THREADS * INCREMENTS) as u64);
}

#[test]
fn retries_exhausted_returns_last_conflict() {
    let env = TestEnv::new();
    env.store.insert(counter(0));
    let conn = env.connect(IsolationLevel::Serializable);
    let attempts = std::sync::atomic::AtomicUsize::new(0);

    let result = conn.transaction_with_retry(&RetryConfig::new().with_max_retries(2).with_base_delay_ms(0), |txn| {
        let attempt = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let value = increment(txn)?;
        txn.get_statements(&about("x:bump"), false)?;
        // Someone else always gets there first
        env.commit_statements(&[name("x:bump", &attempt.to_string())]);
        Ok(value)
    });

    assert!(result.unwrap_err().is_conflict());
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(env.store.statements(&about("x:counter")), vec![counter(0)]);
    assert_eq!(env.store.statements(&about("x:bump")).len(), 3);
}

#[test]
fn non_conflict_errors_are_not_retried() {
    let env = TestEnv::new();
    let conn = env.connect(IsolationLevel::Serializable);
    let attempts = std::sync::atomic::AtomicUsize::new(0);

    let result: TxnResult<()> = conn.transaction_with_retry(&RetryConfig::new(), |txn| {
        attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        txn.add(Term::literal("bad"), Term::iri("x:p"), Term::iri("x:o"), &[])
    });

    assert!(matches!(result, Err(TxnError::InvalidStatement(_))));
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
}
