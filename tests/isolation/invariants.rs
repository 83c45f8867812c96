//! Property tests: the transaction view behaves like a plain set

use std::collections::BTreeSet;

use proptest::prelude::*;
use trellis::{OperationKind, UpdateContext};

use crate::common::*;

const SUBJECTS: [&str; 3] = ["x:alice", "x:bob", "x:carol"];
const OBJECTS: [&str; 2] = ["x:dave", "x:erin"];

#[derive(Debug, Clone)]
enum Write {
    Add { statement: usize, bound: bool },
    Remove { statement: usize, bound: bool },
    RemoveSubject(usize),
}

fn universe() -> Vec<Statement> {
    SUBJECTS
        .iter()
        .flat_map(|s| OBJECTS.iter().map(move |o| knows(s, o)))
        .collect()
}

fn write_strategy() -> impl Strategy<Value = Write> {
    let n = SUBJECTS.len() * OBJECTS.len();
    prop_oneof![
        3 => (0..n, any::<bool>()).prop_map(|(statement, bound)| Write::Add { statement, bound }),
        3 => (0..n, any::<bool>()).prop_map(|(statement, bound)| Write::Remove { statement, bound }),
        1 => (0..SUBJECTS.len()).prop_map(Write::RemoveSubject),
    ]
}

fn kind(bound: bool) -> OperationKind {
    if bound {
        OperationKind::Bound(UpdateContext::new("INSERT DATA {}"))
    } else {
        OperationKind::Explicit
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn view_and_commit_match_set_semantics(
        seeded in proptest::collection::vec(any::<bool>(), 6),
        writes in proptest::collection::vec(write_strategy(), 0..24),
    ) {
        let env = TestEnv::new();
        let all = universe();
        let mut expected = BTreeSet::new();
        for (statement, present) in all.iter().zip(&seeded) {
            if *present {
                env.store.insert(statement.clone());
                expected.insert(statement.clone());
            }
        }

        let conn = env.connect(IsolationLevel::Snapshot);
        conn.begin().unwrap();
        for write in &writes {
            match write {
                Write::Add { statement, bound } => {
                    let st = all[*statement].clone();
                    conn.add_in(&kind(*bound), st.subject.clone(), st.predicate.clone(), st.object.clone(), &[])
                        .unwrap();
                    expected.insert(st);
                }
                Write::Remove { statement, bound } => {
                    let st = &all[*statement];
                    let removed = conn.remove_in(&kind(*bound), &StatementPattern::exact(st)).unwrap();
                    prop_assert_eq!(removed, usize::from(expected.remove(st)));
                }
                Write::RemoveSubject(subject) => {
                    let removed = conn.remove(Some(Term::iri(SUBJECTS[*subject])), None, None, &[]).unwrap();
                    let before = expected.len();
                    expected.retain(|st| st.subject != Term::iri(SUBJECTS[*subject]));
                    prop_assert_eq!(removed, before - expected.len());
                }
            }
            let view: BTreeSet<_> = everything(&conn).into_iter().collect();
            prop_assert_eq!(&view, &expected);
        }

        conn.commit().unwrap();
        let committed: BTreeSet<_> = env.store.statements(&StatementPattern::any()).into_iter().collect();
        prop_assert_eq!(committed, expected);
    }

    #[test]
    fn rollback_leaves_store_untouched(
        writes in proptest::collection::vec(write_strategy(), 1..16),
    ) {
        let env = TestEnv::new();
        let all = universe();
        env.store.insert(all[0].clone());
        let version = env.store.version();

        let conn = env.connect(IsolationLevel::Serializable);
        conn.begin().unwrap();
        for write in &writes {
            match write {
                Write::Add { statement, .. } => conn.add_statement(all[*statement].clone()).unwrap(),
                Write::Remove { statement, .. } => {
                    conn.remove_statement(&all[*statement]).unwrap();
                }
                Write::RemoveSubject(subject) => {
                    conn.remove(Some(Term::iri(SUBJECTS[*subject])), None, None, &[]).unwrap();
                }
            }
        }
        conn.rollback().unwrap();

        prop_assert_eq!(env.store.statements(&StatementPattern::any()), vec![all[0].clone()]);
        prop_assert_eq!(env.store.version(), version);
        prop_assert!(!conn.is_active());
    }
}
