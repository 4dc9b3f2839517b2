//! Property-based invariants over arbitrary operation sequences.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use engram_e2e::EngineHarness;
use engram_core::{ArtifactStatus, MemoryError, SearchMode};

/// A generated operation against the engine
#[derive(Debug, Clone)]
enum Op {
    Record { target: usize, namespace: usize },
    Supersede { target: usize, namespace: usize },
}

const NAMESPACES: [&str; 2] = ["default", "ns2"];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize, 0..NAMESPACES.len())
            .prop_map(|(target, namespace)| Op::Record { target, namespace }),
        (0..4usize, 0..NAMESPACES.len())
            .prop_map(|(target, namespace)| Op::Supersede { target, namespace }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        .. ProptestConfig::default()
    })]

    #[test]
    fn single_active_holds_under_any_sequence(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let harness = EngineHarness::plain();
        let engine = &harness.engine;
        let mut version = 0usize;

        for op in ops {
            version += 1;
            match op {
                Op::Record { target, namespace } => {
                    // Either succeeds or conflicts; both are legal
                    match engine.record_decision(engram_core::RecordDecisionInput {
                        title: format!("v{}", version),
                        target: format!("target-{}", target),
                        namespace: Some(NAMESPACES[namespace].to_string()),
                        rationale: "generated rationale long enough".into(),
                        source: engram_core::Source::User,
                        ..Default::default()
                    }) {
                        Ok(_) => {}
                        Err(MemoryError::Conflict(_)) => {}
                        Err(other) => prop_assert!(false, "unexpected error: {}", other),
                    }
                }
                Op::Supersede { target, namespace } => {
                    let target_name = format!("target-{}", target);
                    let namespace_name = NAMESPACES[namespace];
                    let Some(active) = engine
                        .meta_store()
                        .get_active_fid(&target_name, namespace_name)
                        .unwrap()
                    else {
                        continue;
                    };
                    engine
                        .supersede_decision(engram_core::SupersedeInput {
                            title: format!("v{}", version),
                            target: target_name,
                            namespace: Some(namespace_name.to_string()),
                            rationale: "generated supersession rationale".into(),
                            source: engram_core::Source::User,
                            old_fids: vec![active],
                            ..Default::default()
                        })
                        .unwrap();
                }
            }
        }

        // Invariant: at most one active decision per (target, namespace)
        let mut active_counts: HashMap<(String, String), usize> = HashMap::new();
        for row in engine.list_artifacts().unwrap() {
            if row.status == ArtifactStatus::Active {
                *active_counts
                    .entry((row.target.clone(), row.namespace.clone()))
                    .or_default() += 1;
            }
        }
        for ((target, namespace), count) in active_counts {
            prop_assert!(
                count <= 1,
                "{} actives for ({}, {})",
                count,
                target,
                namespace
            );
        }

        // Invariant: the supersession graph is acyclic
        let rows = engine.list_artifacts().unwrap();
        let edges: HashMap<String, Vec<String>> = rows
            .iter()
            .map(|row| (row.fid.clone(), row.context().supersedes))
            .collect();
        for start in edges.keys() {
            let mut stack = vec![start.clone()];
            let mut seen = HashSet::new();
            while let Some(fid) = stack.pop() {
                if !seen.insert(fid.clone()) {
                    continue;
                }
                for next in edges.get(&fid).into_iter().flatten() {
                    prop_assert!(next != start, "cycle through {}", start);
                    stack.push(next.clone());
                }
            }
        }

        // Invariant: every supersession reference resolves
        let known: HashSet<String> = rows.iter().map(|r| r.fid.clone()).collect();
        for row in &rows {
            let ctx = row.context();
            for reference in ctx.supersedes.iter().chain(ctx.superseded_by.iter()) {
                prop_assert!(known.contains(reference), "dangling reference {}", reference);
            }
        }
    }

    #[test]
    fn search_modes_nest_for_any_query(word in "[a-z]{3,8}") {
        let harness = EngineHarness::plain();
        let first = harness.record(&format!("{} decision", word), "t");
        harness.supersede(&format!("{} decision v2", word), "t", &first.fid);

        let collect = |mode| -> HashSet<String> {
            harness
                .engine
                .search(&word, mode, 20)
                .unwrap()
                .hits
                .into_iter()
                .map(|h| h.fid)
                .collect()
        };
        let strict = collect(SearchMode::Strict);
        let balanced = collect(SearchMode::Balanced);
        let audit = collect(SearchMode::Audit);

        prop_assert!(strict.is_subset(&balanced));
        prop_assert!(balanced.is_subset(&audit));
    }
}
