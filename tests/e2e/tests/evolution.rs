//! Evolution chains: supersession, identity carry-over, audit history.

use engram_e2e::EngineHarness;
use engram_core::{ArtifactStatus, SearchMode};

#[test]
fn five_supersessions_leave_one_active_and_shared_identity() {
    let harness = EngineHarness::with_git();
    let engine = &harness.engine;

    let mut chain = vec![harness.record("v0", "t")];
    for version in 1..=5 {
        let previous = chain.last().unwrap().fid.clone();
        chain.push(harness.supersede(&format!("v{}", version), "t", &previous));
    }

    // Six artifacts total, exactly one active
    let rows = engine.list_artifacts().unwrap();
    assert_eq!(rows.len(), 6);
    let actives: Vec<_> = rows
        .iter()
        .filter(|r| r.status == ArtifactStatus::Active)
        .collect();
    assert_eq!(actives.len(), 1);
    assert_eq!(actives[0].fid, chain[5].fid);

    // Identity is stable across the whole chain
    let identity = chain[0].context.decision_id.clone().unwrap();
    for artifact in &chain {
        assert_eq!(artifact.context.decision_id.as_deref(), Some(identity.as_str()));
    }

    // Every superseded artifact points at its successor
    for pair in chain.windows(2) {
        let demoted = engine.get_artifact(&pair[0].fid).unwrap();
        assert_eq!(demoted.context.status, ArtifactStatus::Superseded);
        assert_eq!(
            demoted.context.superseded_by.as_deref(),
            Some(pair[1].fid.as_str())
        );
        let successor = engine.get_artifact(&pair[1].fid).unwrap();
        assert!(successor.context.supersedes.contains(&pair[0].fid));
    }

    // The audit trail covers the whole evolution
    assert!(engine.head().unwrap().is_some());
    let mut commits = 0;
    for artifact in &chain {
        commits += engine.history(&artifact.fid).unwrap().len();
    }
    assert!(commits >= 6, "expected at least six commits, saw {}", commits);
}

#[test]
fn committed_artifact_has_head_and_history() {
    let harness = EngineHarness::with_git();
    let artifact = harness.record("only", "t");

    assert!(harness.engine.head().unwrap().is_some());
    let history = harness.engine.history(&artifact.fid).unwrap();
    assert!(!history.is_empty());
    assert!(history[0].message.contains("record"));
}

#[test]
fn superseded_artifacts_stay_searchable_in_audit_mode() {
    let harness = EngineHarness::plain();
    let first = harness.record("cache policy", "cache");
    harness.supersede("cache policy revised", "cache", &first.fid);

    let audit = harness
        .engine
        .search("cache policy", SearchMode::Audit, 10)
        .unwrap();
    assert!(audit.hits.iter().any(|h| h.fid == first.fid));

    // And the demoted one ranks below the active successor
    let active_rank = audit
        .hits
        .iter()
        .position(|h| h.status == ArtifactStatus::Active)
        .unwrap();
    let demoted_rank = audit.hits.iter().position(|h| h.fid == first.fid).unwrap();
    assert!(active_rank < demoted_rank);
}

#[test]
fn supersede_stays_inside_the_predecessor_namespace() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    // Two actives on the same target can only coexist across namespaces
    let a = harness.record("a", "t");
    let b = engine
        .record_decision(engram_core::RecordDecisionInput {
            title: "b".into(),
            target: "t".into(),
            rationale: "the staging variant of the decision".into(),
            namespace: Some("staging".into()),
            source: engram_core::Source::User,
            ..Default::default()
        })
        .unwrap();

    // A default-namespace predecessor cannot seed a staging successor: the
    // slot there is held by b
    let err = engine
        .supersede_decision(engram_core::SupersedeInput {
            title: "hijack".into(),
            target: "t".into(),
            rationale: "trying to land in the staging slot".into(),
            namespace: Some("staging".into()),
            source: engram_core::Source::User,
            old_fids: vec![a.fid.clone()],
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, engram_core::MemoryError::Conflict(_)));

    // Within its own namespace the supersession goes through
    let successor = engine
        .supersede_decision(engram_core::SupersedeInput {
            title: "b2".into(),
            target: "t".into(),
            rationale: "staging decision revised in place".into(),
            namespace: Some("staging".into()),
            source: engram_core::Source::User,
            old_fids: vec![b.fid.clone()],
            ..Default::default()
        })
        .unwrap();

    let demoted = engine.get_artifact(&b.fid).unwrap();
    assert_eq!(demoted.context.status, ArtifactStatus::Superseded);
    assert_eq!(
        demoted.context.superseded_by.as_deref(),
        Some(successor.fid.as_str())
    );

    // One active per namespace slot survives
    let actives: Vec<_> = engine
        .list_artifacts()
        .unwrap()
        .into_iter()
        .filter(|r| r.status == ArtifactStatus::Active)
        .collect();
    assert_eq!(actives.len(), 2);
    for row in &actives {
        assert!(row.fid == a.fid || row.fid == successor.fid);
    }
}
