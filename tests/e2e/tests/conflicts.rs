//! Conflict semantics: the single-active rule and supersede preconditions.

use engram_e2e::EngineHarness;
use engram_core::{MemoryError, RecordDecisionInput, Source, SupersedeInput};

#[test]
fn second_record_for_same_target_conflicts() {
    let harness = EngineHarness::plain();
    let first = harness.record("A", "T");

    let err = harness
        .engine
        .record_decision(RecordDecisionInput {
            title: "B".into(),
            target: "T".into(),
            rationale: "Different rationale entirely".into(),
            source: Source::User,
            ..Default::default()
        })
        .unwrap_err();

    assert!(matches!(err, MemoryError::Conflict(_)));
    // The error names the blocking artifact
    assert!(err.to_string().contains(&first.fid));
}

#[test]
fn record_conflicts_repeat_until_superseded() {
    let harness = EngineHarness::plain();
    let first = harness.record("A", "T");

    for _ in 0..3 {
        let err = harness
            .engine
            .record_decision(RecordDecisionInput {
                title: "B".into(),
                target: "T".into(),
                rationale: "Still conflicting with the active one".into(),
                source: Source::User,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, MemoryError::Conflict(_)));
    }

    // Supersession clears the way; a fresh record then conflicts again
    harness.supersede("A2", "T", &first.fid);
    let err = harness
        .engine
        .record_decision(RecordDecisionInput {
            title: "C".into(),
            target: "T".into(),
            rationale: "The successor now blocks this".into(),
            source: Source::User,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, MemoryError::Conflict(_)));
}

#[test]
fn supersede_of_unknown_fid_reports_no_longer_active() {
    let harness = EngineHarness::plain();
    let err = harness
        .engine
        .supersede_decision(SupersedeInput {
            title: "X".into(),
            target: "T".into(),
            rationale: "reason long enough for a supersede".into(),
            source: Source::User,
            old_fids: vec!["does-not-exist".into()],
            ..Default::default()
        })
        .unwrap_err();

    assert!(matches!(err, MemoryError::Conflict(_)));
    assert!(err.to_string().contains("no longer active"));
}

#[test]
fn supersede_of_already_superseded_fid_conflicts() {
    let harness = EngineHarness::plain();
    let first = harness.record("A", "T");
    harness.supersede("A2", "T", &first.fid);

    let err = harness
        .engine
        .supersede_decision(SupersedeInput {
            title: "A3".into(),
            target: "T".into(),
            rationale: "trying to supersede a stale predecessor".into(),
            source: Source::User,
            old_fids: vec![first.fid.clone()],
            ..Default::default()
        })
        .unwrap_err();
    assert!(err.to_string().contains("no longer active"));
}

#[test]
fn namespaces_isolate_conflicts() {
    let harness = EngineHarness::plain();
    harness.record("A", "T");

    harness
        .engine
        .record_decision(RecordDecisionInput {
            title: "B".into(),
            target: "T".into(),
            rationale: "Same target, different namespace".into(),
            namespace: Some("staging".into()),
            source: Source::User,
            ..Default::default()
        })
        .unwrap();
}

#[test]
fn conflict_leaves_no_trace() {
    let harness = EngineHarness::plain();
    harness.record("A", "T");
    let before = harness.engine.list_artifacts().unwrap().len();

    let _ = harness.engine.record_decision(RecordDecisionInput {
        title: "B".into(),
        target: "T".into(),
        rationale: "This write must fail cleanly".into(),
        source: Source::User,
        ..Default::default()
    });

    assert_eq!(harness.engine.list_artifacts().unwrap().len(), before);
}
