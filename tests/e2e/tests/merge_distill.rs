//! Merge proposals and trajectory distillation.

use engram_e2e::{mocks, EngineHarness};
use engram_core::{ArtifactKind, RecordDecisionInput, Source};

fn record_with_body(harness: &EngineHarness, title: &str, target: &str, body: &str) -> String {
    harness
        .engine
        .record_decision(RecordDecisionInput {
            title: title.into(),
            target: target.into(),
            rationale: "shared rationale used by both twins".into(),
            consequences: Some(body.into()),
            source: Source::User,
            ..Default::default()
        })
        .unwrap()
        .fid
}

#[test]
fn identical_bodies_produce_one_merge_proposal() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    let body = "always gate deploys behind the canary stage";
    let d1 = record_with_body(&harness, "deploy gate", "service-a", body);
    let d2 = record_with_body(&harness, "deploy gate", "service-b", body);

    let proposals = engine.scan_merges().unwrap();
    assert_eq!(proposals.len(), 1);

    let proposal = &proposals[0];
    assert_eq!(proposal.kind, ArtifactKind::Proposal);
    let suggested: Vec<String> = proposal
        .context
        .extra
        .get("suggested_supersedes")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    assert_eq!(suggested.len(), 2);
    assert!(suggested.contains(&d1));
    assert!(suggested.contains(&d2));

    // Rescan is idempotent
    assert!(engine.scan_merges().unwrap().is_empty());
}

#[test]
fn merge_proposal_links_evidence_of_both_sides() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    let body = "store session state in redis with a 30 minute ttl";
    let d1 = record_with_body(&harness, "session store", "web", body);
    let d2 = record_with_body(&harness, "session store", "api", body);

    let e1 = engine
        .append_event(mocks::result_event("web ok", true, None), std::slice::from_ref(&d1))
        .unwrap();
    let e2 = engine
        .append_event(mocks::result_event("api ok", true, None), std::slice::from_ref(&d2))
        .unwrap();

    let proposals = engine.scan_merges().unwrap();
    assert_eq!(proposals.len(), 1);

    let linked_to_proposal: Vec<i64> = engine
        .episodic()
        .linked_event_ids(&proposals[0].fid)
        .unwrap();
    assert!(linked_to_proposal.contains(&e1));
    assert!(linked_to_proposal.contains(&e2));
}

#[test]
fn different_content_never_merges() {
    let harness = EngineHarness::plain();
    record_with_body(
        &harness,
        "retries",
        "http",
        "retry idempotent calls three times with jitter",
    );
    record_with_body(
        &harness,
        "pooling",
        "db",
        "keep the connection pool at twice the core count",
    );
    assert!(harness.engine.scan_merges().unwrap().is_empty());
}

#[test]
fn successful_trajectory_distills_once() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    engine
        .append_event(mocks::task_event("open incident ticket"), &[])
        .unwrap();
    engine
        .append_event(mocks::task_event("roll back the deploy"), &[])
        .unwrap();
    let result = engine
        .append_event(
            mocks::result_event("incident resolved", true, Some("incident-response")),
            &[],
        )
        .unwrap();

    let proposals = engine.reflect().unwrap();
    assert_eq!(proposals.len(), 1);
    let proposal = &proposals[0];
    assert_eq!(proposal.kind, ArtifactKind::Proposal);
    assert_eq!(proposal.context.target, "incident-response");

    let procedural = proposal.context.extra.get("procedural").unwrap();
    let steps = procedural["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 2);
    let evidence = procedural["success_evidence_ids"].as_array().unwrap();
    assert!(evidence.iter().any(|v| v.as_i64() == Some(result)));

    // The evidence events are now linked (and thus immortal)
    assert!(!engine
        .episodic()
        .linked_event_ids(&proposal.fid)
        .unwrap()
        .is_empty());

    // Cursor advanced: the same trajectory never distills twice
    assert!(engine.reflect().unwrap().is_empty());
}

#[test]
fn unsuccessful_results_never_distill() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    engine
        .append_event(mocks::task_event("attempt migration"), &[])
        .unwrap();
    engine
        .append_event(
            mocks::result_event("migration failed with a success-sounding message", false, None),
            &[],
        )
        .unwrap();

    assert!(engine.reflect().unwrap().is_empty());
}
