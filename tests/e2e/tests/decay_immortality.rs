//! Decay and evidence immortality.

use chrono::{DateTime, Utc};
use engram_e2e::{mocks, EngineHarness};
use engram_core::EventStatus;

fn ancient() -> DateTime<Utc> {
    "2000-01-01T00:00:00Z".parse().unwrap()
}

#[test]
fn linked_event_survives_decay_and_reports_retention() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    let artifact = harness.record("anchor", "t");
    let event_id = engine
        .append_event(
            mocks::result_event("it worked", true, Some("t")),
            std::slice::from_ref(&artifact.fid),
        )
        .unwrap();

    // Backdate far past any TTL
    engine.episodic().set_timestamp(event_id, ancient()).unwrap();

    let report = engine.decay(false).unwrap();
    assert_eq!(report.retained_by_link, 1);
    assert_eq!(report.archived, 0);
    assert_eq!(report.pruned, 0);

    // Still queryable, still active, still linked
    let event = engine.episodic().get(event_id).unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Active);
    assert_eq!(event.linked, vec![artifact.fid.clone()]);
}

#[test]
fn late_link_grants_immunity() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    let artifact = harness.record("anchor", "t");
    let event_id = engine
        .append_event(mocks::task_event("loose observation"), &[])
        .unwrap();
    engine.episodic().set_timestamp(event_id, ancient()).unwrap();

    // Linking after the fact still protects the event
    engine.link_evidence(event_id, &artifact.fid).unwrap();

    for _ in 0..3 {
        engine.decay(false).unwrap();
    }
    assert!(engine.episodic().get(event_id).unwrap().is_some());
}

#[test]
fn unlinked_events_archive_then_prune_across_cycles() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    let event_id = engine
        .append_event(mocks::task_event("ephemeral"), &[])
        .unwrap();
    engine.episodic().set_timestamp(event_id, ancient()).unwrap();

    let first = engine.decay(false).unwrap();
    assert_eq!(first.archived, 1);
    assert_eq!(
        engine.episodic().get(event_id).unwrap().unwrap().status,
        EventStatus::Archived
    );

    let second = engine.decay(false).unwrap();
    assert_eq!(second.pruned, 1);
    assert!(engine.episodic().get(event_id).unwrap().is_none());
}

#[test]
fn dry_run_previews_without_mutating() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    let event_id = engine
        .append_event(mocks::task_event("ephemeral"), &[])
        .unwrap();
    engine.episodic().set_timestamp(event_id, ancient()).unwrap();

    let preview = engine.decay(true).unwrap();
    assert!(preview.dry_run);
    assert_eq!(preview.archived, 1);

    // Nothing actually happened
    assert_eq!(
        engine.episodic().get(event_id).unwrap().unwrap().status,
        EventStatus::Active
    );
}

#[test]
fn purging_the_artifact_releases_its_events_to_decay() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    let artifact = harness.record("anchor", "t");
    let event_id = engine
        .append_event(
            mocks::task_event("evidence"),
            std::slice::from_ref(&artifact.fid),
        )
        .unwrap();
    engine.episodic().set_timestamp(event_id, ancient()).unwrap();

    engine.decay(false).unwrap();
    assert!(engine.episodic().get(event_id).unwrap().is_some());

    // Admin purge drops the links; the event is ordinary again
    engine.purge_artifact(&artifact.fid).unwrap();
    let report = engine.decay(false).unwrap();
    assert_eq!(report.archived, 1);
}
