//! Crash-window recovery: after a restart, every store pair reflects either
//! both sides of a write or neither.

use engram_e2e::EngineHarness;
use engram_core::{
    parse_artifact, serialize_artifact, Artifact, ArtifactStatus, MemoryError, SearchMode,
};

#[test]
fn uncommitted_artifact_file_is_recovered_on_restart() {
    let harness = EngineHarness::with_git();
    let committed = harness.record("base", "t0");

    // Crash window: artifact bytes hit the tree, but neither the commit nor
    // the metadata upsert happened. Build the document from a committed
    // sibling so it parses.
    let mut orphan = harness.engine.get_artifact(&committed.fid).unwrap();
    orphan.fid = "d-19700101T000000000-deadbeef".into();
    orphan.context.target = "t-orphan".into();
    let semantic_dir = harness.storage_path().join("semantic");
    std::fs::write(
        semantic_dir.join(orphan.relative_path()),
        serialize_artifact(&orphan),
    )
    .unwrap();

    let harness = harness.reopen();
    let report = harness.engine.recovery_report();
    assert!(report.recovered.contains(&orphan.fid));

    // Both stores now agree
    let restored = harness.engine.get_artifact(&orphan.fid).unwrap();
    assert_eq!(restored.context.target, "t-orphan");
    assert!(harness.engine.get_meta(&orphan.fid).unwrap().is_some());
    let history = harness.engine.history(&orphan.fid).unwrap();
    assert_eq!(history[0].message, "Recovered from crash");
}

#[test]
fn committed_artifact_with_missing_row_is_reindexed() {
    let harness = EngineHarness::with_git();
    let artifact = harness.record("indexed", "t1");

    // Crash window: commit landed, metadata write didn't. Simulate by
    // deleting the row out from under the engine.
    harness.engine.meta_store().delete(&artifact.fid).unwrap();
    assert!(harness.engine.get_meta(&artifact.fid).unwrap().is_none());

    let harness = harness.reopen();
    assert!(harness.engine.recovery_report().rebuilt_rows >= 1);
    let row = harness.engine.get_meta(&artifact.fid).unwrap().unwrap();
    assert_eq!(row.status, ArtifactStatus::Active);

    // And the write is externally visible again
    let outcome = harness
        .engine
        .search("indexed", SearchMode::Strict, 5)
        .unwrap();
    assert!(outcome.hits.iter().any(|h| h.fid == artifact.fid));
}

#[test]
fn garbage_remnant_is_quarantined_not_fatal() {
    let harness = EngineHarness::with_git();
    harness.record("good", "t");

    let semantic_dir = harness.storage_path().join("semantic");
    std::fs::write(semantic_dir.join("d-junk.md"), "}}} not an artifact").unwrap();

    let harness = harness.reopen();
    assert!(harness
        .engine
        .recovery_report()
        .quarantined
        .contains(&"d-junk".to_string()));
    assert!(harness
        .storage_path()
        .join("quarantine")
        .join("d-junk.md")
        .is_file());

    // The healthy artifact is untouched
    assert_eq!(harness.engine.list_artifacts().unwrap().len(), 1);
}

#[test]
fn duplicate_actives_after_crash_resolve_to_latest() {
    let harness = EngineHarness::with_git();
    let first = harness.record("first", "t");

    // Force a second active row behind the engine's back, as if a crash cut
    // a supersession in half after the new artifact was committed
    let mut duplicate: Artifact = harness.engine.get_artifact(&first.fid).unwrap();
    duplicate.fid = "d-99991231T235959000-ffffffff".into();
    duplicate.timestamp = duplicate.timestamp + chrono::Duration::hours(1);
    let semantic_dir = harness.storage_path().join("semantic");
    std::fs::write(
        semantic_dir.join(duplicate.relative_path()),
        serialize_artifact(&duplicate),
    )
    .unwrap();

    let harness = harness.reopen();
    let report = harness.engine.recovery_report();
    assert!(report.demoted.contains(&first.fid));

    let demoted = harness.engine.get_artifact(&first.fid).unwrap();
    assert_eq!(demoted.context.status, ArtifactStatus::Superseded);
    assert_eq!(
        demoted.context.superseded_by.as_deref(),
        Some(duplicate.fid.as_str())
    );

    // Exactly one active decision for the target survives
    let actives: Vec<_> = harness
        .engine
        .list_artifacts()
        .unwrap()
        .into_iter()
        .filter(|r| r.status == ArtifactStatus::Active)
        .collect();
    assert_eq!(actives.len(), 1);
    assert_eq!(actives[0].fid, duplicate.fid);
}

#[test]
fn dangling_supersession_reference_halts_startup() {
    let harness = EngineHarness::with_git();
    let artifact = harness.record("refs", "t");

    // Corrupt the committed artifact to reference a fid that never existed
    let semantic_dir = harness.storage_path().join("semantic");
    let path = semantic_dir.join(artifact.relative_path());
    let text = std::fs::read_to_string(&path).unwrap();
    let mut parsed = parse_artifact(&artifact.fid, &text).unwrap();
    parsed.context.supersedes = vec!["d-vanished".into()];
    std::fs::write(&path, serialize_artifact(&parsed)).unwrap();

    let config = harness.engine.config().clone();
    drop(harness);

    let err = engram_core::MemoryEngine::open(config).unwrap_err();
    assert!(matches!(err, MemoryError::Integrity(_)));
}

#[test]
fn restart_on_clean_store_changes_nothing() {
    let harness = EngineHarness::with_git();
    let artifact = harness.record("stable", "t");
    let head_before = harness.engine.head().unwrap();

    let harness = harness.reopen();
    assert!(harness.engine.recovery_report().is_clean());
    assert_eq!(harness.engine.head().unwrap(), head_before);
    assert_eq!(
        harness.engine.get_artifact(&artifact.fid).unwrap().fid,
        artifact.fid
    );
}
