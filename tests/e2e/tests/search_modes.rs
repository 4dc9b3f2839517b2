//! Search behaviour: offline degradation, mode subsets, evidence ranking.

use std::collections::HashSet;
use std::sync::Arc;

use engram_e2e::{mocks, EngineHarness};
use engram_core::{ArtifactStatus, FailingEmbedder, SearchMode};

#[test]
fn offline_embedder_degrades_to_keyword_with_fallback_flag() {
    let harness = EngineHarness::with_provider(Arc::new(FailingEmbedder));
    harness.record("kw heavy title", "t");

    // Whitespace forces the full path, which then degrades
    let outcome = harness
        .engine
        .search("kw heavy", SearchMode::Strict, 10)
        .unwrap();
    assert!(outcome.fallback, "offline search must flag the fallback");
    assert_eq!(outcome.hits.len(), 1);
    assert!(outcome.hits[0].title.contains("kw"));
}

#[test]
fn fast_path_single_term_skips_vectors() {
    let harness = EngineHarness::with_provider(Arc::new(FailingEmbedder));
    harness.record("tokenizer decision", "parser");

    // Short bare term: fast path never touches the broken embedder
    let outcome = harness
        .engine
        .search("tokenizer", SearchMode::Strict, 10)
        .unwrap();
    assert!(!outcome.fallback);
    assert_eq!(outcome.hits.len(), 1);
}

#[test]
fn mode_result_sets_nest() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    // Build one artifact per status class around shared vocabulary
    let first = harness.record("session cache layout", "cache");
    harness.supersede("session cache layout v2", "cache", &first.fid);
    engine
        .record_proposal(engram_core::ProposalInput {
            title: "session cache experiment".into(),
            target: "cache-lab".into(),
            rationale: "hypothesis about the session cache".into(),
            content: "session cache consequences".into(),
            source: engram_core::Source::System,
            confidence: 0.5,
            ..Default::default()
        })
        .unwrap();

    let query = "session cache";
    let strict: HashSet<String> = engine
        .search(query, SearchMode::Strict, 20)
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.fid)
        .collect();
    let balanced: HashSet<String> = engine
        .search(query, SearchMode::Balanced, 20)
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.fid)
        .collect();
    let audit: HashSet<String> = engine
        .search(query, SearchMode::Audit, 20)
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.fid)
        .collect();

    assert!(strict.is_subset(&balanced));
    assert!(balanced.is_subset(&audit));
    assert!(strict.len() < audit.len());
}

#[test]
fn evidence_links_boost_ranking() {
    let harness = EngineHarness::plain();
    let engine = &harness.engine;

    let bare = harness.record("deploy pipeline shape", "ci");
    let evidenced = harness.record("deploy pipeline shape", "cd");

    for i in 0..10 {
        engine
            .append_event(
                mocks::result_event(&format!("observed run {}", i), true, Some("cd")),
                std::slice::from_ref(&evidenced.fid),
            )
            .unwrap();
    }

    let outcome = engine
        .search("deploy pipeline", SearchMode::Strict, 10)
        .unwrap();
    let rank_of = |fid: &str| outcome.hits.iter().position(|h| h.fid == fid).unwrap();
    assert!(
        rank_of(&evidenced.fid) < rank_of(&bare.fid),
        "ten linked events should outrank zero"
    );
    assert_eq!(outcome.hits[rank_of(&evidenced.fid)].evidence, 10);
}

#[test]
fn search_validates_inputs() {
    let harness = EngineHarness::plain();
    assert!(harness.engine.search("  ", SearchMode::Strict, 10).is_err());
    assert!(harness.engine.search("q", SearchMode::Strict, 0).is_err());
}

#[test]
fn strict_results_are_active_only() {
    let harness = EngineHarness::plain();
    let first = harness.record("gc tuning", "runtime");
    harness.supersede("gc tuning v2", "runtime", &first.fid);

    let outcome = harness
        .engine
        .search("gc tuning", SearchMode::Strict, 10)
        .unwrap();
    assert!(!outcome.hits.is_empty());
    assert!(outcome
        .hits
        .iter()
        .all(|h| h.status == ArtifactStatus::Active));
}
