//! Search Module
//!
//! Hybrid retrieval over the memory: keyword (FTS5/BM25) fused with vector
//! similarity via Reciprocal Rank Fusion, then reshaped by lifecycle state
//! and evidence signals.

mod hybrid;
mod policy;

pub use hybrid::{reciprocal_rank_fusion, RRF_K};
pub use policy::{break_tie, RankingPolicy, RankingSignals, RELAY_MARKER};

use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactKind, ArtifactStatus};
use crate::error::{MemoryError, Result};

/// Queries at most this long with no whitespace take the keyword fast path
pub const FAST_PATH_MAX_LEN: usize = 24;

/// How many candidates each source contributes before fusion, per result slot
pub const SOURCE_LIMIT_MULTIPLIER: usize = 4;

// ============================================================================
// MODES
// ============================================================================

/// Search mode controlling which lifecycle states are eligible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Only active decisions
    #[default]
    Strict,
    /// Active preferred; superseded and draft allowed with penalties
    Balanced,
    /// Everything, historical view included
    Audit,
}

impl SearchMode {
    pub fn parse_name(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(SearchMode::Strict),
            "balanced" => Ok(SearchMode::Balanced),
            "audit" => Ok(SearchMode::Audit),
            other => Err(MemoryError::Validation(format!(
                "unknown search mode '{}'",
                other
            ))),
        }
    }

    /// Whether an artifact in `status` may appear in this mode's results.
    /// The eligible sets nest: strict ⊆ balanced ⊆ audit.
    pub fn admits(&self, status: ArtifactStatus) -> bool {
        match self {
            SearchMode::Strict => status == ArtifactStatus::Active,
            SearchMode::Balanced => matches!(
                status,
                ArtifactStatus::Active | ArtifactStatus::Superseded | ArtifactStatus::Draft
            ),
            SearchMode::Audit => true,
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// One ranked search hit, hydrated for previews
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub fid: String,
    pub score: f32,
    pub title: String,
    pub target: String,
    pub namespace: String,
    pub status: ArtifactStatus,
    pub kind: ArtifactKind,
    /// Leading slice of the artifact body
    pub preview: String,
    /// Evidence link count
    pub evidence: i64,
}

/// Outcome of a search call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    /// True when vector retrieval was unavailable and keyword signal alone
    /// produced the ranking
    pub fallback: bool,
}

/// Short, whitespace-free queries skip the vector index entirely.
pub fn is_fast_path_query(query: &str) -> bool {
    query.len() <= FAST_PATH_MAX_LEN && !query.contains(char::is_whitespace)
}

/// Escape a raw query for FTS5: bare terms, each quoted, implicit AND.
pub fn sanitize_fts_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" ")
}
