//! Duplicate-merge detection
//!
//! Scans active decisions for near-duplicate pairs (cosine above the
//! configured threshold) and emits one merge proposal per pair, linked to
//! the evidence events of both sides. A pair needs distinct fids and
//! distinct targets: same-target duplicates are what supersession is for.

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactKind, ArtifactStatus, Source};
use crate::engine::{MemoryEngine, ProposalInput};
use crate::error::Result;
use crate::store::MetaFilter;

/// A detected near-duplicate pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCandidate {
    pub first: String,
    pub second: String,
    pub similarity: f32,
}

impl MemoryEngine {
    /// Detect near-duplicate pairs among active decisions. Pairs already
    /// covered by an existing merge proposal are excluded.
    pub fn merge_candidates(&self) -> Result<Vec<MergeCandidate>> {
        let threshold = self.config().merge_threshold;
        let actives = self.meta_store().list_by_filter(&MetaFilter {
            status: Some(ArtifactStatus::Active),
            kind: Some(ArtifactKind::Decision),
            ..Default::default()
        })?;

        let already_proposed = self.proposed_pairs()?;
        let mut seen_pairs = std::collections::HashSet::new();
        let mut candidates = Vec::new();

        for row in &actives {
            let duplicates = match self.near_duplicates(&row.fid, threshold) {
                Ok(duplicates) => duplicates,
                Err(e) => {
                    tracing::warn!("Merge scan skipped {}: {}", row.fid, e);
                    continue;
                }
            };
            for (other_fid, similarity) in duplicates {
                let pair = ordered_pair(&row.fid, &other_fid);
                if !seen_pairs.insert(pair.clone()) || already_proposed.contains(&pair) {
                    continue;
                }
                candidates.push(MergeCandidate {
                    first: pair.0,
                    second: pair.1,
                    similarity,
                });
            }
        }
        Ok(candidates)
    }

    /// One merge scan over all active decisions. Returns the proposals
    /// created this run.
    pub fn scan_merges(&self) -> Result<Vec<Artifact>> {
        let mut proposals = Vec::new();
        for candidate in self.merge_candidates()? {
            let Some(first) = self.meta_store().get(&candidate.first)? else {
                continue;
            };
            let Some(second) = self.meta_store().get(&candidate.second)? else {
                continue;
            };

            // Evidence from both sides backs the proposal
            let mut evidence = self.episodic().linked_event_ids(&first.fid)?;
            evidence.extend(self.episodic().linked_event_ids(&second.fid)?);

            let mut extra = serde_json::Map::new();
            extra.insert(
                "suggested_supersedes".into(),
                serde_json::json!([candidate.first, candidate.second]),
            );
            extra.insert(
                "merge_similarity".into(),
                serde_json::json!(candidate.similarity),
            );

            let proposal = self.record_proposal(ProposalInput {
                title: format!(
                    "Merge duplicate decisions: {} / {}",
                    first.target, second.target
                ),
                target: format!("{}+{}", first.target, second.target),
                rationale: format!(
                    "Near-duplicate content (cosine {:.3}) across targets '{}' and '{}'",
                    candidate.similarity, first.target, second.target
                ),
                content: format!(
                    "Decisions {} and {} carry near-identical content and likely \
                     describe one decision under two targets.",
                    candidate.first, candidate.second
                ),
                source: Source::System,
                confidence: candidate.similarity as f64,
                extra,
                evidence_event_ids: evidence,
                ..Default::default()
            })?;
            proposals.push(proposal);
        }

        if !proposals.is_empty() {
            tracing::info!("Merge scan produced {} proposals", proposals.len());
        }
        Ok(proposals)
    }

    /// Pairs already covered by an existing merge proposal.
    fn proposed_pairs(&self) -> Result<std::collections::HashSet<(String, String)>> {
        let proposals = self.meta_store().list_by_filter(&MetaFilter {
            kind: Some(ArtifactKind::Proposal),
            ..Default::default()
        })?;

        let mut pairs = std::collections::HashSet::new();
        for row in proposals {
            let ctx = row.context();
            let Some(serde_json::Value::Array(fids)) = ctx.extra.get("suggested_supersedes")
            else {
                continue;
            };
            let fids: Vec<String> = fids
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            if let [a, b] = fids.as_slice() {
                pairs.insert(ordered_pair(a, b));
            }
        }
        Ok(pairs)
    }
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
