//! Ranking Policy
//!
//! Reshapes fused retrieval scores with lifecycle state, authorship and
//! evidence signals. Active decisions get a flat bonus large enough to
//! dominate; superseded and deprecated artifacts are punished
//! multiplicatively so they only surface when nothing current matches.

use chrono::{DateTime, Utc};

use crate::artifact::{ArtifactKind, ArtifactStatus};

use super::SearchMode;

/// Rationales carrying this marker were relayed by a machine intermediary;
/// their absence is a human-authority signal.
pub const RELAY_MARKER: &str = "[via MCP]";

/// Signals about one candidate artifact
#[derive(Debug, Clone)]
pub struct RankingSignals {
    pub status: ArtifactStatus,
    pub kind: ArtifactKind,
    /// Whether the rationale carries the relay marker
    pub relayed: bool,
    /// Number of episodic events linked as evidence
    pub link_count: i64,
    /// Proposal confidence, if any
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Scoring weights for hybrid search
#[derive(Debug, Clone)]
pub struct RankingPolicy {
    /// Base multiplier on the fused retrieval score
    pub weight_retrieval: f32,
    /// Flat bonus for being the current truth
    pub bonus_active: f32,
    /// Multiplicative penalty for outdated artifacts
    pub penalty_superseded: f32,
    /// Multiplicative penalty for retired artifacts
    pub penalty_deprecated: f32,
    /// Flat bonus for human-authored rationales
    pub bonus_human_authority: f32,
    /// Evidence boost: alpha * ln(1 + links). Tuned so ten links separate
    /// otherwise equal artifacts decisively.
    pub evidence_alpha: f32,
    /// Flat bonus for the kind the mode favors
    pub bonus_kind: f32,
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self {
            weight_retrieval: 1.0,
            bonus_active: 1.5,
            penalty_superseded: 0.1,
            penalty_deprecated: 0.05,
            bonus_human_authority: 0.2,
            evidence_alpha: 0.3,
            bonus_kind: 0.1,
        }
    }
}

impl RankingPolicy {
    /// Final relevance score for one candidate.
    pub fn calculate(&self, retrieval_score: f32, signals: &RankingSignals, mode: SearchMode) -> f32 {
        let mut score = retrieval_score * self.weight_retrieval;

        match signals.status {
            ArtifactStatus::Active => score += self.bonus_active,
            ArtifactStatus::Superseded => score *= self.penalty_superseded,
            ArtifactStatus::Deprecated => score *= self.penalty_deprecated,
            ArtifactStatus::Draft => {}
        }

        if !signals.relayed {
            score += self.bonus_human_authority;
        }

        if signals.link_count > 0 {
            score += self.evidence_alpha * (1.0 + signals.link_count as f32).ln();
        }

        // Strict favors settled decisions; audit favors the hypotheses and
        // history a reviewer is digging for.
        match (mode, signals.kind) {
            (SearchMode::Strict, ArtifactKind::Decision) => score += self.bonus_kind,
            (SearchMode::Audit, ArtifactKind::Proposal) => score += self.bonus_kind,
            _ => {}
        }

        score
    }
}

/// Deterministic ordering for equal scores: higher confidence first, then
/// most recent, then lexicographic fid.
pub fn break_tie(
    a: (&str, &RankingSignals),
    b: (&str, &RankingSignals),
) -> std::cmp::Ordering {
    let conf_a = a.1.confidence.unwrap_or(0.0);
    let conf_b = b.1.confidence.unwrap_or(0.0);
    conf_b
        .partial_cmp(&conf_a)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.1.timestamp.cmp(&a.1.timestamp))
        .then_with(|| a.0.cmp(b.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(status: ArtifactStatus) -> RankingSignals {
        RankingSignals {
            status,
            kind: ArtifactKind::Decision,
            relayed: true,
            link_count: 0,
            confidence: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_active_beats_superseded_at_equal_retrieval() {
        let policy = RankingPolicy::default();
        let active = policy.calculate(0.5, &signals(ArtifactStatus::Active), SearchMode::Balanced);
        let superseded =
            policy.calculate(0.5, &signals(ArtifactStatus::Superseded), SearchMode::Balanced);
        let deprecated =
            policy.calculate(0.5, &signals(ArtifactStatus::Deprecated), SearchMode::Balanced);
        assert!(active > superseded);
        assert!(superseded > deprecated);
    }

    #[test]
    fn test_human_authority_bonus() {
        let policy = RankingPolicy::default();
        let mut relayed = signals(ArtifactStatus::Active);
        relayed.relayed = true;
        let mut human = signals(ArtifactStatus::Active);
        human.relayed = false;

        let relayed_score = policy.calculate(0.5, &relayed, SearchMode::Strict);
        let human_score = policy.calculate(0.5, &human, SearchMode::Strict);
        assert!(human_score > relayed_score);
    }

    #[test]
    fn test_ten_links_beat_zero_links() {
        let policy = RankingPolicy::default();
        let bare = signals(ArtifactStatus::Active);
        let mut evidenced = signals(ArtifactStatus::Active);
        evidenced.link_count = 10;

        let bare_score = policy.calculate(0.5, &bare, SearchMode::Strict);
        let evidenced_score = policy.calculate(0.5, &evidenced, SearchMode::Strict);
        assert!(evidenced_score - bare_score > 0.5);
    }

    #[test]
    fn test_kind_bonus_flips_between_modes() {
        let policy = RankingPolicy::default();
        let decision = signals(ArtifactStatus::Active);
        let mut proposal = signals(ArtifactStatus::Active);
        proposal.kind = ArtifactKind::Proposal;

        assert!(
            policy.calculate(0.5, &decision, SearchMode::Strict)
                > policy.calculate(0.5, &proposal, SearchMode::Strict)
        );
        assert!(
            policy.calculate(0.5, &proposal, SearchMode::Audit)
                > policy.calculate(0.5, &decision, SearchMode::Audit)
        );
    }

    #[test]
    fn test_tie_breaks() {
        let now = Utc::now();
        let mut a = signals(ArtifactStatus::Active);
        a.confidence = Some(0.9);
        a.timestamp = now;
        let mut b = signals(ArtifactStatus::Active);
        b.confidence = Some(0.4);
        b.timestamp = now;

        assert_eq!(break_tie(("d-2", &a), ("d-1", &b)), std::cmp::Ordering::Less);

        // Equal confidence: recency wins
        let mut older = a.clone();
        older.timestamp = now - chrono::Duration::days(1);
        assert_eq!(
            break_tie(("d-1", &older), ("d-2", &a)),
            std::cmp::Ordering::Greater
        );

        // Fully equal: fid order
        assert_eq!(break_tie(("d-1", &a), ("d-2", &a)), std::cmp::Ordering::Less);
    }
}
