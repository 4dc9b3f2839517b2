//! Trajectory distillation
//!
//! Mines the episodic log for successful action chains and turns them into
//! procedural proposals. A `result` event with `context.success == true`
//! anchors a trajectory: the sliding window of up to five preceding task,
//! call or decision events. The reflection cursor guarantees each event is
//! distilled exactly once across runs.

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, Source};
use crate::engine::{MemoryEngine, ProposalInput};
use crate::error::Result;
use crate::store::{event_kind, EpisodicEvent, EventQuery, EventStatus};

/// Config key holding the last distilled event id
pub const REFLECTION_CURSOR_KEY: &str = "last_reflection_event_id";

/// Events pulled per reflection run
const SCAN_LIMIT: usize = 500;
/// Longest trajectory window preceding a successful result
const WINDOW: usize = 5;
/// Confidence assigned to distilled proposals
const DISTILL_CONFIDENCE: f64 = 0.8;

/// One extracted trajectory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    pub steps: Vec<TrajectoryStep>,
    pub target: String,
    pub result_event_id: i64,
    pub evidence_ids: Vec<i64>,
}

/// One step of a trajectory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryStep {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl MemoryEngine {
    /// One reflection run: distill successful trajectories from events past
    /// the cursor, then advance the cursor past everything scanned.
    pub fn reflect(&self) -> Result<Vec<Artifact>> {
        let cursor = self
            .meta_store()
            .get_config_i64(REFLECTION_CURSOR_KEY, 0)?;

        let events = self.episodic().query_ascending(&EventQuery {
            limit: SCAN_LIMIT,
            status: Some(EventStatus::Active),
            kind: None,
            after_id: Some(cursor),
        })?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut proposals = Vec::new();
        for trajectory in extract_trajectories(&events) {
            let mut extra = serde_json::Map::new();
            extra.insert(
                "procedural".into(),
                serde_json::json!({
                    "steps": trajectory.steps,
                    "target_task": trajectory.target,
                    "success_evidence_ids": trajectory.evidence_ids,
                }),
            );

            let proposal = self.record_proposal(ProposalInput {
                title: format!("Procedural pattern for {}", trajectory.target),
                target: trajectory.target.clone(),
                rationale: format!(
                    "Distilled from a successful trajectory ending in event {}",
                    trajectory.result_event_id
                ),
                content: render_steps(&trajectory.steps),
                source: Source::System,
                confidence: DISTILL_CONFIDENCE,
                extra,
                evidence_event_ids: trajectory.evidence_ids.clone(),
                ..Default::default()
            })?;
            proposals.push(proposal);
        }

        // Advance past everything scanned, found or not: exactly-once
        let last_seen = events.last().map(|e| e.id).unwrap_or(cursor);
        self.meta_store()
            .set_config(REFLECTION_CURSOR_KEY, &last_seen.to_string())?;

        if !proposals.is_empty() {
            tracing::info!("Reflection distilled {} proposals", proposals.len());
        }
        Ok(proposals)
    }
}

/// Pull trajectories out of a chronologically ascending event slice.
pub fn extract_trajectories(events: &[EpisodicEvent]) -> Vec<Trajectory> {
    let mut trajectories = Vec::new();

    for (index, event) in events.iter().enumerate() {
        if event.kind != event_kind::RESULT || !event.is_success() {
            continue;
        }

        let window_start = index.saturating_sub(WINDOW);
        let mut steps = Vec::new();
        let mut evidence_ids = Vec::new();
        for prior in &events[window_start..index] {
            if matches!(
                prior.kind.as_str(),
                event_kind::TASK | event_kind::CALL | event_kind::DECISION
            ) {
                steps.push(TrajectoryStep {
                    action: prior.content.clone(),
                    rationale: prior
                        .context
                        .get("rationale")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                });
                evidence_ids.push(prior.id);
            }
        }
        if steps.is_empty() {
            continue;
        }

        let target = event
            .context
            .get("target")
            .and_then(|v| v.as_str())
            .unwrap_or("general_task")
            .to_string();
        evidence_ids.push(event.id);

        trajectories.push(Trajectory {
            steps,
            target,
            result_event_id: event.id,
            evidence_ids,
        });
    }
    trajectories
}

fn render_steps(steps: &[TrajectoryStep]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step.action))
        .collect::<Vec<_>>()
        .join("\n")
}
