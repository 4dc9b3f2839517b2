//! Episodic decay
//!
//! Walks active events older than the TTL: linked events are retained
//! (evidence is immortal), unlinked active events are archived, and events
//! already archived a full cycle ago are physically pruned.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::events::EngineEventType;
use crate::store::{EventQuery, EventStatus};

/// Outcome of one decay cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayReport {
    pub archived: usize,
    pub pruned: usize,
    /// Events older than the TTL kept alive by an evidence link
    pub retained_by_link: usize,
    pub dry_run: bool,
}

/// Events examined per cycle; older events surface on the next run
const SCAN_LIMIT: usize = 10_000;

impl MemoryEngine {
    /// Run one decay cycle over the episodic log.
    pub fn decay(&self, dry_run: bool) -> Result<DecayReport> {
        let ttl = Duration::days(self.config().ttl_days);
        let cutoff = Utc::now() - ttl;

        let events = self.episodic().query(&EventQuery {
            limit: SCAN_LIMIT,
            status: None,
            kind: None,
            after_id: None,
        })?;

        let mut to_archive = Vec::new();
        let mut to_prune = Vec::new();
        let mut retained = 0usize;

        for event in &events {
            // Evidence is immortal
            if !event.linked.is_empty() {
                retained += 1;
                continue;
            }
            if event.timestamp > cutoff {
                continue;
            }
            match event.status {
                EventStatus::Active => to_archive.push(event.id),
                EventStatus::Archived => to_prune.push(event.id),
            }
        }

        let mut report = DecayReport {
            archived: to_archive.len(),
            pruned: to_prune.len(),
            retained_by_link: retained,
            dry_run,
        };

        if !dry_run {
            report.archived = self.episodic().mark_archived(&to_archive)?;
            report.pruned = self.episodic().physical_prune(&to_prune)?;
            self.emitter().emit(
                EngineEventType::Decay,
                serde_json::json!({
                    "archived": report.archived,
                    "pruned": report.pruned,
                    "retainedByLink": report.retained_by_link,
                }),
            );
        }

        tracing::debug!(
            "Decay{}: {} archived, {} pruned, {} retained by link",
            if dry_run { " (dry run)" } else { "" },
            report.archived,
            report.pruned,
            report.retained_by_link
        );
        Ok(report)
    }
}
