//! Transition validation for artifact updates
//!
//! Decisions are immutable in their core semantics once written: source,
//! kind, target, rationale and content may not change, and status only moves
//! forward (active -> superseded -> deprecated). Proposals stay freely
//! refinable until promoted.

use crate::error::{MemoryError, Result};

use super::{Artifact, ArtifactKind, ArtifactStatus};

/// Minor in-place corrections to decision content are tolerated: at most a
/// 5-char length delta and a long shared prefix (>= 10 of the first 20).
pub fn is_minor_content_diff(old: &str, new: &str) -> bool {
    if old.is_empty() || new.is_empty() {
        return old == new;
    }
    if old.len().abs_diff(new.len()) > 5 {
        return false;
    }
    let common_prefix = old
        .bytes()
        .zip(new.bytes())
        .take(20)
        .take_while(|(a, b)| a == b)
        .count();
    common_prefix > 10
}

/// Rank statuses along the one-way lifecycle. Draft sits before active so a
/// promoted proposal is a forward move.
fn status_rank(status: ArtifactStatus) -> u8 {
    match status {
        ArtifactStatus::Draft => 0,
        ArtifactStatus::Active => 1,
        ArtifactStatus::Superseded => 2,
        ArtifactStatus::Deprecated => 3,
    }
}

/// Compare an artifact before and after an update and reject any change that
/// breaks immutability or status monotonicity.
pub fn validate_transition(old: &Artifact, new: &Artifact) -> Result<()> {
    let is_proposal = old.kind == ArtifactKind::Proposal;

    if old.fid != new.fid {
        return Err(MemoryError::Transition(format!(
            "{}: fid may not change",
            old.fid
        )));
    }

    // Promotion (proposal -> decision) is the only legal kind change.
    if old.kind != new.kind && !(is_proposal && new.kind == ArtifactKind::Decision) {
        return Err(MemoryError::Transition(format!(
            "{}: kind may not change from {} to {}",
            old.fid, old.kind, new.kind
        )));
    }

    if !is_proposal {
        if old.source != new.source {
            return Err(MemoryError::Transition(format!(
                "{}: source is immutable",
                old.fid
            )));
        }
        if old.context.target != new.context.target {
            return Err(MemoryError::Transition(format!(
                "{}: target is immutable",
                old.fid
            )));
        }
        if old.context.rationale != new.context.rationale {
            return Err(MemoryError::Transition(format!(
                "{}: rationale is immutable",
                old.fid
            )));
        }
        if old.content != new.content && !is_minor_content_diff(&old.content, &new.content) {
            return Err(MemoryError::Transition(format!(
                "{}: content is immutable beyond minor corrections",
                old.fid
            )));
        }
    }

    // Status only ever moves forward. Proposals may move from draft to
    // active on promotion, never backwards either.
    if status_rank(new.context.status) < status_rank(old.context.status) {
        return Err(MemoryError::Transition(format!(
            "{}: status may not move from {} back to {}",
            old.fid, old.context.status, new.context.status
        )));
    }

    Ok(())
}
