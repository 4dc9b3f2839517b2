//! Crash recovery and legacy migration
//!
//! Runs once at engine init, before any write is accepted. Reconciles the
//! three stores after a partial write: commits or quarantines working-tree
//! remnants, rebuilds missing metadata rows, drops rows for vanished
//! artifacts, then verifies referential integrity and the single-active
//! rule. Unresolvable damage halts initialization.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::artifact::{
    fid_from_file_name, fid_relative_path, parse_artifact, parse_artifact_lenient,
    serialize_artifact, ArtifactStatus,
};
use crate::error::{MemoryError, Result};
use crate::store::{AuditStore, MetaRow, MetaStore};

/// What recovery did, for logging and tests
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Crash remnants committed as-is
    pub recovered: Vec<String>,
    /// Unparseable remnants moved aside
    pub quarantined: Vec<String>,
    /// Metadata rows rebuilt from disk
    pub rebuilt_rows: usize,
    /// Metadata rows dropped because the artifact vanished
    pub removed_rows: usize,
    /// Legacy artifacts rewritten in place
    pub migrated: Vec<String>,
    /// Referrers deprecated over quarantined references
    pub deprecated: Vec<String>,
    /// Extra actives demoted to restore the single-active rule
    pub demoted: Vec<String>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.recovered.is_empty()
            && self.quarantined.is_empty()
            && self.rebuilt_rows == 0
            && self.removed_rows == 0
            && self.migrated.is_empty()
            && self.deprecated.is_empty()
            && self.demoted.is_empty()
    }
}

/// Run full recovery. Caller holds the repository lock.
pub fn run(
    audit: &mut AuditStore,
    meta: &MetaStore,
    quarantine_dir: &Path,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    reconcile_working_tree(audit, meta, quarantine_dir, &mut report)?;
    rebuild_missing_rows(audit, meta, &mut report)?;
    drop_stale_rows(audit, meta, &mut report)?;
    migrate_legacy_artifacts(audit, meta, &mut report)?;
    verify_references(audit, meta, quarantine_dir, &mut report)?;
    repair_single_active(audit, meta, &mut report)?;

    if !report.is_clean() {
        tracing::info!(
            "Recovery: {} recovered, {} quarantined, {} rows rebuilt, {} rows removed, \
             {} migrated, {} deprecated, {} demoted",
            report.recovered.len(),
            report.quarantined.len(),
            report.rebuilt_rows,
            report.removed_rows,
            report.migrated.len(),
            report.deprecated.len(),
            report.demoted.len()
        );
    }
    Ok(report)
}

/// Step 1: every uncommitted document is a remnant of a write that died
/// before its commit. Parseable and consistent with the index -> commit it;
/// anything else moves to the quarantine directory.
fn reconcile_working_tree(
    audit: &mut AuditStore,
    meta: &MetaStore,
    quarantine_dir: &Path,
    report: &mut RecoveryReport,
) -> Result<()> {
    let remnants = audit.uncommitted_documents()?;
    if remnants.is_empty() {
        return Ok(());
    }

    for rel in remnants {
        let Some(fid) = fid_from_file_name(&rel).map(str::to_string) else {
            continue;
        };
        let text = match audit.read(&rel) {
            Ok(text) => text,
            Err(_) => continue,
        };

        let consistent = match parse_artifact(&fid, &text) {
            Ok(artifact) => match meta.get(&fid)? {
                Some(row) => row.status == artifact.context.status,
                None => true,
            },
            Err(_) => false,
        };

        if consistent {
            audit.add(&rel, &text, "Recovered from crash")?;
            if let Ok(artifact) = parse_artifact(&fid, &text) {
                meta.upsert(&MetaRow::from_artifact(&artifact))?;
            }
            report.recovered.push(fid);
        } else {
            std::fs::create_dir_all(quarantine_dir)?;
            let source = audit.root().join(&rel);
            let dest = quarantine_dir.join(&rel);
            std::fs::rename(&source, &dest)?;
            // A tracked remnant leaves a dangling index entry behind
            if !audit.history(&rel).unwrap_or_default().is_empty() {
                let _ = audit.purge(&rel, "Quarantined crash remnant");
            }
            meta.delete(&fid)?;
            tracing::warn!("Quarantined unparseable artifact {}", rel);
            report.quarantined.push(fid);
        }
    }
    Ok(())
}

/// Step 2: artifacts on disk with no metadata row get their row rebuilt.
fn rebuild_missing_rows(
    audit: &mut AuditStore,
    meta: &MetaStore,
    report: &mut RecoveryReport,
) -> Result<()> {
    let known = meta.all_fids()?;
    for rel in audit.list_documents()? {
        let Some(fid) = fid_from_file_name(&rel).map(str::to_string) else {
            continue;
        };
        if known.contains(&fid) {
            continue;
        }
        let text = audit.read(&rel)?;
        match parse_artifact_lenient(&fid, &text) {
            Ok(parsed) => {
                meta.upsert(&MetaRow::from_artifact(&parsed.artifact))?;
                report.rebuilt_rows += 1;
            }
            Err(e) => tracing::warn!("Cannot rebuild metadata for {}: {}", rel, e),
        }
    }
    Ok(())
}

/// Step 3: metadata rows whose artifact no longer exists on disk are dropped.
fn drop_stale_rows(
    audit: &AuditStore,
    meta: &MetaStore,
    report: &mut RecoveryReport,
) -> Result<()> {
    for fid in meta.all_fids()? {
        if !audit.exists(&fid_relative_path(&fid)) {
            meta.delete(&fid)?;
            report.removed_rows += 1;
        }
    }
    Ok(())
}

/// Minimum rationale length below which a legacy decision gets rewritten.
const MIN_RATIONALE: usize = 10;

/// Step 4: artifacts written by older engine versions (missing kind or
/// namespace, placeholder targets or rationales) are rewritten in place and
/// re-committed with a migration marker. Proposals keep their short
/// rationales; they are hypotheses, not records.
fn migrate_legacy_artifacts(
    audit: &mut AuditStore,
    meta: &MetaStore,
    report: &mut RecoveryReport,
) -> Result<()> {
    for rel in audit.list_documents()? {
        let Some(fid) = fid_from_file_name(&rel).map(str::to_string) else {
            continue;
        };
        let text = audit.read(&rel)?;
        let Ok(mut parsed) = parse_artifact_lenient(&fid, &text) else {
            continue;
        };

        let is_decision = parsed.artifact.kind == crate::artifact::ArtifactKind::Decision;
        let thin_rationale =
            is_decision && parsed.artifact.context.rationale.trim().len() < MIN_RATIONALE;
        let thin_target = parsed.artifact.context.target.trim().is_empty();
        if parsed.defaulted.is_empty() && !thin_rationale && !thin_target {
            continue;
        }

        if thin_rationale {
            parsed.artifact.context.rationale =
                "Migrated legacy artifact; original rationale absent".to_string();
        }
        if thin_target {
            parsed.artifact.context.target = "unknown".to_string();
        }

        let rewritten = serialize_artifact(&parsed.artifact);
        audit.update(&rel, &rewritten, &format!("Migrated: {}", fid))?;
        meta.upsert(&MetaRow::from_artifact(&parsed.artifact))?;
        report.migrated.push(fid);
    }
    Ok(())
}

/// Step 5: every supersession reference must resolve. A reference into the
/// quarantine directory deprecates the referrer; any other dangling
/// reference is unresolvable damage.
fn verify_references(
    audit: &mut AuditStore,
    meta: &MetaStore,
    quarantine_dir: &Path,
    report: &mut RecoveryReport,
) -> Result<()> {
    let rows = meta.list_all()?;
    let known: HashSet<String> = rows.iter().map(|r| r.fid.clone()).collect();

    for row in rows {
        let ctx = row.context();
        let mut refs: Vec<String> = ctx.supersedes.clone();
        if let Some(successor) = &ctx.superseded_by {
            refs.push(successor.clone());
        }

        for reference in refs {
            if known.contains(&reference) {
                continue;
            }
            let quarantined = quarantine_dir.join(fid_relative_path(&reference)).is_file();
            if !quarantined {
                return Err(MemoryError::Integrity(format!(
                    "artifact {} references missing artifact {}",
                    row.fid, reference
                )));
            }
            set_status(audit, meta, &row.fid, ArtifactStatus::Deprecated, None, "Recovered from crash: reference quarantined")?;
            report.deprecated.push(row.fid.clone());
            break;
        }
    }
    Ok(())
}

/// Step 6: at most one active decision per (target, namespace). The latest
/// write wins; the rest are demoted to superseded.
fn repair_single_active(
    audit: &mut AuditStore,
    meta: &MetaStore,
    report: &mut RecoveryReport,
) -> Result<()> {
    let rows = meta.list_all()?;
    let mut actives: HashMap<(String, String), Vec<&MetaRow>> = HashMap::new();
    for row in rows
        .iter()
        .filter(|r| r.status == ArtifactStatus::Active && r.kind == crate::artifact::ArtifactKind::Decision)
    {
        actives
            .entry((row.target.clone(), row.namespace.clone()))
            .or_default()
            .push(row);
    }

    for ((target, namespace), mut group) in actives {
        if group.len() <= 1 {
            continue;
        }
        group.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.fid.cmp(&b.fid)));
        let winner = group[0].fid.clone();
        tracing::warn!(
            "Multiple active decisions for ({}, {}); keeping {}",
            target,
            namespace,
            winner
        );
        for loser in &group[1..] {
            set_status(
                audit,
                meta,
                &loser.fid,
                ArtifactStatus::Superseded,
                Some(winner.clone()),
                "Recovered from crash: duplicate active",
            )?;
            report.demoted.push(loser.fid.clone());
        }
    }
    Ok(())
}

/// Rewrite one artifact's status (and optional successor) in both stores.
fn set_status(
    audit: &mut AuditStore,
    meta: &MetaStore,
    fid: &str,
    status: ArtifactStatus,
    superseded_by: Option<String>,
    message: &str,
) -> Result<()> {
    let rel = fid_relative_path(fid);
    let text = audit.read(&rel)?;
    let mut parsed = parse_artifact_lenient(fid, &text)?;
    parsed.artifact.context.status = status;
    if superseded_by.is_some() {
        parsed.artifact.context.superseded_by = superseded_by;
    }
    audit.update(&rel, &serialize_artifact(&parsed.artifact), message)?;
    meta.upsert(&MetaRow::from_artifact(&parsed.artifact))?;
    Ok(())
}
