//! Export / import
//!
//! Packs the whole memory (artifact documents, episodic events with their
//! links, scalar config) into one JSON bundle and restores it elsewhere.
//! Export paths must be bare file names so a caller can never be tricked
//! into writing outside the storage root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::{fid_from_file_name, parse_artifact_lenient, Source};
use crate::engine::{MemoryEngine, RepoLock};
use crate::error::{MemoryError, Result};
use crate::store::{EventQuery, MetaRow, NewEvent};

/// Bundle format version
const BUNDLE_VERSION: u32 = 1;

/// A complete memory snapshot
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryBundle {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub artifacts: Vec<BundledArtifact>,
    pub events: Vec<BundledEvent>,
    pub config: Vec<(String, String)>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledArtifact {
    pub fid: String,
    /// The verbatim on-disk document
    pub document: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledEvent {
    pub source: Source,
    pub kind: String,
    pub content: String,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub linked: Vec<String>,
}

/// Config keys that travel with a bundle
const PORTABLE_CONFIG_KEYS: &[&str] = &["last_reflection_event_id"];

impl MemoryEngine {
    /// Export everything into `<storage>/<name>.json`. The name must be a
    /// bare file name.
    pub fn export_bundle(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(MemoryError::Validation(format!(
                "export name '{}' must be a bare file name",
                name
            )));
        }
        let file_name = if name.ends_with(".json") {
            name.to_string()
        } else {
            format!("{}.json", name)
        };

        let mut artifacts = Vec::new();
        {
            let audit = self.audit_store()?;
            for rel in audit.list_documents()? {
                let Some(fid) = fid_from_file_name(&rel).map(str::to_string) else {
                    continue;
                };
                artifacts.push(BundledArtifact {
                    fid,
                    document: audit.read(&rel)?,
                });
            }
        }

        let events = self
            .episodic()
            .query_ascending(&EventQuery {
                limit: 1_000_000,
                status: None,
                kind: None,
                after_id: Some(0),
            })?
            .into_iter()
            .map(|event| BundledEvent {
                source: event.source,
                kind: event.kind,
                content: event.content,
                context: event.context,
                timestamp: event.timestamp,
                linked: event.linked,
            })
            .collect();

        let mut config = Vec::new();
        for key in PORTABLE_CONFIG_KEYS {
            if let Some(value) = self.get_config_value(key)? {
                config.push((key.to_string(), value));
            }
        }

        let bundle = MemoryBundle {
            version: BUNDLE_VERSION,
            exported_at: Utc::now(),
            artifacts,
            events,
            config,
        };

        let path = self.config().storage_path.join(file_name);
        let json = serde_json::to_string_pretty(&bundle)
            .map_err(|e| MemoryError::Validation(format!("bundle serialization failed: {}", e)))?;
        std::fs::write(&path, json)?;
        tracing::info!("Memory exported to {:?}", path);
        Ok(path)
    }

    /// Import a bundle into this engine. Existing artifacts with the same
    /// fid are overwritten; events deduplicate through the episodic log.
    pub fn import_bundle(&self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let bundle: MemoryBundle = serde_json::from_str(&raw)
            .map_err(|e| MemoryError::Parse(format!("bundle unreadable: {}", e)))?;
        if bundle.version != BUNDLE_VERSION {
            return Err(MemoryError::Validation(format!(
                "unsupported bundle version {}",
                bundle.version
            )));
        }

        let _guard = RepoLock::acquire(&self.config().storage_path)?;

        let mut imported = 0usize;
        for entry in &bundle.artifacts {
            let parsed = parse_artifact_lenient(&entry.fid, &entry.document)?;
            {
                let mut audit = self.audit_store()?;
                audit.add(
                    &parsed.artifact.relative_path(),
                    &entry.document,
                    &format!("import: {}", entry.fid),
                )?;
            }
            self.meta_store()
                .upsert(&MetaRow::from_artifact(&parsed.artifact))?;
            imported += 1;
        }

        for event in bundle.events {
            let linked: Vec<String> = event
                .linked
                .into_iter()
                .filter(|fid| {
                    bundle.artifacts.iter().any(|a| &a.fid == fid)
                })
                .collect();
            self.episodic().append(
                NewEvent {
                    source: event.source,
                    kind: event.kind,
                    content: event.content,
                    context: event.context,
                    timestamp: Some(event.timestamp),
                },
                &linked,
            )?;
        }

        for (key, value) in &bundle.config {
            self.set_config_value(key, value)?;
        }

        tracing::info!("Imported {} artifacts from {:?}", imported, path);
        Ok(imported)
    }
}
