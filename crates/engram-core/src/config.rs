//! Engine Configuration
//!
//! Process-wide key/value options recognised by the engine. All fields have
//! serde defaults so partial config documents deserialize cleanly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Policy controlling which sources may originate writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustBoundary {
    /// Agents may write as long as they state an intent (default)
    #[default]
    AgentWithIntent,
    /// Only human-originated writes are accepted
    HumanOnly,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for the artifact repository, metadata db and vector index
    pub storage_path: PathBuf,
    /// Identifier selecting the embedding provider ("hash-384", "local", "remote:<url>")
    pub vector_model: String,
    /// Background worker count for vector index writes
    pub vector_workers: usize,
    /// Write-source policy
    pub trust_boundary: TrustBoundary,
    /// If false, the artifact store skips the revision subsystem entirely
    pub enable_git: bool,
    /// Decay threshold for unlinked episodic events, in days
    pub ttl_days: i64,
    /// Cosine similarity threshold for merge proposals
    pub merge_threshold: f32,
    /// Background reflection cadence, seconds
    pub reflection_interval_s: u64,
    /// Background decay cadence, seconds
    pub decay_interval_s: u64,
    /// Background merge-scan cadence, seconds
    pub merge_interval_s: u64,
    /// Optional path enabling the persistent embedding cache
    pub embedding_cache_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            vector_model: "hash-384".to_string(),
            vector_workers: 1,
            trust_boundary: TrustBoundary::default(),
            enable_git: true,
            ttl_days: 30,
            merge_threshold: 0.9,
            reflection_interval_s: 300,
            decay_interval_s: 3600,
            merge_interval_s: 3600,
            embedding_cache_path: None,
        }
    }
}

impl EngineConfig {
    /// Config rooted at an explicit storage directory.
    pub fn at(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Default::default()
        }
    }

    /// Validate option values before engine init.
    pub fn validate(&self) -> Result<()> {
        if self.ttl_days < 1 {
            return Err(MemoryError::Validation(format!(
                "ttl_days must be at least 1, got {}",
                self.ttl_days
            )));
        }
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            return Err(MemoryError::Validation(format!(
                "merge_threshold must be within [0, 1], got {}",
                self.merge_threshold
            )));
        }
        Ok(())
    }

    /// Directory holding the versioned artifact repository.
    pub fn semantic_dir(&self) -> PathBuf {
        self.storage_path.join("semantic")
    }

    /// Path of the metadata database file.
    pub fn index_db_path(&self) -> PathBuf {
        self.storage_path.join("index.db")
    }

    /// Directory holding the vector index files.
    pub fn vector_dir(&self) -> PathBuf {
        self.storage_path.join("vector")
    }

    /// Side directory for unparseable crash remnants.
    pub fn quarantine_dir(&self) -> PathBuf {
        self.storage_path.join("quarantine")
    }
}

/// Platform-specific default storage root.
fn default_storage_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "engram", "core") {
        return proj_dirs.data_dir().to_path_buf();
    }
    PathBuf::from(".engram")
}
