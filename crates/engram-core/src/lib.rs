//! # Engram Core
//!
//! Agent memory engine: a durable, versioned, searchable store of
//! *decisions* (semantic, long-lived statements about a target domain) and
//! *events* (episodic, append-only observations).
//!
//! - **Transactional writes**: artifact repository, metadata index and
//!   vector index move together under an exclusive repository lock, with
//!   crash recovery at startup
//! - **At-most-one-active**: every (target, namespace) pair has at most one
//!   active decision; replacements go through explicit supersession
//! - **Evolution graph**: superseded decisions link to their successors and
//!   keep a stable decision identity across the chain
//! - **Hybrid search**: keyword (FTS5/BM25) fused with vector similarity via
//!   Reciprocal Rank Fusion, reshaped by lifecycle state and evidence
//! - **Episodic immortality**: events linked as evidence never decay
//! - **Lifecycle engine**: decay, duplicate-merge proposals, trajectory
//!   distillation, all scheduled by a single background worker
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{EngineConfig, MemoryEngine, RecordDecisionInput, SearchMode, Source};
//!
//! let engine = MemoryEngine::open(EngineConfig::at("/var/lib/engram"))?;
//!
//! let decision = engine.record_decision(RecordDecisionInput {
//!     title: "Use SQLite WAL mode".into(),
//!     target: "storage".into(),
//!     rationale: "Readers stop blocking the writer under load".into(),
//!     source: Source::User,
//!     ..Default::default()
//! })?;
//!
//! let results = engine.search("sqlite journaling", SearchMode::Strict, 10)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): bundle SQLite into the binary
//! - `local-embeddings`: local ONNX inference with fastembed
//! - `remote-embeddings`: OpenAI-compatible embedding endpoint
//! - `hnsw`: approximate vector search for large indexes

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod artifact;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod lifecycle;
pub mod search;
pub mod store;
pub mod targets;
pub mod transfer;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Artifact model
pub use artifact::{
    assign_fid, parse_artifact, serialize_artifact, Artifact, ArtifactContext, ArtifactKind,
    ArtifactStatus, Phase, Source, Vitality, DEFAULT_NAMESPACE,
};

// Engine
pub use engine::{
    ArtifactPatch, MemoryEngine, MemoryStats, ProposalInput, RecordDecisionInput,
    RecoveryReport, RepoLock, SupersedeInput,
};

// Configuration
pub use config::{EngineConfig, TrustBoundary};

// Errors
pub use error::{MemoryError, Result};

// Event stream
pub use events::{EngineEvent, EngineEventType, EventEmitter};

// Stores
pub use store::{
    event_kind, AuditStore, EpisodicEvent, EpisodicLog, EventQuery, EventStatus, HistoryEntry,
    MetaFilter, MetaRow, MetaStore, NewEvent, NO_GIT_REVISION,
};

// Search
pub use search::{
    reciprocal_rank_fusion, RankingPolicy, SearchHit, SearchMode, SearchOutcome, RRF_K,
};

// Embeddings & vectors
pub use embeddings::{
    cosine_similarity, provider_for, CachedEmbedder, EmbeddingError, EmbeddingProvider,
    FailingEmbedder, FallbackEmbedder, HashEmbedder, DEFAULT_DIMENSIONS,
};
pub use vector::{VectorIndex, VectorIndexError, VectorIndexStats};

// Lifecycle
pub use lifecycle::{DecayReport, MaintenanceWorker, MergeCandidate, Trajectory, WorkerHandle};

// Targets & transfer
pub use targets::TargetRegistry;
pub use transfer::MemoryBundle;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Artifact, ArtifactKind, ArtifactStatus, EngineConfig, MemoryEngine, MemoryError,
        MemoryStats, NewEvent, RecordDecisionInput, Result, SearchMode, SearchOutcome, Source,
        SupersedeInput,
    };

    pub use crate::{DecayReport, MaintenanceWorker};

    pub use crate::{EmbeddingProvider, HashEmbedder, VectorIndex};
}
