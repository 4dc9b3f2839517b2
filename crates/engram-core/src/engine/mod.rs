//! Memory Engine - the transactional write coordinator
//!
//! Every externally visible write flows through here, under an exclusive
//! repository lock: artifact bytes to the audit store, the metadata row, the
//! episodic linkage and the vector index move together, and crash recovery
//! at init reconciles whatever an interrupted write left behind.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use lru::LruCache;
use uuid::Uuid;

use crate::artifact::{
    assign_fid, fid_relative_path, parse_artifact, serialize_artifact, validate_transition,
    Artifact, ArtifactContext, ArtifactKind, ArtifactStatus, Phase, Source, Vitality,
    DEFAULT_NAMESPACE,
};
use crate::config::{EngineConfig, TrustBoundary};
use crate::embeddings::{provider_for, EmbeddingProvider};
use crate::error::{MemoryError, Result};
use crate::events::{EngineEventType, EventEmitter};
use crate::search::{
    is_fast_path_query, reciprocal_rank_fusion, RankingPolicy, RankingSignals, SearchHit,
    SearchMode, SearchOutcome, RRF_K, SOURCE_LIMIT_MULTIPLIER,
};
use crate::store::{
    event_kind, AuditStore, EpisodicEvent, EpisodicLog, EventQuery, HistoryEntry, MetaRow,
    MetaStore, NewEvent,
};
use crate::targets::TargetRegistry;
use crate::vector::VectorIndex;

mod lock;
mod recovery;

pub use lock::RepoLock;
pub use recovery::RecoveryReport;

/// Shortest acceptable rationale for a new decision
const MIN_RECORD_RATIONALE: usize = 10;
/// Shortest acceptable rationale for a supersession
const MIN_SUPERSEDE_RATIONALE: usize = 15;
/// Upper bound on per-source candidates fetched for fusion
const MAX_SOURCE_CANDIDATES: usize = 100;
/// Preview length on hydrated search hits
const PREVIEW_CHARS: usize = 160;

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for recording a new decision
#[derive(Debug, Clone, Default)]
pub struct RecordDecisionInput {
    pub title: String,
    pub target: String,
    pub rationale: String,
    /// Free-form body (consequences, details)
    pub consequences: Option<String>,
    pub namespace: Option<String>,
    pub keywords: Vec<String>,
    pub source: Source,
}

/// Input for superseding one or more active decisions
#[derive(Debug, Clone, Default)]
pub struct SupersedeInput {
    pub title: String,
    pub target: String,
    pub rationale: String,
    pub consequences: Option<String>,
    pub namespace: Option<String>,
    pub keywords: Vec<String>,
    pub source: Source,
    /// The currently active fids being replaced
    pub old_fids: Vec<String>,
}

/// Input for recording a proposal (skips the conflict check until promoted)
#[derive(Debug, Clone, Default)]
pub struct ProposalInput {
    pub title: String,
    pub target: String,
    pub rationale: String,
    pub content: String,
    pub namespace: Option<String>,
    pub keywords: Vec<String>,
    pub source: Source,
    pub confidence: f64,
    /// Structured payload kept in the context's opaque tail
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// Episodic events to link as evidence
    pub evidence_event_ids: Vec<i64>,
}

/// Partial update applied through transition validation
#[derive(Debug, Clone, Default)]
pub struct ArtifactPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub rationale: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub status: Option<ArtifactStatus>,
    pub phase: Option<Phase>,
    pub vitality: Option<Vitality>,
    pub confidence: Option<f64>,
    /// Keys merged into the context's opaque tail
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Aggregate counters over the whole memory
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_artifacts: usize,
    pub active_decisions: usize,
    pub superseded: usize,
    pub deprecated: usize,
    pub proposals: usize,
    pub events_active: i64,
    pub events_archived: i64,
    pub events_linked: i64,
    pub vectors: usize,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The memory engine. One instance per storage root; all methods take
/// `&self`, internal state is guarded by per-store locks so the engine is
/// `Send + Sync` behind an `Arc`.
pub struct MemoryEngine {
    config: EngineConfig,
    audit: Mutex<AuditStore>,
    meta: MetaStore,
    episodic: EpisodicLog,
    /// Guarded separately from the repository lock so search readers never
    /// block on index rebuilds
    vectors: Mutex<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    targets: Mutex<TargetRegistry>,
    emitter: EventEmitter,
    policy: RankingPolicy,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    recovery_report: RecoveryReport,
}

impl MemoryEngine {
    /// Initialize the engine: open all stores, run crash recovery, backfill
    /// the vector index. Integrity violations halt here.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let embedder = provider_for(&config)
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        Self::open_with_provider(config, embedder)
    }

    /// Initialize with an explicit embedding provider instead of the one
    /// `vector_model` selects.
    pub fn open_with_provider(
        config: EngineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage_path)?;

        let mut audit = AuditStore::open(&config.semantic_dir(), config.enable_git)?;
        let meta = MetaStore::open(&config.index_db_path())?;
        let episodic = EpisodicLog::open(&config.index_db_path())?;
        let vectors = VectorIndex::open(&config.vector_dir(), embedder.dimensions())
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let targets = TargetRegistry::load(&config.storage_path);

        let recovery_report = {
            let _guard = RepoLock::acquire(&config.storage_path)?;
            recovery::run(&mut audit, &meta, &config.quarantine_dir())?
        };

        let engine = Self {
            config,
            audit: Mutex::new(audit),
            meta,
            episodic,
            vectors: Mutex::new(vectors),
            embedder,
            targets: Mutex::new(targets),
            emitter: EventEmitter::new(),
            policy: RankingPolicy::default(),
            // NonZero: 100 query embeddings, same bound as the provider cache
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(100).expect("100 is non-zero"),
            )),
            recovery_report,
        };

        engine.backfill_vectors();
        Ok(engine)
    }

    /// What init-time recovery had to repair.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery_report
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a callback on the engine event stream.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&crate::events::EngineEvent) + Send + Sync + 'static,
    {
        self.emitter.subscribe(callback);
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Record a new active decision for a target.
    pub fn record_decision(&self, input: RecordDecisionInput) -> Result<Artifact> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(MemoryError::Validation("title must not be empty".into()));
        }
        if input.target.trim().is_empty() {
            return Err(MemoryError::Validation("target must not be empty".into()));
        }
        if input.rationale.trim().len() < MIN_RECORD_RATIONALE {
            return Err(MemoryError::Validation(format!(
                "rationale must be at least {} characters",
                MIN_RECORD_RATIONALE
            )));
        }
        self.check_trust(input.source)?;

        let target = self.normalize_target(&input.target)?;
        let namespace = input
            .namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let _guard = RepoLock::acquire(&self.config.storage_path)?;

        if let Some(existing) = self.meta.get_active_fid(&target, &namespace)? {
            return Err(MemoryError::Conflict(format!(
                "target '{}' already has an active decision: {}",
                target, existing
            )));
        }

        let timestamp = Utc::now();
        let mut ctx = ArtifactContext::new(title.clone(), target.clone(), input.rationale.trim());
        ctx.namespace = namespace;
        ctx.status = ArtifactStatus::Active;
        ctx.keywords = input.keywords;
        ctx.decision_id = Some(Uuid::new_v4().to_string());

        let artifact = Artifact {
            fid: assign_fid(timestamp, &title, &target),
            kind: ArtifactKind::Decision,
            source: input.source,
            content: input.consequences.unwrap_or_default(),
            timestamp,
            context: ctx,
        };

        self.commit_artifact(&artifact, &format!("record: {} ({})", title, target))?;

        // Observer-driven writes leave an episodic trace linked as evidence
        if input.source == Source::Agent {
            let event = NewEvent {
                source: input.source,
                kind: event_kind::DECISION.into(),
                content: format!("recorded decision '{}' for {}", title, target),
                ..Default::default()
            };
            if let Err(e) = self.episodic.append(event, std::slice::from_ref(&artifact.fid)) {
                tracing::warn!("Failed to append decision event: {}", e);
            }
        }

        self.index_artifact(&artifact);
        self.emitter.emit(
            EngineEventType::Record,
            serde_json::json!({
                "fid": artifact.fid,
                "target": artifact.context.target,
                "title": artifact.context.title,
            }),
        );
        Ok(artifact)
    }

    /// Replace one or more active decisions with a single successor,
    /// atomically. The successor inherits the decision identity of its most
    /// recent predecessor.
    pub fn supersede_decision(&self, input: SupersedeInput) -> Result<Artifact> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(MemoryError::Validation("title must not be empty".into()));
        }
        if input.rationale.trim().len() < MIN_SUPERSEDE_RATIONALE {
            return Err(MemoryError::Validation(format!(
                "supersede rationale must be at least {} characters",
                MIN_SUPERSEDE_RATIONALE
            )));
        }
        if input.old_fids.is_empty() {
            return Err(MemoryError::Validation(
                "supersede requires at least one predecessor fid".into(),
            ));
        }
        self.check_trust(input.source)?;

        let target = self.normalize_target(&input.target)?;
        let namespace = input
            .namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let _guard = RepoLock::acquire(&self.config.storage_path)?;

        // Every predecessor must exist and still be the active truth for the
        // successor's own (target, namespace) slot
        let mut predecessors = Vec::with_capacity(input.old_fids.len());
        for old_fid in &input.old_fids {
            let row = self.meta.get(old_fid)?.ok_or_else(|| {
                MemoryError::Conflict(format!("predecessor {} is no longer active", old_fid))
            })?;
            if row.status != ArtifactStatus::Active
                || row.target != target
                || row.namespace != namespace
            {
                return Err(MemoryError::Conflict(format!(
                    "predecessor {} is no longer active for target '{}' in namespace '{}'",
                    old_fid, target, namespace
                )));
            }
            predecessors.push(row);
        }

        // The slot the successor claims must be free or vacated by this very
        // supersession, exactly as at proposal promotion
        if let Some(existing) = self.meta.get_active_fid(&target, &namespace)? {
            if !input.old_fids.contains(&existing) {
                return Err(MemoryError::Conflict(format!(
                    "target '{}' already has an active decision: {}",
                    target, existing
                )));
            }
        }

        let timestamp = Utc::now();
        let new_fid = assign_fid(timestamp, &title, &target);
        self.check_acyclic(&new_fid, &input.old_fids)?;

        // Identity carries over from the most recent predecessor
        let decision_id = predecessors
            .iter()
            .max_by_key(|row| row.timestamp)
            .and_then(|row| row.decision_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut ctx = ArtifactContext::new(title.clone(), target.clone(), input.rationale.trim());
        ctx.namespace = namespace;
        ctx.status = ArtifactStatus::Active;
        ctx.keywords = input.keywords;
        ctx.supersedes = input.old_fids.clone();
        ctx.decision_id = Some(decision_id);

        let successor = Artifact {
            fid: new_fid,
            kind: ArtifactKind::Decision,
            source: input.source,
            content: input.consequences.unwrap_or_default(),
            timestamp,
            context: ctx,
        };

        // Stage the successor and every demoted predecessor, then commit once
        let mut demoted = Vec::with_capacity(predecessors.len());
        {
            let mut audit = self.audit_store()?;
            audit.stage(&successor.relative_path(), &serialize_artifact(&successor))?;

            for row in &predecessors {
                let old = self.load_artifact_locked(&mut audit, &row.fid)?;
                let mut updated = old.clone();
                updated.context.status = ArtifactStatus::Superseded;
                updated.context.superseded_by = Some(successor.fid.clone());
                validate_transition(&old, &updated)?;
                audit.stage(&updated.relative_path(), &serialize_artifact(&updated))?;
                demoted.push(updated);
            }

            let revision = audit.commit_transaction(&format!(
                "supersede: {} -> {} ({})",
                input.old_fids.join(","),
                successor.fid,
                target
            ))?;
            self.meta.set_config("last_revision", &revision)?;
        }

        self.meta.upsert(&MetaRow::from_artifact(&successor))?;
        for artifact in &demoted {
            self.meta.upsert(&MetaRow::from_artifact(artifact))?;
        }

        let event = NewEvent {
            source: input.source,
            kind: event_kind::SUPERSEDE.into(),
            content: format!(
                "superseded {} with '{}' for {}",
                input.old_fids.join(", "),
                title,
                target
            ),
            ..Default::default()
        };
        let mut linked = input.old_fids.clone();
        linked.push(successor.fid.clone());
        if let Err(e) = self.episodic.append(event, &linked) {
            tracing::warn!("Failed to append supersede event: {}", e);
        }

        self.index_artifact(&successor);
        self.emitter.emit(
            EngineEventType::Supersede,
            serde_json::json!({
                "fid": successor.fid,
                "supersedes": input.old_fids,
                "target": successor.context.target,
            }),
        );
        Ok(successor)
    }

    /// Record a proposal. Proposals are hypotheses: they skip the conflict
    /// check and stay freely refinable until promoted.
    pub fn record_proposal(&self, input: ProposalInput) -> Result<Artifact> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(MemoryError::Validation("title must not be empty".into()));
        }
        if input.target.trim().is_empty() {
            return Err(MemoryError::Validation("target must not be empty".into()));
        }
        self.check_trust(input.source)?;

        let target = self.normalize_target(&input.target)?;
        let _guard = RepoLock::acquire(&self.config.storage_path)?;

        let timestamp = Utc::now();
        let mut ctx = ArtifactContext::new(title.clone(), target.clone(), input.rationale.trim());
        ctx.namespace = input
            .namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        ctx.status = ArtifactStatus::Draft;
        ctx.keywords = input.keywords;
        ctx.confidence = Some(input.confidence.clamp(0.0, 1.0));
        ctx.extra = input.extra;

        let artifact = Artifact {
            fid: assign_fid(timestamp, &title, &target),
            kind: ArtifactKind::Proposal,
            source: input.source,
            content: input.content,
            timestamp,
            context: ctx,
        };

        self.commit_artifact(&artifact, &format!("propose: {} ({})", title, target))?;

        for event_id in &input.evidence_event_ids {
            if let Err(e) = self.episodic.link_to_semantic(*event_id, &artifact.fid) {
                tracing::warn!("Failed to link evidence event {}: {}", event_id, e);
            }
        }

        self.index_artifact(&artifact);
        self.emitter.emit(
            EngineEventType::Record,
            serde_json::json!({
                "fid": artifact.fid,
                "target": artifact.context.target,
                "kind": "proposal",
            }),
        );
        Ok(artifact)
    }

    /// Promote a proposal to an active decision, enforcing the single-active
    /// rule at promotion time.
    pub fn accept_proposal(&self, fid: &str) -> Result<Artifact> {
        let _guard = RepoLock::acquire(&self.config.storage_path)?;

        let old = self.load_artifact(fid)?;
        if old.kind != ArtifactKind::Proposal {
            return Err(MemoryError::Validation(format!(
                "{} is not a proposal",
                fid
            )));
        }

        if let Some(existing) = self
            .meta
            .get_active_fid(&old.context.target, &old.context.namespace)?
        {
            return Err(MemoryError::Conflict(format!(
                "target '{}' already has an active decision: {}",
                old.context.target, existing
            )));
        }

        let mut promoted = old.clone();
        promoted.kind = ArtifactKind::Decision;
        promoted.context.status = ArtifactStatus::Active;
        if promoted.context.decision_id.is_none() {
            promoted.context.decision_id = Some(Uuid::new_v4().to_string());
        }
        validate_transition(&old, &promoted)?;

        self.commit_artifact(&promoted, &format!("accept: {}", fid))?;
        self.index_artifact(&promoted);
        self.emitter.emit(
            EngineEventType::Accept,
            serde_json::json!({
                "fid": promoted.fid,
                "target": promoted.context.target,
            }),
        );
        Ok(promoted)
    }

    /// Apply a patch to an artifact under transition validation.
    pub fn update_artifact(
        &self,
        fid: &str,
        patch: ArtifactPatch,
        message: &str,
    ) -> Result<Artifact> {
        let _guard = RepoLock::acquire(&self.config.storage_path)?;

        let old = self.load_artifact(fid)?;
        let mut updated = old.clone();
        if let Some(title) = patch.title {
            updated.context.title = title;
        }
        if let Some(content) = patch.content {
            updated.content = content;
        }
        if let Some(rationale) = patch.rationale {
            updated.context.rationale = rationale;
        }
        if let Some(keywords) = patch.keywords {
            updated.context.keywords = keywords;
        }
        if let Some(status) = patch.status {
            updated.context.status = status;
        }
        if let Some(phase) = patch.phase {
            updated.context.phase = Some(phase);
        }
        if let Some(vitality) = patch.vitality {
            updated.context.vitality = Some(vitality);
        }
        if let Some(confidence) = patch.confidence {
            updated.context.confidence = Some(confidence.clamp(0.0, 1.0));
        }
        for (key, value) in patch.extra {
            updated.context.extra.insert(key, value);
        }

        validate_transition(&old, &updated)?;
        self.commit_artifact(&updated, message)?;

        if updated.embedding_text() != old.embedding_text() {
            self.index_artifact(&updated);
        }
        Ok(updated)
    }

    /// Explicit admin removal of an artifact. Decay never reaches here.
    pub fn purge_artifact(&self, fid: &str) -> Result<()> {
        let _guard = RepoLock::acquire(&self.config.storage_path)?;

        {
            let mut audit = self.audit_store()?;
            if !audit.exists(&fid_relative_path(fid)) {
                return Err(MemoryError::NotFound(format!("artifact {}", fid)));
            }
            audit.purge(&fid_relative_path(fid), &format!("purge: {}", fid))?;
        }
        self.meta.delete(fid)?;
        self.episodic.unlink_all_for(fid)?;

        if let Ok(mut vectors) = self.vectors.lock() {
            vectors.remove(fid);
            if let Err(e) = vectors.flush_if_dirty() {
                tracing::warn!("Vector index flush failed after purge: {}", e);
            }
        }

        self.emitter
            .emit(EngineEventType::Delete, serde_json::json!({ "fid": fid }));
        Ok(())
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Load an artifact from the audit store.
    pub fn get_artifact(&self, fid: &str) -> Result<Artifact> {
        self.load_artifact(fid)
    }

    /// Revision history for one artifact, newest first.
    pub fn history(&self, fid: &str) -> Result<Vec<HistoryEntry>> {
        self.audit_store()?.history(&fid_relative_path(fid))
    }

    /// Current tip of the artifact repository.
    pub fn head(&self) -> Result<Option<String>> {
        self.audit_store()?.head()
    }

    /// Metadata row for one artifact.
    pub fn get_meta(&self, fid: &str) -> Result<Option<MetaRow>> {
        self.meta.get(fid)
    }

    /// All metadata rows.
    pub fn list_artifacts(&self) -> Result<Vec<MetaRow>> {
        self.meta.list_all()
    }

    // ========================================================================
    // EPISODIC PATH
    // ========================================================================

    /// Append an episodic event, optionally linked to artifacts.
    pub fn append_event(&self, event: NewEvent, linked: &[String]) -> Result<i64> {
        if event.kind.trim().is_empty() {
            return Err(MemoryError::Validation("event kind must not be empty".into()));
        }
        for fid in linked {
            if self.meta.get(fid)?.is_none() {
                return Err(MemoryError::NotFound(format!("artifact {}", fid)));
            }
        }
        self.episodic.append(event, linked)
    }

    /// Link an existing event to an artifact as evidence. The event becomes
    /// immune to decay.
    pub fn link_evidence(&self, event_id: i64, fid: &str) -> Result<()> {
        if self.meta.get(fid)?.is_none() {
            return Err(MemoryError::NotFound(format!("artifact {}", fid)));
        }
        self.episodic.link_to_semantic(event_id, fid)
    }

    /// Query the episodic log.
    pub fn events(&self, query: &EventQuery) -> Result<Vec<EpisodicEvent>> {
        self.episodic.query(query)
    }

    /// Direct access for lifecycle engines and tests.
    pub fn episodic(&self) -> &EpisodicLog {
        &self.episodic
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    /// Hybrid search across the memory.
    pub fn search(&self, query: &str, mode: SearchMode, limit: usize) -> Result<SearchOutcome> {
        if query.trim().is_empty() {
            return Err(MemoryError::Validation("query must not be empty".into()));
        }
        if limit == 0 {
            return Err(MemoryError::Validation("limit must be positive".into()));
        }

        let source_limit =
            (limit * SOURCE_LIMIT_MULTIPLIER).clamp(limit, MAX_SOURCE_CANDIDATES);

        // Fast path: short bare terms never need the vector index
        if is_fast_path_query(query) {
            let keyword = self.meta.keyword_search(query, source_limit)?;
            return self.finish_search(keyword, mode, limit, false);
        }

        let keyword = self.meta.keyword_search(query, source_limit)?;

        let (vector, degraded) = match self.embed_query(query) {
            Ok(embedding) => {
                let mut vectors = self
                    .vectors
                    .lock()
                    .map_err(|_| MemoryError::Integrity("Vector index lock poisoned".into()))?;
                if vectors.is_empty() {
                    (Vec::new(), true)
                } else {
                    match vectors.search(&embedding, source_limit) {
                        Ok(hits) => (hits, false),
                        Err(e) => {
                            tracing::warn!("Vector search failed, degrading to keyword: {}", e);
                            (Vec::new(), true)
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Embedding unavailable, degrading to keyword: {}", e);
                (Vec::new(), true)
            }
        };

        let fused = reciprocal_rank_fusion(&keyword, &vector, RRF_K);
        self.finish_search(fused, mode, limit, degraded)
    }

    fn finish_search(
        &self,
        candidates: Vec<(String, f32)>,
        mode: SearchMode,
        limit: usize,
        fallback: bool,
    ) -> Result<SearchOutcome> {
        let fids: Vec<String> = candidates.iter().map(|(fid, _)| fid.clone()).collect();
        let link_stats = self.episodic.count_links_batch(&fids)?;

        let mut scored: Vec<(MetaRow, RankingSignals, f32)> = Vec::new();
        for (fid, retrieval_score) in candidates {
            let Some(row) = self.meta.get(&fid)? else {
                continue;
            };
            if !mode.admits(row.status) {
                continue;
            }
            let ctx = row.context();
            let signals = RankingSignals {
                status: row.status,
                kind: row.kind,
                relayed: ctx.rationale.contains(crate::search::RELAY_MARKER),
                link_count: link_stats.get(&fid).map(|(count, _)| *count).unwrap_or(0),
                confidence: ctx.confidence,
                timestamp: row.timestamp,
            };
            let score = self.policy.calculate(retrieval_score, &signals, mode);
            scored.push((row, signals, score));
        }

        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    crate::search::break_tie((a.0.fid.as_str(), &a.1), (b.0.fid.as_str(), &b.1))
                })
        });
        scored.truncate(limit);

        let mut hits = Vec::with_capacity(scored.len());
        for (row, signals, score) in scored {
            // Hydrate the body from the artifact store; the metadata copy
            // covers a repository that lost the file mid-flight
            let body = self
                .audit_store()
                .and_then(|audit| audit.read(&fid_relative_path(&row.fid)))
                .ok()
                .and_then(|text| parse_artifact(&row.fid, &text).ok().map(|a| a.content))
                .unwrap_or_else(|| row.content.clone());

            if let Err(e) = self.meta.increment_hit(&row.fid) {
                tracing::warn!("Hit counter update failed for {}: {}", row.fid, e);
            }

            hits.push(SearchHit {
                fid: row.fid,
                score,
                title: row.title,
                target: row.target,
                namespace: row.namespace,
                status: row.status,
                kind: row.kind,
                preview: truncate_chars(&body, PREVIEW_CHARS),
                evidence: signals.link_count,
            });
        }

        Ok(SearchOutcome { hits, fallback })
    }

    /// Near-duplicate active decisions for one artifact: cosine above the
    /// threshold, different fid, different target.
    pub fn near_duplicates(&self, fid: &str, threshold: f32) -> Result<Vec<(String, f32)>> {
        let artifact = self.load_artifact(fid)?;
        let embedding = self
            .embed_query(&artifact.embedding_text())
            .map_err(MemoryError::Embedding)?;

        let neighbors = {
            let mut vectors = self
                .vectors
                .lock()
                .map_err(|_| MemoryError::Integrity("Vector index lock poisoned".into()))?;
            vectors
                .search(&embedding, 10)
                .map_err(|e| MemoryError::Embedding(e.to_string()))?
        };

        let mut duplicates = Vec::new();
        for (other_fid, similarity) in neighbors {
            if other_fid == fid || similarity < threshold {
                continue;
            }
            let Some(row) = self.meta.get(&other_fid)? else {
                continue;
            };
            if row.status == ArtifactStatus::Active
                && row.kind == ArtifactKind::Decision
                && row.target != artifact.context.target
            {
                duplicates.push((other_fid, similarity));
            }
        }
        Ok(duplicates)
    }

    // ========================================================================
    // CONFIG & TARGETS
    // ========================================================================

    pub fn get_config_value(&self, key: &str) -> Result<Option<String>> {
        self.meta.get_config(key)
    }

    pub fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        self.meta.set_config(key, value)
    }

    /// Register a canonical target name with aliases.
    pub fn register_target(
        &self,
        name: &str,
        description: &str,
        aliases: &[String],
    ) -> Result<()> {
        let mut targets = self
            .targets
            .lock()
            .map_err(|_| MemoryError::Integrity("Target registry lock poisoned".into()))?;
        targets.register(name, description, aliases)
    }

    /// Known targets similar to the query.
    pub fn suggest_targets(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let targets = self
            .targets
            .lock()
            .map_err(|_| MemoryError::Integrity("Target registry lock poisoned".into()))?;
        Ok(targets.suggest(query, limit))
    }

    /// Aggregate counters.
    pub fn stats(&self) -> Result<MemoryStats> {
        let rows = self.meta.list_all()?;
        let (events_active, events_archived, events_linked) = self.episodic.counts()?;
        let vectors = self
            .vectors
            .lock()
            .map(|v| v.len())
            .unwrap_or(0);

        Ok(MemoryStats {
            total_artifacts: rows.len(),
            active_decisions: rows
                .iter()
                .filter(|r| r.status == ArtifactStatus::Active && r.kind == ArtifactKind::Decision)
                .count(),
            superseded: rows
                .iter()
                .filter(|r| r.status == ArtifactStatus::Superseded)
                .count(),
            deprecated: rows
                .iter()
                .filter(|r| r.status == ArtifactStatus::Deprecated)
                .count(),
            proposals: rows
                .iter()
                .filter(|r| r.kind == ArtifactKind::Proposal)
                .count(),
            events_active,
            events_archived,
            events_linked,
            vectors,
        })
    }

    /// Artifact-store housekeeping, gated to once per 24 hours. Returns
    /// whether a collection actually ran.
    pub fn maintain_store(&self) -> Result<bool> {
        const GC_KEY: &str = "last_git_gc_time";
        const GC_MIN_INTERVAL_SECS: i64 = 24 * 3600;

        let last = self.meta.get_config_i64(GC_KEY, 0)?;
        let now = Utc::now().timestamp();
        if now - last < GC_MIN_INTERVAL_SECS {
            return Ok(false);
        }

        let _guard = RepoLock::acquire(&self.config.storage_path)?;
        self.audit_store()?.gc()?;
        self.meta.set_config(GC_KEY, &now.to_string())?;
        Ok(true)
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    pub(crate) fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Direct access to the metadata index. Most callers want the typed
    /// engine operations instead.
    pub fn meta_store(&self) -> &MetaStore {
        &self.meta
    }

    pub(crate) fn audit_store(&self) -> Result<std::sync::MutexGuard<'_, AuditStore>> {
        self.audit
            .lock()
            .map_err(|_| MemoryError::Integrity("Audit store lock poisoned".into()))
    }

    fn check_trust(&self, source: Source) -> Result<()> {
        if self.config.trust_boundary == TrustBoundary::HumanOnly && source == Source::Agent {
            return Err(MemoryError::TrustBoundary(
                "agent writes are blocked by the human_only policy".into(),
            ));
        }
        Ok(())
    }

    fn normalize_target(&self, target: &str) -> Result<String> {
        let targets = self
            .targets
            .lock()
            .map_err(|_| MemoryError::Integrity("Target registry lock poisoned".into()))?;
        Ok(targets.normalize(target))
    }

    /// Reject a supersession that would close a cycle in the evolution graph.
    fn check_acyclic(&self, new_fid: &str, supersedes: &[String]) -> Result<()> {
        let mut stack: Vec<String> = supersedes.to_vec();
        let mut seen = std::collections::HashSet::new();
        while let Some(fid) = stack.pop() {
            if fid == new_fid {
                return Err(MemoryError::Invariant(format!(
                    "supersession cycle through {}",
                    fid
                )));
            }
            if !seen.insert(fid.clone()) {
                continue;
            }
            if let Some(row) = self.meta.get(&fid)? {
                stack.extend(row.context().supersedes);
            }
        }
        Ok(())
    }

    /// Write artifact bytes and the metadata row, committing immediately.
    fn commit_artifact(&self, artifact: &Artifact, message: &str) -> Result<()> {
        let revision = {
            let mut audit = self.audit_store()?;
            audit.add(
                &artifact.relative_path(),
                &serialize_artifact(artifact),
                message,
            )?
        };
        self.meta.upsert(&MetaRow::from_artifact(artifact))?;
        self.meta.set_config("last_revision", &revision)?;
        Ok(())
    }

    /// Embed and index an artifact. Failures degrade to keyword-only
    /// retrieval for this artifact, they never fail the write.
    fn index_artifact(&self, artifact: &Artifact) {
        let embedding = match self.embedder.get_embedding(&artifact.embedding_text()) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!("Embedding failed for {}: {}", artifact.fid, e);
                return;
            }
        };
        let Ok(mut vectors) = self.vectors.lock() else {
            tracing::warn!("Vector index lock poisoned, skipping {}", artifact.fid);
            return;
        };
        if let Err(e) = vectors.add(&artifact.fid, &embedding) {
            tracing::warn!("Vector add failed for {}: {}", artifact.fid, e);
            return;
        }
        if let Err(e) = vectors.flush_if_dirty() {
            tracing::warn!("Vector index flush failed: {}", e);
        }
    }

    /// Query embedding with a small LRU in front of the provider.
    fn embed_query(&self, query: &str) -> std::result::Result<Vec<f32>, String> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(hit) = cache.get(query) {
                return Ok(hit.clone());
            }
        }
        let embedding = self
            .embedder
            .get_embedding(query)
            .map_err(|e| e.to_string())?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), embedding.clone());
        }
        Ok(embedding)
    }

    fn load_artifact(&self, fid: &str) -> Result<Artifact> {
        let mut audit = self.audit_store()?;
        self.load_artifact_locked(&mut audit, fid)
    }

    fn load_artifact_locked(
        &self,
        audit: &mut AuditStore,
        fid: &str,
    ) -> Result<Artifact> {
        let text = audit.read(&fid_relative_path(fid))?;
        parse_artifact(fid, &text)
    }

    /// Re-embed any indexed artifact missing from the vector index (fresh
    /// clone, discarded index after a model switch). Best effort.
    fn backfill_vectors(&self) {
        let rows = match self.meta.list_all() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Vector backfill skipped: {}", e);
                return;
            }
        };
        let Ok(mut vectors) = self.vectors.lock() else {
            return;
        };
        let mut added = 0usize;
        for row in rows {
            if vectors.contains(&row.fid) {
                continue;
            }
            let ctx = row.context();
            let text = format!("{}\n{}\n{}", ctx.title, ctx.rationale, row.content);
            match self.embedder.get_embedding(&text) {
                Ok(embedding) => {
                    if vectors.add(&row.fid, &embedding).is_ok() {
                        added += 1;
                    }
                }
                Err(e) => {
                    tracing::debug!("Backfill embedding failed for {}: {}", row.fid, e);
                    return;
                }
            }
        }
        if added > 0 {
            tracing::info!("Backfilled {} vectors", added);
            if let Err(e) = vectors.flush_if_dirty() {
                tracing::warn!("Vector index flush failed after backfill: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("storage_path", &self.config.storage_path)
            .field("vector_model", &self.config.vector_model)
            .finish()
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

// ============================================================================
// TESTS
// ============================================================================
