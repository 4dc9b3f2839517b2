//! Engine harness on a temp directory

use std::path::Path;
use std::sync::Arc;

use engram_core::{
    Artifact, EmbeddingProvider, EngineConfig, MemoryEngine, RecordDecisionInput, Source,
    SupersedeInput,
};
use tempfile::TempDir;

/// A live engine rooted in a temp directory that cleans up on drop.
pub struct EngineHarness {
    dir: TempDir,
    pub engine: MemoryEngine,
}

impl EngineHarness {
    /// Engine without the revision subsystem: fastest, used by most tests.
    pub fn plain() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut config = EngineConfig::at(dir.path());
        config.enable_git = false;
        let engine = MemoryEngine::open(config).expect("engine init");
        Self { dir, engine }
    }

    /// Engine with the git-backed artifact store.
    pub fn with_git() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = EngineConfig::at(dir.path());
        let engine = MemoryEngine::open(config).expect("engine init");
        Self { dir, engine }
    }

    /// Engine with an injected embedding provider.
    pub fn with_provider(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut config = EngineConfig::at(dir.path());
        config.enable_git = false;
        let engine = MemoryEngine::open_with_provider(config, provider).expect("engine init");
        Self { dir, engine }
    }

    pub fn storage_path(&self) -> &Path {
        self.dir.path()
    }

    /// Drop the engine and reopen over the same storage, as a process
    /// restart would.
    pub fn reopen(self) -> Self {
        let Self { dir, engine } = self;
        let config = engine.config().clone();
        drop(engine);
        let engine = MemoryEngine::open(config).expect("engine reopen");
        Self { dir, engine }
    }

    /// Record a decision with a default rationale.
    pub fn record(&self, title: &str, target: &str) -> Artifact {
        self.engine
            .record_decision(RecordDecisionInput {
                title: title.into(),
                target: target.into(),
                rationale: format!("Recorded because {} needed settling", target),
                consequences: Some(format!("{} consequences", title)),
                source: Source::User,
                ..Default::default()
            })
            .expect("record_decision")
    }

    /// Supersede a single predecessor.
    pub fn supersede(&self, title: &str, target: &str, old_fid: &str) -> Artifact {
        self.engine
            .supersede_decision(SupersedeInput {
                title: title.into(),
                target: target.into(),
                rationale: format!("Superseding {} after new evidence arrived", old_fid),
                consequences: Some(format!("{} consequences", title)),
                source: Source::User,
                old_fids: vec![old_fid.into()],
                ..Default::default()
            })
            .expect("supersede_decision")
    }
}
