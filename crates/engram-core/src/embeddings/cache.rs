//! Caching and fallback wrappers over embedding providers

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::{EmbeddingError, EmbeddingProvider};

// ============================================================================
// CACHING PROVIDER
// ============================================================================

/// Wraps any provider with a persistent content-hash keyed store, so repeat
/// embeddings of the same text cost one database read.
pub struct CachedEmbedder {
    base: Arc<dyn EmbeddingProvider>,
    conn: Mutex<Connection>,
    name: String,
}

impl CachedEmbedder {
    /// Open (or create) the cache database at `path`.
    pub fn open(
        base: Arc<dyn EmbeddingProvider>,
        path: &Path,
    ) -> Result<Self, EmbeddingError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EmbeddingError::ProviderInit(e.to_string()))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| EmbeddingError::ProviderInit(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS emb_cache (
                text_hash TEXT PRIMARY KEY,
                embedding BLOB NOT NULL
            );",
        )
        .map_err(|e| EmbeddingError::ProviderInit(e.to_string()))?;

        let name = format!("cached({})", base.name());
        Ok(Self {
            base,
            conn: Mutex::new(conn),
            name,
        })
    }

    /// Cache key: provider identity and dimension are part of the hash so a
    /// model switch never serves stale vectors.
    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.base.name().as_bytes());
        hasher.update(b"|");
        hasher.update(self.base.dimensions().to_le_bytes());
        hasher.update(b"|");
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        let conn = self.conn.lock().ok()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM emb_cache WHERE text_hash = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .ok()?;
        blob.map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        })
    }

    fn store(&self, key: &str, vector: &[f32]) {
        let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        if let Ok(conn) = self.conn.lock() {
            if let Err(e) = conn.execute(
                "INSERT OR REPLACE INTO emb_cache (text_hash, embedding) VALUES (?1, ?2)",
                params![key, bytes],
            ) {
                tracing::warn!("Embedding cache write failed: {}", e);
            }
        }
    }
}

impl EmbeddingProvider for CachedEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.base.dimensions()
    }

    fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = self.cache_key(text);
        if let Some(cached) = self.lookup(&key) {
            return Ok(cached);
        }
        let vector = self.base.get_embedding(text)?;
        self.store(&key, &vector);
        Ok(vector)
    }
}

// ============================================================================
// FALLBACK PROVIDER
// ============================================================================

/// Iterates an ordered provider list, returning the first success.
pub struct FallbackEmbedder {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    name: String,
}

impl FallbackEmbedder {
    /// The list must be non-empty; all providers must share a dimension.
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>) -> Result<Self, EmbeddingError> {
        let first = providers
            .first()
            .ok_or_else(|| EmbeddingError::ProviderInit("empty provider list".into()))?;
        let dims = first.dimensions();
        if providers.iter().any(|p| p.dimensions() != dims) {
            return Err(EmbeddingError::ProviderInit(
                "fallback providers disagree on dimensions".into(),
            ));
        }
        let name = format!(
            "fallback({})",
            providers
                .iter()
                .map(|p| p.name())
                .collect::<Vec<_>>()
                .join(",")
        );
        Ok(Self { providers, name })
    }
}

impl EmbeddingProvider for FallbackEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.providers[0].dimensions()
    }

    fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut last_error = EmbeddingError::Failed("no provider attempted".into());
        for provider in &self.providers {
            match provider.get_embedding(text) {
                Ok(vector) => return Ok(vector),
                Err(e) => {
                    tracing::debug!("Provider {} failed: {}", provider.name(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}
