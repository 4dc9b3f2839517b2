//! Embedding Providers
//!
//! Polymorphic embedding generation behind a small capability trait. The
//! default provider is fully deterministic (token hashing), so the engine
//! works offline; optional features add local ONNX inference and an
//! OpenAI-compatible remote endpoint. A caching wrapper keyed by content
//! hash and a fallback chain compose over any base provider.

use std::sync::Arc;

use crate::config::EngineConfig;

mod cache;
mod hash;
#[cfg(feature = "local-embeddings")]
mod local;
#[cfg(feature = "remote-embeddings")]
mod remote;

pub use cache::{CachedEmbedder, FallbackEmbedder};
pub use hash::HashEmbedder;
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
#[cfg(feature = "remote-embeddings")]
pub use remote::RemoteEmbedder;

/// Default embedding dimensions
pub const DEFAULT_DIMENSIONS: usize = 384;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    /// Failed to initialize the provider
    ProviderInit(String),
    /// Failed to generate an embedding
    Failed(String),
    /// Invalid input (empty, wrong dimension, etc.)
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::ProviderInit(e) => write!(f, "Provider initialization failed: {}", e),
            EmbeddingError::Failed(e) => write!(f, "Embedding generation failed: {}", e),
            EmbeddingError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
        }
    }
}

impl std::error::Error for EmbeddingError {}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Capability set every embedding backend implements
pub trait EmbeddingProvider: Send + Sync {
    /// Provider identifier (also keys the embedding cache)
    fn name(&self) -> &str;
    /// Fixed output dimension
    fn dimensions(&self) -> usize;
    /// Embed one text
    fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Build the provider selected by `vector_model`, wrapping it with the
/// persistent cache when `embedding_cache_path` is configured.
pub fn provider_for(config: &EngineConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let base: Arc<dyn EmbeddingProvider> = match config.vector_model.as_str() {
        model if model.starts_with("hash") => {
            let dims = model
                .split_once('-')
                .and_then(|(_, d)| d.parse().ok())
                .filter(|d| *d > 0)
                .unwrap_or(DEFAULT_DIMENSIONS);
            Arc::new(HashEmbedder::new(dims))
        }
        #[cfg(feature = "local-embeddings")]
        "local" => Arc::new(LocalEmbedder::new()?),
        #[cfg(feature = "remote-embeddings")]
        model if model.starts_with("remote:") => {
            Arc::new(RemoteEmbedder::new(&model["remote:".len()..])?)
        }
        other => {
            return Err(EmbeddingError::ProviderInit(format!(
                "Unknown vector model '{}' (is the matching feature enabled?)",
                other
            )));
        }
    };

    match &config.embedding_cache_path {
        Some(path) => Ok(Arc::new(CachedEmbedder::open(base, path)?)),
        None => Ok(base),
    }
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Normalise a vector to unit length in place
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Provider that always errors. Exercises the keyword-only degradation path.
#[derive(Debug, Default)]
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    fn get_embedding(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Failed("provider offline".into()))
    }
}
