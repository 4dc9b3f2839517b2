//! Local Semantic Embeddings
//!
//! fastembed-based local inference (ONNX). Model: all-MiniLM-L6-v2, 384
//! dimensions. The model is process-global; initialization happens once and
//! its outcome is cached, including failure.

use std::sync::{Mutex, MutexGuard, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{EmbeddingError, EmbeddingProvider, DEFAULT_DIMENSIONS};

/// Maximum text length fed to the model; longer inputs are truncated
const MAX_TEXT_LENGTH: usize = 8192;

static EMBEDDING_MODEL_RESULT: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "engram", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn get_model() -> Result<MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = EMBEDDING_MODEL_RESULT.get_or_init(|| {
        let cache_dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("Failed to create model cache directory {:?}: {}", cache_dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false)
            .with_cache_dir(cache_dir);

        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!(
                "Failed to initialize all-MiniLM-L6-v2: {}. \
                 Ensure ONNX runtime is available and model files can be downloaded.",
                e
            )
        })
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::ProviderInit(format!("Model lock poisoned: {}", e))),
        Err(err) => Err(EmbeddingError::ProviderInit(err.clone())),
    }
}

/// Local ONNX embedding provider
#[derive(Debug)]
pub struct LocalEmbedder {
    name: String,
}

impl LocalEmbedder {
    pub fn new() -> Result<Self, EmbeddingError> {
        Ok(Self {
            name: "local/all-MiniLM-L6-v2".to_string(),
        })
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".into()));
        }
        let truncated = if text.len() > MAX_TEXT_LENGTH {
            let mut end = MAX_TEXT_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let mut model = get_model()?;
        let mut vectors = model
            .embed(vec![truncated.to_string()], None)
            .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Failed("model returned no vectors".into()))
    }
}
