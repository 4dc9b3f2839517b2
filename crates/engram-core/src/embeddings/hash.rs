//! Deterministic hash-based embeddings
//!
//! Bag-of-words token hashing: each token lands in a signed bucket derived
//! from its digest, the result is L2-normalised. Identical texts embed
//! identically, texts sharing vocabulary land close, and no model weights or
//! network access are needed. This is the engine's default provider and the
//! mock used throughout the tests.

use sha2::{Digest, Sha256};

use super::{l2_normalize, EmbeddingError, EmbeddingProvider};

/// Deterministic embedding provider
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
    name: String,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            name: format!("hash-{}", dimensions),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(super::DEFAULT_DIMENSIONS)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".into()));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dimensions;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}
