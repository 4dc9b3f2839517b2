//! Approximate nearest-neighbour index (HNSW via USearch)
//!
//! Built lazily from the dense matrix once the brute-force path stops being
//! economical; any mutation of the owning index invalidates it.

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::VectorIndexError;

/// HNSW connectivity parameter (higher = better recall, more memory)
const CONNECTIVITY: usize = 16;
/// Expansion factor for index building
const EXPANSION_ADD: usize = 128;
/// Expansion factor for search (higher = better recall, slower)
const EXPANSION_SEARCH: usize = 64;

/// Approximate index over the rows of a dense matrix
pub struct AnnIndex {
    index: Index,
    /// Row order at build time; USearch keys are row indices
    keys: Vec<String>,
}

impl AnnIndex {
    /// Build from a row-major matrix of unit-length vectors.
    pub fn build(
        dimensions: usize,
        ids: &[String],
        matrix: &[f32],
    ) -> Result<Self, VectorIndexError> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: CONNECTIVITY,
            expansion_add: EXPANSION_ADD,
            expansion_search: EXPANSION_SEARCH,
            multi: false,
        };
        let index =
            Index::new(&options).map_err(|e| VectorIndexError::Index(e.to_string()))?;
        index
            .reserve(ids.len())
            .map_err(|e| VectorIndexError::Index(e.to_string()))?;

        for (row, vector) in matrix.chunks_exact(dimensions).enumerate() {
            index
                .add(row as u64, vector)
                .map_err(|e| VectorIndexError::Index(e.to_string()))?;
        }

        Ok(Self {
            index,
            keys: ids.to_vec(),
        })
    }

    /// Top-`limit` rows by cosine similarity.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>, VectorIndexError> {
        let matches = self
            .index
            .search(query, limit)
            .map_err(|e| VectorIndexError::Index(e.to_string()))?;

        let mut results = Vec::with_capacity(matches.keys.len());
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            if let Some(id) = self.keys.get(*key as usize) {
                // Cosine distance -> similarity
                results.push((id.clone(), 1.0 - distance));
            }
        }
        Ok(results)
    }
}
