//! Vector Index
//!
//! Nearest-neighbour retrieval over artifact embeddings. Rows are
//! L2-normalised on insert so cosine similarity reduces to a dot product.
//! Brute-force top-k carries the index up to a few tens of thousands of
//! vectors; past that the optional HNSW feature swaps in an approximate
//! graph index built from the same matrix.
//!
//! On disk the index is two files: a dense little-endian f32 matrix blob and
//! a JSON sidecar recording dimension and row order. Rebuilds write adjacent
//! files and atomically rename; a mismatched pair (crash between renames) is
//! discarded at load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::embeddings::l2_normalize;

#[cfg(feature = "hnsw")]
mod hnsw;

/// Vector count above which the approximate index takes over (when built)
pub const ANN_THRESHOLD: usize = 20_000;

const MATRIX_FILE: &str = "index.bin";
const SIDECAR_FILE: &str = "index.ids.json";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector index error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum VectorIndexError {
    /// Dimension mismatch
    InvalidDimensions(usize, usize),
    /// Failed to persist or load index files
    Persistence(String),
    /// Approximate index failure
    Index(String),
}

impl std::fmt::Display for VectorIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorIndexError::InvalidDimensions(expected, got) => {
                write!(f, "Invalid dimensions: expected {}, got {}", expected, got)
            }
            VectorIndexError::Persistence(e) => write!(f, "Persistence failed: {}", e),
            VectorIndexError::Index(e) => write!(f, "Index failure: {}", e),
        }
    }
}

impl std::error::Error for VectorIndexError {}

/// Index statistics
#[derive(Debug, Clone)]
pub struct VectorIndexStats {
    pub total_vectors: usize,
    pub dimensions: usize,
    pub dirty: bool,
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    dimensions: usize,
    ids: Vec<String>,
}

// ============================================================================
// VECTOR INDEX
// ============================================================================

/// Dense in-memory vector index with file persistence
pub struct VectorIndex {
    dir: PathBuf,
    dimensions: usize,
    ids: Vec<String>,
    id_to_row: HashMap<String, usize>,
    /// Row-major, rows unit-length
    matrix: Vec<f32>,
    /// Unsaved mutations pending
    dirty: bool,
    #[cfg(feature = "hnsw")]
    ann: Option<hnsw::AnnIndex>,
}

impl VectorIndex {
    /// Open the index at `dir`, loading persisted files when present. A
    /// dimension change (model switch) discards the persisted index.
    pub fn open(dir: &Path, dimensions: usize) -> Result<Self, VectorIndexError> {
        if dimensions == 0 {
            return Err(VectorIndexError::InvalidDimensions(1, 0));
        }
        std::fs::create_dir_all(dir)
            .map_err(|e| VectorIndexError::Persistence(e.to_string()))?;

        let mut index = Self {
            dir: dir.to_path_buf(),
            dimensions,
            ids: Vec::new(),
            id_to_row: HashMap::new(),
            matrix: Vec::new(),
            dirty: false,
            #[cfg(feature = "hnsw")]
            ann: None,
        };

        if let Err(e) = index.load() {
            tracing::warn!("Discarding persisted vector index: {}", e);
            index.ids.clear();
            index.id_to_row.clear();
            index.matrix.clear();
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_to_row.contains_key(id)
    }

    pub fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            total_vectors: self.len(),
            dimensions: self.dimensions,
            dirty: self.dirty,
        }
    }

    /// Insert or replace a vector. Idempotent per id.
    pub fn add(&mut self, id: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions(
                self.dimensions,
                vector.len(),
            ));
        }
        let mut normalized = vector.to_vec();
        l2_normalize(&mut normalized);

        match self.id_to_row.get(id) {
            Some(&row) => {
                let start = row * self.dimensions;
                self.matrix[start..start + self.dimensions].copy_from_slice(&normalized);
            }
            None => {
                self.id_to_row.insert(id.to_string(), self.ids.len());
                self.ids.push(id.to_string());
                self.matrix.extend_from_slice(&normalized);
            }
        }
        self.mark_dirty();
        Ok(())
    }

    /// Remove a vector by id; the last row backfills the hole.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(row) = self.id_to_row.remove(id) else {
            return false;
        };
        let last = self.ids.len() - 1;
        if row != last {
            let moved_id = self.ids[last].clone();
            let (head, tail) = self.matrix.split_at_mut(last * self.dimensions);
            head[row * self.dimensions..(row + 1) * self.dimensions]
                .copy_from_slice(&tail[..self.dimensions]);
            self.ids.swap(row, last);
            self.id_to_row.insert(moved_id, row);
        }
        self.ids.pop();
        self.matrix.truncate(last * self.dimensions);
        self.mark_dirty();
        true
    }

    /// Top-`limit` most similar ids with cosine scores, best first.
    pub fn search(
        &mut self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>, VectorIndexError> {
        if query.len() != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions(
                self.dimensions,
                query.len(),
            ));
        }
        if self.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);

        #[cfg(feature = "hnsw")]
        if self.len() > ANN_THRESHOLD {
            return self.ann_search(&normalized, limit);
        }

        Ok(self.brute_force(&normalized, limit))
    }

    fn brute_force(&self, query: &[f32], limit: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .matrix
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(row, vec)| {
                let dot: f32 = vec.iter().zip(query).map(|(a, b)| a * b).sum();
                (row, dot)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(limit)
            .map(|(row, score)| (self.ids[row].clone(), score))
            .collect()
    }

    #[cfg(feature = "hnsw")]
    fn ann_search(
        &mut self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>, VectorIndexError> {
        if self.ann.is_none() {
            self.ann = Some(hnsw::AnnIndex::build(
                self.dimensions,
                &self.ids,
                &self.matrix,
            )?);
        }
        // The index is rebuilt on mutation, so unwrap is safe here
        self.ann
            .as_ref()
            .expect("ann index built above")
            .search(query, limit)
    }

    /// Replace the whole index contents.
    pub fn rebuild(
        &mut self,
        entries: Vec<(String, Vec<f32>)>,
    ) -> Result<(), VectorIndexError> {
        self.ids.clear();
        self.id_to_row.clear();
        self.matrix.clear();
        for (id, vector) in entries {
            self.add(&id, &vector)?;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Persist to disk: adjacent temp files, then atomic renames.
    pub fn save(&mut self) -> Result<(), VectorIndexError> {
        let matrix_path = self.dir.join(MATRIX_FILE);
        let sidecar_path = self.dir.join(SIDECAR_FILE);
        let matrix_tmp = matrix_path.with_extension("bin.tmp");
        let sidecar_tmp = sidecar_path.with_extension("json.tmp");

        let bytes: Vec<u8> = self.matrix.iter().flat_map(|f| f.to_le_bytes()).collect();
        std::fs::write(&matrix_tmp, &bytes)
            .map_err(|e| VectorIndexError::Persistence(e.to_string()))?;

        let sidecar = Sidecar {
            dimensions: self.dimensions,
            ids: self.ids.clone(),
        };
        let json = serde_json::to_string(&sidecar)
            .map_err(|e| VectorIndexError::Persistence(e.to_string()))?;
        std::fs::write(&sidecar_tmp, json)
            .map_err(|e| VectorIndexError::Persistence(e.to_string()))?;

        std::fs::rename(&matrix_tmp, &matrix_path)
            .map_err(|e| VectorIndexError::Persistence(e.to_string()))?;
        std::fs::rename(&sidecar_tmp, &sidecar_path)
            .map_err(|e| VectorIndexError::Persistence(e.to_string()))?;

        self.dirty = false;
        Ok(())
    }

    /// Save only when mutations are pending.
    pub fn flush_if_dirty(&mut self) -> Result<(), VectorIndexError> {
        if self.dirty {
            self.save()?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), VectorIndexError> {
        let matrix_path = self.dir.join(MATRIX_FILE);
        let sidecar_path = self.dir.join(SIDECAR_FILE);
        if !matrix_path.is_file() || !sidecar_path.is_file() {
            return Ok(());
        }

        let json = std::fs::read_to_string(&sidecar_path)
            .map_err(|e| VectorIndexError::Persistence(e.to_string()))?;
        let sidecar: Sidecar = serde_json::from_str(&json)
            .map_err(|e| VectorIndexError::Persistence(e.to_string()))?;
        if sidecar.dimensions != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions(
                self.dimensions,
                sidecar.dimensions,
            ));
        }

        let bytes = std::fs::read(&matrix_path)
            .map_err(|e| VectorIndexError::Persistence(e.to_string()))?;
        let expected = sidecar.ids.len() * self.dimensions * 4;
        if bytes.len() != expected {
            return Err(VectorIndexError::Persistence(format!(
                "matrix blob is {} bytes, sidecar implies {}",
                bytes.len(),
                expected
            )));
        }

        self.matrix = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        self.id_to_row = sidecar
            .ids
            .iter()
            .enumerate()
            .map(|(row, id)| (id.clone(), row))
            .collect();
        self.ids = sidecar.ids;
        self.dirty = false;
        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        #[cfg(feature = "hnsw")]
        {
            self.ann = None;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
