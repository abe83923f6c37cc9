//! Flat vector index with exact inner-product search.
//!
//! Rows are stored densely in insertion order and every query scans all
//! of them, so results are exact and row ids are stable for the life of
//! the file. Row id i corresponds to line i of the chunk log; that
//! alignment is the store's invariant, not this module's.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::error::StoreError;
use crate::persistence;

/// Dense row-major vector storage. The dimension is fixed by the first
/// row added; all later rows must match it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Vector dimension, 0 while the index is empty.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Append rows. The first row ever added fixes the dimension.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), StoreError> {
        for vector in vectors {
            if self.dim == 0 {
                if vector.is_empty() {
                    return Err(StoreError::DimensionMismatch {
                        expected: 1,
                        found: 0,
                    });
                }
                self.dim = vector.len();
            } else if vector.len() != self.dim {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dim,
                    found: vector.len(),
                });
            }
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Exact top-k search by inner product.
    ///
    /// Returns up to k `(row, score)` pairs, highest score first. Ties
    /// keep insertion order. An empty index returns no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, StoreError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                found: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|i| (i, inner_product(query, self.row(i))))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Persist the index as compact JSON via a temp-file rename.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let bytes = serde_json::to_vec(self).map_err(io::Error::other)?;
        persistence::atomic_write(path, &bytes)
    }

    /// Load an index from disk. Returns `Ok(None)` if the file doesn't
    /// exist.
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        persistence::load_json(path)
    }
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
