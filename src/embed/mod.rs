pub mod engine;
pub mod hashing;
pub mod ollama;

use anyhow::Result;
use ndarray::{Array2, ArrayView1};

use crate::error::RetrievalError;

pub type Embedding = Vec<f32>;

/// A matrix of embeddings with one movie id per row.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSet {
    matrix: Array2<f32>,
    ids: Vec<i64>,
}

impl EmbeddingSet {
    pub fn new(matrix: Array2<f32>, ids: Vec<i64>) -> crate::Result<Self> {
        if matrix.nrows() != ids.len() {
            return Err(RetrievalError::shape(format!(
                "{} ids for {} embedding rows",
                ids.len(),
                matrix.nrows()
            )));
        }
        Ok(Self { matrix, ids })
    }

    /// Stack equal-length rows into a matrix.
    pub fn from_rows(rows: Vec<Embedding>, ids: Vec<i64>) -> crate::Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        let n = rows.len();
        let mut data = Vec::with_capacity(n * dim);
        for (row, id) in rows.iter().zip(&ids) {
            if row.len() != dim {
                return Err(RetrievalError::shape(format!(
                    "embedding for movie {id} has {} dimensions, expected {dim}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        let matrix = Array2::from_shape_vec((n, dim), data)
            .map_err(|e| RetrievalError::shape(e.to_string()))?;
        Self::new(matrix, ids)
    }

    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f32> {
        self.matrix.row(i)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn into_parts(self) -> (Array2<f32>, Vec<i64>) {
        (self.matrix, self.ids)
    }
}

/// Anything that turns text into fixed-length vectors. The engine treats
/// implementations as black boxes; they must be deterministic per text.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Embedding>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// Tolerance used when checking that a vector has unit length.
pub const NORM_EPSILON: f32 = 1e-5;

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place. Returns false (leaving `v` untouched)
/// for zero or non-finite norms, which have no direction to keep.
pub fn normalize(v: &mut [f32]) -> bool {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}
