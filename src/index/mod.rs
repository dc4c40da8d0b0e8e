//! Exact inner-product vector index.
//!
//! Vectors live in a dense matrix whose rows are slots; a side table maps
//! slots to movie ids. Embeddings are normalized upstream, so the inner
//! product is the cosine similarity. An index is immutable once built:
//! rebuilds produce a new one and swap it in through [`handle::IndexHandle`].

pub mod handle;

use ndarray::{Array2, ArrayD, ArrayView1, Ix2};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::embed::EmbeddingSet;
use crate::error::{Result, RetrievalError};
use crate::search::{self, SimilarityResult};
use crate::store::sqlite::IndexStore;
use crate::store::tmp_path;

pub const INDEX_KIND: &str = "flat-ip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub count: usize,
    pub dimension: usize,
    /// Flat indexes need no training; kept for parity with trained index kinds.
    pub is_trained: bool,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    matrix: Array2<f32>,
    ids: Vec<i64>,
    slots: HashMap<i64, usize>,
}

impl VectorIndex {
    pub fn build(matrix: Array2<f32>, ids: Vec<i64>) -> Result<Self> {
        if ids.len() != matrix.nrows() {
            return Err(RetrievalError::shape(format!(
                "number of ids ({}) must match number of embeddings ({})",
                ids.len(),
                matrix.nrows()
            )));
        }

        let mut slots = HashMap::with_capacity(ids.len());
        for (slot, &id) in ids.iter().enumerate() {
            if slots.insert(id, slot).is_some() {
                return Err(RetrievalError::DuplicateId(id));
            }
        }

        tracing::info!(count = ids.len(), dim = matrix.ncols(), "built vector index");
        Ok(Self { matrix, ids, slots })
    }

    /// Build from an array of unknown rank; anything but a 2-D matrix is a shape error.
    pub fn build_dyn(matrix: ArrayD<f32>, ids: Vec<i64>) -> Result<Self> {
        let ndim = matrix.ndim();
        let matrix = matrix.into_dimensionality::<Ix2>().map_err(|_| {
            RetrievalError::shape(format!("embeddings must be a 2-D matrix, got {ndim} dimensions"))
        })?;
        Self::build(matrix, ids)
    }

    pub fn from_embeddings(set: EmbeddingSet) -> Result<Self> {
        let (matrix, ids) = set.into_parts();
        Self::build(matrix, ids)
    }

    /// Persist to `path`, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = tmp_path(path);
        if tmp.exists() {
            std::fs::remove_file(&tmp)?;
        }
        {
            let mut store = IndexStore::create(&tmp)?;
            store.write(INDEX_KIND, &self.ids, &self.matrix)?;
        }
        std::fs::rename(&tmp, path)?;
        tracing::info!(path = %path.display(), count = self.len(), "saved vector index");
        Ok(())
    }

    /// Load a saved index. A missing file is [`RetrievalError::IndexNotFound`].
    pub fn load(path: &Path) -> Result<Self> {
        let stored = IndexStore::open(path)?.read()?;
        if stored.kind != INDEX_KIND {
            return Err(RetrievalError::corrupt(format!(
                "unsupported index kind {:?}",
                stored.kind
            )));
        }
        let index = Self::build(stored.matrix, stored.ids)?;
        tracing::info!(path = %path.display(), count = index.len(), "loaded vector index");
        Ok(index)
    }

    /// Top `top_k` ids by inner product with `query`, best first, dropping
    /// scores under `min_similarity`. The query itself is never excluded.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SimilarityResult>> {
        self.search_view(ArrayView1::from(query), top_k, min_similarity)
    }

    /// Like [`Self::search`] for a query of unknown rank; it must be 1-D.
    pub fn search_dyn(
        &self,
        query: &ArrayD<f32>,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SimilarityResult>> {
        let query = query.view().into_dimensionality::<ndarray::Ix1>().map_err(|_| {
            RetrievalError::shape(format!(
                "query embedding must be a 1-D array, got {} dimensions",
                query.ndim()
            ))
        })?;
        self.search_view(query, top_k, min_similarity)
    }

    fn search_view(
        &self,
        query: ArrayView1<'_, f32>,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SimilarityResult>> {
        if query.len() != self.dimension() {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let scores = self.matrix.dot(&query);
        Ok(search::rank(
            self.ids.iter().copied().zip(scores.iter().copied()),
            top_k,
            min_similarity,
            None,
        ))
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            count: self.len(),
            dimension: self.dimension(),
            is_trained: true,
        }
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

    pub fn contains(&self, id: i64) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Stored vector for `id`.
    pub fn vector(&self, id: i64) -> Option<ArrayView1<'_, f32>> {
        self.slots.get(&id).map(|&slot| self.matrix.row(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{IxDyn, array};

    /// Five unit vectors in 3-D with known pairwise angles.
    fn five() -> (Array2<f32>, Vec<i64>) {
        let m = array![
            [1.0f32, 0.0, 0.0],
            [0.8, 0.6, 0.0],
            [0.0, 1.0, 0.0],
            [0.6, 0.8, 0.0],
            [0.0, 0.0, 1.0],
        ];
        (m, vec![1, 2, 3, 4, 5])
    }

    fn ids(results: &[SimilarityResult]) -> Vec<i64> {
        results.iter().map(|r| r.id).collect()
    }

    #[test]
    fn build_rejects_id_row_mismatch() {
        let (m, _) = five();
        let m = m.slice(ndarray::s![..4, ..]).to_owned();
        let err = VectorIndex::build(m, vec![1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(err, RetrievalError::Shape(_)));
    }

    #[test]
    fn build_rejects_non_matrix() {
        let cube = ArrayD::<f32>::zeros(IxDyn(&[2, 2, 2]));
        assert!(matches!(
            VectorIndex::build_dyn(cube, vec![1, 2]),
            Err(RetrievalError::Shape(_))
        ));
    }

    #[test]
    fn build_rejects_duplicate_ids() {
        let (m, _) = five();
        let err = VectorIndex::build(m, vec![1, 2, 3, 2, 5]).unwrap_err();
        assert!(matches!(err, RetrievalError::DuplicateId(2)));
    }

    #[test]
    fn search_includes_query_point() {
        let (m, id_list) = five();
        let index = VectorIndex::build(m, id_list).unwrap();
        let query = [0.0f32, 1.0, 0.0];

        let results = index.search(&query, 3, 0.0).unwrap();
        assert_eq!(ids(&results), vec![3, 4, 2]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[1].score - 0.8).abs() < 1e-6);
        assert!((results[2].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn search_applies_threshold() {
        let (m, id_list) = five();
        let index = VectorIndex::build(m, id_list).unwrap();
        let results = index.search(&[1.0, 0.0, 0.0], 5, 0.7).unwrap();
        assert_eq!(ids(&results), vec![1, 2]);
    }

    #[test]
    fn top_k_beyond_size_returns_only_real_hits() {
        let index = VectorIndex::build(array![[1.0f32, 0.0], [0.0, 1.0]], vec![7, 8]).unwrap();
        let results = index.search(&[1.0, 0.0], 10, -1.0).unwrap();
        assert_eq!(ids(&results), vec![7, 8]);
    }

    #[test]
    fn search_rejects_wrong_dimension() {
        let (m, id_list) = five();
        let index = VectorIndex::build(m, id_list).unwrap();
        let err = index.search(&[1.0, 0.0], 3, 0.0).unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn search_rejects_non_vector_query() {
        let (m, id_list) = five();
        let index = VectorIndex::build(m, id_list).unwrap();
        let query = ArrayD::<f32>::zeros(IxDyn(&[1, 3]));
        assert!(matches!(
            index.search_dyn(&query, 3, 0.0),
            Err(RetrievalError::Shape(_))
        ));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector_index.db");
        let (m, id_list) = five();
        let index = VectorIndex::build(m, id_list).unwrap();
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.stats(), index.stats());
        assert_eq!(loaded.ids(), index.ids());
        assert_eq!(
            loaded.search(&[0.0, 1.0, 0.0], 2, 0.0).unwrap(),
            index.search(&[0.0, 1.0, 0.0], 2, 0.0).unwrap()
        );
    }

    #[test]
    fn save_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector_index.db");
        let (m, id_list) = five();
        VectorIndex::build(m, id_list).unwrap().save(&path).unwrap();
        VectorIndex::build(array![[1.0f32, 0.0]], vec![42]).unwrap().save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.ids(), &[42]);
        assert_eq!(loaded.dimension(), 2);
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = VectorIndex::load(&dir.path().join("nope.db")).unwrap_err();
        assert!(matches!(err, RetrievalError::IndexNotFound(_)));
    }

    #[test]
    fn vector_lookup_by_id() {
        let (m, id_list) = five();
        let index = VectorIndex::build(m, id_list).unwrap();
        assert!(index.contains(4));
        assert_eq!(index.vector(4).unwrap().to_vec(), vec![0.6, 0.8, 0.0]);
        assert!(index.vector(99).is_none());
    }
}
