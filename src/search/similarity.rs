use ndarray::{Array2, Axis};
use std::collections::HashMap;
use std::path::Path;

use super::{SimilarityResult, rank};
use crate::embed::{EmbeddingSet, normalize};
use crate::error::{Result, RetrievalError};

/// Threshold used when the caller doesn't pick one.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.3;

/// In-memory cosine search over a dense matrix of normalized embeddings.
///
/// Rows keep the order of the source mapping, which is also the tie-break
/// order for equal scores. Zero-norm vectors can't be compared and are
/// dropped at construction (see [`SimilaritySearch::skipped_ids`]).
#[derive(Debug, Clone)]
pub struct SimilaritySearch {
    ids: Vec<i64>,
    normalized: Array2<f32>,
    positions: HashMap<i64, usize>,
    skipped: Vec<i64>,
}

impl SimilaritySearch {
    /// Load a JSON object of `"<movie id>": [f32, ...]` entries.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).inspect_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "failed to read embeddings");
        })?;
        let value: serde_json::Value = serde_json::from_slice(&raw)?;
        let serde_json::Value::Object(map) = value else {
            tracing::error!(path = %path.display(), "embeddings file is not a mapping");
            return Err(RetrievalError::NotAMapping);
        };

        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            let Ok(id) = key.parse::<i64>() else {
                tracing::warn!(key = %key, "embedding key is not a movie id, skipping");
                continue;
            };
            match serde_json::from_value::<Vec<f32>>(value) {
                Ok(vector) => entries.push((id, vector)),
                Err(e) => tracing::warn!(id, error = %e, "malformed embedding, skipping"),
            }
        }

        let search = Self::from_entries(entries)?;
        tracing::info!(path = %path.display(), count = search.len(), "loaded embeddings");
        Ok(search)
    }

    pub fn from_embeddings(set: &EmbeddingSet) -> Result<Self> {
        let entries = set
            .ids()
            .iter()
            .zip(set.matrix().rows())
            .map(|(&id, row)| (id, row.to_vec()))
            .collect();
        Self::from_entries(entries)
    }

    /// Build from `(id, raw vector)` pairs in the order given.
    pub fn from_entries(entries: Vec<(i64, Vec<f32>)>) -> Result<Self> {
        let dim = entries.first().map_or(0, |(_, v)| v.len());
        let mut ids = Vec::with_capacity(entries.len());
        let mut data = Vec::with_capacity(entries.len() * dim);
        let mut positions = HashMap::with_capacity(entries.len());
        let mut skipped = Vec::new();

        for (id, mut vector) in entries {
            if vector.len() != dim {
                return Err(RetrievalError::shape(format!(
                    "embedding for movie {id} has {} dimensions, expected {dim}",
                    vector.len()
                )));
            }
            if positions.contains_key(&id) {
                return Err(RetrievalError::DuplicateId(id));
            }
            if !normalize(&mut vector) {
                tracing::warn!(id, "embedding has zero norm, excluding from search");
                skipped.push(id);
                continue;
            }
            positions.insert(id, ids.len());
            ids.push(id);
            data.extend_from_slice(&vector);
        }

        let normalized = Array2::from_shape_vec((ids.len(), dim), data)
            .map_err(|e| RetrievalError::shape(e.to_string()))?;
        tracing::debug!(count = ids.len(), dim, "normalized embeddings");
        Ok(Self {
            ids,
            normalized,
            positions,
            skipped,
        })
    }

    /// Movies most similar to `target_id`, best first, never including the
    /// target. Unknown targets yield an empty list.
    pub fn find_similar(
        &self,
        target_id: i64,
        top_k: usize,
        min_similarity: f32,
    ) -> Vec<SimilarityResult> {
        let Some(&pos) = self.positions.get(&target_id) else {
            tracing::warn!(target_id, "target movie not in embeddings");
            return Vec::new();
        };
        let scores = self.similarities(&[pos]);
        let results = self.rank_row(&scores, 0, target_id, top_k, min_similarity);
        tracing::debug!(target_id, found = results.len(), "similarity search");
        results
    }

    pub fn batch_find_similar(
        &self,
        target_ids: &[i64],
        top_k: usize,
    ) -> HashMap<i64, Vec<SimilarityResult>> {
        self.batch_find_similar_with(target_ids, top_k, DEFAULT_MIN_SIMILARITY)
    }

    /// [`Self::find_similar`] for many targets, scored with one matrix product.
    pub fn batch_find_similar_with(
        &self,
        target_ids: &[i64],
        top_k: usize,
        min_similarity: f32,
    ) -> HashMap<i64, Vec<SimilarityResult>> {
        let mut results = HashMap::with_capacity(target_ids.len());
        let mut known = Vec::with_capacity(target_ids.len());
        for &id in target_ids {
            match self.positions.get(&id) {
                Some(&pos) => known.push((id, pos)),
                None => {
                    tracing::warn!(target_id = id, "target movie not in embeddings");
                    results.insert(id, Vec::new());
                }
            }
        }

        if !known.is_empty() {
            let positions: Vec<usize> = known.iter().map(|&(_, pos)| pos).collect();
            let scores = self.similarities(&positions);
            for (row, &(id, _)) in known.iter().enumerate() {
                results.insert(id, self.rank_row(&scores, row, id, top_k, min_similarity));
            }
        }

        tracing::info!(targets = target_ids.len(), "batch similarity search completed");
        results
    }

    /// Cosine similarity of each target row against every stored row.
    fn similarities(&self, positions: &[usize]) -> Array2<f32> {
        let targets = self.normalized.select(Axis(0), positions);
        targets.dot(&self.normalized.t())
    }

    fn rank_row(
        &self,
        scores: &Array2<f32>,
        row: usize,
        target_id: i64,
        top_k: usize,
        min_similarity: f32,
    ) -> Vec<SimilarityResult> {
        rank(
            self.ids.iter().copied().zip(scores.row(row).iter().copied()),
            top_k,
            min_similarity,
            Some(target_id),
        )
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.normalized.ncols()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.positions.contains_key(&id)
    }

    /// Ids dropped because their vectors had zero length.
    pub fn skipped_ids(&self) -> &[i64] {
        &self.skipped
    }
}

/// Write `set` as the JSON id → vector mapping [`SimilaritySearch::load`] reads.
pub fn write_mapping(set: &EmbeddingSet, path: &Path) -> Result<()> {
    let mut map = serde_json::Map::with_capacity(set.len());
    for (id, row) in set.ids().iter().zip(set.matrix().rows()) {
        map.insert(id.to_string(), serde_json::to_value(row.to_vec())?);
    }
    let bytes = serde_json::to_vec(&serde_json::Value::Object(map))?;
    crate::store::write_atomic(path, &bytes)?;
    tracing::info!(path = %path.display(), count = set.len(), "saved embeddings mapping");
    Ok(())
}
