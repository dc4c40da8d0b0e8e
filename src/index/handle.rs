use std::path::Path;
use std::sync::Arc;

use super::{IndexStats, VectorIndex};
use crate::embed::EmbeddingSet;
use crate::error::{Result, RetrievalError};
use crate::search::SimilarityResult;
use crate::snapshot::Shared;

/// The index currently served to readers. Rebuilds and reloads construct a
/// fresh [`VectorIndex`] off to the side and swap it in.
#[derive(Default)]
pub struct IndexHandle {
    inner: Shared<VectorIndex>,
}

impl IndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(index: VectorIndex) -> Self {
        Self {
            inner: Shared::with(index),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.inner.get()
    }

    /// Build a new index from `set` and publish it.
    pub fn rebuild(&self, set: EmbeddingSet) -> Result<Arc<VectorIndex>> {
        let index = Arc::new(VectorIndex::from_embeddings(set)?);
        self.inner.publish(Arc::clone(&index));
        Ok(index)
    }

    /// Load an index file and publish it. On failure the current index stays.
    pub fn load(&self, path: &Path) -> Result<()> {
        let index = VectorIndex::load(path)?;
        self.inner.replace(index);
        Ok(())
    }

    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SimilarityResult>> {
        let index = self.snapshot().ok_or(RetrievalError::NotInitialized)?;
        index.search(query, top_k, min_similarity)
    }

    /// `None` until an index is published.
    pub fn stats(&self) -> Option<IndexStats> {
        self.snapshot().map(|index| index.stats())
    }

    pub fn size(&self) -> usize {
        self.snapshot().map_or(0, |index| index.len())
    }
}
