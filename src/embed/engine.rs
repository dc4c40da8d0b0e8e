use std::collections::HashSet;

use super::{Embedder, Embedding, EmbeddingSet, normalize};
use crate::error::{Result, RetrievalError};
use crate::movie::{MovieRecord, compose_text};
use crate::store::cache::EmbeddingCache;

/// Turns movie metadata into unit-length embeddings, reusing the on-disk
/// cache when it was produced by the same model and version.
pub struct EmbeddingEngine {
    embedder: Box<dyn Embedder>,
    cache: Option<EmbeddingCache>,
    version: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateStats {
    pub accepted: usize,
    pub skipped: usize,
    pub from_cache: bool,
}

impl EmbeddingEngine {
    pub fn new(embedder: Box<dyn Embedder>, version: impl Into<String>) -> Self {
        Self {
            embedder,
            cache: None,
            version: version.into(),
        }
    }

    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn generate(
        &self,
        movies: &[MovieRecord],
        batch_size: usize,
        use_cache: bool,
    ) -> Result<EmbeddingSet> {
        self.generate_with_stats(movies, batch_size, use_cache)
            .map(|(set, _)| set)
    }

    /// Embed `movies`, one row per accepted record in input order.
    ///
    /// Records without an id (or repeating an earlier id) are skipped with a
    /// warning, as are records whose embedding has zero length. Cache writes
    /// are best effort.
    pub fn generate_with_stats(
        &self,
        movies: &[MovieRecord],
        batch_size: usize,
        use_cache: bool,
    ) -> Result<(EmbeddingSet, GenerateStats)> {
        if movies.is_empty() {
            return Err(RetrievalError::EmptyInput);
        }
        if batch_size == 0 {
            return Err(RetrievalError::shape("batch_size must be at least 1"));
        }

        if use_cache {
            if let Some(set) = self
                .cache
                .as_ref()
                .and_then(|cache| cache.load(self.model_name(), &self.version))
            {
                let stats = GenerateStats {
                    accepted: set.len(),
                    skipped: 0,
                    from_cache: true,
                };
                return Ok((set, stats));
            }
        }

        let mut texts = Vec::with_capacity(movies.len());
        let mut ids = Vec::with_capacity(movies.len());
        let mut seen = HashSet::with_capacity(movies.len());
        let mut skipped = 0;

        for movie in movies {
            let Some(id) = movie.id else {
                tracing::warn!(title = movie.display_title(), "movie missing id, skipping");
                skipped += 1;
                continue;
            };
            if !seen.insert(id) {
                tracing::warn!(id, "duplicate movie id, skipping");
                skipped += 1;
                continue;
            }
            texts.push(compose_text(movie));
            ids.push(id);
        }

        if texts.is_empty() {
            return Err(RetrievalError::NoValidRecords);
        }

        tracing::info!(
            movies = texts.len(),
            model = self.model_name(),
            "generating embeddings"
        );

        let mut rows: Vec<Embedding> = Vec::with_capacity(texts.len());
        let mut kept_ids = Vec::with_capacity(ids.len());
        let mut dimension: Option<usize> = None;

        for (batch_no, (text_batch, id_batch)) in texts
            .chunks(batch_size)
            .zip(ids.chunks(batch_size))
            .enumerate()
        {
            let refs: Vec<&str> = text_batch.iter().map(String::as_str).collect();
            let vectors = self
                .embedder
                .embed_batch(&refs)
                .map_err(RetrievalError::Model)?;
            if vectors.len() != refs.len() {
                return Err(RetrievalError::Model(anyhow::anyhow!(
                    "model returned {} vectors for {} texts",
                    vectors.len(),
                    refs.len()
                )));
            }

            for (mut vector, &id) in vectors.into_iter().zip(id_batch) {
                let expected = *dimension.get_or_insert(vector.len());
                if vector.len() != expected {
                    return Err(RetrievalError::Model(anyhow::anyhow!(
                        "model returned a {}-dimensional vector for movie {id}, expected {expected}",
                        vector.len()
                    )));
                }
                if !normalize(&mut vector) {
                    tracing::warn!(id, "embedding has zero norm, skipping");
                    skipped += 1;
                    continue;
                }
                rows.push(vector);
                kept_ids.push(id);
            }
            tracing::debug!(batch = batch_no, done = rows.len(), "embedded batch");
        }

        if rows.is_empty() {
            return Err(RetrievalError::NoValidRecords);
        }

        let set = EmbeddingSet::from_rows(rows, kept_ids)?;
        tracing::info!(
            count = set.len(),
            dim = set.dimension(),
            skipped,
            "generated embeddings"
        );

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(&set, self.model_name(), &self.version) {
                tracing::warn!(error = %e, "failed to save embedding cache, continuing without it");
            }
        }

        let stats = GenerateStats {
            accepted: set.len(),
            skipped,
            from_cache: false,
        };
        Ok((set, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{NORM_EPSILON, l2_norm};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic model: vector derived from text bytes, counts batch calls.
    struct FakeModel {
        calls: Arc<AtomicUsize>,
    }

    impl Embedder for FakeModel {
        fn embed(&self, text: &str) -> anyhow::Result<Embedding> {
            let sum: u32 = text.bytes().map(u32::from).sum();
            Ok(vec![text.len() as f32, (sum % 97) as f32 + 1.0, 3.0])
        }
        fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Embedding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            texts.iter().map(|t| self.embed(t)).collect()
        }
        fn dimensions(&self) -> usize {
            3
        }
        fn model_name(&self) -> &str {
            "fake"
        }
    }

    struct ZeroForTitle(&'static str);

    impl Embedder for ZeroForTitle {
        fn embed(&self, text: &str) -> anyhow::Result<Embedding> {
            if text.contains(self.0) {
                Ok(vec![0.0, 0.0])
            } else {
                Ok(vec![1.0, 1.0])
            }
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn model_name(&self) -> &str {
            "zero"
        }
    }

    fn engine() -> (EmbeddingEngine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = FakeModel {
            calls: Arc::clone(&calls),
        };
        (EmbeddingEngine::new(Box::new(model), "v1"), calls)
    }

    fn movies(n: i64) -> Vec<MovieRecord> {
        (1..=n)
            .map(|i| {
                let overview = "x".repeat(i as usize);
                MovieRecord::new(i, &format!("Movie {i}"), &overview, &["Drama"])
            })
            .collect()
    }

    #[test]
    fn empty_input_is_rejected() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.generate(&[], 32, false),
            Err(RetrievalError::EmptyInput)
        ));
    }

    #[test]
    fn all_records_without_ids_is_rejected() {
        let (engine, calls) = engine();
        let input = vec![MovieRecord::default(), MovieRecord::default()];
        assert!(matches!(
            engine.generate(&input, 32, false),
            Err(RetrievalError::NoValidRecords)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn skips_missing_and_duplicate_ids_preserving_order() {
        let (engine, _) = engine();
        let mut input = movies(3);
        input.insert(1, MovieRecord::default());
        input.push(MovieRecord::new(2, "Again", "dup", &[]));

        let (set, stats) = engine.generate_with_stats(&input, 32, false).unwrap();
        assert_eq!(set.ids(), &[1, 2, 3]);
        assert_eq!(set.matrix().nrows(), 3);
        assert_eq!(stats.skipped, 2);
        assert!(!stats.from_cache);
    }

    #[test]
    fn outputs_are_unit_length() {
        let (engine, _) = engine();
        let set = engine.generate(&movies(10), 4, false).unwrap();
        for row in set.matrix().rows() {
            let norm = l2_norm(row.as_slice().unwrap());
            assert!((norm - 1.0).abs() < NORM_EPSILON, "norm {norm}");
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let (engine, calls) = engine();
        let err = engine.generate(&movies(3), 0, false).unwrap_err();
        assert!(matches!(err, RetrievalError::Shape(_)));
        assert!(err.is_input_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn texts_are_sent_in_batches() {
        let (engine, calls) = engine();
        engine.generate(&movies(10), 4, false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cache_hit_skips_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, calls) = engine();
        let engine = engine.with_cache(EmbeddingCache::new(dir.path()));

        let first = engine.generate(&movies(5), 2, true).unwrap();
        let after_first = calls.load(Ordering::SeqCst);
        assert_eq!(after_first, 3);

        let (second, stats) = engine.generate_with_stats(&movies(5), 2, true).unwrap();
        assert!(stats.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), after_first);
        assert_eq!(first, second);
    }

    #[test]
    fn use_cache_false_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, calls) = engine();
        let engine = engine.with_cache(EmbeddingCache::new(dir.path()));

        engine.generate(&movies(2), 8, true).unwrap();
        engine.generate(&movies(2), 8, false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cache_save_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let (engine, _) = engine();
        let engine = engine.with_cache(EmbeddingCache::new(blocker.join("cache")));

        let set = engine.generate(&movies(3), 8, true).unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn zero_vectors_are_skipped() {
        let engine = EmbeddingEngine::new(Box::new(ZeroForTitle("Blank")), "v1");
        let input = vec![
            MovieRecord::new(1, "Real", "", &[]),
            MovieRecord::new(2, "Blank", "", &[]),
            MovieRecord::new(3, "Also real", "", &[]),
        ];
        let (set, stats) = engine.generate_with_stats(&input, 8, false).unwrap();
        assert_eq!(set.ids(), &[1, 3]);
        assert_eq!(stats.skipped, 1);
    }
}
