//! One-shot pipeline: catalog JSON → embeddings → similarity mapping + index.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::embed::Embedder;
use crate::embed::engine::EmbeddingEngine;
use crate::index::VectorIndex;
use crate::movie::MovieRecord;
use crate::search::similarity::write_mapping;

#[derive(Debug)]
pub struct PrecomputeReport {
    pub movies_loaded: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub from_cache: bool,
    pub dimension: usize,
    pub mapping_path: PathBuf,
    pub index_path: PathBuf,
    pub elapsed: Duration,
}

/// Read the movie catalog. The file must hold a JSON list; entries that
/// aren't movie-shaped are skipped with a warning.
pub fn load_movies(path: &Path) -> Result<Vec<MovieRecord>> {
    if !path.exists() {
        bail!("movie data file not found at {}", path.display());
    }
    let raw =
        std::fs::read(path).with_context(|| format!("reading movies from {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing movies from {}", path.display()))?;
    let serde_json::Value::Array(entries) = value else {
        bail!("movie data should be a list of movie objects");
    };

    let total = entries.len();
    let movies: Vec<MovieRecord> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| match MovieRecord::from_value(entry) {
            Ok(movie) => Some(movie),
            Err(e) => {
                tracing::warn!(entry = i, error = %e, "malformed movie entry, skipping");
                None
            }
        })
        .collect();

    tracing::info!(path = %path.display(), loaded = movies.len(), total, "loaded movies");
    Ok(movies)
}

/// Generate embeddings for the catalog at `movies_path` and write both query
/// artifacts under the configured storage directory.
pub fn run(
    root: &Path,
    config: &Config,
    embedder: Box<dyn Embedder>,
    movies_path: &Path,
    use_cache: bool,
) -> Result<PrecomputeReport> {
    let started = Instant::now();
    let root = root
        .canonicalize()
        .with_context(|| format!("resolving path {}", root.display()))?;

    let movies = load_movies(movies_path)?;

    let engine = EmbeddingEngine::new(embedder, config.embed.version.clone())
        .with_cache(config.cache(&root));
    let embed_started = Instant::now();
    let (set, stats) = engine
        .generate_with_stats(&movies, config.embed.batch_size, use_cache)
        .context("generating embeddings")?;
    let embed_elapsed = embed_started.elapsed();
    tracing::info!(
        count = set.len(),
        dim = set.dimension(),
        secs = embed_elapsed.as_secs_f64(),
        per_movie = embed_elapsed.as_secs_f64() / movies.len().max(1) as f64,
        from_cache = stats.from_cache,
        "embedding stage done"
    );

    let mapping_path = config.mapping_path(&root);
    write_mapping(&set, &mapping_path).context("saving embeddings mapping")?;

    let index_started = Instant::now();
    let dimension = set.dimension();
    let index = VectorIndex::from_embeddings(set).context("building vector index")?;
    let index_path = config.index_path(&root);
    index.save(&index_path).context("saving vector index")?;
    tracing::info!(
        count = index.len(),
        secs = index_started.elapsed().as_secs_f64(),
        "index stage done"
    );

    validate_outputs(&[&mapping_path, &index_path])?;

    let report = PrecomputeReport {
        movies_loaded: movies.len(),
        embedded: index.len(),
        skipped: stats.skipped,
        from_cache: stats.from_cache,
        dimension,
        mapping_path,
        index_path,
        elapsed: started.elapsed(),
    };
    tracing::info!(secs = report.elapsed.as_secs_f64(), "precompute completed");
    Ok(report)
}

fn validate_outputs(paths: &[&Path]) -> Result<()> {
    for path in paths {
        if !path.exists() {
            bail!("{} was not created", path.display());
        }
    }
    Ok(())
}
