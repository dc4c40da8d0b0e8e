//! On-disk embedding cache: a binary vector blob plus a JSON sidecar.
//!
//! The sidecar identifies the producing model and version and carries the
//! BLAKE3 checksum of the blob. Anything that doesn't line up is a miss.

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::hasher;
use super::write_atomic;
use crate::embed::EmbeddingSet;
use crate::error::{Result, RetrievalError};

pub const BLOB_FILE: &str = "embeddings.bin";
pub const META_FILE: &str = "embeddings.json";

const MAGIC: &[u8; 4] = b"CSEV";
const FORMAT_VERSION: u32 = 1;
// magic + format version + id count + row count + dimension
const HEADER_LEN: usize = 4 + 4 + 8 + 8 + 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub model_name: String,
    pub version: String,
    pub created: DateTime<Utc>,
    pub num_movies: usize,
    pub embedding_dim: usize,
    pub checksum: String,
}

pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn blob_path(&self) -> PathBuf {
        self.dir.join(BLOB_FILE)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    /// Cached embeddings for `(model, version)`, or `None` on any kind of miss.
    pub fn load(&self, model: &str, version: &str) -> Option<EmbeddingSet> {
        match self.try_load(model, version) {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(
                    dir = %self.dir.display(),
                    error = %e,
                    "unreadable embedding cache, treating as miss"
                );
                None
            }
        }
    }

    fn try_load(&self, model: &str, version: &str) -> Result<Option<EmbeddingSet>> {
        let meta_path = self.meta_path();
        let blob_path = self.blob_path();
        if !meta_path.exists() || !blob_path.exists() {
            tracing::debug!(dir = %self.dir.display(), "no embedding cache on disk");
            return Ok(None);
        }

        let meta: CacheMetadata = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
        if meta.model_name != model || meta.version != version {
            tracing::info!(
                cached_model = %meta.model_name,
                cached_version = %meta.version,
                model,
                version,
                "embedding cache belongs to another model or version"
            );
            return Ok(None);
        }

        let checksum = hasher::hash_file(&blob_path)
            .map_err(|e| RetrievalError::corrupt(format!("hashing cache blob: {e}")))?;
        if checksum != meta.checksum {
            tracing::warn!("embedding cache blob does not match its metadata checksum");
            return Ok(None);
        }

        let set = decode_blob(&std::fs::read(&blob_path)?)?;
        if set.len() != meta.num_movies || set.dimension() != meta.embedding_dim {
            tracing::warn!(
                rows = set.len(),
                dim = set.dimension(),
                expected_rows = meta.num_movies,
                expected_dim = meta.embedding_dim,
                "embedding cache shape disagrees with metadata"
            );
            return Ok(None);
        }

        tracing::info!(
            model,
            version,
            created = %meta.created,
            movies = set.len(),
            "loaded embeddings from cache"
        );
        Ok(Some(set))
    }

    /// Replace whatever is cached. The old sidecar is removed first and the new
    /// one is written only after its blob is in place.
    pub fn save(&self, set: &EmbeddingSet, model: &str, version: &str) -> Result<CacheMetadata> {
        std::fs::create_dir_all(&self.dir)?;

        let meta_path = self.meta_path();
        if meta_path.exists() {
            std::fs::remove_file(&meta_path)?;
        }

        let blob = encode_blob(set);
        write_atomic(&self.blob_path(), &blob)?;

        let meta = CacheMetadata {
            model_name: model.to_string(),
            version: version.to_string(),
            created: Utc::now(),
            num_movies: set.len(),
            embedding_dim: set.dimension(),
            checksum: hasher::hash_bytes(&blob),
        };
        write_atomic(&meta_path, &serde_json::to_vec_pretty(&meta)?)?;

        tracing::info!(
            dir = %self.dir.display(),
            movies = meta.num_movies,
            dim = meta.embedding_dim,
            "saved embedding cache"
        );
        Ok(meta)
    }

    /// Sidecar contents without touching the blob, if readable.
    pub fn metadata(&self) -> Option<CacheMetadata> {
        let bytes = std::fs::read(self.meta_path()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

fn encode_blob(set: &EmbeddingSet) -> Vec<u8> {
    let rows = set.len();
    let dim = set.dimension();
    let mut out = Vec::with_capacity(HEADER_LEN + rows * 8 + rows * dim * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(rows as u64).to_le_bytes());
    out.extend_from_slice(&(set.matrix().nrows() as u64).to_le_bytes());
    out.extend_from_slice(&(dim as u64).to_le_bytes());
    for id in set.ids() {
        out.extend_from_slice(&id.to_le_bytes());
    }
    for x in set.matrix().iter() {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn decode_blob(bytes: &[u8]) -> Result<EmbeddingSet> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(RetrievalError::corrupt("not an embedding cache blob"));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    if u32::from_le_bytes(version) != FORMAT_VERSION {
        return Err(RetrievalError::corrupt("unsupported cache blob format"));
    }

    let id_count = read_u64(bytes, 8) as usize;
    let row_count = read_u64(bytes, 16) as usize;
    let dim = read_u64(bytes, 24) as usize;
    if id_count != row_count {
        return Err(RetrievalError::corrupt(format!(
            "{id_count} cached ids for {row_count} cached rows"
        )));
    }

    let ids_len = id_count
        .checked_mul(8)
        .ok_or_else(|| RetrievalError::corrupt("cache blob header overflow"))?;
    let vec_len = row_count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| RetrievalError::corrupt("cache blob header overflow"))?;
    if bytes.len() != HEADER_LEN + ids_len + vec_len {
        return Err(RetrievalError::corrupt("cache blob length disagrees with header"));
    }

    let ids: Vec<i64> = bytes[HEADER_LEN..HEADER_LEN + ids_len]
        .chunks_exact(8)
        .map(|c| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(c);
            i64::from_le_bytes(buf)
        })
        .collect();
    let data: Vec<f32> = bytes[HEADER_LEN + ids_len..]
        .chunks_exact(4)
        .map(|c| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(c);
            f32::from_le_bytes(buf)
        })
        .collect();

    let matrix = Array2::from_shape_vec((row_count, dim), data)
        .map_err(|e| RetrievalError::corrupt(e.to_string()))?;
    EmbeddingSet::new(matrix, ids)
}
