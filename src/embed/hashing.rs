//! Offline bag-of-words embedder.
//!
//! Each lowercase alphanumeric token is hashed with BLAKE3 into one of
//! `dimensions` buckets and counted. Vectors are raw counts; the engine
//! normalizes them. Deterministic and dependency-free at runtime, which makes
//! it handy for tests and for running the pipeline without a model server.

use anyhow::{Result, bail};

use super::{Embedder, Embedding};

pub struct HashingEmbedder {
    dimensions: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            bail!("hashing embedder needs at least one dimension");
        }
        Ok(Self {
            dimensions,
            name: format!("hashing-{dimensions}"),
        })
    }

    fn bucket(&self, token: &str) -> usize {
        let hash = blake3::hash(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(head) % self.dimensions as u64) as usize
    }
}

pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
