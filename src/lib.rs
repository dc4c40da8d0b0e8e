//! Embedding-based movie similarity retrieval.
//!
//! Movie metadata is composed into text, embedded by a pluggable model,
//! normalized, cached on disk, and served either through a persisted
//! [`index::VectorIndex`] (arbitrary query vectors) or an in-memory
//! [`search::similarity::SimilaritySearch`] ("more like this movie").

pub mod config;
pub mod embed;
pub mod error;
pub mod index;
pub mod movie;
pub mod precompute;
pub mod search;
pub mod snapshot;
pub mod store;

pub use error::{Result, RetrievalError};
