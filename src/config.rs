use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::embed::Embedder;
use crate::embed::hashing::HashingEmbedder;
use crate::embed::ollama::OllamaEmbedder;
use crate::store::cache::EmbeddingCache;

pub const CONFIG_DIR: &str = ".cinesift";
pub const INDEX_FILE: &str = "vector_index.db";
pub const MAPPING_FILE: &str = "embedding_map.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub embed: EmbedConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where artifacts live (default: `.cinesift` inside the project root)
    pub path: Option<PathBuf>,
    /// Movie catalog JSON, relative to the project root unless absolute
    pub movies: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Cache version tag; bump it to invalidate cached embeddings
    pub version: String,
    /// Texts per model call
    pub batch_size: usize,
    pub use_cache: bool,
    pub backend: EmbedBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmbedBackend {
    #[serde(rename = "ollama")]
    Ollama { model: String, url: String },
    #[serde(rename = "hashing")]
    Hashing { dimensions: usize },
    #[serde(rename = "none")]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub top_k: usize,
    pub min_similarity: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                path: None,
                movies: PathBuf::from("movies.json"),
            },
            embed: EmbedConfig {
                version: "v1".into(),
                batch_size: 32,
                use_cache: true,
                backend: EmbedBackend::Ollama {
                    model: "all-minilm".into(),
                    url: "http://localhost:11434".into(),
                },
            },
            search: SearchConfig {
                top_k: 5,
                min_similarity: 0.3,
            },
        }
    }
}

impl Config {
    /// Load config from a .cinesift/config.toml file, falling back to defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_DIR).join("config.toml");
        let config: Self = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading config from {}", config_path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("parsing config from {}", config_path.display()))?
        } else {
            Self::default()
        };
        config
            .validate()
            .with_context(|| format!("invalid config {}", config_path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embed.batch_size == 0 {
            bail!("embed.batch_size must be at least 1");
        }
        if self.embed.version.trim().is_empty() {
            bail!("embed.version must not be empty");
        }
        if self.search.top_k == 0 {
            bail!("search.top_k must be at least 1");
        }
        if !(-1.0..=1.0).contains(&self.search.min_similarity) {
            bail!(
                "search.min_similarity must be within [-1, 1], got {}",
                self.search.min_similarity
            );
        }
        if let EmbedBackend::Hashing { dimensions: 0 } = self.embed.backend {
            bail!("hashing backend needs at least one dimension");
        }
        Ok(())
    }

    /// Resolve the actual storage directory path.
    pub fn storage_dir(&self, project_root: &Path) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| project_root.join(CONFIG_DIR))
    }

    pub fn movies_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.storage.movies)
    }

    pub fn cache(&self, project_root: &Path) -> EmbeddingCache {
        EmbeddingCache::new(self.storage_dir(project_root))
    }

    pub fn index_path(&self, project_root: &Path) -> PathBuf {
        self.storage_dir(project_root).join(INDEX_FILE)
    }

    pub fn mapping_path(&self, project_root: &Path) -> PathBuf {
        self.storage_dir(project_root).join(MAPPING_FILE)
    }

    /// Instantiate the configured embedding backend.
    pub fn embedder(&self) -> Result<Box<dyn Embedder>> {
        match &self.embed.backend {
            EmbedBackend::Ollama { model, url } => Ok(Box::new(
                OllamaEmbedder::new(url, model)
                    .with_context(|| format!("connecting to ollama at {url}"))?,
            )),
            EmbedBackend::Hashing { dimensions } => {
                Ok(Box::new(HashingEmbedder::new(*dimensions)?))
            }
            EmbedBackend::None => {
                bail!("no embedding backend configured (set [embed.backend] in config.toml)")
            }
        }
    }

    /// Write current config to disk (for `cinesift init`).
    pub fn save(&self, project_root: &Path) -> Result<()> {
        let dir = project_root.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating config dir {}", dir.display()))?;
        let config_path = dir.join("config.toml");
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)
            .with_context(|| format!("writing config to {}", config_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.embed.batch_size, 32);
        assert_eq!(config.storage_dir(dir.path()), dir.path().join(".cinesift"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.embed.backend = EmbedBackend::Hashing { dimensions: 128 };
        config.embed.version = "2024-06".into();
        config.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.embed.version, "2024-06");
        assert!(matches!(
            loaded.embed.backend,
            EmbedBackend::Hashing { dimensions: 128 }
        ));
    }

    #[test]
    fn parses_hand_written_toml() {
        let toml = r#"
            [storage]
            path = "/srv/cinesift"
            movies = "data/movies.json"

            [embed]
            version = "v3"
            batch_size = 16
            use_cache = false

            [embed.backend]
            type = "ollama"
            model = "nomic-embed-text"
            url = "http://gpu-box:11434"

            [search]
            top_k = 10
            min_similarity = 0.5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        let root = Path::new("/project");
        assert_eq!(config.index_path(root), PathBuf::from("/srv/cinesift/vector_index.db"));
        assert_eq!(config.movies_path(root), PathBuf::from("/project/data/movies.json"));
        assert!(!config.embed.use_cache);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = Config::default();
        config.embed.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.min_similarity = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embed.version = "  ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embed.backend = EmbedBackend::Hashing { dimensions: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.search.top_k = 0;
        config.save(dir.path()).unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn none_backend_has_no_embedder() {
        let mut config = Config::default();
        config.embed.backend = EmbedBackend::None;
        assert!(config.embedder().is_err());
    }
}
