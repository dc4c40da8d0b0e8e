use serde::{Deserialize, Serialize};

/// Movie metadata as supplied by the catalog. Read-only to the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovieRecord {
    /// Missing or null ids are tolerated here and skipped by the engine.
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<Tag>,
    #[serde(default)]
    pub keywords: Option<Vec<Tag>>,
}

/// Genres and keywords arrive either as bare strings or as `{ "name": ... }` objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tag {
    Name(String),
    Object {
        #[serde(default)]
        name: Option<String>,
    },
}

impl Tag {
    pub fn name(&self) -> &str {
        match self {
            Tag::Name(name) => name,
            Tag::Object { name } => name.as_deref().unwrap_or(""),
        }
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Tag::Name(name.to_string())
    }
}

impl MovieRecord {
    pub fn new(id: i64, title: &str, overview: &str, genres: &[&str]) -> Self {
        Self {
            id: Some(id),
            title: Some(title.to_string()),
            overview: Some(overview.to_string()),
            genres: genres.iter().map(|g| Tag::from(*g)).collect(),
            keywords: None,
        }
    }

    /// Parse a single catalog entry. Fails on entries that aren't movie-shaped
    /// (wrong field types), which callers skip individually.
    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn genre_names(&self) -> Vec<&str> {
        self.genres.iter().map(Tag::name).collect()
    }

    /// Label used in log lines for records that have no usable id.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("<untitled>")
    }
}

/// Canonical text fed to the embedding model.
pub fn compose_text(movie: &MovieRecord) -> String {
    let title = movie.title.as_deref().unwrap_or("");
    let overview = movie.overview.as_deref().unwrap_or("");
    let genres = movie.genre_names().join(", ");
    format!("Title: {title}. Description: {overview}. Genres: {genres}")
}
