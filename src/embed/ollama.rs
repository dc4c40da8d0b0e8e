use anyhow::{Context, Result, bail};
use serde::Deserialize;

use super::{Embedder, Embedding};

pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Longest text sent to the model, in bytes.
const MAX_TEXT_BYTES: usize = 8192;

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let mut embedder = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions: 0,
        };

        // Probe dimensions with a short test string
        let test = embedder.embed("test")?;
        embedder.dimensions = test.len();
        tracing::info!(model, dimensions = embedder.dimensions, "connected to ollama");
        Ok(embedder)
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<Embedding>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let mut response = match ureq::post(&url).send_json(&body) {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                bail!("ollama returned HTTP {code}");
            }
            Err(e) => {
                return Err(anyhow::anyhow!(e).context("ollama embedding request failed"));
            }
        };

        let resp: EmbedResponse = response
            .body_mut()
            .read_json()
            .context("parsing ollama response")?;

        if resp.embeddings.len() != inputs.len() {
            bail!(
                "ollama returned {} embeddings for {} inputs",
                resp.embeddings.len(),
                inputs.len()
            );
        }
        Ok(resp.embeddings)
    }
}

/// Empty prompts are rejected by the server; overly long ones are cut on a
/// char boundary.
fn prepare(text: &str) -> &str {
    if text.is_empty() {
        return " ";
    }
    if text.len() <= MAX_TEXT_BYTES {
        return text;
    }
    let mut end = MAX_TEXT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut out = self.request(&[prepare(text)])?;
        out.pop().context("ollama returned no embedding")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let inputs: Vec<&str> = texts.iter().map(|t| prepare(t)).collect();
        self.request(&inputs)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
