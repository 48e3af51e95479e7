//! Ollama embedding client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docrag_core::{Embedder, EmbeddingConfig, RagError, Result};

use crate::client::{build_client, endpoint, post_json};

const SERVICE: &str = "ollama embed";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    /// Let Ollama cut inputs longer than the model context instead of failing.
    truncate: bool,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding model served by Ollama (`POST /api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    /// Create a client from embedding configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.dimension == 0 {
            return Err(RagError::config("embedding dimension must be positive"));
        }

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: endpoint(&config.base_url, "api/embed"),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    /// Check that a response pairs one vector of the configured dimension with each input.
    fn check_response(&self, inputs: usize, embeddings: &[Vec<f32>]) -> Result<()> {
        if embeddings.len() != inputs {
            return Err(RagError::external(
                SERVICE,
                format!("expected {} embeddings, got {}", inputs, embeddings.len()),
            ));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(RagError::external(
                SERVICE,
                format!(
                    "model {} returned dimension {}, expected {}",
                    self.model,
                    bad.len(),
                    self.dimension
                ),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
            truncate: true,
        };
        let response: EmbedResponse = post_json(&self.client, SERVICE, &self.url, &request).await?;
        self.check_response(texts.len(), &response.embeddings)?;

        debug!("Embedded {} texts with {}", texts.len(), self.model);
        Ok(response.embeddings)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::external(SERVICE, "no embedding returned"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
