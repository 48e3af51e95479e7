//! HTTP cross-encoder client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docrag_core::{CrossEncoder, RagError, RerankerConfig, Result};

use crate::client::{build_client, endpoint, post_json};

const SERVICE: &str = "rerank";

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [&'a str],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankHit>,
}

#[derive(Deserialize)]
struct RerankHit {
    index: usize,
    relevance_score: f32,
}

/// Cross-encoder served behind a `/v1/rerank` endpoint.
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpCrossEncoder {
    /// Create a client; fails when no reranker URL is configured.
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| RagError::config("reranker.base_url is not set"))?;

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: endpoint(base_url, "v1/rerank"),
            model: config.model.clone(),
        })
    }
}

/// Map scored hits back to input positions.
fn scores_by_position(hits: Vec<RerankHit>, len: usize) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; len];
    for hit in hits {
        let slot = scores.get_mut(hit.index).ok_or_else(|| {
            RagError::external(SERVICE, format!("result index {} out of range", hit.index))
        })?;
        *slot = Some(hit.relevance_score);
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| RagError::external(SERVICE, format!("no score for document {}", i))))
        .collect()
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, candidate: &str) -> Result<f32> {
        let scores = self.score_batch(query, &[candidate]).await?;
        scores
            .into_iter()
            .next()
            .ok_or_else(|| RagError::external(SERVICE, "no score returned"))
    }

    async fn score_batch(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            model: &self.model,
            query,
            documents: candidates,
            top_n: candidates.len(),
        };
        let response: RerankResponse = post_json(&self.client, SERVICE, &self.url, &request).await?;

        debug!("Reranked {} candidates with {}", candidates.len(), self.model);
        scores_by_position(response.results, candidates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(index: usize, relevance_score: f32) -> RerankHit {
        RerankHit {
            index,
            relevance_score,
        }
    }

    #[test]
    fn test_scores_by_position() {
        let scores = scores_by_position(vec![hit(2, 0.9), hit(0, 0.1), hit(1, 0.5)], 3).unwrap();
        assert_eq!(scores, vec![0.1, 0.5, 0.9]);
    }

    #[test]
    fn test_missing_or_bad_index() {
        assert!(scores_by_position(vec![hit(0, 0.3)], 2).unwrap_err().is_external());
        assert!(scores_by_position(vec![hit(5, 0.3)], 1).unwrap_err().is_external());
    }

    #[test]
    fn test_requires_base_url() {
        let err = HttpCrossEncoder::new(&RerankerConfig::default()).err().unwrap();
        assert_eq!(err.error_code(), "CONFIG_ERROR");

        let encoder = HttpCrossEncoder::new(&RerankerConfig {
            base_url: Some("http://localhost:8080/".to_string()),
            ..RerankerConfig::default()
        })
        .unwrap();
        assert_eq!(encoder.url, "http://localhost:8080/v1/rerank");
    }

    #[test]
    fn test_response_decoding() {
        let body = r#"{"results":[{"index":1,"relevance_score":0.8,"document":{"text":"b"}},{"index":0,"relevance_score":0.2}]}"#;
        let response: RerankResponse = serde_json::from_str(body).unwrap();
        assert_eq!(scores_by_position(response.results, 2).unwrap(), vec![0.2, 0.8]);
    }
}
