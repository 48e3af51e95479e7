//! Cross-encoder reranking of fused candidates.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use docrag_core::{CrossEncoder, SearchResult, StageOutcome};

/// Reorders candidates by cross-encoder relevance, overwriting their scores.
pub struct Reranker {
    model: Arc<dyn CrossEncoder>,
    timeout: Duration,
}

impl Reranker {
    pub fn new(model: Arc<dyn CrossEncoder>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Rerank `candidates` for `query`.
    ///
    /// On any failure the candidates come back untouched, in their input order.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
    ) -> StageOutcome<Vec<SearchResult>> {
        if candidates.is_empty() {
            return StageOutcome::Applied(candidates);
        }

        let scored = {
            let texts: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
            tokio::time::timeout(self.timeout, self.model.score_batch(query, &texts)).await
        };
        let scores = match scored {
            Ok(Ok(scores)) => scores,
            Ok(Err(e)) => {
                warn!("Reranking failed: {}", e);
                return StageOutcome::fallback(candidates, e.to_string());
            }
            Err(_) => {
                warn!("Reranking timed out after {:?}", self.timeout);
                return StageOutcome::fallback(
                    candidates,
                    format!("timed out after {}ms", self.timeout.as_millis()),
                );
            }
        };

        let expected = candidates.len();
        if scores.len() != expected {
            warn!(
                "Reranker returned {} scores for {} candidates",
                scores.len(),
                expected
            );
            return StageOutcome::fallback(
                candidates,
                format!("expected {} scores, got {}", expected, scores.len()),
            );
        }
        if scores.iter().any(|s| !s.is_finite()) {
            warn!("Reranker returned a non-finite score");
            return StageOutcome::fallback(candidates, "non-finite score");
        }

        let mut reranked: Vec<SearchResult> = candidates
            .into_iter()
            .zip(scores)
            .map(|(mut result, score)| {
                result.score = score;
                result
            })
            .collect();

        // Stable: equal scores keep their fused order.
        reranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        debug!("Reranked {} candidates", reranked.len());
        StageOutcome::Applied(reranked)
    }
}
