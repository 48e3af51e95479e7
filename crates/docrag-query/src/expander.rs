//! Query expansion into alternative phrasings.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use docrag_core::{ExpansionConfig, StageOutcome, VariantGenerator};

/// Turns one query into a short list of variants, original first.
///
/// Never fails: any problem with the generator yields
/// `StageOutcome::Fallback` holding just the original query.
pub struct QueryExpander {
    generator: Arc<dyn VariantGenerator>,
    num_variations: usize,
    timeout: Duration,
}

impl QueryExpander {
    pub fn new(generator: Arc<dyn VariantGenerator>, config: &ExpansionConfig) -> Self {
        Self {
            generator,
            num_variations: config.num_variations.clamp(2, 4),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Override the generator timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Expand `query`. The first variant is always the trimmed query itself.
    pub async fn expand(&self, query: &str) -> StageOutcome<Vec<String>> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return StageOutcome::fallback(vec![query], "empty query");
        }

        let generated =
            match tokio::time::timeout(self.timeout, self.generator.generate_variants(&query)).await {
                Ok(Ok(variants)) => variants,
                Ok(Err(e)) => {
                    warn!("Query expansion failed: {}", e);
                    return StageOutcome::fallback(vec![query], e.to_string());
                }
                Err(_) => {
                    warn!("Query expansion timed out after {:?}", self.timeout);
                    return StageOutcome::fallback(
                        vec![query],
                        format!("timed out after {}ms", self.timeout.as_millis()),
                    );
                }
            };

        let variants = self.select(query.clone(), generated);
        if variants.len() == 1 {
            warn!("Query expansion produced no usable variants for {:?}", query);
            return StageOutcome::fallback(variants, "no usable variants");
        }

        debug!("Expanded {:?} into {} variants", query, variants.len());
        StageOutcome::Applied(variants)
    }

    /// Keep distinct, non-empty variants after the original, up to the limit.
    fn select(&self, query: String, generated: Vec<String>) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(query.to_lowercase());

        let mut variants = vec![query];
        for variant in generated {
            if variants.len() > self.num_variations {
                break;
            }
            let variant = variant.trim();
            if variant.is_empty() || !seen.insert(variant.to_lowercase()) {
                continue;
            }
            variants.push(variant.to_string());
        }
        variants
    }
}
