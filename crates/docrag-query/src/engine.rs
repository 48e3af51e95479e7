//! Query engine for hybrid search.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use docrag_core::{
    Chunk, ChunkId, Embedder, RagError, RankDiagnostics, Result, SearchConfig, SearchResult,
    SearchResults, StageStatus, Store,
};

use crate::expander::QueryExpander;
use crate::fusion::{reciprocal_rank_fusion, weighted_reciprocal_rank_fusion, FusedItem};
use crate::rerank::Reranker;

const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call search options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum number of results to return. Capped at `max_top_k`; zero
    /// returns no results.
    pub top_k: usize,

    /// Search alternative phrasings of the query as well.
    pub expand_query: bool,

    /// Reorder fused candidates with the cross-encoder.
    pub rerank: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            expand_query: false,
            rerank: false,
        }
    }
}

/// Hybrid ranking of one query variant, plus the chunks it references.
struct VariantRanking {
    items: Vec<FusedItem<ChunkId>>,
    chunks: HashMap<ChunkId, Chunk>,
}

/// Hybrid search query engine.
///
/// Every query variant runs vector and keyword search concurrently; the two
/// lists are fused with Reciprocal Rank Fusion (RRF), and the per-variant
/// rankings are fused again when expansion produced more than one variant.
pub struct QueryEngine<S, E> {
    /// Storage backend.
    store: Arc<S>,

    /// Embedding model.
    embedder: Arc<E>,

    config: SearchConfig,
    expander: Option<QueryExpander>,
    reranker: Option<Reranker>,
    embed_timeout: Duration,
}

impl<S, E> QueryEngine<S, E>
where
    S: Store + Send + Sync,
    E: Embedder + Send + Sync,
{
    /// Create a new query engine.
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: SearchConfig) -> Self {
        Self {
            store,
            embedder,
            config,
            expander: None,
            reranker: None,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    pub fn with_expander(mut self, expander: QueryExpander) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Bound on a single query embedding call. Expiry fails the search.
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Perform a hybrid search over one collection.
    pub async fn search(
        &self,
        query: &str,
        collection: &str,
        options: &SearchOptions,
    ) -> Result<SearchResults> {
        let start = Instant::now();
        let query = query.trim();

        if query.is_empty() || options.top_k == 0 {
            return Ok(SearchResults::empty(query, collection));
        }

        let top_k = options.top_k.min(self.config.max_top_k.max(1));

        if self.store.count(collection).await? == 0 {
            debug!("Collection {} is empty, skipping search", collection);
            let mut results = SearchResults::empty(query, collection);
            results.latency_ms = start.elapsed().as_millis() as u64;
            return Ok(results);
        }

        info!("Searching {} for: {:?}", collection, query);

        let (variants, expansion) = self.resolve_variants(query, options.expand_query).await;
        let pool = self.config.pool_size(top_k);

        // All variants are joined before fusion; the first mandatory failure aborts.
        let rankings = try_join_all(
            variants
                .iter()
                .map(|variant| self.retrieve(collection, variant, pool)),
        )
        .await?;

        let mut chunks: HashMap<ChunkId, Chunk> = HashMap::new();
        let mut per_variant: Vec<Vec<FusedItem<ChunkId>>> = Vec::with_capacity(rankings.len());
        for ranking in rankings {
            chunks.extend(ranking.chunks);
            per_variant.push(ranking.items);
        }

        let source_ranks: HashMap<ChunkId, (Option<usize>, Option<usize>)> = per_variant
            .first()
            .map(|items| {
                items
                    .iter()
                    .map(|item| (item.id, (item.ranks[0], item.ranks[1])))
                    .collect()
            })
            .unwrap_or_default();

        let ranking = self.fuse_variants(per_variant);
        debug!("Fused {} variants into {} candidates", variants.len(), ranking.len());

        let bound = self.config.rerank_candidates.max(top_k);
        let candidates: Vec<SearchResult> = ranking
            .into_iter()
            .take(bound)
            .enumerate()
            .filter_map(|(position, (id, score))| {
                let chunk = chunks.remove(&id)?;
                let (semantic_rank, keyword_rank) =
                    source_ranks.get(&id).copied().unwrap_or((None, None));

                let mut result = SearchResult::from_chunk(id, chunk, score as f32);
                result.diagnostics = RankDiagnostics {
                    semantic_rank,
                    keyword_rank,
                    fused_rank: Some(position + 1),
                };
                Some(result)
            })
            .collect();

        let (mut results, rerank) = match (options.rerank, &self.reranker) {
            (false, _) => (candidates, StageStatus::Disabled),
            (true, None) => {
                warn!("Reranking requested but no reranker is configured");
                (
                    candidates,
                    StageStatus::Fallback {
                        reason: "no reranker configured".to_string(),
                    },
                )
            }
            (true, Some(reranker)) => reranker.rerank(query, candidates).await.into_parts(),
        };
        results.truncate(top_k);

        let latency_ms = start.elapsed().as_millis() as u64;

        info!(
            "Search completed in {}ms, returned {} results",
            latency_ms,
            results.len()
        );

        Ok(SearchResults {
            query: query.to_string(),
            collection: collection.to_string(),
            variants,
            expansion,
            rerank,
            latency_ms,
            results,
        })
    }

    /// Query variants to search, original first, with the expansion status.
    async fn resolve_variants(&self, query: &str, expand: bool) -> (Vec<String>, StageStatus) {
        if !expand {
            return (vec![query.to_string()], StageStatus::Disabled);
        }

        match &self.expander {
            Some(expander) => expander.expand(query).await.into_parts(),
            None => {
                warn!("Query expansion requested but no expander is configured");
                (
                    vec![query.to_string()],
                    StageStatus::Fallback {
                        reason: "no query expander configured".to_string(),
                    },
                )
            }
        }
    }

    /// Vector and keyword retrieval for one variant, fused with RRF.
    async fn retrieve(&self, collection: &str, variant: &str, pool: usize) -> Result<VariantRanking> {
        let embedding = tokio::time::timeout(self.embed_timeout, self.embedder.embed_query(variant))
            .await
            .map_err(|_| {
                RagError::external(
                    self.embedder.model_name(),
                    format!("query embedding timed out after {}ms", self.embed_timeout.as_millis()),
                )
            })??;

        // Perform searches in parallel
        let (semantic, keyword) = tokio::join!(
            self.store.vector_search(collection, &embedding, pool),
            self.store.keyword_search(collection, variant, pool)
        );
        let semantic = semantic?;
        let keyword = keyword?;

        debug!(
            "Variant {:?}: vector search returned {} results, keyword search returned {} results",
            variant,
            semantic.len(),
            keyword.len()
        );

        let semantic_ids: Vec<ChunkId> = semantic.iter().map(|hit| hit.id).collect();
        let keyword_ids: Vec<ChunkId> = keyword.iter().map(|hit| hit.id).collect();
        let items = weighted_reciprocal_rank_fusion(
            &[
                (semantic_ids.as_slice(), f64::from(self.config.semantic_weight)),
                (keyword_ids.as_slice(), f64::from(self.config.keyword_weight)),
            ],
            self.config.rrf_k,
        );

        let chunks = semantic
            .into_iter()
            .chain(keyword)
            .map(|hit| (hit.id, hit.chunk))
            .collect();

        Ok(VariantRanking { items, chunks })
    }

    /// Overall ranking as `(id, score)` pairs.
    ///
    /// A single variant keeps its hybrid scores unchanged.
    fn fuse_variants(&self, mut per_variant: Vec<Vec<FusedItem<ChunkId>>>) -> Vec<(ChunkId, f64)> {
        if per_variant.len() == 1 {
            return per_variant
                .pop()
                .unwrap_or_default()
                .into_iter()
                .map(|item| (item.id, item.score))
                .collect();
        }

        let lists: Vec<Vec<ChunkId>> = per_variant
            .iter()
            .map(|items| items.iter().map(|item| item.id).collect())
            .collect();
        let refs: Vec<&[ChunkId]> = lists.iter().map(Vec::as_slice).collect();

        reciprocal_rank_fusion(&refs, self.config.rrf_k)
            .into_iter()
            .map(|item| (item.id, item.score))
            .collect()
    }
}
