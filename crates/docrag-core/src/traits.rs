//! Core traits defining the interfaces between components.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chunk, ChunkId, CollectionInfo, IndexedChunk, ScoredChunk, SourceDocument, Stats};

/// Hybrid storage trait: one set of chunks indexed for both vector and keyword retrieval.
///
/// Searches and counts against a collection that was never written return
/// empty results rather than an error.
#[async_trait]
pub trait Store: Send + Sync {
    // Write operations

    /// Add chunks with positionally paired embeddings in one transaction.
    ///
    /// Returns the ids assigned (or reused) for each chunk, in input order.
    async fn add(
        &self,
        collection: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<ChunkId>>;

    /// Atomically replace every chunk of `source_url` with the given chunks.
    async fn replace_source(
        &self,
        collection: &str,
        source_url: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<ChunkId>>;

    /// Remove every chunk of one page. Returns the number removed.
    async fn delete_by_source(&self, collection: &str, source_url: &str) -> Result<u64>;

    /// Remove every chunk of a collection. Returns the number removed.
    async fn clear(&self, collection: &str) -> Result<u64>;

    // Read operations
    async fn count(&self, collection: &str) -> Result<u64>;
    async fn list_sources(&self, collection: &str) -> Result<Vec<String>>;
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Look up a collection; the one read that reports `CollectionNotFound`.
    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo>;

    /// Chunks of one page in `chunk_index` order.
    async fn get_by_source(&self, collection: &str, source_url: &str) -> Result<Vec<IndexedChunk>>;

    // Search operations
    async fn vector_search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    async fn keyword_search(
        &self,
        collection: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    // Stats
    async fn stats(&self, collection: Option<&str>) -> Result<Stats>;
}

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; output is positionally paired with input.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Name of the underlying model.
    fn model_name(&self) -> &str;
}

/// Generative model used to rephrase a query.
#[async_trait]
pub trait VariantGenerator: Send + Sync {
    /// Produce alternative phrasings of `query`. May include the query itself.
    async fn generate_variants(&self, query: &str) -> Result<Vec<String>>;
}

/// Cross-encoder relevance model.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Score how relevant `candidate` is to `query`. Higher is more relevant.
    async fn score(&self, query: &str, candidate: &str) -> Result<f32>;

    /// Score many candidates; output is positionally paired with input.
    async fn score_batch(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            scores.push(self.score(query, candidate).await?);
        }
        Ok(scores)
    }
}

/// Chunking strategy trait.
pub trait Chunker: Send + Sync {
    /// Split a document into ordered chunks.
    fn chunk(&self, document: &str, source_url: &str) -> Result<Vec<Chunk>>;
}

/// A place documentation pages come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Collection name this source indexes into by default.
    fn name(&self) -> &str;

    /// Identifiers of every page the source can fetch.
    async fn discover_pages(&self) -> Result<Vec<String>>;

    /// Fetch one page as markdown.
    async fn fetch_page(&self, page: &str) -> Result<SourceDocument>;
}
