//! docrag-query - Search and indexing pipeline
//!
//! This crate ties the store, the chunker and the model clients together.
//!
//! # Features
//!
//! - Hybrid search (vector + keyword) fused with Reciprocal Rank Fusion
//! - Optional query expansion, fused across variants
//! - Optional cross-encoder reranking of the fused candidates
//! - Indexing of markdown pages from any [`DocumentSource`]
//!
//! # Example
//!
//! ```rust,ignore
//! use docrag_query::{QueryEngine, SearchOptions};
//! use std::sync::Arc;
//!
//! let engine = QueryEngine::new(Arc::new(store), Arc::new(embedder), config.search);
//! let results = engine.search("error handling", "react", &SearchOptions::default()).await?;
//! ```

mod engine;
mod expander;
mod fusion;
mod indexer;
mod rerank;
mod source;

pub use engine::{QueryEngine, SearchOptions};
pub use expander::QueryExpander;
pub use fusion::{reciprocal_rank_fusion, weighted_reciprocal_rank_fusion, FusedItem, RRF_K};
pub use indexer::{IndexReport, Indexer};
pub use rerank::Reranker;
pub use source::MarkdownDirectory;

// Re-export for convenience
pub use docrag_core::{DocumentSource, SearchResult, SearchResults, StageOutcome, StageStatus};
