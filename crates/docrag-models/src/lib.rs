//! docrag-models - Model clients
//!
//! Adapters for the external model boundaries of the search pipeline:
//!
//! - [`OllamaEmbedder`]: dense embeddings via Ollama's `/api/embed`
//! - [`OllamaGenerator`]: query rephrasings via Ollama's `/api/generate`
//! - [`HttpCrossEncoder`]: relevance scores via a `/v1/rerank` service
//! - [`MockEmbedder`]: deterministic in-process embeddings for tests and offline use

mod client;
mod embed;
mod generate;
mod mock;
mod rerank;

pub use embed::OllamaEmbedder;
pub use generate::{parse_variants, OllamaGenerator};
pub use mock::MockEmbedder;
pub use rerank::HttpCrossEncoder;

// Re-export the model traits for convenience
pub use docrag_core::{CrossEncoder, Embedder, VariantGenerator};
