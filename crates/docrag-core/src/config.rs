//! Configuration types for docrag.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding service configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Query expansion configuration.
    #[serde(default)]
    pub expansion: ExpansionConfig,

    /// Cross-encoder reranker configuration.
    #[serde(default)]
    pub reranker: RerankerConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Enable WAL mode (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// SQLite cache size (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            wal_mode: true,
            cache_size: default_cache_size(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Embedding service configuration (Ollama `/api/embed`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected vector dimension of `model`.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Texts per embedding request while indexing.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Size threshold in characters before a section is split at paragraph breaks.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Maximum number of results.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// RRF constant k.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// RRF weight of the vector ranking.
    #[serde(default = "default_weight")]
    pub semantic_weight: f32,

    /// RRF weight of the keyword ranking.
    #[serde(default = "default_weight")]
    pub keyword_weight: f32,

    /// Lower bound of per-variant candidates fetched from each index.
    #[serde(default = "default_min_pool")]
    pub min_pool: usize,

    /// Upper bound of per-variant candidates fetched from each index.
    #[serde(default = "default_max_pool")]
    pub max_pool: usize,

    /// Fused candidates handed to the reranker.
    #[serde(default = "default_rerank_candidates")]
    pub rerank_candidates: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            rrf_k: default_rrf_k(),
            semantic_weight: default_weight(),
            keyword_weight: default_weight(),
            min_pool: default_min_pool(),
            max_pool: default_max_pool(),
            rerank_candidates: default_rerank_candidates(),
        }
    }
}

impl SearchConfig {
    /// Candidates to pull from each index for one query variant.
    pub fn pool_size(&self, top_k: usize) -> usize {
        let max_pool = self.max_pool.max(self.min_pool);
        top_k.saturating_mul(10).clamp(self.min_pool, max_pool)
    }
}

/// Query expansion configuration (Ollama `/api/generate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    #[serde(default = "default_expansion_model")]
    pub model: String,

    /// Alternative phrasings requested besides the original query.
    #[serde(default = "default_num_variations")]
    pub num_variations: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_stage_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_expansion_model(),
            num_variations: default_num_variations(),
            temperature: default_temperature(),
            timeout_secs: default_stage_timeout(),
        }
    }
}

/// Cross-encoder reranker configuration (`/v1/rerank`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Rerank service URL; reranking is unavailable when unset.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_rerank_model")]
    pub model: String,

    #[serde(default = "default_stage_timeout")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_rerank_model(),
            timeout_secs: default_stage_timeout(),
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_cache_size() -> i32 {
    -64000
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "bge-m3".to_string()
}

fn default_dimension() -> usize {
    1024
}

fn default_batch_size() -> usize {
    20
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_max_chars() -> usize {
    2000
}

fn default_top_k() -> usize {
    5
}

fn default_max_top_k() -> usize {
    100
}

fn default_rrf_k() -> u32 {
    60
}

fn default_weight() -> f32 {
    1.0
}

fn default_min_pool() -> usize {
    100
}

fn default_max_pool() -> usize {
    200
}

fn default_rerank_candidates() -> usize {
    50
}

fn default_expansion_model() -> String {
    "llama3.2".to_string()
}

fn default_num_variations() -> usize {
    3
}

fn default_temperature() -> f32 {
    0.7
}

fn default_stage_timeout() -> u64 {
    10
}

fn default_rerank_model() -> String {
    "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string()
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docrag")
        .join("docs.db")
}

impl RagConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RagError::config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("docrag").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("docrag.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }
}
