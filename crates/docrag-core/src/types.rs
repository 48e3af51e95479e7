//! Core domain types for docrag.

use serde::{Deserialize, Serialize};

/// Identifier of a stored chunk, shared by the vector and keyword index.
///
/// Assigned by the store in insertion order and never reused within a database.
pub type ChunkId = i64;

/// A contiguous span of one source document plus its structural metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text, never empty.
    pub content: String,

    /// URL of the page this chunk came from.
    pub source_url: String,

    /// Title of the page (first H1), may be empty.
    #[serde(default)]
    pub page_title: String,

    /// Innermost section heading, may be empty.
    #[serde(default)]
    pub section: String,

    /// Heading path from outermost to innermost.
    #[serde(default)]
    pub hierarchy: Vec<String>,

    /// Whether the content contains a fenced code block.
    #[serde(default)]
    pub has_code: bool,

    /// Position of this chunk within its document.
    pub chunk_index: u32,
}

impl Chunk {
    /// Create a chunk with empty structural metadata.
    pub fn new(source_url: impl Into<String>, chunk_index: u32, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source_url: source_url.into(),
            page_title: String::new(),
            section: String::new(),
            hierarchy: Vec::new(),
            has_code: false,
            chunk_index,
        }
    }

    /// Set the section and heading path.
    pub fn with_section(mut self, section: impl Into<String>, hierarchy: Vec<String>) -> Self {
        self.section = section.into();
        self.hierarchy = hierarchy;
        self
    }

    /// Set the page title.
    pub fn with_page_title(mut self, page_title: impl Into<String>) -> Self {
        self.page_title = page_title.into();
        self
    }

    /// Content-derived key: the same text from the same page maps to the same stored row.
    pub fn content_key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.source_url.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }
}

/// A chunk as persisted in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: ChunkId,
    pub collection: String,
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk returned by one retrieval method, with that method's raw score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: ChunkId,
    pub chunk: Chunk,
    /// Higher is better. Cosine similarity for vector search, negated BM25 for keyword search.
    pub score: f32,
}

/// Per-stage ranks of a result (1-based; `None` when absent from that stage).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankDiagnostics {
    pub semantic_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
    pub fused_rank: Option<usize>,
}

/// A single search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub content: String,
    pub source_url: String,
    pub page_title: String,
    pub section: String,
    pub hierarchy: Vec<String>,
    pub has_code: bool,
    pub chunk_index: u32,

    /// Higher is more relevant; only comparable within one search call.
    pub score: f32,

    pub diagnostics: RankDiagnostics,
}

impl SearchResult {
    /// Build a result from a stored chunk.
    pub fn from_chunk(chunk_id: ChunkId, chunk: Chunk, score: f32) -> Self {
        Self {
            chunk_id,
            content: chunk.content,
            source_url: chunk.source_url,
            page_title: chunk.page_title,
            section: chunk.section,
            hierarchy: chunk.hierarchy,
            has_code: chunk.has_code,
            chunk_index: chunk.chunk_index,
            score,
            diagnostics: RankDiagnostics::default(),
        }
    }

    /// Heading breadcrumb, e.g. `Hooks > useEffect`.
    pub fn breadcrumb(&self) -> String {
        self.hierarchy.join(" > ")
    }
}

/// Search results with metadata about the pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub collection: String,

    /// Query variants that were actually searched, original first.
    pub variants: Vec<String>,

    pub expansion: StageStatus,
    pub rerank: StageStatus,

    /// Search latency in milliseconds.
    pub latency_ms: u64,

    pub results: Vec<SearchResult>,
}

impl SearchResults {
    /// Empty result set for a query that had nothing to search.
    pub fn empty(query: &str, collection: &str) -> Self {
        Self {
            query: query.to_string(),
            collection: collection.to_string(),
            variants: Vec::new(),
            expansion: StageStatus::Disabled,
            rerank: StageStatus::Disabled,
            latency_ms: 0,
            results: Vec::new(),
        }
    }
}

/// Reported status of an optional pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StageStatus {
    Disabled,
    Applied,
    Fallback { reason: String },
}

impl StageStatus {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Outcome of an optional stage: either its output, or the input it fell back to.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Applied(T),
    Fallback { value: T, reason: String },
}

impl<T> StageOutcome<T> {
    pub fn fallback(value: T, reason: impl Into<String>) -> Self {
        Self::Fallback {
            value,
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StageStatus {
        match self {
            Self::Applied(_) => StageStatus::Applied,
            Self::Fallback { reason, .. } => StageStatus::Fallback {
                reason: reason.clone(),
            },
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Applied(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Applied(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn into_parts(self) -> (T, StageStatus) {
        let status = self.status();
        (self.into_value(), status)
    }
}

/// A fetched page ready for chunking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source_url: String,
    pub markdown: String,
}

/// Administrative view of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,

    /// Embedding dimension established by the first write.
    pub dimension: usize,

    pub chunks: u64,
    pub sources: u64,

    /// Creation timestamp (Unix millis).
    pub created_at: u64,
}

/// Storage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Collection filter applied, if any.
    pub collection: Option<String>,

    pub collections: u64,
    pub chunks: u64,
    pub vectors: u64,
    pub sources: u64,

    /// Database size in bytes.
    pub size_bytes: u64,
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
