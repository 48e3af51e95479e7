//! docrag-chunk - Markdown chunking
//!
//! Splits fetched documentation pages into retrievable units that carry
//! their heading context.
//!
//! # Example
//!
//! ```rust
//! use docrag_chunk::{Chunker, MarkdownChunker};
//!
//! let chunker = MarkdownChunker::new(2000);
//! let chunks = chunker
//!     .chunk("# Guide\n\n## Install\n\nRun `npm install`.", "https://docs.example/guide")
//!     .unwrap();
//! assert_eq!(chunks[0].section, "Install");
//! ```

mod markdown;
mod marker;

pub use markdown::MarkdownChunker;
pub use marker::{extract_source_url, strip_source_marker};

// Re-export types for convenience
pub use docrag_core::{Chunk, Chunker};
