//! docrag-store - SQLite hybrid store
//!
//! Persists chunks per collection and indexes them twice over the same rows:
//! an FTS5 table for BM25 keyword search and a vector table scored with
//! sqlite-vec's cosine distance. Both indexes are written in one transaction.

mod fts;
mod schema;
mod sqlite;

pub use fts::build_fts_query;
pub use sqlite::{collection_counts, SqliteStore};
