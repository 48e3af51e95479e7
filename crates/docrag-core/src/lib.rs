//! docrag-core - Core types and traits for docrag
//!
//! This crate provides the domain types, component traits, error taxonomy
//! and configuration shared by the chunker, store, model clients and
//! search pipeline.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RagError, Result};
pub use traits::*;
pub use types::*;
