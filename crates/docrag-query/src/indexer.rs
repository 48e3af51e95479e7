//! Indexing pipeline: chunk, embed, store.

use std::sync::Arc;

use tracing::{debug, info, warn};

use docrag_core::{Chunker, DocumentSource, Embedder, RagError, Result, Store};

const DEFAULT_BATCH_SIZE: usize = 20;

/// Summary of one `index_source` run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexReport {
    pub collection: String,

    /// Pages indexed successfully.
    pub pages: usize,

    /// Chunks written across all pages.
    pub chunks: usize,

    /// Pages that could not be fetched, with the reason.
    pub failed: Vec<(String, String)>,

    /// Chunks removed up front when `clear` was requested.
    pub cleared: u64,
}

/// Writes documentation pages into a collection.
pub struct Indexer<S, E, C> {
    store: Arc<S>,
    embedder: Arc<E>,
    chunker: C,
    batch_size: usize,
}

impl<S, E, C> Indexer<S, E, C>
where
    S: Store + Send + Sync,
    E: Embedder + Send + Sync,
    C: Chunker,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, chunker: C) -> Self {
        Self {
            store,
            embedder,
            chunker,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Texts per embedding request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Index one page, replacing whatever the collection held for `source_url`.
    ///
    /// Returns the number of chunks written.
    pub async fn index_document(
        &self,
        collection: &str,
        markdown: &str,
        source_url: &str,
    ) -> Result<usize> {
        let chunks = self.chunker.chunk(markdown, source_url)?;

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(RagError::external(
                    self.embedder.model_name(),
                    format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
                ));
            }
            embeddings.extend(vectors);
        }

        let ids = self
            .store
            .replace_source(collection, source_url, &chunks, &embeddings)
            .await?;

        debug!("Indexed {} chunks from {}", ids.len(), source_url);
        Ok(ids.len())
    }

    /// Index every page a source can discover.
    ///
    /// Pages that fail to fetch are recorded in the report and skipped;
    /// embedding and storage errors abort the run.
    pub async fn index_source(
        &self,
        collection: &str,
        source: &dyn DocumentSource,
        clear: bool,
    ) -> Result<IndexReport> {
        let mut report = IndexReport {
            collection: collection.to_string(),
            ..IndexReport::default()
        };

        if clear {
            report.cleared = self.store.clear(collection).await?;
            info!("Cleared {} chunks from {}", report.cleared, collection);
        }

        let pages = source.discover_pages().await?;
        info!("Indexing {} pages from {} into {}", pages.len(), source.name(), collection);

        for page in pages {
            let document = match source.fetch_page(&page).await {
                Ok(document) => document,
                Err(e) => {
                    warn!("Skipping {}: {}", page, e);
                    report.failed.push((page, e.to_string()));
                    continue;
                }
            };

            report.chunks += self
                .index_document(collection, &document.markdown, &document.source_url)
                .await?;
            report.pages += 1;
        }

        info!(
            "Indexed {} pages ({} chunks) into {}, {} failed",
            report.pages,
            report.chunks,
            collection,
            report.failed.len()
        );
        Ok(report)
    }
}
