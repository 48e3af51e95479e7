//! Local directory of markdown pages as a document source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use docrag_chunk::{extract_source_url, strip_source_marker};
use docrag_core::{DocumentSource, RagError, Result, SourceDocument};

/// Markdown files under a directory, e.g. the output of a docs scraper.
///
/// Each file may start with a `<!-- Source: URL -->` marker naming the page it
/// was fetched from; otherwise the page is identified by its `file://` URL.
pub struct MarkdownDirectory {
    name: String,
    root: PathBuf,
    recursive: bool,
}

impl MarkdownDirectory {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            recursive: true,
        }
    }

    /// Descend into subdirectories (default `true`).
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}

fn file_url(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

#[async_trait]
impl DocumentSource for MarkdownDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover_pages(&self) -> Result<Vec<String>> {
        let root = self.root.display().to_string();
        let mut pending = vec![self.root.clone()];
        let mut pages = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| RagError::load_failed(&root, format!("{}: {}", dir.display(), e)))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| RagError::load_failed(&root, e.to_string()))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| RagError::load_failed(&root, e.to_string()))?;

                if file_type.is_dir() {
                    if self.recursive {
                        pending.push(path);
                    }
                } else if is_markdown(&path) {
                    pages.push(path.display().to_string());
                }
            }
        }

        pages.sort();
        debug!("Found {} markdown files under {}", pages.len(), root);
        Ok(pages)
    }

    async fn fetch_page(&self, page: &str) -> Result<SourceDocument> {
        let path = Path::new(page);
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RagError::load_failed(page, e.to_string()))?;

        let source_url = extract_source_url(&content).unwrap_or_else(|| file_url(path));
        Ok(SourceDocument {
            source_url,
            markdown: strip_source_marker(&content),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn docs() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("b.md"),
            "<!-- Source: https://docs.example/b -->\n# B\n\nBody of b.",
        )
        .unwrap();
        fs::write(dir.path().join("a.md"), "# A\n\nBody of a.").unwrap();
        fs::write(dir.path().join("notes.txt"), "not markdown").unwrap();
        fs::create_dir(dir.path().join("guides")).unwrap();
        fs::write(dir.path().join("guides").join("c.MD"), "# C").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_discover_sorted_markdown() {
        let dir = docs();
        let source = MarkdownDirectory::new("local", dir.path());

        let pages = source.discover_pages().await.unwrap();
        assert_eq!(pages.len(), 3);
        assert!(pages[0].ends_with("a.md"));
        assert!(pages[1].ends_with("b.md"));
        assert!(pages[2].ends_with("c.MD"));
        assert_eq!(source.name(), "local");

        let flat = MarkdownDirectory::new("local", dir.path()).recursive(false);
        assert_eq!(flat.discover_pages().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_page_uses_marker() {
        let dir = docs();
        let source = MarkdownDirectory::new("local", dir.path());

        let b = dir.path().join("b.md").display().to_string();
        let document = source.fetch_page(&b).await.unwrap();
        assert_eq!(document.source_url, "https://docs.example/b");
        assert!(!document.markdown.contains("Source:"));
        assert!(document.markdown.contains("Body of b."));

        let a = dir.path().join("a.md").display().to_string();
        let document = source.fetch_page(&a).await.unwrap();
        assert!(document.source_url.starts_with("file://"));
        assert!(document.source_url.ends_with("a.md"));
    }

    #[tokio::test]
    async fn test_missing_page_and_root() {
        let dir = docs();
        let source = MarkdownDirectory::new("local", dir.path());

        let missing = dir.path().join("gone.md").display().to_string();
        let err = source.fetch_page(&missing).await.unwrap_err();
        assert_eq!(err.error_code(), "LOAD_FAILED");

        let nowhere = MarkdownDirectory::new("nowhere", dir.path().join("does-not-exist"));
        assert!(nowhere.discover_pages().await.is_err());
    }
}
