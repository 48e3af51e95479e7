//! docrag CLI - index documentation and search it from the command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docrag_chunk::MarkdownChunker;
use docrag_core::{RagConfig, SearchResults, Stats, Store};
use docrag_models::{HttpCrossEncoder, OllamaEmbedder, OllamaGenerator};
use docrag_query::{
    IndexReport, Indexer, MarkdownDirectory, QueryEngine, QueryExpander, Reranker, SearchOptions,
};
use docrag_store::{collection_counts, SqliteStore};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// docrag - Hybrid semantic + keyword search over documentation
#[derive(Parser)]
#[command(name = "docrag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Config file (default: <config_dir>/docrag/config.toml, then ./docrag.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory of markdown pages into a collection
    Index {
        /// Collection to index into
        collection: String,

        /// Directory containing .md files
        dir: PathBuf,

        /// Remove everything in the collection first
        #[arg(long)]
        clear: bool,

        /// Only index files directly inside the directory
        #[arg(long)]
        no_recursive: bool,
    },

    /// Search a collection
    Search {
        /// Collection to search
        collection: String,

        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Also search LLM-generated rephrasings of the query
        #[arg(long)]
        expand: bool,

        /// Rerank candidates with the cross-encoder service
        #[arg(long)]
        rerank: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List collections with their chunk counts
    Collections,

    /// List the pages indexed in a collection
    Sources {
        /// Collection name
        collection: String,
    },

    /// Remove every chunk of a collection
    Clear {
        /// Collection name
        collection: String,
    },

    /// Show statistics
    Stats {
        /// Collection to get stats for (all if not specified)
        collection: Option<String>,
    },
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn load_config(cli: &Cli) -> CliResult<RagConfig> {
    let mut config = match &cli.config {
        Some(path) => RagConfig::load(path)?,
        None => RagConfig::load_default()?,
    };
    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(&cli)?;
    let store = Arc::new(SqliteStore::open_with_config(&config.database)?);

    match cli.command {
        Commands::Index {
            collection,
            dir,
            clear,
            no_recursive,
        } => {
            let report = index(store, &config, &collection, dir, clear, !no_recursive).await?;
            print!("{}", format_report(&report));
        }
        Commands::Search {
            collection,
            query,
            top_k,
            expand,
            rerank,
            json,
        } => {
            let options = SearchOptions {
                top_k: top_k.unwrap_or(config.search.default_top_k),
                expand_query: expand,
                rerank,
            };
            let results = search(store, &config, &collection, &query, &options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print!("{}", format_results(&results));
            }
        }
        Commands::Collections => {
            let counts = collection_counts(store.as_ref()).await?;
            print!("{}", format_collections(&counts));
        }
        Commands::Sources { collection } => {
            let sources = store.list_sources(&collection).await?;
            if sources.is_empty() {
                println!("No pages indexed in '{}'.", collection);
            }
            for source in sources {
                println!("{}", source);
            }
        }
        Commands::Clear { collection } => {
            let removed = store.clear(&collection).await?;
            println!("Removed {} chunks from '{}'.", removed, collection);
        }
        Commands::Stats { collection } => {
            let stats = store.stats(collection.as_deref()).await?;
            print!("{}", format_stats(&stats));
        }
    }

    Ok(())
}

async fn index(
    store: Arc<SqliteStore>,
    config: &RagConfig,
    collection: &str,
    dir: PathBuf,
    clear: bool,
    recursive: bool,
) -> CliResult<IndexReport> {
    let embedder = Arc::new(OllamaEmbedder::new(&config.embedding)?);
    let indexer = Indexer::new(store, embedder, MarkdownChunker::new(config.chunking.max_chars))
        .with_batch_size(config.embedding.batch_size);
    let source = MarkdownDirectory::new(collection, dir).recursive(recursive);

    println!(
        "Indexing {} into collection '{}'...",
        source.root().display(),
        collection
    );
    Ok(indexer.index_source(collection, &source, clear).await?)
}

async fn search(
    store: Arc<SqliteStore>,
    config: &RagConfig,
    collection: &str,
    query: &str,
    options: &SearchOptions,
) -> CliResult<SearchResults> {
    let embedder = Arc::new(OllamaEmbedder::new(&config.embedding)?);
    let mut engine = QueryEngine::new(store, embedder, config.search.clone())
        .with_embed_timeout(Duration::from_secs(config.embedding.timeout_secs));

    if options.expand_query {
        let generator = Arc::new(OllamaGenerator::new(&config.expansion)?);
        engine = engine.with_expander(QueryExpander::new(generator, &config.expansion));
    }
    if options.rerank && config.reranker.base_url.is_some() {
        let model = Arc::new(HttpCrossEncoder::new(&config.reranker)?);
        engine = engine.with_reranker(Reranker::new(
            model,
            Duration::from_secs(config.reranker.timeout_secs),
        ));
    }

    Ok(engine.search(query, collection, options).await?)
}

fn format_report(report: &IndexReport) -> String {
    let mut output = String::new();
    if report.cleared > 0 {
        output.push_str(&format!("Cleared {} existing chunks\n", report.cleared));
    }
    for (page, reason) in &report.failed {
        output.push_str(&format!("  {} - Error: {}\n", page, reason));
    }
    output.push_str(&format!(
        "\nComplete: {} pages ({} chunks) indexed into '{}', {} failed\n",
        report.pages,
        report.chunks,
        report.collection,
        report.failed.len()
    ));
    output
}

fn format_results(results: &SearchResults) -> String {
    if results.results.is_empty() {
        return format!(
            "No results found for '{}' in '{}'.\n\nTry:\n- Different keywords\n- Broader search terms\n- Checking that the collection is indexed (docrag collections)\n",
            results.query, results.collection
        );
    }

    let mut output = format!("# Search Results for '{}'\n\n", results.query);
    output.push_str(&format!(
        "**Collection:** {} | **Results:** {} | **Time:** {}ms\n\n",
        results.collection,
        results.results.len(),
        results.latency_ms
    ));
    if results.variants.len() > 1 {
        output.push_str(&format!("**Variants:** {}\n\n", results.variants.join(" | ")));
    }

    for (i, result) in results.results.iter().enumerate() {
        let heading = if result.hierarchy.is_empty() {
            "Untitled".to_string()
        } else {
            result.breadcrumb()
        };
        output.push_str(&format!("## [{}] {}\n", i + 1, heading));
        output.push_str(&format!(
            "**Score:** {:.3} | **Source:** {}\n\n",
            result.score, result.source_url
        ));
        output.push_str(&result.content);
        output.push_str("\n\n---\n\n");
    }

    output
}

fn format_collections(counts: &[(String, u64)]) -> String {
    if counts.is_empty() {
        return "No collections found. Index documentation first with: docrag index <collection> <dir>\n"
            .to_string();
    }

    let mut output = format!("Found {} collections:\n\n", counts.len());
    for (name, chunks) in counts {
        output.push_str(&format!("- {}: {} chunks\n", name, chunks));
    }
    output
}

fn format_stats(stats: &Stats) -> String {
    let mut output = String::new();

    if let Some(collection) = &stats.collection {
        output.push_str(&format!("Statistics for collection '{}':\n\n", collection));
    } else {
        output.push_str("Overall statistics:\n\n");
    }

    output.push_str(&format!("- Collections: {}\n", stats.collections));
    output.push_str(&format!("- Pages: {}\n", stats.sources));
    output.push_str(&format!("- Chunks: {}\n", stats.chunks));
    output.push_str(&format!("- Vectors: {}\n", stats.vectors));
    output.push_str(&format!(
        "- Storage: {:.2} MB\n",
        stats.size_bytes as f64 / 1024.0 / 1024.0
    ));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_core::{Chunk, SearchResult, StageStatus};

    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::try_parse_from([
            "docrag", "--database", "/tmp/docs.db", "search", "react", "useEffect cleanup", "-k",
            "3", "--expand",
        ])
        .unwrap();

        assert_eq!(cli.database, Some(PathBuf::from("/tmp/docs.db")));
        match cli.command {
            Commands::Search {
                collection,
                query,
                top_k,
                expand,
                rerank,
                json,
            } => {
                assert_eq!(collection, "react");
                assert_eq!(query, "useEffect cleanup");
                assert_eq!(top_k, Some(3));
                assert!(expand);
                assert!(!rerank);
                assert!(!json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn test_cli_parses_index() {
        let cli = Cli::try_parse_from(["docrag", "index", "stripe", "./docs/stripe", "--clear"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Index { clear: true, no_recursive: false, .. }
        ));
    }

    #[test]
    fn test_format_results() {
        let chunk = Chunk::new("https://docs.example/hooks", 0, "useEffect runs after render")
            .with_section("useEffect", vec!["Hooks".to_string(), "useEffect".to_string()]);
        let results = SearchResults {
            query: "effects".to_string(),
            collection: "react".to_string(),
            variants: vec!["effects".to_string()],
            expansion: StageStatus::Disabled,
            rerank: StageStatus::Disabled,
            latency_ms: 4,
            results: vec![SearchResult::from_chunk(1, chunk, 0.0331)],
        };

        let output = format_results(&results);
        assert!(output.starts_with("# Search Results for 'effects'"));
        assert!(output.contains("## [1] Hooks > useEffect"));
        assert!(output.contains("**Score:** 0.033 | **Source:** https://docs.example/hooks"));

        let empty = format_results(&SearchResults::empty("effects", "react"));
        assert!(empty.starts_with("No results found for 'effects' in 'react'"));
    }

    #[test]
    fn test_format_collections_and_stats() {
        assert!(format_collections(&[]).starts_with("No collections found"));
        let listing = format_collections(&[("react".to_string(), 42)]);
        assert!(listing.contains("- react: 42 chunks"));

        let stats = Stats {
            collection: Some("react".to_string()),
            collections: 1,
            chunks: 42,
            vectors: 42,
            sources: 7,
            size_bytes: 2 * 1024 * 1024,
        };
        let output = format_stats(&stats);
        assert!(output.contains("Statistics for collection 'react'"));
        assert!(output.contains("- Pages: 7"));
        assert!(output.contains("- Storage: 2.00 MB"));
    }
}
