//! # Admindex CLI (`adx`)
//!
//! The `adx` binary drives the extraction-to-retrieval pipeline: database
//! initialization, document ingestion, search, inspection, statistics, and
//! exports.
//!
//! ## Usage
//!
//! ```bash
//! adx --config ./config/adx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `adx init` | Create the SQLite database and run schema migrations |
//! | `adx ingest <path>` | Extract, embed, and store a document or directory |
//! | `adx import <json>` | Ingest a pre-extracted interchange JSON file |
//! | `adx search "<query>"` | Semantic search with optional filters |
//! | `adx keyword "<term>"` | Keyword (FTS5) search |
//! | `adx get <doc_id>` | Print a document and its chunks |
//! | `adx stats` | Corpus statistics |
//! | `adx export` | Export the corpus as interchange JSON or CSV |
//! | `adx delete <doc_id>` | Delete a document and its chunks |

mod backend;
mod config;
mod error;
mod export;
mod extractor;
mod get;
mod ingest;
mod models;
mod schema;
mod search;
mod stats;
mod store;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::models::SearchFilters;

/// Admindex — schema-constrained extraction and hybrid retrieval for
/// administrative documents.
#[derive(Parser)]
#[command(
    name = "adx",
    about = "Admindex — schema-constrained document extraction and hybrid retrieval",
    version,
    long_about = "Admindex extracts structured metadata and self-contained text chunks \
    from administrative documents through a schema-constrained generative backend, embeds \
    each chunk, and stores everything in SQLite for hybrid retrieval (vector similarity \
    with filters + FTS5 keyword ranking)."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/adx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent.
    Init,

    /// Ingest a document file or a directory of documents.
    ///
    /// Each document goes through schema-bound extraction, per-chunk
    /// embedding, and a transactional upsert. A chunk that fails embedding
    /// is dropped with a warning; the document still ingests.
    Ingest {
        /// A .pdf/.docx file, or a directory scanned recursively.
        path: PathBuf,

        /// Re-use an existing document id (single file only). Updates that
        /// document's metadata instead of creating a new one.
        #[arg(long)]
        doc_id: Option<String>,

        /// Maximum number of documents to process from a directory.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Ingest a pre-extracted interchange JSON file.
    ///
    /// The file must contain `document_metadata` and `chunk_metadata` keys,
    /// as produced by `adx export --format json`.
    Import {
        /// Path to the interchange JSON file.
        path: PathBuf,
    },

    /// Semantic search over stored chunks.
    ///
    /// Embeds the query with the configured backend and ranks chunks by
    /// vector similarity. Filters restrict candidates before ranking.
    Search {
        /// The search query.
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Only chunks with exactly this content type (program category).
        #[arg(long)]
        content_type: Option<String>,

        /// Only chunks whose applicable cohort contains this text.
        #[arg(long)]
        cohort: Option<String>,

        /// Only chunks whose specific target contains this text.
        #[arg(long)]
        target: Option<String>,
    },

    /// Keyword search over chunk text (FTS5 bm25). Independent of vectors.
    Keyword {
        /// The search term(s).
        term: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a document and all of its chunks.
    Get {
        /// Document id.
        doc_id: String,
    },

    /// Corpus statistics: counts, embedding model, per-type breakdown.
    Stats,

    /// Export the corpus as interchange JSON or CSV tables.
    Export {
        /// Output format: `json` or `csv`.
        #[arg(long, default_value = "json")]
        format: String,

        /// Output file (json) or directory (csv). JSON defaults to stdout,
        /// CSV to `./export`.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Delete a document and, by cascade, all of its chunks.
    Delete {
        /// Document id.
        doc_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = store::connect(&cfg.db.path).await?;
            store::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, doc_id, limit } => {
            ingest::run_ingest(&cfg, &path, doc_id, limit).await?;
        }
        Commands::Import { path } => {
            ingest::run_import(&cfg, &path).await?;
        }
        Commands::Search {
            query,
            limit,
            content_type,
            cohort,
            target,
        } => {
            let filters = SearchFilters {
                content_type,
                applicable_cohort: cohort,
                specific_target: target,
            };
            search::run_search(&cfg, &query, limit, filters).await?;
        }
        Commands::Keyword { term, limit } => {
            search::run_keyword(&cfg, &term, limit).await?;
        }
        Commands::Get { doc_id } => {
            get::run_get(&cfg, &doc_id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { format, out } => match format.as_str() {
            "json" => {
                export::run_export_json(&cfg, out.as_deref()).await?;
            }
            "csv" => {
                let dir = out.unwrap_or_else(|| PathBuf::from("./export"));
                export::run_export_csv(&cfg, &dir).await?;
            }
            other => anyhow::bail!("Unknown export format: {}. Use json or csv.", other),
        },
        Commands::Delete { doc_id } => {
            let pool = store::connect(&cfg.db.path).await?;
            let existed = store::delete_document(&pool, &doc_id).await?;
            pool.close().await;
            if existed {
                println!("Deleted document {} and its chunks.", doc_id);
            } else {
                println!("No document with id {}.", doc_id);
            }
        }
    }

    Ok(())
}
