//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for each document: read bytes → schema-bound
//! extraction → per-chunk embedding → transactional upsert. Embedding runs
//! with bounded concurrency and a failed chunk never blocks its siblings:
//! it is dropped from the batch, logged, and counted in the report.
//!
//! Distinct documents are independent units of work — a directory ingest
//! runs them concurrently, each with its own storage transaction, and one
//! document's failure leaves the others untouched.

use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::backend::{create_backend, GenerativeBackend};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::extractor::{self, mime_for_path};
use crate::models::{Chunk, EmbeddedChunk, IngestReport, Interchange};
use crate::store;

/// Per-document ingestion options.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Concurrent embedding calls within one document.
    pub embed_concurrency: usize,
    /// Re-use an existing document id (metadata update) instead of minting
    /// a new one.
    pub doc_id: Option<String>,
}

/// Embed a document's chunks with bounded concurrency.
///
/// Order-preserving. A chunk whose embedding call fails is dropped with a
/// per-chunk warning; the second element of the return is the drop count.
pub async fn embed_chunks(
    backend: &dyn GenerativeBackend,
    chunks: Vec<Chunk>,
    concurrency: usize,
) -> (Vec<EmbeddedChunk>, usize) {
    let total = chunks.len();

    let embedded: Vec<EmbeddedChunk> = stream::iter(chunks)
        .map(|chunk| async move {
            match backend.embed(&chunk.chunk_text).await {
                Ok(embedding) => Some(EmbeddedChunk { chunk, embedding }),
                Err(e) => {
                    warn!(chunk_id = %chunk.chunk_id, error = %e, "embedding failed, dropping chunk");
                    None
                }
            }
        })
        .buffered(concurrency.max(1))
        .filter_map(|r| async move { r })
        .collect()
        .await;

    let dropped = total - embedded.len();
    (embedded, dropped)
}

/// Ingest one document file end to end.
pub async fn ingest_file(
    backend: &dyn GenerativeBackend,
    pool: &SqlitePool,
    path: &Path,
    opts: &IngestOptions,
) -> Result<IngestReport> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            PipelineError::Validation(format!("not a document path: {}", path.display()))
        })?
        .to_string();

    let mime_type = mime_for_path(path).ok_or_else(|| {
        PipelineError::Validation(format!(
            "unsupported document type: {} (expected .pdf or .docx)",
            file_name
        ))
    })?;

    let bytes = tokio::fs::read(path).await?;

    let outcome =
        extractor::extract_document(backend, &file_name, mime_type, &bytes, opts.doc_id.clone())
            .await?;
    let chunks_extracted = outcome.chunks.len();

    let (embedded, dropped) =
        embed_chunks(backend, outcome.chunks, opts.embed_concurrency).await;
    if dropped > 0 {
        warn!(
            file = %file_name,
            dropped,
            "document will be searchable with a reduced chunk set"
        );
    }

    store::upsert_document(pool, &outcome.document).await?;
    store::upsert_chunks(
        pool,
        &outcome.document.doc_id,
        &embedded,
        backend.embedding_model(),
        backend.embedding_dims(),
    )
    .await?;

    info!(
        file = %file_name,
        doc_id = %outcome.document.doc_id,
        chunks = embedded.len(),
        "document ingested"
    );

    Ok(IngestReport {
        doc_id: outcome.document.doc_id,
        file_name,
        chunks_extracted,
        chunks_embedded: embedded.len(),
        chunks_dropped: dropped,
        warnings: outcome.warnings,
    })
}

/// Ingest a file, or every ingestible file under a directory.
///
/// Documents run concurrently (bounded by `document_concurrency`), each
/// owning a private storage transaction. A failing document is logged and
/// skipped; it never rolls back or blocks the others.
pub async fn ingest_path(
    backend: &dyn GenerativeBackend,
    pool: &SqlitePool,
    path: &Path,
    embed_concurrency: usize,
    document_concurrency: usize,
    limit: Option<usize>,
) -> Result<Vec<IngestReport>> {
    let mut files: Vec<PathBuf> = if path.is_dir() {
        let mut found: Vec<PathBuf> = WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| mime_for_path(p).is_some())
            .collect();
        found.sort();
        found
    } else {
        vec![path.to_path_buf()]
    };

    if let Some(lim) = limit {
        files.truncate(lim);
    }

    let opts = IngestOptions {
        embed_concurrency,
        doc_id: None,
    };

    let reports: Vec<IngestReport> = stream::iter(files)
        .map(|file| {
            let opts = opts.clone();
            async move {
                match ingest_file(backend, pool, &file, &opts).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        error!(file = %file.display(), error = %e, "ingestion failed");
                        None
                    }
                }
            }
        })
        .buffer_unordered(document_concurrency.max(1))
        .filter_map(|r| async move { r })
        .collect()
        .await;

    Ok(reports)
}

/// Ingest a pre-extracted interchange JSON file
/// (`{ "document_metadata": …, "chunk_metadata": […] }`).
///
/// Ids already present are kept (the caller is re-applying a known
/// extraction); missing chunk ids are minted. Chunks are re-parented onto
/// the document id so ownership cannot drift.
pub async fn import_interchange(
    backend: &dyn GenerativeBackend,
    pool: &SqlitePool,
    path: &Path,
    embed_concurrency: usize,
) -> Result<IngestReport> {
    let text = tokio::fs::read_to_string(path).await?;
    let mut interchange: Interchange = serde_json::from_str(&text)
        .map_err(|e| PipelineError::Validation(format!("interchange file does not parse: {}", e)))?;

    let doc = &mut interchange.document_metadata;
    if doc.doc_id.trim().is_empty() {
        doc.doc_id = Uuid::new_v4().to_string();
    }
    if doc.file_name.trim().is_empty() || doc.title.trim().is_empty() {
        return Err(PipelineError::Validation(
            "interchange document needs a non-empty file_name and title".to_string(),
        ));
    }

    let doc_id = doc.doc_id.clone();
    let mut chunks = interchange.chunk_metadata;
    for chunk in &mut chunks {
        if chunk.chunk_id.trim().is_empty() {
            chunk.chunk_id = Uuid::new_v4().to_string();
        }
        chunk.doc_id = doc_id.clone();
        if chunk.chunk_text.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "interchange chunk {} has empty chunk_text",
                chunk.chunk_id
            )));
        }
    }
    let chunks_extracted = chunks.len();

    let (embedded, dropped) = embed_chunks(backend, chunks, embed_concurrency).await;

    store::upsert_document(pool, &interchange.document_metadata).await?;
    store::upsert_chunks(
        pool,
        &doc_id,
        &embedded,
        backend.embedding_model(),
        backend.embedding_dims(),
    )
    .await?;

    Ok(IngestReport {
        doc_id,
        file_name: interchange.document_metadata.file_name.clone(),
        chunks_extracted,
        chunks_embedded: embedded.len(),
        chunks_dropped: dropped,
        warnings: Vec::new(),
    })
}

// ============ CLI entry points ============

pub async fn run_ingest(
    config: &Config,
    path: &Path,
    doc_id: Option<String>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let backend = create_backend(&config.backend)?;
    let pool = store::connect(&config.db.path).await?;
    store::run_migrations(&pool).await?;

    if path.is_dir() {
        if doc_id.is_some() {
            anyhow::bail!("--doc-id applies to a single file, not a directory");
        }
        let reports = ingest_path(
            backend.as_ref(),
            &pool,
            path,
            config.ingest.embed_concurrency,
            config.ingest.document_concurrency,
            limit,
        )
        .await?;
        println!("ingest {}", path.display());
        println!("  documents ingested: {}", reports.len());
        println!(
            "  chunks stored: {}",
            reports.iter().map(|r| r.chunks_embedded).sum::<usize>()
        );
        println!(
            "  chunks dropped: {}",
            reports.iter().map(|r| r.chunks_dropped).sum::<usize>()
        );
    } else {
        let opts = IngestOptions {
            embed_concurrency: config.ingest.embed_concurrency,
            doc_id,
        };
        let report = ingest_file(backend.as_ref(), &pool, path, &opts).await?;
        print_report(&report);
    }

    println!("ok");
    pool.close().await;
    Ok(())
}

pub async fn run_import(config: &Config, path: &Path) -> anyhow::Result<()> {
    let backend = create_backend(&config.backend)?;
    let pool = store::connect(&config.db.path).await?;
    store::run_migrations(&pool).await?;

    let report =
        import_interchange(backend.as_ref(), &pool, path, config.ingest.embed_concurrency).await?;
    print_report(&report);

    println!("ok");
    pool.close().await;
    Ok(())
}

fn print_report(report: &IngestReport) {
    println!("ingest {}", report.file_name);
    println!("  doc_id: {}", report.doc_id);
    println!("  chunks extracted: {}", report.chunks_extracted);
    println!("  chunks embedded: {}", report.chunks_embedded);
    if report.chunks_dropped > 0 {
        println!("  chunks dropped: {}", report.chunks_dropped);
    }
    for w in &report.warnings {
        println!("  warning: {}", w);
    }
}
