//! Storage engine: durable, idempotent persistence for documents and chunks.
//!
//! SQLite via sqlx, WAL mode, foreign keys on. The schema keeps one row per
//! document, one row per chunk (embedding stored inline as a little-endian
//! f32 BLOB, next to the model name and dimensionality that produced it),
//! and an FTS5 mirror of `chunk_text` for keyword search.
//!
//! Write semantics:
//! - [`upsert_document`] inserts, or updates the mutable metadata fields of
//!   an existing row. `doc_id` and `created_at` never change.
//! - [`upsert_chunks`] applies one document's chunk batch inside a single
//!   transaction; any failure rolls the whole batch back. Batches of
//!   different documents are independent transactions.
//! - Documents are never deleted implicitly; [`delete_document`] is the
//!   explicit path and cascades to chunks and their FTS rows.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::backend::vec_to_blob;
use crate::error::{PipelineError, Result};
use crate::models::{Chunk, ChunkValue, Document, EmbeddedChunk};

pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(PipelineError::Storage)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create the schema. Idempotent; safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            doc_id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            title TEXT NOT NULL,
            doc_type TEXT,
            issue_number TEXT,
            issuing_authority TEXT,
            issuing_dept TEXT,
            issue_date TEXT,
            effective_date TEXT,
            expiration_date TEXT,
            major_topic TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL REFERENCES documents(doc_id) ON DELETE CASCADE,
            page_number INTEGER,
            section_title TEXT,
            chunk_topic TEXT,
            content_type TEXT,
            specific_target TEXT,
            applicable_cohort TEXT,
            value TEXT,
            unit TEXT,
            keywords TEXT NOT NULL DEFAULT '[]',
            chunk_text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            embedding_model TEXT NOT NULL,
            embedding_dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                doc_id UNINDEXED,
                chunk_text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_content_type ON chunks(content_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_doc_type ON documents(doc_type)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Insert a document, or update the metadata of an existing one.
///
/// A single statement, so it is atomic on its own. `created_at` is written
/// once on insert and left untouched by updates.
pub async fn upsert_document(pool: &SqlitePool, doc: &Document) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (
            doc_id, file_name, title, doc_type, issue_number,
            issuing_authority, issuing_dept, issue_date, effective_date,
            expiration_date, major_topic, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(doc_id) DO UPDATE SET
            file_name = excluded.file_name,
            title = excluded.title,
            doc_type = excluded.doc_type,
            issue_number = excluded.issue_number,
            issuing_authority = excluded.issuing_authority,
            issuing_dept = excluded.issuing_dept,
            issue_date = excluded.issue_date,
            effective_date = excluded.effective_date,
            expiration_date = excluded.expiration_date,
            major_topic = excluded.major_topic,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&doc.doc_id)
    .bind(&doc.file_name)
    .bind(&doc.title)
    .bind(&doc.doc_type)
    .bind(&doc.issue_number)
    .bind(&doc.issuing_authority)
    .bind(&doc.issuing_dept)
    .bind(doc.issue_date.map(|d| d.to_string()))
    .bind(&doc.effective_date)
    .bind(doc.expiration_date.map(|d| d.to_string()))
    .bind(&doc.major_topic)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Apply one document's chunk batch in a single transaction.
///
/// Each chunk is inserted, or — on `chunk_id` conflict — has its
/// `chunk_text` and embedding replaced together. The FTS mirror is kept in
/// sync inside the same transaction. Any failure (including a chunk whose
/// embedding does not match `dims`, or a chunk not owned by `doc_id`) rolls
/// back the entire batch; previously committed batches of other documents
/// are unaffected.
pub async fn upsert_chunks(
    pool: &SqlitePool,
    doc_id: &str,
    batch: &[EmbeddedChunk],
    embedding_model: &str,
    dims: usize,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    for item in batch {
        let chunk = &item.chunk;
        if chunk.doc_id != doc_id {
            return Err(PipelineError::Validation(format!(
                "chunk {} belongs to document {}, not {}",
                chunk.chunk_id, chunk.doc_id, doc_id
            )));
        }
        if item.embedding.len() != dims {
            return Err(PipelineError::Validation(format!(
                "chunk {} embedding has {} dims, expected {}",
                chunk.chunk_id,
                item.embedding.len(),
                dims
            )));
        }

        let keywords_json = serde_json::to_string(&chunk.keywords)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        let blob = vec_to_blob(&item.embedding);

        sqlx::query(
            r#"
            INSERT INTO chunks (
                chunk_id, doc_id, page_number, section_title, chunk_topic,
                content_type, specific_target, applicable_cohort, value, unit,
                keywords, chunk_text, embedding, embedding_model, embedding_dims,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                chunk_text = excluded.chunk_text,
                embedding = excluded.embedding,
                embedding_model = excluded.embedding_model,
                embedding_dims = excluded.embedding_dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.doc_id)
        .bind(chunk.page_number)
        .bind(&chunk.section_title)
        .bind(&chunk.chunk_topic)
        .bind(&chunk.content_type)
        .bind(&chunk.specific_target)
        .bind(&chunk.applicable_cohort)
        .bind(chunk.value.as_ref().map(|v| v.as_stored()))
        .bind(&chunk.unit)
        .bind(keywords_json)
        .bind(&chunk.chunk_text)
        .bind(blob)
        .bind(embedding_model)
        .bind(dims as i64)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.chunk_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, doc_id, chunk_text) VALUES (?, ?, ?)")
            .bind(&chunk.chunk_id)
            .bind(&chunk.doc_id)
            .bind(&chunk.chunk_text)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Explicitly delete a document and everything it owns. Returns whether a
/// document row existed.
pub async fn delete_document(pool: &SqlitePool, doc_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunks_fts WHERE doc_id = ?")
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;

    // Chunk rows cascade through the foreign key.
    let result = sqlx::query("DELETE FROM documents WHERE doc_id = ?")
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_chunks(pool: &SqlitePool, doc_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE doc_id = ?")
        .bind(doc_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Distinct embedding models present in the store. More than one — or one
/// that differs from the active backend's — means mixed embedding spaces.
pub async fn stored_embedding_models(pool: &SqlitePool) -> Result<Vec<String>> {
    let models: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT embedding_model FROM chunks ORDER BY embedding_model")
            .fetch_all(pool)
            .await?;
    Ok(models)
}

pub async fn fetch_document(pool: &SqlitePool, doc_id: &str) -> Result<Option<Document>> {
    let row = sqlx::query("SELECT * FROM documents WHERE doc_id = ?")
        .bind(doc_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| document_from_row(&r)))
}

pub async fn fetch_all_documents(pool: &SqlitePool) -> Result<Vec<Document>> {
    let rows = sqlx::query("SELECT * FROM documents ORDER BY file_name, doc_id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(document_from_row).collect())
}

/// All chunks of one document (without embeddings), ordered for stable
/// display and export.
pub async fn fetch_chunks(pool: &SqlitePool, doc_id: &str) -> Result<Vec<Chunk>> {
    let rows = sqlx::query(
        "SELECT * FROM chunks WHERE doc_id = ? ORDER BY page_number, chunk_id",
    )
    .bind(doc_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(chunk_from_row).collect())
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        doc_id: row.get("doc_id"),
        file_name: row.get("file_name"),
        title: row.get("title"),
        doc_type: row.get("doc_type"),
        issue_number: row.get("issue_number"),
        issuing_authority: row.get("issuing_authority"),
        issuing_dept: row.get("issuing_dept"),
        issue_date: parse_stored_date(row.get("issue_date")),
        effective_date: row.get("effective_date"),
        expiration_date: parse_stored_date(row.get("expiration_date")),
        major_topic: row.get("major_topic"),
    }
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let keywords_json: String = row.get("keywords");
    let value_text: Option<String> = row.get("value");
    Chunk {
        chunk_id: row.get("chunk_id"),
        doc_id: row.get("doc_id"),
        page_number: row.get("page_number"),
        section_title: row.get("section_title"),
        chunk_topic: row.get("chunk_topic"),
        content_type: row.get("content_type"),
        specific_target: row.get("specific_target"),
        applicable_cohort: row.get("applicable_cohort"),
        value: value_text.map(|v| ChunkValue::from_stored(&v)),
        unit: row.get("unit"),
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        chunk_text: row.get("chunk_text"),
    }
}

fn parse_stored_date(text: Option<String>) -> Option<chrono::NaiveDate> {
    text.and_then(|t| chrono::NaiveDate::parse_from_str(&t, "%Y-%m-%d").ok())
}
