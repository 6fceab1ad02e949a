//! Corpus statistics and health overview.
//!
//! A quick summary of what's indexed: document and chunk counts, embedding
//! model coverage, and a per-document-type breakdown. Used by `adx stats`
//! to confirm ingestion is doing what it should.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::store;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = store::connect(&config.db.path).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let content_types: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT content_type) FROM chunks WHERE content_type IS NOT NULL",
    )
    .fetch_one(&pool)
    .await?;

    let models = store::stored_embedding_models(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path).map(|m| m.len()).unwrap_or(0);

    println!("Admindex — Corpus Stats");
    println!("=======================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    println!();
    println!("  Documents:      {}", total_docs);
    println!("  Chunks:         {}", total_chunks);
    println!("  Content types:  {}", content_types);
    println!(
        "  Embedding model: {}",
        if models.is_empty() {
            "(none)".to_string()
        } else {
            models.join(", ")
        }
    );

    let type_rows = sqlx::query(
        r#"
        SELECT
            COALESCE(d.doc_type, '(untyped)') AS doc_type,
            COUNT(DISTINCT d.doc_id) AS doc_count,
            COUNT(c.chunk_id) AS chunk_count
        FROM documents d
        LEFT JOIN chunks c ON c.doc_id = d.doc_id
        GROUP BY d.doc_type
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !type_rows.is_empty() {
        println!();
        println!("  By document type:");
        println!("  {:<28} {:>6} {:>8}", "TYPE", "DOCS", "CHUNKS");
        println!("  {}", "-".repeat(46));
        for row in &type_rows {
            let doc_type: String = row.get("doc_type");
            let doc_count: i64 = row.get("doc_count");
            let chunk_count: i64 = row.get("chunk_count");
            println!("  {:<28} {:>6} {:>8}", doc_type, doc_count, chunk_count);
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
