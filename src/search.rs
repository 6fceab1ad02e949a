//! Retrieval engine: semantic and keyword search over stored chunks.
//!
//! The two modes are deliberately independent — the engine never merges
//! them into one ranking; a caller that wants both runs both.
//!
//! - [`semantic_search`] embeds the query with the same backend used at
//!   ingestion (a recorded-model mismatch is an error, not a silent
//!   cross-space ranking), scores every candidate chunk by cosine
//!   similarity, and returns the top `limit` hits. Filters restrict the
//!   candidate set before ranking, so a filtered-out chunk can never
//!   appear, however well it scores.
//! - [`keyword_search`] ranks chunks by FTS5 bm25 relevance over
//!   `chunk_text`, with no dependency on vector state.
//!
//! Both are read-only, tolerate empty stores, and signal "no results" with
//! an empty list. Ordering is deterministic: score descending, then
//! `chunk_id` ascending.

use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;

use crate::backend::{blob_to_vec, cosine_similarity, create_backend, GenerativeBackend};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::models::{ChunkValue, SearchFilters, SearchHit};
use crate::store;

/// Columns shared by both search modes: chunk fields plus the joined
/// attributes of the owning document.
const HIT_COLUMNS: &str = "c.chunk_id, c.doc_id, c.chunk_text, c.chunk_topic, c.content_type, \
     c.specific_target, c.applicable_cohort, c.value, c.unit, \
     d.title AS doc_title, d.doc_type AS doc_type, d.file_name AS file_name, \
     d.issue_date AS issue_date";

/// Rank chunks by vector similarity to `query`, optionally restricted by
/// structured filters.
pub async fn semantic_search(
    pool: &SqlitePool,
    backend: &dyn GenerativeBackend,
    query: &str,
    limit: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    // Refuse to rank across embedding spaces: every stored vector must come
    // from the model this backend would embed the query with.
    let active = backend.embedding_model();
    for stored in store::stored_embedding_models(pool).await? {
        if stored != active {
            return Err(PipelineError::Validation(format!(
                "stored embeddings were produced by {:?} but the configured embedding model is {:?}; re-ingest before searching",
                stored, active
            )));
        }
    }

    let query_vec = backend.embed(query).await?;

    let mut sql = format!(
        "SELECT {}, c.embedding AS embedding FROM chunks c \
         JOIN documents d ON d.doc_id = c.doc_id",
        HIT_COLUMNS
    );
    let mut binds: Vec<String> = Vec::new();
    let mut predicates: Vec<&str> = Vec::new();
    if let Some(ct) = &filters.content_type {
        predicates.push("c.content_type = ?");
        binds.push(ct.clone());
    }
    if let Some(cohort) = &filters.applicable_cohort {
        predicates.push("c.applicable_cohort LIKE ?");
        binds.push(format!("%{}%", cohort));
    }
    if let Some(target) = &filters.specific_target {
        predicates.push("c.specific_target LIKE ?");
        binds.push(format!("%{}%", target));
    }
    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }

    let mut q = sqlx::query(&sql);
    for b in &binds {
        q = q.bind(b);
    }
    let rows = q.fetch_all(pool).await?;

    let mut hits: Vec<SearchHit> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let stored_vec = blob_to_vec(&blob);
            let score = similarity_score(cosine_similarity(&query_vec, &stored_vec));
            hit_from_row(row, score)
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(limit);

    Ok(hits)
}

/// Rank chunks by bm25 text relevance of `chunk_text` against `term`.
pub async fn keyword_search(pool: &SqlitePool, term: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let match_expr = match fts_query(term) {
        Some(expr) => expr,
        None => return Ok(Vec::new()),
    };
    if limit == 0 {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {}, chunks_fts.rank AS rank FROM chunks_fts \
         JOIN chunks c ON c.chunk_id = chunks_fts.chunk_id \
         JOIN documents d ON d.doc_id = c.doc_id \
         WHERE chunks_fts MATCH ? \
         ORDER BY chunks_fts.rank, c.chunk_id \
         LIMIT ?",
        HIT_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(&match_expr)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| {
            // FTS5 rank is negative bm25: lower = better. Negate so higher
            // scores read as more relevant.
            let rank: f64 = row.get("rank");
            hit_from_row(row, -rank)
        })
        .collect())
}

/// Build an FTS5 MATCH expression from free-form user input.
///
/// Every whitespace-separated token is stripped to its alphanumeric core
/// and quoted, so punctuation in the input cannot become FTS5 query syntax.
/// Tokens are implicitly AND-ed. Returns `None` when nothing searchable
/// remains.
fn fts_query(term: &str) -> Option<String> {
    let tokens: Vec<String> = term
        .split_whitespace()
        .map(|t| t.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// Map raw cosine similarity in [-1, 1] monotonically onto [0, 1].
fn similarity_score(cos: f32) -> f64 {
    (((cos as f64) + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn hit_from_row(row: &sqlx::sqlite::SqliteRow, score: f64) -> SearchHit {
    let value_text: Option<String> = row.get("value");
    let issue_date: Option<String> = row.get("issue_date");
    SearchHit {
        chunk_id: row.get("chunk_id"),
        doc_id: row.get("doc_id"),
        chunk_text: row.get("chunk_text"),
        chunk_topic: row.get("chunk_topic"),
        content_type: row.get("content_type"),
        specific_target: row.get("specific_target"),
        applicable_cohort: row.get("applicable_cohort"),
        value: value_text.map(|v| ChunkValue::from_stored(&v)),
        unit: row.get("unit"),
        doc_title: row.get("doc_title"),
        doc_type: row.get("doc_type"),
        file_name: row.get("file_name"),
        issue_date: issue_date.and_then(|t| chrono::NaiveDate::parse_from_str(&t, "%Y-%m-%d").ok()),
        score,
    }
}

// ============ CLI entry points ============

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    filters: SearchFilters,
) -> anyhow::Result<()> {
    let backend = create_backend(&config.backend)?;
    let pool = store::connect(&config.db.path).await?;

    let limit = limit.unwrap_or(config.retrieval.default_limit);
    let hits = semantic_search(&pool, backend.as_ref(), query, limit, &filters).await?;

    print_hits(&hits);
    pool.close().await;
    Ok(())
}

pub async fn run_keyword(config: &Config, term: &str, limit: Option<usize>) -> anyhow::Result<()> {
    let pool = store::connect(&config.db.path).await?;

    let limit = limit.unwrap_or(config.retrieval.keyword_limit);
    let hits = keyword_search(&pool, term, limit).await?;

    print_hits(&hits);
    pool.close().await;
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} — {}",
            i + 1,
            hit.score,
            hit.chunk_topic.as_deref().unwrap_or("(no topic)"),
            hit.doc_title
        );
        println!(
            "    file: {}  date: {}",
            hit.file_name,
            hit.issue_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        if let Some(ct) = &hit.content_type {
            println!("    program: {}", ct);
        }
        if let Some(cohort) = &hit.applicable_cohort {
            println!("    cohort: {}", cohort);
        }
        if let (Some(value), unit) = (&hit.value, &hit.unit) {
            println!("    value: {} {}", value, unit.as_deref().unwrap_or(""));
        }
        println!("    text: \"{}\"", hit.chunk_text.replace('\n', " ").trim());
        println!("    chunk: {}", hit.chunk_id);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_query_quotes_and_strips_punctuation() {
        assert_eq!(
            fts_query("tuition cohort 2024"),
            Some("\"tuition\" \"cohort\" \"2024\"".to_string())
        );
        assert_eq!(fts_query("fee-waiver (2024)!"), Some("\"feewaiver\" \"2024\"".to_string()));
        assert_eq!(fts_query("  \"  ' "), None);
        assert_eq!(fts_query(""), None);
    }

    #[test]
    fn similarity_score_maps_into_unit_interval() {
        assert!((similarity_score(1.0) - 1.0).abs() < 1e-9);
        assert!((similarity_score(-1.0)).abs() < 1e-9);
        assert!((similarity_score(0.0) - 0.5).abs() < 1e-9);
        // Monotone: better cosine, better score.
        assert!(similarity_score(0.9) > similarity_score(0.2));
    }
}
