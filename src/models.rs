//! Core data models used throughout Admindex.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the extraction and retrieval pipeline. [`Interchange`] is the
//! serialized exchange format between the extractor and the storage engine.

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Document-level metadata, validated and normalized.
///
/// `doc_id` is minted by the extractor client (never by the backend) and is
/// immutable. `file_name` and `title` are guaranteed non-empty once
/// extraction succeeds; every other attribute is genuinely optional — absent
/// means `None`, never an empty string or a `"null"` literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub file_name: String,
    pub title: String,
    pub doc_type: Option<String>,
    pub issue_number: Option<String>,
    pub issuing_authority: Option<String>,
    pub issuing_dept: Option<String>,
    /// Formal issue date, ISO-8601 when present.
    pub issue_date: Option<NaiveDate>,
    /// Effectivity is free-form in this domain ("2025-01-01", but also
    /// phrases like "from date of signing").
    pub effective_date: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub major_topic: Option<String>,
}

/// A magnitude extracted from a chunk: either a plain number or a
/// non-numeric label such as "free of charge".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ChunkValue {
    Number(f64),
    Label(String),
}

impl ChunkValue {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ChunkValue::Number(_))
    }

    /// Canonical text form used for the TEXT column in storage.
    pub fn as_stored(&self) -> String {
        match self {
            ChunkValue::Number(n) => format!("{}", n),
            ChunkValue::Label(s) => s.clone(),
        }
    }

    /// Reverse of [`as_stored`](Self::as_stored): numeric text becomes a
    /// number again, everything else stays a label.
    pub fn from_stored(s: &str) -> ChunkValue {
        match s.parse::<f64>() {
            Ok(n) => ChunkValue::Number(n),
            Err(_) => ChunkValue::Label(s.to_string()),
        }
    }
}

impl fmt::Display for ChunkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkValue::Number(n) => write!(f, "{}", n),
            ChunkValue::Label(s) => write!(f, "{}", s),
        }
    }
}

/// A self-contained segment of a document, validated and normalized.
///
/// `chunk_text` is the only field that gets embedded; it must be
/// interpretable on its own, without any sibling chunk or metadata field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub page_number: Option<i64>,
    pub section_title: Option<String>,
    pub chunk_topic: Option<String>,
    pub content_type: Option<String>,
    pub specific_target: Option<String>,
    pub applicable_cohort: Option<String>,
    pub value: Option<ChunkValue>,
    /// Present only alongside a value; a non-numeric label value may
    /// legitimately carry no unit.
    pub unit: Option<String>,
    /// 3–8 lowercase tokens, deduplicated.
    pub keywords: Vec<String>,
    pub chunk_text: String,
}

/// A chunk paired with its embedding vector, ready for persistence.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// The serialized exchange format between the extractor client and the
/// storage engine: `{ "document_metadata": …, "chunk_metadata": […] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interchange {
    pub document_metadata: Document,
    pub chunk_metadata: Vec<Chunk>,
}

/// Filter predicates for semantic search.
///
/// `content_type` matches by equality; the cohort and target filters match
/// by substring, because cohort strings enumerate ranges ("cohort 2024 and
/// cohort 2025") that a caller narrows with a single year.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub content_type: Option<String>,
    pub applicable_cohort: Option<String>,
    pub specific_target: Option<String>,
}

/// A ranked search result: chunk fields joined with the attributes of the
/// owning document.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_text: String,
    pub chunk_topic: Option<String>,
    pub content_type: Option<String>,
    pub specific_target: Option<String>,
    pub applicable_cohort: Option<String>,
    pub value: Option<ChunkValue>,
    pub unit: Option<String>,
    pub doc_title: String,
    pub doc_type: Option<String>,
    pub file_name: String,
    pub issue_date: Option<NaiveDate>,
    /// Semantic mode: similarity in [0, 1]. Keyword mode: bm25 relevance
    /// (higher = better, unbounded).
    pub score: f64,
}

/// Outcome of ingesting one document. Partial embedding failure shows up
/// here as `chunks_dropped > 0` rather than as an error.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub doc_id: String,
    pub file_name: String,
    pub chunks_extracted: usize,
    pub chunks_embedded: usize,
    pub chunks_dropped: usize,
    pub warnings: Vec<String>,
}
