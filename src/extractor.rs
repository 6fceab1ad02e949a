//! Extractor client: drives the generative backend over one document.
//!
//! Reads the document bytes, sends them with the extraction contract schema
//! and the analysis instructions, and validates the structured response into
//! the canonical model. The chunk-boundary policy (one table row per chunk,
//! one clause or section per chunk for prose, a short notice as a single
//! chunk) lives entirely in the instructions; the client trusts the
//! backend's segmentation and verifies shape, not boundaries.

use std::path::Path;
use tracing::{info, warn};

use crate::backend::GenerativeBackend;
use crate::error::{PipelineError, Result};
use crate::models::{Chunk, Document};
use crate::schema::{self, RawExtraction, ValidatedExtraction};

/// MIME types accepted for ingestion.
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Map a file extension to its ingestion MIME type. Anything else is not
/// an ingestible document.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => Some(MIME_PDF),
        Some("docx") => Some(MIME_DOCX),
        _ => None,
    }
}

/// The analysis instructions sent with every extraction request.
///
/// These carry the parts of the contract a schema cannot express: the
/// chunk-boundary policy and the standalone-interpretability requirement
/// on `chunk_text`.
pub fn extraction_instructions(file_name: &str) -> String {
    format!(
        r#"You are a data extraction system. Analyze the administrative document
provided from the file named '{file_name}' and return exactly one JSON object
conforming to the response schema. No explanatory text, no markdown.

Segmentation rules:
- Tables: one row per chunk.
- Prose: one article/section/logical clause per chunk.
- A short notice may be a single chunk.

Field rules:
- file_name must be '{file_name}'.
- Use null for anything the document does not state. Never the string "null".
- issue_date and expiration_date must be YYYY-MM-DD.
- value holds the bare number (no separators, no unit text); a non-numeric
  magnitude like "free of charge" may be given as a string. unit is filled
  only when value is present.
- chunk_topic names what distinguishes this chunk (3-7 words) and must not
  repeat content_type.
- keywords: 3-8 lowercase terms, no duplicates, favoring proper names,
  figures, cohorts, and reference numbers.

chunk_text is the most important field. Each chunk_text must be a complete,
self-contained statement: a reader must understand it fully without seeing
any other chunk or metadata field. Spell out the program, cohort, amount,
and conditions explicitly; never use bare values, abbreviations, or
pronouns that point outside the chunk."#
    )
}

/// Result of extracting one document.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<String>,
}

/// Run schema-constrained extraction over one document.
///
/// `doc_id` re-uses an existing identifier when updating a known document;
/// otherwise a fresh one is minted during validation. Content warnings are
/// logged here, once, and also returned for the ingest report.
pub async fn extract_document(
    backend: &dyn GenerativeBackend,
    file_name: &str,
    mime_type: &str,
    bytes: &[u8],
    doc_id: Option<String>,
) -> Result<ExtractionOutcome> {
    let schema_value = schema::response_schema();
    let instructions = extraction_instructions(file_name);

    info!(file = file_name, model = backend.extraction_model(), "extracting");

    let response = backend
        .extract(file_name, mime_type, bytes, &schema_value, &instructions)
        .await?;

    let raw: RawExtraction = serde_json::from_value(response).map_err(|e| {
        PipelineError::Validation(format!(
            "extraction response does not match the contract: {}",
            e
        ))
    })?;

    let ValidatedExtraction {
        document,
        chunks,
        warnings,
    } = schema::validate_extraction(raw, file_name, doc_id)?;

    for w in &warnings {
        warn!(file = file_name, "{}", w);
    }
    info!(
        file = file_name,
        doc_id = %document.doc_id,
        chunks = chunks.len(),
        "extraction validated"
    );

    Ok(ExtractionOutcome {
        document,
        chunks,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CannedBackend {
        response: serde_json::Value,
    }

    #[async_trait]
    impl GenerativeBackend for CannedBackend {
        fn extraction_model(&self) -> &str {
            "canned"
        }
        fn embedding_model(&self) -> &str {
            "canned-embed"
        }
        fn embedding_dims(&self) -> usize {
            4
        }
        async fn extract(
            &self,
            _file_name: &str,
            _mime_type: &str,
            _bytes: &[u8],
            _schema: &serde_json::Value,
            _instructions: &str,
        ) -> crate::error::Result<serde_json::Value> {
            Ok(self.response.clone())
        }
        async fn embed(&self, _text: &str) -> crate::error::Result<Vec<f32>> {
            Ok(vec![0.0; 4])
        }
    }

    #[test]
    fn mime_detection_by_extension() {
        assert_eq!(mime_for_path(Path::new("a/b/TB01.pdf")), Some(MIME_PDF));
        assert_eq!(mime_for_path(Path::new("notice.DOCX")), Some(MIME_DOCX));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("no_extension")), None);
    }

    #[test]
    fn instructions_carry_file_name_and_boundary_policy() {
        let text = extraction_instructions("TB01.pdf");
        assert!(text.contains("'TB01.pdf'"));
        assert!(text.contains("one row per chunk"));
        assert!(text.contains("self-contained"));
    }

    #[tokio::test]
    async fn extract_document_enforces_file_name() {
        let backend = CannedBackend {
            response: serde_json::json!({
                "document_metadata": { "file_name": "wrong.pdf", "title": "Tuition notice" },
                "chunk_metadata": [{
                    "chunk_text": "Tuition for cohort 2024 is 450000 per credit.",
                    "keywords": ["tuition", "cohort 2024", "450000"]
                }]
            }),
        };
        let out = extract_document(&backend, "TB01.pdf", MIME_PDF, b"%PDF", None)
            .await
            .unwrap();
        assert_eq!(out.document.file_name, "TB01.pdf");
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].doc_id, out.document.doc_id);
    }

    #[tokio::test]
    async fn nonconforming_response_is_a_validation_error() {
        let backend = CannedBackend {
            response: serde_json::json!({ "unexpected": true }),
        };
        let err = extract_document(&backend, "TB01.pdf", MIME_PDF, b"%PDF", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
