//! The extraction contract: what the generative backend must produce.
//!
//! [`RawExtraction`] is the backend-facing shape. A JSON schema is generated
//! from it with schemars and sent along with every extraction request, so
//! the contract lives in exactly one place. Doc comments on the raw fields
//! become the `description` strings the backend sees.
//!
//! The raw shape is deliberately loose (everything optional except
//! `chunk_text`): a response that fails to parse against it is a
//! **validation error**. [`validate_extraction`] then normalizes a parsed
//! response into the canonical [`Document`]/[`Chunk`] model, enforcing:
//!
//! - absent optionals become `None`, never `""` or a `"null"` literal;
//! - `file_name` always equals the input document's name, regardless of
//!   what the backend returned;
//! - `issue_date`/`expiration_date` must be ISO-8601 when present;
//! - a `unit` without a `value` is dropped;
//! - ids are minted here, never taken from the backend.
//!
//! Softer quality rules (keyword cardinality, implausible dates, a chunk
//! topic restating the content type, a numeric value missing its unit) are
//! reported as content warnings, not failures.

use chrono::{Datelike, NaiveDate, Utc};
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::{Chunk, ChunkValue, Document};

/// Earliest plausible issue year for this document domain.
const PLAUSIBLE_YEAR_MIN: i32 = 1990;
/// How far into the future an issue/expiration date may plausibly lie.
const PLAUSIBLE_YEAR_AHEAD: i32 = 10;

/// Keyword cardinality the contract asks the backend for.
const KEYWORDS_MIN: usize = 3;
const KEYWORDS_MAX: usize = 8;

/// Top-level shape the extraction backend must return.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RawExtraction {
    pub document_metadata: RawDocumentMetadata,
    pub chunk_metadata: Vec<RawChunkMetadata>,
}

/// Document-level metadata as returned by the backend, before normalization.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RawDocumentMetadata {
    /// Name of the source file. Overwritten with the actual input name.
    pub file_name: Option<String>,
    /// Full official title of the document.
    pub title: Option<String>,
    /// Kind of document: decision, regulation, notice, guideline.
    pub doc_type: Option<String>,
    /// Reference number of the document, exactly as printed.
    pub issue_number: Option<String>,
    /// Authority that issued the document (e.g. the rector, the board).
    pub issuing_authority: Option<String>,
    /// Department responsible for the document.
    pub issuing_dept: Option<String>,
    /// Official issue date, YYYY-MM-DD.
    pub issue_date: Option<String>,
    /// Date the document takes effect: YYYY-MM-DD or a phrase such as
    /// "from date of signing".
    pub effective_date: Option<String>,
    /// Date the document ceases to apply, YYYY-MM-DD.
    pub expiration_date: Option<String>,
    /// Principal subject area: academics, finance, admissions, housing.
    pub major_topic: Option<String>,
}

/// One extracted segment as returned by the backend, before normalization.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RawChunkMetadata {
    /// Page the segment appears on.
    #[serde(default)]
    pub page_number: Option<i64>,
    /// Heading of the containing section or article, verbatim.
    #[serde(default)]
    pub section_title: Option<String>,
    /// Short topic (3–7 words) capturing what distinguishes this segment.
    /// Must not restate `content_type`.
    #[serde(default)]
    pub chunk_topic: Option<String>,
    /// Program or service category the segment applies to. Only for
    /// tuition/program documents; otherwise absent.
    #[serde(default)]
    pub content_type: Option<String>,
    /// A narrower audience than `content_type`: a specific course module,
    /// major, or enrollment form.
    #[serde(default)]
    pub specific_target: Option<String>,
    /// Cohort or intake the segment applies to, e.g. "cohort 2024",
    /// "cohort 2023 and earlier", "all cohorts".
    #[serde(default)]
    pub applicable_cohort: Option<String>,
    /// The bare magnitude if the segment states one: a number with no unit
    /// or separators, or a label such as "free of charge".
    #[serde(default)]
    pub value: Option<ChunkValue>,
    /// Unit of `value` (e.g. "per credit", "per month", "points", "days").
    /// Only when `value` is present.
    #[serde(default)]
    pub unit: Option<String>,
    /// 3–8 lowercase search keywords, no duplicates.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Full text of the segment. Must read as complete sentences that are
    /// interpretable entirely on their own, without any other field or
    /// segment.
    pub chunk_text: String,
}

/// A validated, normalized extraction: the document, its chunks, and any
/// content warnings collected along the way.
#[derive(Debug, Clone)]
pub struct ValidatedExtraction {
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<String>,
}

/// Generate the JSON schema sent with every extraction request.
///
/// schemars emits `$ref`s into a `definitions` map; the backend's
/// `response_schema` field wants a self-contained schema, so refs are
/// inlined and the meta keys stripped.
pub fn response_schema() -> serde_json::Value {
    let schema = schema_for!(RawExtraction);
    let mut value = serde_json::to_value(schema).unwrap_or_default();

    let definitions = value
        .as_object()
        .and_then(|m| m.get("definitions"))
        .cloned();
    if let Some(defs) = definitions {
        inline_refs(&mut value, &defs);
    }

    if let Some(map) = value.as_object_mut() {
        map.remove("definitions");
        map.remove("$schema");
        map.remove("title");
    }

    value
}

fn inline_refs(value: &mut serde_json::Value, definitions: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(path)) = map.get("$ref").cloned() {
                if let Some(name) = path.strip_prefix("#/definitions/") {
                    if let Some(def) = definitions.get(name) {
                        *value = def.clone();
                        inline_refs(value, definitions);
                        return;
                    }
                }
            }
            for (_, v) in map.iter_mut() {
                inline_refs(v, definitions);
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

/// Normalize an optional free-text field: trim, and map the empty string
/// and `"null"`-like literals to a real absence.
pub fn opt_text(s: Option<String>) -> Option<String> {
    let t = s?.trim().to_string();
    if t.is_empty() || t.eq_ignore_ascii_case("null") || t.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(t)
    }
}

fn parse_iso_date(field: &str, s: Option<String>) -> Result<Option<NaiveDate>> {
    match opt_text(s) {
        None => Ok(None),
        Some(t) => NaiveDate::parse_from_str(&t, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                PipelineError::Validation(format!(
                    "{} must be an ISO-8601 date (YYYY-MM-DD), got {:?}",
                    field, t
                ))
            }),
    }
}

fn check_date_plausible(field: &str, date: Option<NaiveDate>, warnings: &mut Vec<String>) {
    if let Some(d) = date {
        let max_year = Utc::now().year() + PLAUSIBLE_YEAR_AHEAD;
        if d.year() < PLAUSIBLE_YEAR_MIN || d.year() > max_year {
            warnings.push(format!("{} {} is outside the plausible range", field, d));
        }
    }
}

fn normalize_value(v: Option<ChunkValue>) -> Option<ChunkValue> {
    match v {
        None => None,
        Some(ChunkValue::Number(n)) => Some(ChunkValue::Number(n)),
        Some(ChunkValue::Label(s)) => {
            let t = opt_text(Some(s))?;
            match t.parse::<f64>() {
                Ok(n) => Some(ChunkValue::Number(n)),
                Err(_) => Some(ChunkValue::Label(t)),
            }
        }
    }
}

fn normalize_keywords(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for k in raw {
        let k = k.trim().to_lowercase();
        if k.is_empty() || k == "null" {
            continue;
        }
        if !out.contains(&k) {
            out.push(k);
        }
    }
    out
}

/// Validate and normalize a parsed backend response.
///
/// `source_file_name` is the actual input file; it wins over whatever the
/// backend put in `file_name`. `doc_id` re-uses an existing identifier when
/// the caller is updating a known document; otherwise a fresh UUID is
/// minted. Chunk ids are always minted here.
pub fn validate_extraction(
    raw: RawExtraction,
    source_file_name: &str,
    doc_id: Option<String>,
) -> Result<ValidatedExtraction> {
    let mut warnings = Vec::new();

    let title = opt_text(raw.document_metadata.title).ok_or_else(|| {
        PipelineError::Validation("document title is missing or empty".to_string())
    })?;

    if source_file_name.trim().is_empty() {
        return Err(PipelineError::Validation(
            "source file name must not be empty".to_string(),
        ));
    }
    if let Some(returned) = opt_text(raw.document_metadata.file_name) {
        if returned != source_file_name {
            warnings.push(format!(
                "backend returned file_name {:?}, overridden with {:?}",
                returned, source_file_name
            ));
        }
    }

    let issue_date = parse_iso_date("issue_date", raw.document_metadata.issue_date)?;
    let expiration_date = parse_iso_date("expiration_date", raw.document_metadata.expiration_date)?;
    check_date_plausible("issue_date", issue_date, &mut warnings);
    check_date_plausible("expiration_date", expiration_date, &mut warnings);

    let doc_id = doc_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let document = Document {
        doc_id: doc_id.clone(),
        file_name: source_file_name.to_string(),
        title,
        doc_type: opt_text(raw.document_metadata.doc_type),
        issue_number: opt_text(raw.document_metadata.issue_number),
        issuing_authority: opt_text(raw.document_metadata.issuing_authority),
        issuing_dept: opt_text(raw.document_metadata.issuing_dept),
        issue_date,
        effective_date: opt_text(raw.document_metadata.effective_date),
        expiration_date,
        major_topic: opt_text(raw.document_metadata.major_topic),
    };

    let mut chunks = Vec::with_capacity(raw.chunk_metadata.len());
    for (i, raw_chunk) in raw.chunk_metadata.into_iter().enumerate() {
        chunks.push(validate_chunk(i, raw_chunk, &doc_id, &mut warnings)?);
    }

    Ok(ValidatedExtraction {
        document,
        chunks,
        warnings,
    })
}

fn validate_chunk(
    index: usize,
    raw: RawChunkMetadata,
    doc_id: &str,
    warnings: &mut Vec<String>,
) -> Result<Chunk> {
    let chunk_text = raw.chunk_text.trim().to_string();
    if chunk_text.is_empty() {
        return Err(PipelineError::Validation(format!(
            "chunk {} has empty chunk_text",
            index
        )));
    }

    let chunk_topic = opt_text(raw.chunk_topic);
    let content_type = opt_text(raw.content_type);
    if let (Some(topic), Some(ct)) = (&chunk_topic, &content_type) {
        if topic.to_lowercase().contains(&ct.to_lowercase()) {
            warnings.push(format!(
                "chunk {}: chunk_topic {:?} restates content_type {:?}",
                index, topic, ct
            ));
        }
    }

    let value = normalize_value(raw.value);
    let mut unit = opt_text(raw.unit);
    match (&value, &unit) {
        (None, Some(u)) => {
            warnings.push(format!(
                "chunk {}: unit {:?} without a value, dropped",
                index, u
            ));
            unit = None;
        }
        (Some(ChunkValue::Number(_)), None) => {
            warnings.push(format!("chunk {}: numeric value has no unit", index));
        }
        _ => {}
    }

    let keywords = normalize_keywords(raw.keywords);
    if keywords.len() < KEYWORDS_MIN || keywords.len() > KEYWORDS_MAX {
        warnings.push(format!(
            "chunk {}: {} keywords after normalization, expected {}-{}",
            index,
            keywords.len(),
            KEYWORDS_MIN,
            KEYWORDS_MAX
        ));
    }

    if let Some(p) = raw.page_number {
        if p < 1 {
            warnings.push(format!("chunk {}: implausible page_number {}", index, p));
        }
    }

    Ok(Chunk {
        chunk_id: Uuid::new_v4().to_string(),
        doc_id: doc_id.to_string(),
        page_number: raw.page_number,
        section_title: opt_text(raw.section_title),
        chunk_topic,
        content_type,
        specific_target: opt_text(raw.specific_target),
        applicable_cohort: opt_text(raw.applicable_cohort),
        value,
        unit,
        keywords,
        chunk_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_doc(title: Option<&str>) -> RawDocumentMetadata {
        RawDocumentMetadata {
            title: title.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    fn raw_chunk(text: &str) -> RawChunkMetadata {
        RawChunkMetadata {
            page_number: None,
            section_title: None,
            chunk_topic: None,
            content_type: None,
            specific_target: None,
            applicable_cohort: None,
            value: None,
            unit: None,
            keywords: vec![],
            chunk_text: text.to_string(),
        }
    }

    #[test]
    fn opt_text_maps_null_like_to_none() {
        assert_eq!(opt_text(None), None);
        assert_eq!(opt_text(Some("".into())), None);
        assert_eq!(opt_text(Some("   ".into())), None);
        assert_eq!(opt_text(Some("null".into())), None);
        assert_eq!(opt_text(Some("NULL".into())), None);
        assert_eq!(opt_text(Some("None".into())), None);
        assert_eq!(opt_text(Some("  Finance ".into())), Some("Finance".into()));
    }

    #[test]
    fn missing_title_is_a_validation_error() {
        let raw = RawExtraction {
            document_metadata: raw_doc(None),
            chunk_metadata: vec![],
        };
        let err = validate_extraction(raw, "a.pdf", None).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn empty_string_title_is_a_validation_error() {
        let raw = RawExtraction {
            document_metadata: raw_doc(Some("  ")),
            chunk_metadata: vec![],
        };
        assert!(validate_extraction(raw, "a.pdf", None).is_err());
    }

    #[test]
    fn malformed_issue_date_is_a_validation_error() {
        let mut meta = raw_doc(Some("T"));
        meta.issue_date = Some("01/09/2024".into());
        let raw = RawExtraction {
            document_metadata: meta,
            chunk_metadata: vec![],
        };
        let err = validate_extraction(raw, "a.pdf", None).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn implausible_date_warns_but_passes() {
        let mut meta = raw_doc(Some("T"));
        meta.issue_date = Some("1803-01-01".into());
        let raw = RawExtraction {
            document_metadata: meta,
            chunk_metadata: vec![],
        };
        let v = validate_extraction(raw, "a.pdf", None).unwrap();
        assert!(v.warnings.iter().any(|w| w.contains("plausible")));
        assert!(v.document.issue_date.is_some());
    }

    #[test]
    fn file_name_is_enforced_post_hoc() {
        let mut meta = raw_doc(Some("T"));
        meta.file_name = Some("something_else.pdf".into());
        let raw = RawExtraction {
            document_metadata: meta,
            chunk_metadata: vec![],
        };
        let v = validate_extraction(raw, "TB01.pdf", None).unwrap();
        assert_eq!(v.document.file_name, "TB01.pdf");
        assert!(v.warnings.iter().any(|w| w.contains("overridden")));
    }

    #[test]
    fn caller_supplied_doc_id_is_kept() {
        let raw = RawExtraction {
            document_metadata: raw_doc(Some("T")),
            chunk_metadata: vec![raw_chunk("Some text.")],
        };
        let v = validate_extraction(raw, "a.pdf", Some("doc-42".into())).unwrap();
        assert_eq!(v.document.doc_id, "doc-42");
        assert_eq!(v.chunks[0].doc_id, "doc-42");
    }

    #[test]
    fn empty_chunk_text_is_a_validation_error() {
        let raw = RawExtraction {
            document_metadata: raw_doc(Some("T")),
            chunk_metadata: vec![raw_chunk("   ")],
        };
        assert!(validate_extraction(raw, "a.pdf", None).is_err());
    }

    #[test]
    fn dangling_unit_is_dropped() {
        let mut c = raw_chunk("Registration is open to all students.");
        c.unit = Some("per credit".into());
        let raw = RawExtraction {
            document_metadata: raw_doc(Some("T")),
            chunk_metadata: vec![c],
        };
        let v = validate_extraction(raw, "a.pdf", None).unwrap();
        assert_eq!(v.chunks[0].unit, None);
        assert!(v.warnings.iter().any(|w| w.contains("dropped")));
    }

    #[test]
    fn value_unit_invariant_holds_after_normalization() {
        // Every combination of value/unit inputs must come out satisfying:
        // unit present => value present.
        let values = [
            None,
            Some(ChunkValue::Number(450000.0)),
            Some(ChunkValue::Label("free of charge".into())),
            Some(ChunkValue::Label("null".into())),
            Some(ChunkValue::Label("90".into())),
        ];
        let units = [None, Some("per credit".to_string()), Some("".to_string())];

        for v in &values {
            for u in &units {
                let mut c = raw_chunk("Tuition for cohort 2024 is 450000 per credit.");
                c.value = v.clone();
                c.unit = u.clone();
                let raw = RawExtraction {
                    document_metadata: raw_doc(Some("T")),
                    chunk_metadata: vec![c],
                };
                let out = validate_extraction(raw, "a.pdf", None).unwrap();
                let chunk = &out.chunks[0];
                if chunk.unit.is_some() {
                    assert!(chunk.value.is_some(), "unit without value survived");
                }
            }
        }
    }

    #[test]
    fn numeric_label_value_becomes_number() {
        let mut c = raw_chunk("The deadline is 30 days after issuance.");
        c.value = Some(ChunkValue::Label("30".into()));
        c.unit = Some("days".into());
        let raw = RawExtraction {
            document_metadata: raw_doc(Some("T")),
            chunk_metadata: vec![c],
        };
        let v = validate_extraction(raw, "a.pdf", None).unwrap();
        assert_eq!(v.chunks[0].value, Some(ChunkValue::Number(30.0)));
        assert_eq!(v.chunks[0].unit.as_deref(), Some("days"));
    }

    #[test]
    fn keywords_are_lowercased_and_deduplicated() {
        let mut c = raw_chunk("Tuition for cohort 2024 is 450000 per credit.");
        c.keywords = vec![
            "Tuition".into(),
            "tuition".into(),
            " cohort 2024 ".into(),
            "".into(),
            "fees".into(),
        ];
        let raw = RawExtraction {
            document_metadata: raw_doc(Some("T")),
            chunk_metadata: vec![c],
        };
        let v = validate_extraction(raw, "a.pdf", None).unwrap();
        assert_eq!(v.chunks[0].keywords, vec!["tuition", "cohort 2024", "fees"]);
    }

    #[test]
    fn keyword_cardinality_out_of_range_warns() {
        let mut c = raw_chunk("Short notice.");
        c.keywords = vec!["one".into()];
        let raw = RawExtraction {
            document_metadata: raw_doc(Some("T")),
            chunk_metadata: vec![c],
        };
        let v = validate_extraction(raw, "a.pdf", None).unwrap();
        assert!(v.warnings.iter().any(|w| w.contains("keywords")));
    }

    #[test]
    fn topic_restating_content_type_warns() {
        let mut c = raw_chunk("Tuition for the honors program is 900000 per credit.");
        c.chunk_topic = Some("Tuition for Honors program".into());
        c.content_type = Some("Honors program".into());
        c.keywords = vec!["tuition".into(), "honors".into(), "fees".into()];
        let raw = RawExtraction {
            document_metadata: raw_doc(Some("T")),
            chunk_metadata: vec![c],
        };
        let v = validate_extraction(raw, "a.pdf", None).unwrap();
        assert!(v.warnings.iter().any(|w| w.contains("restates")));
    }

    #[test]
    fn response_schema_is_self_contained() {
        let schema = response_schema();
        let text = serde_json::to_string(&schema).unwrap();
        assert!(!text.contains("$ref"), "schema must not contain $ref");
        assert!(!text.contains("definitions"));
        assert!(text.contains("document_metadata"));
        assert!(text.contains("chunk_metadata"));
        assert!(text.contains("chunk_text"));
    }
}
