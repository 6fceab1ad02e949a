//! Stateless projections of the store for downstream consumers.
//!
//! Exports never hold state of their own — they re-read the storage engine
//! and write either the interchange JSON (`document_metadata` +
//! `chunk_metadata` per document) or two flat CSV tables.

use anyhow::Result;
use std::fmt::Write as _;
use std::path::Path;

use crate::config::Config;
use crate::models::{Chunk, Document, Interchange};
use crate::store;

/// Export every document as interchange JSON.
///
/// Writes a JSON array of `{ document_metadata, chunk_metadata }` objects
/// to `output`, or to stdout for piping.
pub async fn run_export_json(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = store::connect(&config.db.path).await?;

    let documents = store::fetch_all_documents(&pool).await?;
    let mut items: Vec<Interchange> = Vec::with_capacity(documents.len());
    for doc in documents {
        let chunks = store::fetch_chunks(&pool, &doc.doc_id).await?;
        items.push(Interchange {
            document_metadata: doc,
            chunk_metadata: chunks,
        });
    }

    let json = serde_json::to_string_pretty(&items)?;
    let count = items.len();

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!("Exported {} documents to {}", count, path.display());
        }
        None => println!("{}", json),
    }

    pool.close().await;
    Ok(())
}

/// Export `documents.csv` and `chunks.csv` into a directory.
pub async fn run_export_csv(config: &Config, out_dir: &Path) -> Result<()> {
    let pool = store::connect(&config.db.path).await?;
    std::fs::create_dir_all(out_dir)?;

    let documents = store::fetch_all_documents(&pool).await?;

    let mut doc_csv = String::new();
    writeln!(
        doc_csv,
        "doc_id,file_name,title,doc_type,issue_number,issuing_authority,issuing_dept,issue_date,effective_date,expiration_date,major_topic"
    )?;
    for doc in &documents {
        writeln!(doc_csv, "{}", document_row(doc))?;
    }

    let mut chunk_csv = String::new();
    writeln!(
        chunk_csv,
        "chunk_id,doc_id,page_number,section_title,chunk_topic,content_type,specific_target,applicable_cohort,value,unit,keywords,chunk_text"
    )?;
    let mut chunk_count = 0usize;
    for doc in &documents {
        for chunk in store::fetch_chunks(&pool, &doc.doc_id).await? {
            writeln!(chunk_csv, "{}", chunk_row(&chunk))?;
            chunk_count += 1;
        }
    }

    let doc_path = out_dir.join("documents.csv");
    let chunk_path = out_dir.join("chunks.csv");
    std::fs::write(&doc_path, doc_csv)?;
    std::fs::write(&chunk_path, chunk_csv)?;

    eprintln!(
        "Exported {} documents, {} chunks to {}",
        documents.len(),
        chunk_count,
        out_dir.display()
    );

    pool.close().await;
    Ok(())
}

fn document_row(doc: &Document) -> String {
    [
        csv_field(&doc.doc_id),
        csv_field(&doc.file_name),
        csv_field(&doc.title),
        csv_opt(&doc.doc_type),
        csv_opt(&doc.issue_number),
        csv_opt(&doc.issuing_authority),
        csv_opt(&doc.issuing_dept),
        csv_opt(&doc.issue_date.map(|d| d.to_string())),
        csv_opt(&doc.effective_date),
        csv_opt(&doc.expiration_date.map(|d| d.to_string())),
        csv_opt(&doc.major_topic),
    ]
    .join(",")
}

fn chunk_row(chunk: &Chunk) -> String {
    [
        csv_field(&chunk.chunk_id),
        csv_field(&chunk.doc_id),
        csv_opt(&chunk.page_number.map(|p| p.to_string())),
        csv_opt(&chunk.section_title),
        csv_opt(&chunk.chunk_topic),
        csv_opt(&chunk.content_type),
        csv_opt(&chunk.specific_target),
        csv_opt(&chunk.applicable_cohort),
        csv_opt(&chunk.value.as_ref().map(|v| v.as_stored())),
        csv_opt(&chunk.unit),
        csv_field(&chunk.keywords.join("; ")),
        csv_field(&chunk.chunk_text),
    ]
    .join(",")
}

fn csv_opt(field: &Option<String>) -> String {
    field.as_deref().map(csv_escape).unwrap_or_default()
}

fn csv_field(field: &str) -> String {
    csv_escape(field)
}

/// Quote a field when it contains a separator, quote, or newline.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_escape_quotes_when_needed() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn chunk_row_has_all_columns() {
        let chunk = Chunk {
            chunk_id: "c1".into(),
            doc_id: "d1".into(),
            page_number: Some(2),
            section_title: None,
            chunk_topic: Some("Tuition, cohort 2024".into()),
            content_type: None,
            specific_target: None,
            applicable_cohort: Some("cohort 2024".into()),
            value: Some(crate::models::ChunkValue::Number(450000.0)),
            unit: Some("per credit".into()),
            keywords: vec!["tuition".into(), "cohort 2024".into()],
            chunk_text: "Tuition for cohort 2024 is 450000 per credit.".into(),
        };
        let row = chunk_row(&chunk);
        assert!(row.starts_with("c1,d1,2,"));
        assert!(row.contains("\"Tuition, cohort 2024\""));
        assert!(row.contains("450000"));
    }
}
