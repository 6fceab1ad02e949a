//! Document retrieval by id.
//!
//! Fetches one document and its chunks for inspection on the CLI.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::store;

pub async fn run_get(config: &Config, doc_id: &str) -> Result<()> {
    let pool = store::connect(&config.db.path).await?;

    let doc = match store::fetch_document(&pool, doc_id).await? {
        Some(doc) => doc,
        None => {
            pool.close().await;
            bail!("document not found: {}", doc_id);
        }
    };
    let chunks = store::fetch_chunks(&pool, doc_id).await?;
    pool.close().await;

    println!("--- Document ---");
    println!("doc_id:            {}", doc.doc_id);
    println!("file_name:         {}", doc.file_name);
    println!("title:             {}", doc.title);
    print_opt("doc_type", &doc.doc_type);
    print_opt("issue_number", &doc.issue_number);
    print_opt("issuing_authority", &doc.issuing_authority);
    print_opt("issuing_dept", &doc.issuing_dept);
    print_opt("issue_date", &doc.issue_date.map(|d| d.to_string()));
    print_opt("effective_date", &doc.effective_date);
    print_opt("expiration_date", &doc.expiration_date.map(|d| d.to_string()));
    print_opt("major_topic", &doc.major_topic);
    println!();

    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        println!("[{}]", chunk.chunk_id);
        if let Some(topic) = &chunk.chunk_topic {
            println!("topic: {}", topic);
        }
        if let Some(page) = chunk.page_number {
            println!("page: {}", page);
        }
        if let Some(value) = &chunk.value {
            println!("value: {} {}", value, chunk.unit.as_deref().unwrap_or(""));
        }
        if !chunk.keywords.is_empty() {
            println!("keywords: {}", chunk.keywords.join(", "));
        }
        println!("{}", chunk.chunk_text);
        println!();
    }

    Ok(())
}

fn print_opt(label: &str, value: &Option<String>) {
    if let Some(v) = value {
        println!("{:<18} {}", format!("{}:", label), v);
    }
}
