//! Generative backend abstraction and the Gemini implementation.
//!
//! The pipeline never talks to a model service directly; it receives a
//! [`GenerativeBackend`] capability object exposing the two operations the
//! core needs:
//!
//! - `extract` — hand the backend a raw document, a JSON schema, and
//!   natural-language instructions; get back one structured JSON object.
//! - `embed` — turn UTF-8 text into a fixed-dimension vector.
//!
//! Injecting the capability keeps the pipeline testable with fakes and keeps
//! backend credentials/state out of the core.
//!
//! # Retry Strategy
//!
//! HTTP calls retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! All HTTP-level failures surface as transport errors. A success response
//! whose body cannot be interpreted is a validation error.
//!
//! Also provides the vector utilities shared by storage and search:
//! [`vec_to_blob`], [`blob_to_vec`], and [`cosine_similarity`].

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::{PipelineError, Result};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// The injected model capability: schema-constrained extraction plus text
/// embedding.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Identifier of the generation model used for extraction.
    fn extraction_model(&self) -> &str;

    /// Identifier of the embedding model. Recorded next to every stored
    /// vector so mixed embedding spaces can be detected at query time.
    fn embedding_model(&self) -> &str;

    /// Dimensionality of the embedding space.
    fn embedding_dims(&self) -> usize;

    /// Run schema-constrained extraction over a raw document.
    ///
    /// Returns the parsed JSON object the model produced. Conformance to
    /// the extraction contract is the caller's job; this method only
    /// guarantees syntactically valid JSON.
    async fn extract(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
        schema: &serde_json::Value,
        instructions: &str,
    ) -> Result<serde_json::Value>;

    /// Embed a single text into a vector of [`embedding_dims`](Self::embedding_dims) floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Instantiate the backend named in the configuration.
pub fn create_backend(config: &BackendConfig) -> Result<Box<dyn GenerativeBackend>> {
    match config.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiBackend::new(config)?)),
        other => Err(PipelineError::Config(format!(
            "unknown backend provider: {:?} (supported: gemini)",
            other
        ))),
    }
}

// ============ Gemini backend ============

/// Backend speaking the Gemini REST API.
///
/// Extraction uploads the document through the Files API, runs
/// `generateContent` with `responseMimeType: application/json` and a
/// `responseSchema`, then deletes the uploaded file best-effort (a failed
/// delete is logged, never escalated). Requires `GEMINI_API_KEY` in the
/// environment.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
    embedding_dims: usize,
    temperature: f32,
    max_retries: u32,
}

impl GeminiBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| PipelineError::Config("GEMINI_API_KEY not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            embedding_dims: config.embedding_dims,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    /// Override the API base URL (tests, proxies).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Upload raw document bytes to the Files API, returning
    /// `(resource_name, file_uri)`.
    async fn upload_file(&self, mime_type: &str, bytes: &[u8]) -> Result<(String, String)> {
        let url = format!("{}/upload/v1beta/files", self.base_url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .header("X-Goog-Upload-Protocol", "raw")
                .header("Content-Type", mime_type)
                .body(bytes.to_vec())
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| PipelineError::Transport(e.to_string()))?;
                        return parse_upload_response(&body);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(PipelineError::Transport(format!(
                            "file upload failed with {}: {}",
                            status, body_text
                        )));
                        continue;
                    }
                    return Err(PipelineError::Transport(format!(
                        "file upload rejected with {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(PipelineError::Transport(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| PipelineError::Transport("file upload failed".to_string())))
    }

    /// Delete an uploaded file. Best-effort: failures are logged, not
    /// surfaced.
    async fn delete_file(&self, resource_name: &str) {
        let url = format!("{}/v1beta/{}", self.base_url, resource_name);
        match self
            .client
            .delete(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!(file = resource_name, "deleted uploaded file");
            }
            Ok(resp) => {
                warn!(file = resource_name, status = %resp.status(), "could not delete uploaded file");
            }
            Err(e) => {
                warn!(file = resource_name, error = %e, "could not delete uploaded file");
            }
        }
    }

    async fn post_json_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let resp = self
                .client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| PipelineError::Transport(e.to_string()));
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(PipelineError::Transport(format!(
                            "backend error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }
                    return Err(PipelineError::Transport(format!(
                        "backend rejected call with {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(PipelineError::Transport(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| PipelineError::Transport("call failed".to_string())))
    }
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    fn extraction_model(&self) -> &str {
        &self.model
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn embedding_dims(&self) -> usize {
        self.embedding_dims
    }

    async fn extract(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
        schema: &serde_json::Value,
        instructions: &str,
    ) -> Result<serde_json::Value> {
        let (resource_name, file_uri) = self.upload_file(mime_type, bytes).await?;
        debug!(file = file_name, uri = %file_uri, "uploaded document");

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": instructions },
                    { "fileData": { "mimeType": mime_type, "fileUri": file_uri } }
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
                "temperature": self.temperature,
            }
        });

        let result = self.post_json_with_retry(&url, &body).await;

        // The uploaded file is transient; clean it up whether or not
        // generation succeeded.
        self.delete_file(&resource_name).await;

        parse_generate_response(&result?)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/v1beta/models/{}:embedContent",
            self.base_url, self.embedding_model
        );
        let body = json!({
            "content": { "parts": [{ "text": text }] }
        });

        let response = self.post_json_with_retry(&url, &body).await?;
        let vector = parse_embed_response(&response)?;

        if vector.len() != self.embedding_dims {
            return Err(PipelineError::Validation(format!(
                "embedding has {} dims, expected {} for model {}",
                vector.len(),
                self.embedding_dims,
                self.embedding_model
            )));
        }

        Ok(vector)
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

fn parse_upload_response(body: &serde_json::Value) -> Result<(String, String)> {
    let file = body
        .get("file")
        .ok_or_else(|| PipelineError::Validation("upload response missing file".to_string()))?;
    let name = file
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PipelineError::Validation("upload response missing file.name".to_string()))?;
    let uri = file
        .get("uri")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PipelineError::Validation("upload response missing file.uri".to_string()))?;
    Ok((name.to_string(), uri.to_string()))
}

/// Pull the JSON object out of a `generateContent` response. The model's
/// answer arrives as text inside the first candidate's parts.
fn parse_generate_response(body: &serde_json::Value) -> Result<serde_json::Value> {
    let parts = body
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            PipelineError::Validation("generation response has no candidates".to_string())
        })?;

    let mut text = String::new();
    for part in parts {
        if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
            text.push_str(t);
        }
    }

    if text.trim().is_empty() {
        return Err(PipelineError::Validation(
            "generation response contained no text part".to_string(),
        ));
    }

    serde_json::from_str(&text).map_err(|e| {
        PipelineError::Validation(format!("generation response is not valid JSON: {}", e))
    })
}

fn parse_embed_response(body: &serde_json::Value) -> Result<Vec<f32>> {
    let values = body
        .get("embedding")
        .and_then(|e| e.get("values"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            PipelineError::Validation("embedding response missing embedding.values".to_string())
        })?;

    Ok(values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB of little-endian f32 bytes for SQLite.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`] back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn cosine_identical_and_opposite() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn parse_generate_response_extracts_json_text() {
        let body = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"document_metadata\": {}, \"chunk_metadata\": []}" }] }
            }]
        });
        let value = parse_generate_response(&body).unwrap();
        assert!(value.get("document_metadata").is_some());
    }

    #[test]
    fn parse_generate_response_rejects_non_json_text() {
        let body = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "sorry, I cannot do that" }] }
            }]
        });
        let err = parse_generate_response(&body).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn parse_embed_response_reads_values() {
        let body = serde_json::json!({ "embedding": { "values": [0.25, -0.5, 1.0] } });
        assert_eq!(parse_embed_response(&body).unwrap(), vec![0.25, -0.5, 1.0]);
    }

    #[test]
    fn parse_upload_response_requires_name_and_uri() {
        let ok = serde_json::json!({ "file": { "name": "files/abc", "uri": "https://x/files/abc" } });
        let (name, uri) = parse_upload_response(&ok).unwrap();
        assert_eq!(name, "files/abc");
        assert!(uri.ends_with("abc"));

        let bad = serde_json::json!({ "file": {} });
        assert!(parse_upload_response(&bad).is_err());
    }
}
