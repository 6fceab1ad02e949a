use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Generative backend settings: one provider covers both extraction and
/// embedding, so the models that wrote the store are always the models that
/// answer queries.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,
    /// Extraction temperature. Kept low: extraction should be as
    /// deterministic as the backend allows.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            embedding_dims: default_embedding_dims(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Concurrent embedding calls within one document.
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
    /// Concurrently ingested documents in a directory run.
    #[serde(default = "default_document_concurrency")]
    pub document_concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            embed_concurrency: default_embed_concurrency(),
            document_concurrency: default_document_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
    #[serde(default = "default_keyword_limit")]
    pub keyword_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            keyword_limit: default_keyword_limit(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}
fn default_embedding_dims() -> usize {
    768
}
fn default_temperature() -> f32 {
    0.1
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_concurrency() -> usize {
    4
}
fn default_document_concurrency() -> usize {
    2
}
fn default_search_limit() -> usize {
    5
}
fn default_keyword_limit() -> usize {
    10
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.backend.embedding_dims == 0 {
        anyhow::bail!("backend.embedding_dims must be > 0");
    }
    if config.backend.model.trim().is_empty() || config.backend.embedding_model.trim().is_empty() {
        anyhow::bail!("backend.model and backend.embedding_model must be set");
    }
    if !(0.0..=2.0).contains(&config.backend.temperature) {
        anyhow::bail!("backend.temperature must be in [0.0, 2.0]");
    }
    if config.ingest.embed_concurrency == 0 || config.ingest.document_concurrency == 0 {
        anyhow::bail!("ingest concurrency limits must be >= 1");
    }
    if config.retrieval.default_limit == 0 || config.retrieval.keyword_limit == 0 {
        anyhow::bail!("retrieval limits must be >= 1");
    }
    match config.backend.provider.as_str() {
        "gemini" => {}
        other => anyhow::bail!("Unknown backend provider: '{}'. Must be gemini.", other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse("[db]\npath = \"data/adx.sqlite\"\n\n[backend]\n").unwrap();
        assert_eq!(cfg.backend.provider, "gemini");
        assert_eq!(cfg.backend.embedding_dims, 768);
        assert_eq!(cfg.ingest.embed_concurrency, 4);
        assert_eq!(cfg.retrieval.default_limit, 5);
    }

    #[test]
    fn zero_dims_rejected() {
        let err = parse("[db]\npath = \"x.sqlite\"\n\n[backend]\nembedding_dims = 0\n").unwrap_err();
        assert!(err.to_string().contains("embedding_dims"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let err =
            parse("[db]\npath = \"x.sqlite\"\n\n[backend]\nprovider = \"acme\"\n").unwrap_err();
        assert!(err.to_string().contains("provider"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = parse(
            "[db]\npath = \"x.sqlite\"\n\n[backend]\n\n[ingest]\nembed_concurrency = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }
}
