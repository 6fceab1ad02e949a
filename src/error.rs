//! Error taxonomy for the extraction-to-retrieval pipeline.
//!
//! Three failure classes matter to callers and they are kept distinct:
//! - **Transport** — the generative backend was unreachable or rejected the
//!   call. Retryable with backoff.
//! - **Validation** — the backend answered, but the response does not conform
//!   to the extraction contract (or an internal consistency check failed,
//!   e.g. an embedding-model mismatch at query time). Retrying without
//!   changing the schema or instructions will not help.
//! - **Storage** — a database transaction failed. The transaction has rolled
//!   back; the caller decides whether to retry the whole document.
//!
//! A chunk that fails embedding is *not* an error at this level: the pipeline
//! drops it from the batch, logs it, and reports a reduced chunk count.

use thiserror::Error;

/// Result type used throughout the admindex library.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Backend unreachable, timed out, or rejected the call.
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend response does not conform to the extraction contract.
    #[error("validation error: {0}")]
    Validation(String),

    /// Database failure; the surrounding transaction has rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Missing or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Local filesystem failure (reading input documents, writing exports).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
