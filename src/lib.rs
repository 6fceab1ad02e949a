//! # Admindex
//!
//! A schema-constrained extraction and hybrid retrieval pipeline for
//! administrative documents.
//!
//! Admindex hands raw documents (PDF/DOCX) to a generative backend together
//! with a JSON schema and analysis instructions, validates the structured
//! result into a document + self-contained chunks, embeds each chunk, and
//! persists everything in SQLite for hybrid retrieval: vector similarity
//! with structured filters, and independent FTS5 keyword ranking.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Documents   │──▶│  Extractor    │──▶│   SQLite    │
//! │  PDF / DOCX  │   │ schema-bound │   │ FTS5 + vec  │
//! └──────────────┘   │ + embedding  │   └──────┬──────┘
//!                    └──────┬───────┘          │
//!                           │                  ▼
//!                    ┌──────▼───────┐   ┌─────────────┐
//!                    │  Generative  │   │  Retrieval   │
//!                    │   backend    │   │ semantic+kw │
//!                    └──────────────┘   └─────────────┘
//! ```
//!
//! The backend is an injected capability ([`backend::GenerativeBackend`])
//! so the whole pipeline runs against fakes in tests.
//!
//! ## Quick Start
//!
//! ```bash
//! adx init                          # create database
//! adx ingest notices/               # extract + embed + store a directory
//! adx search "tuition for cohort 2024" --cohort 2024
//! adx keyword "tuition cohort 2024"
//! adx export --format json --out corpus.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | transport / validation / storage error taxonomy |
//! | [`models`] | Core data types and the interchange format |
//! | [`schema`] | Extraction contract, schema generation, validation |
//! | [`backend`] | Generative backend capability + Gemini implementation |
//! | [`extractor`] | Extraction client |
//! | [`ingest`] | Ingestion pipeline orchestration |
//! | [`store`] | SQLite storage engine |
//! | [`search`] | Semantic and keyword retrieval |
//! | [`export`] | JSON/CSV projections |
//! | [`stats`] | Corpus statistics |
//! | [`get`] | Document inspection |

pub mod backend;
pub mod config;
pub mod error;
pub mod export;
pub mod extractor;
pub mod get;
pub mod ingest;
pub mod models;
pub mod schema;
pub mod search;
pub mod stats;
pub mod store;
