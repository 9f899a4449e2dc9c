//! # M3
//!
//! A local-first research corpus tool. Source documents are kept per
//! project in a versioned, content-addressed store; each file is run
//! through a four-stage language-model enrichment pipeline; the enriched
//! chunks are embedded into a per-project vector index that answers
//! top-K, threshold and exact-substring queries.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────────┐   ┌─────────────┐
//! │ ContentStore │──▶│ EnrichmentPipeline       │──▶│ VectorIndex │
//! │ manifest +   │   │ stratify → structure →   │   │ SQLite +    │
//! │ corpus/      │   │ enrich → synthesize      │   │ f32 vectors │
//! └──────────────┘   └──────────────────────────┘   └──────┬──────┘
//!                                                          ▼
//!                                                 ┌─────────────────┐
//!                                                 │ RetrievalEngine │
//!                                                 └─────────────────┘
//! ```
//!
//! The I/O-free logic lives in `m3-core`; this crate supplies the
//! filesystem, SQLite, HTTP and CLI edges.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`project`] | Project registry and active-project marker |
//! | [`session`] | Builds collaborators once and opens projects |
//! | [`content_store`] | Manifest and stored copies of source files |
//! | [`extract`] | txt / md / pdf / docx decoding |
//! | [`ingest`] | Corpus driver: add, remove, rebuild, status |
//! | [`llm`] | Chat gateway (Ollama / OpenAI) |
//! | [`embedding`] | Embedding providers |
//! | [`sqlite_store`] | SQLite index backend |
//! | [`search`] | Retrieval commands |
//! | [`framework`] | Thematic framework build and persistence |
//! | [`progress`] | Progress reporting on stderr |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod config;
pub mod content_store;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod framework;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod progress;
pub mod project;
pub mod search;
pub mod session;
pub mod sqlite_store;
pub mod stats;
