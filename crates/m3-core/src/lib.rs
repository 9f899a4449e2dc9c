//! # m3 core
//!
//! Runtime-agnostic logic for m3: manifest and chunk models, word-window
//! chunking, the four-stage enrichment pipeline, the store abstraction,
//! the vector index and the retrieval engine.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. The language
//! model and the embedding model are reached through the [`llm::ChatModel`]
//! and [`embedding::EmbeddingProvider`] traits; the application crate
//! supplies the concrete implementations.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod framework;
pub mod index;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod store;
