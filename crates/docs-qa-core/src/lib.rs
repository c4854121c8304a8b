//! # docs-qa core
//!
//! Pure logic of the incremental Markdown indexing pipeline: data models,
//! content fingerprints and change detection, the Markdown chunker, the
//! embedding trait, the vector store abstraction, and the index manager.
//!
//! This crate contains no tokio runtime, sqlx, HTTP, or filesystem I/O.
//! Those live in the `docs-qa` app crate.

pub mod checksum;
pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
pub mod store;
