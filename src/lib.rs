//! # docs-qa
//!
//! Keeps a vector index of a Markdown documentation directory in sync with
//! its contents and answers questions against it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  docs/*.md  │──▶│ Change check │──▶│ Index pass   │
//! │  (walkdir)  │   │ (checksums)  │   │ chunk+embed  │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             ▼
//!                                      ┌──────────────┐
//!                                      │ SQLite index │
//!                                      └──────┬───────┘
//!                        ┌────────────────────┤
//!                        ▼                    ▼
//!                   ┌──────────┐        ┌──────────┐
//!                   │   CLI    │        │   HTTP   │
//!                   │  (dqa)   │        │ /search  │
//!                   └──────────┘        │ /chat    │
//!                                       └──────────┘
//! ```
//!
//! Chunking, change detection, and the index manager live in the
//! `docs-qa-core` crate; this crate supplies the filesystem scan, the
//! SQLite store, provider clients, and the CLI/HTTP surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`connector_fs`] | Markdown discovery under the docs root |
//! | [`checksum_store`] | Persisted checksum record |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | `VectorStore` backed by SQLite |
//! | [`embedding`] | Embedding provider clients |
//! | [`retry`] | JSON POST with exponential backoff |
//! | [`pipeline`] | Scan, detect, index, save |
//! | [`progress`] | Index progress on stderr |
//! | [`chat`] | Chat-completion answers with memory |
//! | [`server`] | HTTP API |

pub mod chat;
pub mod checksum_store;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod server;
pub mod sqlite_store;
