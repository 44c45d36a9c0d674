//! # docvec
//!
//! A local vector document store: split documents into chunks, embed each
//! chunk, persist everything in SQLite, and rank chunks by similarity to a
//! query.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Chunker    │──▶│   Embedder   │──▶│    Store     │
//! │simple/assist.│   │openai/ollama │   │ SQLite (WAL) │
//! └──────┬───────┘   └──────────────┘   └──────┬───────┘
//!        │ reasoning                           │ embeddings
//!        ▼                                     ▼
//! ┌──────────────┐                     ┌──────────────┐
//! │  Reasoning   │                     │   Searcher   │
//! │   service    │                     │cos/eucl/dot  │
//! └──────────────┘                     └──────────────┘
//! ```
//!
//! [`vector_db::VectorDb`] ties the pieces together and enforces the
//! update policy for documents that already exist.
//!
//! ## Quick Start
//!
//! ```bash
//! docvec init                       # create database
//! docvec sync ./notes               # ingest a directory
//! docvec embed missing              # backfill vectors
//! docvec search "deployment steps"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chunk`] | Chunker trait, simple and assisted strategies |
//! | [`reasoning`] | Reasoning service used by the assisted chunker |
//! | [`embedding`] | Embedding providers and the BLOB codec |
//! | [`store`] | Storage trait with SQLite and in-memory backends |
//! | [`similarity`] | Cosine, Euclidean, and dot-product metrics |
//! | [`search`] | Top-k ranking |
//! | [`vector_db`] | Orchestrator: chunk → embed → commit |
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`connector_fs`] | Filesystem discovery for sync |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod chunk_cmd;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod locks;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod reasoning;
pub mod search;
pub mod show;
pub mod similarity;
pub mod stats;
pub mod store;
pub mod vector_db;

pub use error::{Error, Result};
