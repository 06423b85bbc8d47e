//! Hybrid retrieval-and-generation core.
//!
//! Chunking, dense (vector) and sparse (BM25) indexing, incremental
//! synchronization, Reciprocal-Rank-Fusion retrieval, reranking, diverse
//! context assembly and streamed generation, wired together by
//! [`RagEngine`]. The crate has no concrete model runtime of its own:
//! document parsing, embedding and generation are external contracts
//! (see [`contracts`] and [`generate::Generator`]) the host application
//! supplies.

pub mod chunking;
pub mod config;
pub mod context;
pub mod contracts;
pub mod dense;
pub mod error;
pub mod generate;
pub mod meta;
pub mod pipeline;
pub mod rag_engine;
pub mod rerank;
pub mod retrieval;
pub mod sparse;
pub mod sync;
pub mod types;

pub use config::RagConfig;
pub use rag_engine::RagEngine;
pub use types::{Chunk, Document, DocumentStatus, MetadataFilter, SearchResult};

pub use anyhow::{Error, Result};
