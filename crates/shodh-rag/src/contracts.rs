//! External collaborator contracts (spec §6, §9).
//!
//! The crate ships no concrete model runtime: `Embedder`, `Parser` and
//! `Generator` (the latter in [`crate::generate`]) are narrow async traits
//! the host application implements against whatever embedding model,
//! document parser, or LLM it runs. Grounded in the teacher's
//! `embeddings::EmbeddingModel` trait shape, generalized to the fixed
//! contract spec §6 specifies instead of the teacher's concrete E5 runtime.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// Produces L2-normalized, fixed-dimension embedding vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    /// Default batched impl; backends with a native batch endpoint override
    /// this instead of looping `embed` one text at a time.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for single input"))
    }
}

/// A parsed document's extracted plain text plus whatever metadata the
/// parser could recover (spec §6).
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub content: String,
    pub suggested_title: Option<String>,
}

/// Reports `(message, percent)` as a `Parser` works through a single file
/// (spec §6). `percent` is the parser's own view of completion, 0.0-100.0;
/// the pipeline rescales it into the document's overall 0-95% parsing
/// budget before writing it to `MetaStore`.
pub type ProgressCallback = Arc<dyn Fn(&str, f32) + Send + Sync>;

/// Extracts plain text from raw document bytes. The crate carries no
/// concrete PDF/OCR/office-format backend (spec Non-goals); callers wire in
/// whatever parser suits their document formats.
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, file_path: &str, file_type: &str, progress: ProgressCallback) -> Result<ParsedDocument>;
}
