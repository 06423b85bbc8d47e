//! Dense (embedding) index (spec §4.3).
//!
//! `DenseIndex` is the narrow capability trait the rest of the crate
//! programs against (spec §9: "duck-typed collaborators -> narrow
//! interfaces"); `LanceStore` is the one concrete implementation, adapted
//! almost as-is from the teacher's `storage/lance_store.rs` (schema shape,
//! Arrow `RecordBatch` construction, cosine `nearest_to` query, `only_if`
//! predicate filtering) and narrowed to the columns spec §3/§4.3 actually
//! need: no title/heading/citation/space_id columns, since those belong to
//! the teacher's broader product, not this spec's Chunk.

pub mod lance_store;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::MetadataFilter;

/// One hit returned by [`DenseIndex::query`] or [`DenseIndex::get_by_doc`].
#[derive(Debug, Clone)]
pub struct DenseHit {
    pub external_id: String,
    pub content: String,
    pub doc_id: i64,
    pub chunk_index: u32,
    pub filename: String,
    /// Cosine distance, lower = more similar (spec §4.3).
    pub distance: f32,
}

/// Embedding vector store under cosine similarity (spec §4.3). `add` has
/// upsert semantics on id collision; `query` is the sublinear-in-corpus-size
/// ANN path; `get_by_doc` backs `IndexSynchronizer::rebuild_all` and
/// document-level averaging.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    async fn add(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        contents: Vec<String>,
        doc_ids: Vec<i64>,
        chunk_indices: Vec<u32>,
        filenames: Vec<String>,
    ) -> Result<()>;

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<DenseHit>>;

    async fn delete(&self, ids: &[String]) -> Result<usize>;

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize>;

    async fn get_by_doc(&self, doc_id: i64) -> Result<Vec<DenseHit>>;

    async fn count(&self) -> Result<usize>;
}
