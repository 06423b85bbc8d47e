//! Core data model (spec §3): Document, Chunk, status state machine, and the
//! wire shape returned by the retrieval surface.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Processing status of a [`Document`]. Transitions are monotone:
/// `Pending -> Parsing -> Embedding -> Completed`, or to `Failed` from any
/// non-terminal state (spec §3 invariant I4, §4.10 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Parsing,
    Embedding,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Parsing => "parsing",
            DocumentStatus::Embedding => "embedding",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "parsing" => Some(DocumentStatus::Parsing),
            "embedding" => Some(DocumentStatus::Embedding),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// A document tracked by [`crate::meta::MetaStore`] (spec §3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub title: Option<String>,
    pub file_type: String,
    /// On-disk path, or a sentinel for virtual documents (notes, etc.).
    pub file_path: String,
    pub file_size: u64,
    pub content: Option<String>,
    pub metadata: HashMap<String, String>,
    pub status: DocumentStatus,
    pub processing_message: Option<String>,
    pub processing_progress: f32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A chunk of a document's text (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: u32,
    pub content: String,
    pub start_char: Option<usize>,
    pub end_char: Option<usize>,
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// The external id shared by DenseIndex and SparseIndex for this chunk
    /// (spec §6: `"chunk_<chunk_id>"`).
    pub fn external_id(&self) -> String {
        external_id(self.id)
    }
}

pub fn external_id(chunk_id: i64) -> String {
    format!("chunk_{chunk_id}")
}

/// Inverse of [`external_id`]: recovers the chunk id DenseIndex/SparseIndex
/// hits carry as an opaque string (spec §6).
pub fn parse_external_id(id: &str) -> Option<i64> {
    id.strip_prefix("chunk_")?.parse().ok()
}

/// Equality/negation predicate over DenseIndex metadata (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub doc_id: Option<i64>,
    pub doc_id_not: Option<i64>,
}

impl MetadataFilter {
    pub fn doc(doc_id: i64) -> Self {
        Self {
            doc_id: Some(doc_id),
            doc_id_not: None,
        }
    }

    /// Render as a LanceDB `only_if` SQL-like predicate string, or `None`
    /// when the filter is empty.
    pub fn to_predicate(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(id) = self.doc_id {
            parts.push(format!("doc_id = {id}"));
        }
        if let Some(id) = self.doc_id_not {
            parts.push(format!("doc_id != {id}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" AND "))
        }
    }

    pub fn matches(&self, doc_id: i64) -> bool {
        if let Some(id) = self.doc_id {
            if doc_id != id {
                return false;
            }
        }
        if let Some(id) = self.doc_id_not {
            if doc_id == id {
                return false;
            }
        }
        true
    }
}

/// Retrieval-surface wire shape (spec §6): `{chunk_id, document_id,
/// filename, preview, score}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: i64,
    pub document_id: i64,
    pub filename: String,
    pub content: String,
    pub preview: String,
    pub score: f32,
}

impl SearchResult {
    /// Truncate `content` into a `preview` the way the teacher's
    /// `SimpleSearchResult` construction sites do, falling back to a plain
    /// 200-char slice when no highlighter produced one.
    pub fn plain_preview(content: &str, max_chars: usize) -> String {
        if content.chars().count() <= max_chars {
            content.to_string()
        } else {
            let truncated: String = content.chars().take(max_chars).collect();
            format!("{truncated}...")
        }
    }
}
