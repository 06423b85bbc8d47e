//! Sparse (BM25) keyword index (spec §4.2).
//!
//! Holds `(external_id -> tokenized_content, metadata)` plus the aggregate
//! corpus statistics `Bm25Stats` needs. Grounded in
//! `original_source/backend/app/services/bm25.py`'s `BM25Index`
//! (`documents`/`tokenized_corpus`/`id_to_index` triple, rebuild-on-mutation
//! strategy, `save`/`load` round-trip) translated from `rank_bm25.BM25Okapi`
//! + Python pickle to the hand-rolled `bm25` scorer and `persist` tagged
//! format in this crate.

pub mod bm25;
pub mod persist;
pub mod tokenizer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::SparseIndexError;
use bm25::Bm25Stats;

/// One entry of the sparse corpus (spec §3 `SparseIndexEntry`).
#[derive(Debug, Clone)]
struct Entry {
    external_id: String,
    tokens: Vec<String>,
    metadata: HashMap<String, String>,
}

/// Tokenized BM25 keyword index with file-backed persistence.
///
/// Mutations (`add`/`remove`) recompute corpus statistics eagerly, matching
/// the reference's rebuild-the-whole-`BM25Okapi`-object-on-every-mutation
/// strategy (spec §4.2). Not thread-safe on its own; callers needing
/// single-writer/any-reader semantics (spec §5) wrap it in a lock.
pub struct SparseIndex {
    entries: Vec<Entry>,
    id_to_pos: HashMap<String, usize>,
    stats: Bm25Stats,
    persist_path: Option<PathBuf>,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            id_to_pos: HashMap::new(),
            stats: Bm25Stats::default(),
            persist_path: None,
        }
    }

    pub fn with_persist_path(path: impl Into<PathBuf>) -> Self {
        let mut index = Self::new();
        index.persist_path = Some(path.into());
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append entries, skipping any whose external id already exists, then
    /// recompute corpus statistics (spec §4.2 `add`).
    pub fn add(&mut self, entries: Vec<(String, &str, HashMap<String, String>)>) {
        let mut added = false;
        for (external_id, content, metadata) in entries {
            if self.id_to_pos.contains_key(&external_id) {
                continue;
            }
            let tokens = tokenizer::tokenize(content);
            self.id_to_pos.insert(external_id.clone(), self.entries.len());
            self.entries.push(Entry {
                external_id,
                tokens,
                metadata,
            });
            added = true;
        }
        if added {
            self.rebuild_stats();
        }
    }

    /// Remove entries by external id, recompute statistics, and reset to a
    /// null scorer if the corpus becomes empty (spec §4.2 `remove`).
    pub fn remove(&mut self, external_ids: &[String]) {
        let to_remove: std::collections::HashSet<&String> = external_ids.iter().collect();
        if to_remove.is_empty() {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|e| !to_remove.contains(&e.external_id));
        if self.entries.len() == before {
            return;
        }
        self.id_to_pos = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.external_id.clone(), i))
            .collect();
        self.rebuild_stats();
    }

    fn rebuild_stats(&mut self) {
        let corpus: Vec<Vec<String>> = self.entries.iter().map(|e| e.tokens.clone()).collect();
        self.stats = Bm25Stats::rebuild(&corpus);
    }

    /// Tokenize `query` with the same pipeline as indexed content, score
    /// every entry, and return the top-k with strictly positive score
    /// (spec §4.2 `search`).
    pub fn search(&self, query: &str, k: usize) -> Vec<(String, f32)> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let query_tokens = tokenizer::tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .filter_map(|e| {
                let score = self.stats.score(&query_tokens, &e.tokens);
                (score > 0.0).then(|| (e.external_id.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    pub fn metadata(&self, external_id: &str) -> Option<&HashMap<String, String>> {
        self.id_to_pos.get(external_id).map(|&i| &self.entries[i].metadata)
    }

    /// Clear the corpus back to an empty, null-scorer state (used by
    /// `IndexSynchronizer::rebuild_all`, spec §4.5).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.id_to_pos.clear();
        self.stats = Bm25Stats::default();
    }

    /// Persist the corpus snapshot to `persist_path`, if configured. A
    /// missing path is a no-op, not an error — the caller chose not to
    /// persist (spec §4.2: persistence errors are warnings, never fatal).
    pub fn persist(&self) -> Result<(), SparseIndexError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let snapshot: Vec<persist::EntrySnapshot> = self
            .entries
            .iter()
            .map(|e| persist::EntrySnapshot {
                external_id: e.external_id.clone(),
                tokens: e.tokens.clone(),
                metadata: e.metadata.clone(),
            })
            .collect();
        persist::save(path, &snapshot)
    }

    /// Restore from `persist_path`. Load failure is never fatal to the
    /// caller: this returns the error for logging, but the index itself is
    /// left in its pre-call (empty, on fresh construction) state so the
    /// engine can start empty (spec §4.2 `load`).
    pub fn load(&mut self) -> Result<(), SparseIndexError> {
        let Some(path) = self.persist_path.clone() else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let snapshot = persist::load(&path)?;
        self.entries = snapshot
            .into_iter()
            .map(|s| Entry {
                external_id: s.external_id,
                tokens: s.tokens,
                metadata: s.metadata,
            })
            .collect();
        self.id_to_pos = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.external_id.clone(), i))
            .collect();
        self.rebuild_stats();
        Ok(())
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }
}

impl Default for SparseIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(doc_id: i64) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("doc_id".to_string(), doc_id.to_string());
        m
    }

    #[test]
    fn search_returns_only_positive_scores_topk() {
        let mut idx = SparseIndex::new();
        idx.add(vec![
            ("chunk_1".to_string(), "the quick brown fox jumps", meta(1)),
            ("chunk_2".to_string(), "brown brown brown fox fox", meta(2)),
            ("chunk_3".to_string(), "completely unrelated content", meta(3)),
        ]);

        let results = idx.search("brown fox", 10);
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert!(ids.contains(&"chunk_1"));
        assert!(ids.contains(&"chunk_2"));
        assert!(!ids.contains(&"chunk_3"));
    }

    #[test]
    fn duplicate_external_id_is_ignored() {
        let mut idx = SparseIndex::new();
        idx.add(vec![("chunk_1".to_string(), "hello world", meta(1))]);
        idx.add(vec![("chunk_1".to_string(), "different content", meta(1))]);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn remove_resets_to_null_scorer_when_empty() {
        let mut idx = SparseIndex::new();
        idx.add(vec![("chunk_1".to_string(), "hello world", meta(1))]);
        idx.remove(&["chunk_1".to_string()]);
        assert!(idx.is_empty());
        assert!(idx.search("hello", 10).is_empty());
    }

    #[test]
    fn persistence_round_trip_reproduces_search_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25.snapshot");

        let mut idx = SparseIndex::with_persist_path(&path);
        idx.add(vec![
            ("chunk_1".to_string(), "the quick brown fox jumps over", meta(1)),
            ("chunk_2".to_string(), "a lazy dog sleeps all day", meta(2)),
        ]);
        idx.persist().unwrap();

        let mut reloaded = SparseIndex::with_persist_path(&path);
        reloaded.load().unwrap();

        assert_eq!(idx.search("quick fox", 10), reloaded.search("quick fox", 10));
        assert_eq!(idx.search("lazy dog", 10), reloaded.search("lazy dog", 10));
    }

    #[test]
    fn load_missing_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.snapshot");
        let mut idx = SparseIndex::with_persist_path(&path);
        assert!(idx.load().is_ok());
        assert!(idx.is_empty());
    }
}
