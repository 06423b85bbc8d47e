use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::LazyLock;

use crate::config::RetrievalConfig;
use crate::contracts::Embedder;
use crate::dense::DenseIndex;
use crate::meta::MetaStore;
use crate::sparse::SparseIndex;
use crate::sparse::tokenizer;
use crate::types::{parse_external_id, MetadataFilter, SearchResult};

const HIGHLIGHT_WINDOW: usize = 150;
const HIGHLIGHT_LEAD_IN: usize = 20;
const FALLBACK_PREVIEW_CHARS: usize = 200;

/// Combines dense and sparse candidate lists with Reciprocal Rank Fusion
/// (spec §4.6): `score = Σ_s w_s / (rrf_k + rank_s + 1)` over the sources a
/// chunk appears in, `rank_s` zero-indexed within that source's ranked list.
pub struct HybridRetriever {
    dense: Arc<dyn DenseIndex>,
    sparse: Arc<Mutex<SparseIndex>>,
    meta: Arc<MetaStore>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(dense: Arc<dyn DenseIndex>, sparse: Arc<Mutex<SparseIndex>>, meta: Arc<MetaStore>, config: RetrievalConfig) -> Self {
        Self { dense, sparse, meta, config }
    }

    /// Full hybrid path: dense + sparse candidates fused by weighted RRF,
    /// truncated to `top_k`, with highlighted previews (spec §4.6).
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
        embedder: &dyn Embedder,
    ) -> Result<Vec<SearchResult>> {
        let pool = self.config.top_k_retrieval;

        let query_vector = embedder.embed_one(query).await.context("failed to embed query")?;
        let dense_hits = self.dense.query(&query_vector, pool, filter).await.context("dense search failed")?;

        let sparse_hits: Vec<(String, f32)> = {
            let sparse = self.sparse.lock();
            sparse
                .search(query, pool)
                .into_iter()
                .filter(|(id, _)| match filter {
                    Some(f) => sparse
                        .metadata(id)
                        .and_then(|m| m.get("document_id"))
                        .and_then(|d| d.parse::<i64>().ok())
                        .map(|doc_id| f.matches(doc_id))
                        .unwrap_or(true),
                    None => true,
                })
                .collect()
        };

        let mut fused: HashMap<String, f32> = HashMap::new();
        for (rank, hit) in dense_hits.iter().enumerate() {
            *fused.entry(hit.external_id.clone()).or_insert(0.0) +=
                self.config.vector_weight / (self.config.rrf_k as f32 + rank as f32 + 1.0);
        }
        for (rank, (id, _)) in sparse_hits.iter().enumerate() {
            *fused.entry(id.clone()).or_insert(0.0) +=
                self.config.bm25_weight / (self.config.rrf_k as f32 + rank as f32 + 1.0);
        }

        let mut ranked: Vec<(String, f32)> = fused.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(top_k);

        let dense_by_id: HashMap<&str, &crate::dense::DenseHit> =
            dense_hits.iter().map(|h| (h.external_id.as_str(), h)).collect();

        let mut results = Vec::with_capacity(ranked.len());
        for (external_id, score) in ranked {
            let Some((chunk_id, document_id, filename, content)) = self.resolve(&external_id, &dense_by_id)? else {
                continue;
            };
            let preview = highlight_content(&content, query);
            results.push(SearchResult {
                chunk_id,
                document_id,
                filename,
                content,
                preview,
                score,
            });
        }
        Ok(results)
    }

    /// Dense-only path with no fusion and no reranking (spec §4.6
    /// `quick_search`): score is plain cosine similarity, `1.0 - distance`.
    pub async fn quick_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
        embedder: &dyn Embedder,
    ) -> Result<Vec<SearchResult>> {
        let query_vector = embedder.embed_one(query).await.context("failed to embed query")?;
        let hits = self.dense.query(&query_vector, top_k, filter).await.context("dense search failed")?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let preview = highlight_content(&hit.content, query);
                SearchResult {
                    chunk_id: parse_external_id(&hit.external_id).unwrap_or(0),
                    document_id: hit.doc_id,
                    filename: hit.filename,
                    content: hit.content,
                    preview,
                    score: (1.0 - hit.distance).max(0.0),
                }
            })
            .collect())
    }

    fn resolve(
        &self,
        external_id: &str,
        dense_by_id: &HashMap<&str, &crate::dense::DenseHit>,
    ) -> Result<Option<(i64, i64, String, String)>> {
        let Some(chunk_id) = parse_external_id(external_id) else {
            return Ok(None);
        };

        if let Some(hit) = dense_by_id.get(external_id) {
            return Ok(Some((chunk_id, hit.doc_id, hit.filename.clone(), hit.content.clone())));
        }

        match self.meta.get_chunk_with_filename(chunk_id) {
            Ok((chunk, filename)) => Ok(Some((chunk_id, chunk.document_id, filename, chunk.content))),
            Err(_) => Ok(None),
        }
    }
}

static MATCH_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Port of `_highlight_content` (original_source's `search.py`): tokenize
/// the query, find the window of `content` with the highest density of
/// query-term matches, and return that window (expanded slightly backward
/// for context) instead of a blind head truncation. Falls back to a plain
/// head slice when no token matches anywhere.
fn highlight_content(content: &str, query: &str) -> String {
    let tokens: Vec<String> = tokenizer::tokenize(query).into_iter().filter(|t| t.len() >= 2).collect();
    if tokens.is_empty() || content.is_empty() {
        return SearchResult::plain_preview(content, FALLBACK_PREVIEW_CHARS);
    }

    let lower = content.to_lowercase();
    let mut match_positions: Vec<usize> = Vec::new();
    for token in &tokens {
        let mut start = 0;
        while let Some(pos) = lower[start..].find(token.as_str()) {
            match_positions.push(start + pos);
            start += pos + token.len();
            if start >= lower.len() {
                break;
            }
        }
    }

    if match_positions.is_empty() {
        return SearchResult::plain_preview(content, FALLBACK_PREVIEW_CHARS);
    }
    match_positions.sort_unstable();

    let chars: Vec<char> = content.chars().collect();
    let byte_to_char: HashMap<usize, usize> = {
        let mut map = HashMap::new();
        let mut char_idx = 0;
        for (byte_idx, _) in content.char_indices() {
            map.insert(byte_idx, char_idx);
            char_idx += 1;
        }
        map
    };

    let mut best_start = 0usize;
    let mut best_density = 0usize;
    for &pos in &match_positions {
        let Some(&char_pos) = byte_to_char.get(&pos) else { continue };
        let window_end = (char_pos + HIGHLIGHT_WINDOW).min(chars.len());
        let density = match_positions
            .iter()
            .filter_map(|p| byte_to_char.get(p))
            .filter(|&&c| c >= char_pos && c < window_end)
            .count();
        if density > best_density {
            best_density = density;
            best_start = char_pos;
        }
    }

    let window_start = best_start.saturating_sub(HIGHLIGHT_LEAD_IN);
    let window_end = (best_start + HIGHLIGHT_WINDOW).min(chars.len());
    let window: String = chars[window_start..window_end].iter().collect();

    let prefix = if window_start > 0 { "..." } else { "" };
    let suffix = if window_end < chars.len() { "..." } else { "" };
    format!("{prefix}{window}{suffix}")
}
