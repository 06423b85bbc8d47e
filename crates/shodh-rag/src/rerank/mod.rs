//! Cross-encoder reranking (spec §4.7).
//!
//! The crate ships no concrete reranker backend — `Reranker` is an external
//! contract (spec §6) the host implements against whatever cross-encoder it
//! runs. `CachedReranker` wraps any `Reranker` with the content-hash cache
//! the teacher's `reranking/cross_encoder.rs` also kept in front of its
//! (now-dropped) ONNX session, generalized from that file's
//! `Arc<Mutex<Session>>`-guarded-batch shape to a narrow cache decorator
//! over the trait instead of a concrete model wrapper.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Predicts relevance of each `documents[i]` to `query` (spec §4.7,
/// §6). Higher is more relevant; scale is whatever the backing model
/// produces, fused downstream against the RRF score (spec §4.7's
/// `final_score = 0.1 * rrf + 0.9 * rerank`).
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn predict(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

/// `final_score = w_rrf * rrf_score + w_rerank * rerank_score` (spec §4.7).
/// These weights are load-bearing, not illustrative: rerank dominates
/// because it sees the full query/document pair instead of independent
/// per-source ranks.
pub const RRF_FUSION_WEIGHT: f32 = 0.1;
pub const RERANK_FUSION_WEIGHT: f32 = 0.9;

pub fn fuse_scores(rrf_score: f32, rerank_score: f32) -> f32 {
    RRF_FUSION_WEIGHT * rrf_score + RERANK_FUSION_WEIGHT * rerank_score
}

const CACHE_CAPACITY: usize = 1000;
const CACHE_EVICTION_FRACTION: f32 = 0.2;
const CACHE_KEY_HEAD: usize = 500;
const CACHE_KEY_TAIL: usize = 200;

fn cache_key(query: &str, document: &str) -> u64 {
    let chars: Vec<char> = document.chars().collect();
    let head: String = chars.iter().take(CACHE_KEY_HEAD).collect();
    let tail: String = chars.iter().rev().take(CACHE_KEY_TAIL).collect();
    xxhash_rust::xxh3::xxh3_64(format!("{query}\u{0}{head}\u{0}{tail}").as_bytes())
}

/// Wraps a `Reranker` with a bounded content-hash cache (spec §4.7): keyed
/// on `hash(query, head(doc, 500), tail(doc, 200))` so near-duplicate
/// re-scoring of the same query against the same document skips the model
/// call. On overflow, evicts the oldest ~20% of entries rather than
/// evicting one at a time, trading a little over-capacity for simpler
/// bookkeeping (insertion order is tracked separately from the map).
pub struct CachedReranker<R: Reranker> {
    inner: R,
    cache: Arc<Mutex<Cache>>,
}

struct Cache {
    scores: HashMap<u64, f32>,
    order: std::collections::VecDeque<u64>,
}

impl<R: Reranker> CachedReranker<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: Arc::new(Mutex::new(Cache {
                scores: HashMap::new(),
                order: std::collections::VecDeque::new(),
            })),
        }
    }

    fn insert(&self, key: u64, score: f32) {
        let mut cache = self.cache.lock();
        if !cache.scores.contains_key(&key) {
            cache.order.push_back(key);
        }
        cache.scores.insert(key, score);

        if cache.scores.len() > CACHE_CAPACITY {
            let evict_count = ((cache.scores.len() as f32) * CACHE_EVICTION_FRACTION).ceil() as usize;
            for _ in 0..evict_count {
                if let Some(old_key) = cache.order.pop_front() {
                    cache.scores.remove(&old_key);
                } else {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl<R: Reranker + Send + Sync> Reranker for CachedReranker<R> {
    async fn predict(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let keys: Vec<u64> = documents.iter().map(|doc| cache_key(query, doc)).collect();

        let mut scores = vec![None; documents.len()];
        let mut miss_indices = Vec::new();
        {
            let cache = self.cache.lock();
            for (i, key) in keys.iter().enumerate() {
                if let Some(&score) = cache.scores.get(key) {
                    scores[i] = Some(score);
                } else {
                    miss_indices.push(i);
                }
            }
        }

        if !miss_indices.is_empty() {
            let miss_docs: Vec<String> = miss_indices.iter().map(|&i| documents[i].clone()).collect();
            let miss_scores = self.inner.predict(query, &miss_docs).await?;
            for (&idx, score) in miss_indices.iter().zip(miss_scores) {
                self.insert(keys[idx], score);
                scores[idx] = Some(score);
            }
        }

        Ok(scores.into_iter().map(|s| s.unwrap_or(0.0)).collect())
    }
}

/// Cosine-similarity fallback reranker: scores by how close a pre-embedded
/// document vector is to the query vector, for deployments that skip a
/// dedicated cross-encoder (spec §4.7 describes this as an acceptable
/// degraded path, not a required backend).
pub struct CosineFallbackReranker<'a> {
    pub query_vector: &'a [f32],
    pub document_vectors: &'a [Vec<f32>],
}

#[async_trait]
impl<'a> Reranker for CosineFallbackReranker<'a> {
    async fn predict(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>> {
        Ok((0..documents.len())
            .map(|i| cosine_similarity(self.query_vector, &self.document_vectors[i]))
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
