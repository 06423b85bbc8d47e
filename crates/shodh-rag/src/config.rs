//! Runtime configuration (spec §6, §10.3). Descended from the teacher's
//! `RAGConfig`/`ChunkingConfig`/`SearchConfig` split, re-keyed to the field
//! names and defaults the specification enumerates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Per-source candidate pool before fusion (spec §6 `top_k_retrieval`).
    pub top_k_retrieval: usize,
    /// Max reranked outputs (spec §6 `top_k_rerank`).
    pub top_k_rerank: usize,
    pub bm25_weight: f32,
    pub vector_weight: f32,
    /// RRF rank-damping constant, `k=60` in the glossary.
    pub rrf_k: usize,
    pub rerank_cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub max_context_chunks: usize,
    pub max_context_length: usize,
    pub min_score_threshold: f32,
    pub score_drop_threshold: f32,
    pub max_chunks_per_doc: usize,
    pub jaccard_redundancy: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub max_concurrent: usize,
    pub max_upload_size: u64,
}

impl RagConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunking.chunk_size < 50 {
            return Err("chunking.chunk_size must be >= 50".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size / 2 {
            return Err("chunking.chunk_overlap must be < chunk_size / 2".into());
        }
        if self.retrieval.top_k_retrieval == 0 {
            return Err("retrieval.top_k_retrieval must be > 0".into());
        }
        if self.retrieval.top_k_rerank == 0 {
            return Err("retrieval.top_k_rerank must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.retrieval.bm25_weight) {
            return Err("retrieval.bm25_weight must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.retrieval.vector_weight) {
            return Err("retrieval.vector_weight must be in [0.0, 1.0]".into());
        }
        if self.context.max_context_chunks == 0 {
            return Err("context.max_context_chunks must be > 0".into());
        }
        if self.context.max_chunks_per_doc == 0 {
            return Err("context.max_chunks_per_doc must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.context.jaccard_redundancy) {
            return Err("context.jaccard_redundancy must be in [0.0, 1.0]".into());
        }
        if self.pipeline.max_concurrent == 0 {
            return Err("pipeline.max_concurrent must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        let data_dir = dirs_data_dir();

        Self {
            data_dir,
            chunking: ChunkingConfig {
                chunk_size: 800,
                chunk_overlap: 150,
            },
            retrieval: RetrievalConfig {
                top_k_retrieval: 20,
                top_k_rerank: 5,
                bm25_weight: 0.3,
                vector_weight: 0.7,
                rrf_k: 60,
                rerank_cache_size: 1000,
            },
            context: ContextConfig {
                max_context_chunks: 8,
                max_context_length: 4000,
                min_score_threshold: 0.01,
                score_drop_threshold: 0.4,
                max_chunks_per_doc: 3,
                jaccard_redundancy: 0.6,
            },
            pipeline: PipelineConfig {
                max_concurrent: 2,
                max_upload_size: 50 * 1024 * 1024,
            },
        }
    }
}

fn dirs_data_dir() -> PathBuf {
    std::env::var("RAGCORE_DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("ragcore")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_overlap_over_half_chunk_size() {
        let mut cfg = RagConfig::default();
        cfg.chunking.chunk_overlap = cfg.chunking.chunk_size / 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_weights() {
        let mut cfg = RagConfig::default();
        cfg.retrieval.bm25_weight = 1.5;
        assert!(cfg.validate().is_err());
    }
}
