use std::collections::HashMap;

use crate::config::ContextConfig;
use crate::sparse::tokenizer;
use crate::types::SearchResult;

/// One numbered citation in the assembled context (spec §4.8, §4.9).
#[derive(Debug, Clone)]
pub struct Citation {
    pub index: usize,
    pub chunk_id: i64,
    pub document_id: i64,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Packs a ranked candidate list into a bounded, diverse context block
/// (spec §4.8). Candidates must already be sorted by score descending
/// (the retriever's/reranker's output order).
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, candidates: &[SearchResult]) -> ContextBundle {
        let selected = self.select(candidates);

        let mut text = String::new();
        let mut citations = Vec::with_capacity(selected.len());
        for (i, result) in selected.iter().enumerate() {
            let entry = format!("[{}] source: {}\n{}", i + 1, result.filename, result.content);
            let separator = if text.is_empty() { "" } else { "\n\n---\n\n" };
            if text.chars().count() + separator.chars().count() + entry.chars().count() > self.config.max_context_length {
                break;
            }
            text.push_str(separator);
            text.push_str(&entry);
            citations.push(Citation {
                index: i + 1,
                chunk_id: result.chunk_id,
                document_id: result.document_id,
                filename: result.filename.clone(),
            });
        }

        ContextBundle { text, citations }
    }

    /// Score-threshold + score-drop + per-doc-cap + Jaccard-redundancy
    /// selection pass (spec §4.8), capped at `max_context_chunks`.
    fn select<'a>(&self, candidates: &'a [SearchResult]) -> Vec<&'a SearchResult> {
        let mut selected: Vec<&SearchResult> = Vec::new();
        let mut selected_tokens: Vec<std::collections::HashSet<String>> = Vec::new();
        let mut per_doc_count: HashMap<i64, usize> = HashMap::new();

        let Some(top_score) = candidates.first().map(|c| c.score) else {
            return selected;
        };

        for candidate in candidates {
            if selected.len() >= self.config.max_context_chunks {
                break;
            }
            if candidate.score < self.config.min_score_threshold {
                break;
            }
            if top_score > 0.0 && candidate.score < top_score * self.config.score_drop_threshold {
                break;
            }

            let doc_count = per_doc_count.get(&candidate.document_id).copied().unwrap_or(0);
            if doc_count >= self.config.max_chunks_per_doc {
                continue;
            }

            // Reserve the last couple of slots for documents not yet
            // represented, unless we already have source diversity (spec
            // §4.8: `len(selected) >= max_chunks - 2 and unique_docs < 3
            // and r.doc_id in per_doc`).
            let near_capacity = selected.len() + 2 >= self.config.max_context_chunks;
            if near_capacity && per_doc_count.len() < 3 && doc_count > 0 {
                continue;
            }

            let tokens: std::collections::HashSet<String> = tokenizer::tokenize(&candidate.content).into_iter().collect();
            let is_redundant = selected_tokens
                .iter()
                .any(|existing| jaccard_similarity(existing, &tokens) > self.config.jaccard_redundancy);
            if is_redundant {
                continue;
            }

            *per_doc_count.entry(candidate.document_id).or_insert(0) += 1;
            selected_tokens.push(tokens);
            selected.push(candidate);
        }

        selected
    }
}

fn jaccard_similarity(a: &std::collections::HashSet<String>, b: &std::collections::HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ContextConfig {
        ContextConfig {
            max_context_chunks: 8,
            max_context_length: 4000,
            min_score_threshold: 0.01,
            score_drop_threshold: 0.4,
            max_chunks_per_doc: 3,
            jaccard_redundancy: 0.6,
        }
    }

    fn result(chunk_id: i64, document_id: i64, content: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk_id,
            document_id,
            filename: format!("doc{document_id}.txt"),
            content: content.to_string(),
            preview: content.to_string(),
            score,
        }
    }

    #[test]
    fn drops_candidates_below_score_drop_threshold() {
        let builder = ContextBuilder::new(config());
        let candidates = vec![
            result(1, 1, "the quick brown fox jumps over lazy dogs", 0.9),
            result(2, 2, "completely different topic about oceans", 0.1),
        ];
        let bundle = builder.build(&candidates);
        assert_eq!(bundle.citations.len(), 1);
    }

    #[test]
    fn caps_chunks_per_document() {
        let builder = ContextBuilder::new(config());
        let candidates = vec![
            result(1, 1, "alpha content about foxes running", 0.9),
            result(2, 1, "beta content about foxes jumping", 0.85),
            result(3, 1, "gamma content about foxes hunting", 0.8),
            result(4, 1, "delta content about foxes sleeping", 0.75),
        ];
        let bundle = builder.build(&candidates);
        assert_eq!(bundle.citations.len(), 3);
        assert!(bundle.citations.iter().all(|c| c.document_id == 1));
    }

    #[test]
    fn suppresses_near_duplicate_content_via_jaccard() {
        let builder = ContextBuilder::new(config());
        let candidates = vec![
            result(1, 1, "the quick brown fox jumps over the lazy dog", 0.9),
            result(2, 2, "the quick brown fox jumps over the lazy cat", 0.89),
            result(3, 3, "completely unrelated content about space travel", 0.88),
        ];
        let bundle = builder.build(&candidates);
        let ids: Vec<i64> = bundle.citations.iter().map(|c| c.chunk_id).collect();
        assert!(ids.contains(&1));
        assert!(!ids.contains(&2));
        assert!(ids.contains(&3));
    }

    #[test]
    fn numbers_citations_in_packed_order() {
        let builder = ContextBuilder::new(config());
        let candidates = vec![
            result(1, 1, "first chunk about rivers and mountains", 0.9),
            result(2, 2, "second chunk about deserts and oases", 0.8),
        ];
        let bundle = builder.build(&candidates);
        assert_eq!(bundle.citations[0].index, 1);
        assert_eq!(bundle.citations[1].index, 2);
        assert!(bundle.text.starts_with("[1]"));
    }
}
