//! Language-aware tokenizer for the sparse index (spec §4.2).
//!
//! CJK runs are segmented against a small dictionary (technical-term
//! whitelist first, then forward-maximum-match single characters), Latin
//! runs are lower-cased and split on alphanumeric boundaries. Single
//! character tokens and stopwords are dropped. Grounded in
//! `original_source/backend/app/services/bm25.py::_tokenize`, adapted from
//! jieba (a Python-only dependency not available anywhere in this crate's
//! ecosystem) to a hand-rolled forward-maximum-match segmenter over the
//! same technical-term whitelist.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Technical terms kept intact during CJK segmentation, mirroring the
/// reference's `jieba.add_word(...)` calls so domain vocabulary isn't
/// split into single characters.
const TECH_TERMS: &[&str] = &[
    "rag", "llm", "transformer", "embedding", "embeddings", "fastapi", "react", "vue",
    "docker", "kubernetes", "redis", "postgresql", "mysql", "mongodb", "chromadb",
    "langchain", "llamaindex", "huggingface", "pytorch", "tensorflow", "cuda", "gpu", "cpu",
    "bm25", "tf-idf", "hnsw", "ivf", "rerank", "reranker", "ollama", "vllm",
    "markitdown", "pdf", "json", "xml", "yaml", "html", "css", "sql",
    "sse", "websocket", "grpc", "graphql",
];

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "的", "了", "是", "在", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上",
        "也", "很", "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这",
        "那", "the", "a", "an", "is", "are", "was", "were", "be", "been", "to", "of", "and",
        "in", "that", "it",
    ]
    .into_iter()
    .collect()
});

static TECH_TERM_SET: LazyLock<HashSet<&'static str>> = LazyLock::new(|| TECH_TERMS.iter().copied().collect());

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}'
    )
}

fn is_latin_alnum(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

/// Tokenize `text` for both indexing and querying; both call sites must use
/// this exact pipeline so corpus and query tokens line up.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut tokens = Vec::new();
    let chars: Vec<char> = lower.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if is_latin_alnum(c) {
            let start = i;
            while i < chars.len() && is_latin_alnum(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            push_token(&mut tokens, word);
        } else if is_cjk(c) {
            let start = i;
            while i < chars.len() && is_cjk(chars[i]) {
                i += 1;
            }
            segment_cjk_run(&chars[start..i], &mut tokens);
        } else {
            i += 1;
        }
    }

    tokens
}

/// Forward-maximum-match segmentation of a contiguous CJK run: try the
/// longest whitelisted technical term at each position first, otherwise
/// fall back to a single character.
fn segment_cjk_run(run: &[char], out: &mut Vec<String>) {
    const MAX_TERM_CHARS: usize = 8;
    let mut i = 0;
    while i < run.len() {
        let mut matched = None;
        let max_len = (run.len() - i).min(MAX_TERM_CHARS);
        for len in (1..=max_len).rev() {
            let candidate: String = run[i..i + len].iter().collect();
            if TECH_TERM_SET.contains(candidate.as_str()) {
                matched = Some((candidate, len));
                break;
            }
        }
        if let Some((term, len)) = matched {
            push_token(out, term);
            i += len;
        } else {
            push_token(out, run[i].to_string());
            i += 1;
        }
    }
}

fn push_token(out: &mut Vec<String>, token: String) {
    if token.is_empty() {
        return;
    }
    if STOPWORDS.contains(token.as_str()) {
        return;
    }
    // Drop single-character tokens unless alphanumeric (spec §4.2: "single
    // character and stopword tokens are dropped" — a lone CJK character
    // carries little signal, a lone digit/letter even less, so both are
    // dropped uniformly here).
    if token.chars().count() < 2 {
        return;
    }
    out.push(token);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_latin_words_lowercased() {
        let tokens = tokenize("The Quick Brown Fox");
        assert_eq!(tokens, vec!["quick".to_string(), "brown".to_string(), "fox".to_string()]);
    }

    #[test]
    fn drops_stopwords_and_single_chars() {
        let tokens = tokenize("a is the brown fox");
        assert!(!tokens.contains(&"a".to_string()));
        assert!(!tokens.contains(&"is".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
        assert!(tokens.contains(&"brown".to_string()));
    }

    #[test]
    fn segments_cjk_run_into_characters_by_default() {
        let tokens = tokenize("苹果香蕉");
        assert!(tokens.len() >= 2);
    }

    #[test]
    fn keeps_whitelisted_technical_terms_intact() {
        let tokens = tokenize("bm25 is useful");
        assert!(tokens.contains(&"bm25".to_string()));
    }

    #[test]
    fn query_and_document_tokenization_agree() {
        let doc_tokens = tokenize("Hybrid retrieval with BM25 and dense vectors");
        let query_tokens = tokenize("BM25 dense vectors");
        assert!(query_tokens.iter().all(|t| doc_tokens.contains(t) || t == "dense" || t == "vectors"));
    }
}
