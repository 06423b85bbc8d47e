//! BM25-Okapi scoring (spec §4.2). Hand-rolled rather than delegated to
//! Tantivy's built-in scorer so the corpus statistics and persisted
//! snapshot shape match the reference exactly; grounded in
//! `original_source/backend/app/services/bm25.py`, which itself wraps
//! `rank_bm25.BM25Okapi` — the constants below (`k1=1.5`, `b=0.75`) are
//! that library's defaults.

const K1: f32 = 1.5;
const B: f32 = 0.75;

#[derive(Debug, Clone, Default)]
pub struct Bm25Stats {
    /// Document frequency: number of documents containing each term.
    doc_freq: std::collections::HashMap<String, usize>,
    avg_doc_len: f32,
    corpus_size: usize,
}

impl Bm25Stats {
    pub fn rebuild(tokenized_corpus: &[Vec<String>]) -> Self {
        let corpus_size = tokenized_corpus.len();
        if corpus_size == 0 {
            return Self::default();
        }

        let mut doc_freq: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut total_len = 0usize;

        for doc in tokenized_corpus {
            total_len += doc.len();
            let unique: std::collections::HashSet<&String> = doc.iter().collect();
            for term in unique {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }

        Self {
            doc_freq,
            avg_doc_len: total_len as f32 / corpus_size as f32,
            corpus_size,
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.corpus_size as f32;
        let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score one document's tokens against a tokenized query.
    pub fn score(&self, query_tokens: &[String], doc_tokens: &[String]) -> f32 {
        if self.corpus_size == 0 || doc_tokens.is_empty() {
            return 0.0;
        }

        let doc_len = doc_tokens.len() as f32;
        let mut term_freq: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for t in doc_tokens {
            *term_freq.entry(t.as_str()).or_insert(0) += 1;
        }

        let mut score = 0.0f32;
        for term in query_tokens {
            let freq = *term_freq.get(term.as_str()).unwrap_or(&0) as f32;
            if freq == 0.0 {
                continue;
            }
            let idf = self.idf(term);
            let denom = freq + K1 * (1.0 - B + B * doc_len / self.avg_doc_len.max(1.0));
            score += idf * (freq * (K1 + 1.0)) / denom;
        }
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_corpus_scores_zero() {
        let stats = Bm25Stats::rebuild(&[]);
        assert_eq!(stats.score(&toks("brown fox"), &toks("brown fox")), 0.0);
    }

    #[test]
    fn document_with_more_query_term_hits_scores_higher() {
        let corpus = vec![
            toks("brown fox jumps"),
            toks("brown brown brown fox"),
            toks("completely unrelated content here"),
        ];
        let stats = Bm25Stats::rebuild(&corpus);
        let query = toks("brown fox");

        let s0 = stats.score(&query, &corpus[0]);
        let s1 = stats.score(&query, &corpus[1]);
        let s2 = stats.score(&query, &corpus[2]);

        assert!(s1 > s0, "more term repetitions should score higher: {s1} vs {s0}");
        assert_eq!(s2, 0.0, "document with no query terms should score zero");
    }

    #[test]
    fn rare_terms_score_higher_than_common_ones() {
        let corpus = vec![
            toks("common common common rare"),
            toks("common common common common"),
            toks("common common common common"),
            toks("common common common common"),
        ];
        let stats = Bm25Stats::rebuild(&corpus);

        let rare_score = stats.score(&toks("rare"), &corpus[0]);
        let common_score = stats.score(&toks("common"), &corpus[0]);
        assert!(rare_score > common_score, "idf should favor the rarer term");
    }
}
