//! Background task queue and document ingestion pipeline (spec §4.10).
//!
//! `TaskQueue` is a direct translation of
//! `original_source/backend/app/services/background.py`'s `TaskQueue`:
//! `asyncio.Queue` + a fixed worker pool + `None` poison pills to stop
//! becomes a `tokio::sync::mpsc` channel shared by `max_concurrent` worker
//! tasks. `Pipeline::process_document` ports the same file's
//! `process_document_task` stage sequence (parsing -> title generation ->
//! embedding -> completed, each stage failure setting the document to
//! `Failed` rather than propagating), and `should_generate_title` /
//! `is_title_plausible` port `_should_generate_title` and the inline title
//! validation the reference applies before accepting an LLM-suggested
//! title over the original one.

pub mod queue;
pub mod title;

pub use queue::TaskQueue;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::chunking::TextChunker;
use crate::contracts::{Embedder, Parser};
use crate::generate::{Generator, Message};
use crate::meta::MetaStore;
use crate::sync::IndexSynchronizer;
use crate::types::DocumentStatus;

const TITLE_GENERATION_CONTENT_CHARS: usize = 3000;

/// Drives a single document through parsing, title resolution, chunking
/// and embedding (spec §4.10).
pub struct Pipeline {
    meta: Arc<MetaStore>,
    synchronizer: Arc<IndexSynchronizer>,
    chunker: TextChunker,
    parser: Arc<dyn Parser>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
}

impl Pipeline {
    pub fn new(
        meta: Arc<MetaStore>,
        synchronizer: Arc<IndexSynchronizer>,
        chunker: TextChunker,
        parser: Arc<dyn Parser>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self { meta, synchronizer, chunker, parser, embedder, generator }
    }

    /// Runs the full pipeline for `document_id`. Every stage failure is
    /// contained: the document is marked `Failed` with a message and this
    /// returns `Ok(())` so a `TaskQueue` worker doesn't treat an individual
    /// document's failure as a queue-fatal error (spec §4.10, background.py
    /// catches the whole task body in one `try/except`).
    pub async fn process_document(&self, document_id: i64) -> Result<()> {
        let document = match self.meta.get_document(document_id) {
            Ok(doc) => doc,
            Err(e) => {
                error!(document_id, error = %e, "document vanished before processing started");
                return Ok(());
            }
        };

        self.meta.update_status(document_id, DocumentStatus::Parsing, Some("Starting parsing"), 0.0)?;

        let progress_meta = self.meta.clone();
        let progress: crate::contracts::ProgressCallback = Arc::new(move |message: &str, percent: f32| {
            let overall_progress = (percent * 0.95).clamp(0.0, 95.0);
            if let Err(e) = progress_meta.update_status(document_id, DocumentStatus::Parsing, Some(message), overall_progress) {
                warn!(document_id, error = %e, "failed to record parser progress");
            }
        });

        let parsed = match self.parser.parse(&document.file_path, &document.file_type, progress).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(document_id, error = %e, "parsing failed");
                self.meta
                    .update_status(document_id, DocumentStatus::Failed, Some(&format!("Parse error: {e}")), 0.0)?;
                return Ok(());
            }
        };

        let title = self
            .resolve_title(document.title.as_deref(), &document.filename, parsed.suggested_title.as_deref(), &parsed.content)
            .await;
        self.meta
            .update_content_and_title(document_id, &parsed.content, title.as_deref(), &HashMap::new())?;

        self.meta
            .update_status(document_id, DocumentStatus::Embedding, Some("Generating embeddings"), 95.0)?;

        if let Err(e) = self
            .synchronizer
            .sync_document(document_id, &parsed.content, &self.chunker, self.embedder.as_ref())
            .await
        {
            error!(document_id, error = %e, "embedding failed");
            self.meta
                .update_status(document_id, DocumentStatus::Failed, Some(&format!("Embedding error: {e}")), 95.0)?;
            return Ok(());
        }

        self.meta.update_status(document_id, DocumentStatus::Completed, Some("Ready"), 100.0)?;
        info!(document_id, "document processing completed");
        Ok(())
    }

    /// Picks the best pre-LLM title (the document's existing title or
    /// whatever the parser pulled from file metadata, whichever is
    /// richer), then — only if that still looks auto-generated/low
    /// information — asks the `Generator` to propose one and accepts it if
    /// it passes plausibility checks (spec §4.10, §11; background.py's
    /// `_should_generate_title` gate plus its inline title validation
    /// before swapping in an LLM-suggested title).
    async fn resolve_title(
        &self,
        original: Option<&str>,
        filename: &str,
        parsed_suggestion: Option<&str>,
        content: &str,
    ) -> Option<String> {
        let pre_llm_title = match (original, parsed_suggestion) {
            (Some(a), Some(b)) => {
                if title::meaningful_char_count(b) > title::meaningful_char_count(a) {
                    Some(b.to_string())
                } else {
                    Some(a.to_string())
                }
            }
            (Some(a), None) => Some(a.to_string()),
            (None, Some(b)) => Some(b.to_string()),
            (None, None) => None,
        };

        let needs_generation = pre_llm_title
            .as_deref()
            .map(|t| title::should_generate_title(t, filename))
            .unwrap_or(true);

        if !needs_generation {
            return pre_llm_title;
        }

        match self.generate_title(content).await {
            Ok(candidate) if title::is_title_plausible(&candidate) => Some(candidate),
            Ok(_) => pre_llm_title,
            Err(e) => {
                warn!(error = %e, "title generation failed, keeping existing title");
                pre_llm_title
            }
        }
    }

    /// Asks the `Generator` for a short, plain title summarizing the
    /// document's opening content (spec §4.10's "ask the Generator to
    /// propose a title").
    async fn generate_title(&self, content: &str) -> Result<String> {
        let excerpt: String = content.chars().take(TITLE_GENERATION_CONTENT_CHARS).collect();
        let messages = [
            Message::system(
                "You generate short, descriptive document titles. Reply with the title only, \
                 no quotes, no punctuation at the end, 4 to 12 words.",
            ),
            Message::user(format!("Propose a title for this document:\n\n{excerpt}")),
        ];
        let title = self.generator.generate(&messages, 0.3).await?;
        Ok(title.trim().trim_matches('"').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ParsedDocument;
    use crate::dense::lance_store::LanceStore;
    use crate::dense::DenseIndex;
    use crate::sparse::SparseIndex;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FakeParser {
        content: String,
        suggested_title: Option<String>,
    }

    #[async_trait]
    impl Parser for FakeParser {
        async fn parse(
            &self,
            _file_path: &str,
            _file_type: &str,
            progress: crate::contracts::ProgressCallback,
        ) -> Result<ParsedDocument> {
            progress("parsed", 100.0);
            Ok(ParsedDocument {
                content: self.content.clone(),
                suggested_title: self.suggested_title.clone(),
            })
        }
    }

    struct FailingParser;

    #[async_trait]
    impl Parser for FailingParser {
        async fn parse(
            &self,
            _file_path: &str,
            _file_type: &str,
            _progress: crate::contracts::ProgressCallback,
        ) -> Result<ParsedDocument> {
            Err(anyhow::anyhow!("corrupt file"))
        }
    }

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    struct SilentGenerator;

    #[async_trait]
    impl Generator for SilentGenerator {
        async fn generate(&self, _messages: &[Message], _temperature: f32) -> Result<String> {
            Ok(String::new())
        }
        async fn generate_stream(&self, _messages: &[Message], _temperature: f32) -> Result<crate::generate::TokenStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(crate::generate::TokenStream::new(rx))
        }
    }

    async fn harness(parser: Arc<dyn Parser>) -> (Pipeline, Arc<MetaStore>) {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaStore::in_memory().unwrap());
        let dense: Arc<dyn DenseIndex> = Arc::new(LanceStore::new(dir.path().to_str().unwrap(), 3).await.unwrap());
        let sparse = Arc::new(Mutex::new(SparseIndex::new()));
        let synchronizer = Arc::new(IndexSynchronizer::new(meta.clone(), dense, sparse));
        let pipeline = Pipeline::new(
            meta.clone(),
            synchronizer,
            TextChunker::new(800, 150),
            parser,
            Arc::new(FakeEmbedder),
            Arc::new(SilentGenerator),
        );
        (pipeline, meta)
    }

    #[tokio::test]
    async fn successful_document_reaches_completed() {
        let parser = Arc::new(FakeParser { content: "some real document content about rivers".to_string(), suggested_title: None });
        let (pipeline, meta) = harness(parser).await;
        let doc_id = meta.create_document("notes.txt", "text/plain", "/tmp/notes.txt", 10).unwrap();

        pipeline.process_document(doc_id).await.unwrap();

        let doc = meta.get_document(doc_id).unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.processing_progress, 100.0);
    }

    #[tokio::test]
    async fn parse_failure_marks_document_failed_without_erroring_the_task() {
        let (pipeline, meta) = harness(Arc::new(FailingParser)).await;
        let doc_id = meta.create_document("broken.pdf", "application/pdf", "/tmp/broken.pdf", 10).unwrap();

        let result = pipeline.process_document(doc_id).await;
        assert!(result.is_ok());

        let doc = meta.get_document(doc_id).unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn plausible_suggested_title_replaces_garbage_original() {
        let parser = Arc::new(FakeParser {
            content: "a deep dive into distributed consensus algorithms".to_string(),
            suggested_title: Some("Distributed Consensus Algorithms Explained".to_string()),
        });
        let (pipeline, meta) = harness(parser).await;
        let doc_id = meta.create_document("Untitled.txt", "text/plain", "/tmp/Untitled.txt", 10).unwrap();

        pipeline.process_document(doc_id).await.unwrap();
        let doc = meta.get_document(doc_id).unwrap();
        assert_eq!(doc.title.as_deref(), Some("Distributed Consensus Algorithms Explained"));
    }
}
