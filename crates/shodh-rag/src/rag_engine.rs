//! `RagEngine`: the facade wiring chunking, dense+sparse indexing,
//! synchronization, hybrid retrieval, reranking, context assembly,
//! generation and the background pipeline into one object (spec §2's
//! component list, §9's "one engine, narrow external collaborators").
//! Mirrors how the reference system is composed from several standalone
//! services glued together by FastAPI dependency injection; here that glue
//! is a single constructor taking the external collaborators (`Parser`,
//! `Embedder`, `Generator`, optional `Reranker`) as trait objects.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::chunking::TextChunker;
use crate::config::RagConfig;
use crate::contracts::{Embedder, Parser};
use crate::dense::lance_store::LanceStore;
use crate::dense::DenseIndex;
use crate::error::GenerationError;
use crate::generate::{AnswerEngine, AnswerResult, Generator, Message};
use crate::meta::MetaStore;
use crate::pipeline::{Pipeline, TaskQueue};
use crate::retrieval::HybridRetriever;
use crate::rerank::Reranker;
use crate::sparse::SparseIndex;
use crate::sync::{ConsistencyReport, IndexSynchronizer};
use crate::types::{MetadataFilter, SearchResult};

const DENSE_SUBDIR: &str = "vectors";
const SQLITE_FILENAME: &str = "meta.sqlite3";
const BM25_SNAPSHOT_FILENAME: &str = "bm25.snapshot";

pub struct RagEngine {
    config: RagConfig,
    meta: Arc<MetaStore>,
    synchronizer: Arc<IndexSynchronizer>,
    retriever: Arc<HybridRetriever>,
    answer_engine: Arc<AnswerEngine>,
    pipeline: Arc<Pipeline>,
    queue: TaskQueue,
    embedder: Arc<dyn Embedder>,
}

impl RagEngine {
    /// Open (or create) all on-disk state under `config.data_dir` and wire
    /// the components together. `reranker` is optional: without one, the
    /// answer path falls back to plain RRF-ordered context.
    pub async fn open(
        config: RagConfig,
        parser: Arc<dyn Parser>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Result<Self> {
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        std::fs::create_dir_all(&config.data_dir)?;

        let meta = Arc::new(MetaStore::open(config.data_dir.join(SQLITE_FILENAME))?);

        let dense_path = config.data_dir.join(DENSE_SUBDIR);
        let dense: Arc<dyn DenseIndex> =
            Arc::new(LanceStore::new(dense_path.to_str().unwrap_or("./data/vectors"), embedder.dimension()).await?);

        let mut sparse_index = SparseIndex::with_persist_path(config.data_dir.join(BM25_SNAPSHOT_FILENAME));
        sparse_index.load()?;
        let sparse = Arc::new(Mutex::new(sparse_index));

        let synchronizer = Arc::new(IndexSynchronizer::new(meta.clone(), dense.clone(), sparse.clone()));
        let retriever = Arc::new(HybridRetriever::new(dense, sparse, meta.clone(), config.retrieval.clone()));

        let answer_engine = Arc::new(AnswerEngine::new(
            retriever.clone(),
            reranker,
            config.context.clone(),
            generator.clone(),
            config.retrieval.clone(),
        ));

        let chunker = TextChunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap);
        let pipeline = Arc::new(Pipeline::new(meta.clone(), synchronizer.clone(), chunker, parser, embedder.clone(), generator));

        let queue = TaskQueue::start(config.pipeline.max_concurrent);

        Ok(Self {
            config,
            meta,
            synchronizer,
            retriever,
            answer_engine,
            pipeline,
            queue,
            embedder,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Register a document and enqueue it for background processing (spec
    /// §4.10). Returns the new document id immediately; status transitions
    /// happen asynchronously.
    pub async fn ingest_document(&self, filename: &str, file_type: &str, file_path: &str, file_size: u64) -> Result<i64> {
        if file_size > self.config.pipeline.max_upload_size {
            anyhow::bail!(
                "file size {file_size} exceeds max_upload_size {}",
                self.config.pipeline.max_upload_size
            );
        }

        let document_id = self.meta.create_document(filename, file_type, file_path, file_size)?;

        let pipeline = self.pipeline.clone();
        self.queue
            .enqueue(async move { pipeline.process_document(document_id).await })
            .await?;

        Ok(document_id)
    }

    pub async fn search(&self, query: &str, top_k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<SearchResult>> {
        self.retriever.search(query, top_k, filter, self.embedder.as_ref()).await
    }

    pub async fn quick_search(&self, query: &str, top_k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<SearchResult>> {
        self.retriever.quick_search(query, top_k, filter, self.embedder.as_ref()).await
    }

    pub async fn answer(&self, question: &str, filter: Option<&MetadataFilter>, chat_history: &[Message]) -> Result<AnswerResult> {
        self.answer_engine.answer(question, filter, chat_history, self.embedder.as_ref()).await
    }

    pub async fn answer_stream(
        &self,
        conversation_id: &str,
        question: &str,
        filter: Option<&MetadataFilter>,
        chat_history: &[Message],
    ) -> Result<Vec<crate::generate::GenerationEvent>, GenerationError> {
        self.answer_engine
            .answer_stream(conversation_id, question, filter, chat_history, self.embedder.as_ref())
            .await
    }

    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        self.synchronizer.check_consistency().await
    }

    pub async fn rebuild_all(&self) -> Result<usize> {
        self.synchronizer.rebuild_all(self.embedder.as_ref()).await
    }

    pub async fn remove_document(&self, document_id: i64) -> Result<()> {
        self.synchronizer.remove_document(document_id).await?;
        self.meta.delete_document(document_id)?;
        Ok(())
    }

    /// Drain the background task queue and stop its workers.
    pub async fn shutdown(self) {
        self.queue.stop().await;
    }
}
