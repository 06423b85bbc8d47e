//! Answer generation (spec §4.9).
//!
//! `Generator` is the external LLM contract (spec §6); `TokenStream` and
//! `StreamingResponse` are kept close to verbatim from the teacher's
//! `llm/streaming.rs`. Prompt assembly (context packing, system prompt,
//! chat-history window) and the SSE-shaped event sequence are a port of
//! `original_source/backend/app/services/rag.py`'s `answer`/`answer_stream`,
//! written in English rather than carrying over the reference's
//! Chinese-language prompt text. `AnswerEngine` is the orchestration point
//! tying `HybridRetriever`, `Reranker` and `ContextBuilder` to a `Generator`
//! call, mirroring how `RAGService` in the reference owns that whole path
//! as one object rather than spreading it across separate services.

pub mod streaming;

pub use streaming::{StreamingResponse, ThinkingFilter, TokenStream};

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::config::{ContextConfig, RetrievalConfig};
use crate::context::{Citation, ContextBuilder};
use crate::contracts::Embedder;
use crate::error::GenerationError;
use crate::rerank::{fuse_scores, CosineFallbackReranker, Reranker};
use crate::retrieval::HybridRetriever;
use crate::types::{MetadataFilter, SearchResult};

const CHAT_HISTORY_WINDOW: usize = 8;
const RERANK_CANDIDATE_MULTIPLIER: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// External chat-completion contract (spec §6). The crate ships no
/// concrete model runtime — callers wire in whatever OpenAI-compatible or
/// local model backend they run.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, messages: &[Message], temperature: f32) -> Result<String>;

    async fn generate_stream(&self, messages: &[Message], temperature: f32) -> Result<TokenStream>;
}

/// One event of an `answer_stream` call (spec §4.9's SSE sequence:
/// `sources` once, `content` per token, `done` once).
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    Sources(Vec<Citation>),
    Content(String),
    Done { response: String, sources: Vec<Citation> },
}

#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub response: String,
    pub citations: Vec<Citation>,
    pub context_used: String,
}

/// Mints a fresh conversation id for callers that don't already track one
/// (spec §4.9's streaming guard keys on conversation id).
pub fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Ties retrieval, reranking, context assembly and generation into the
/// request/response and streaming answer paths (spec §4.9).
pub struct AnswerEngine {
    retriever: Arc<HybridRetriever>,
    reranker: Option<Arc<dyn Reranker>>,
    context_builder: ContextBuilder,
    generator: Arc<dyn Generator>,
    retrieval_config: RetrievalConfig,
    active_streams: Mutex<HashSet<String>>,
}

impl AnswerEngine {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        reranker: Option<Arc<dyn Reranker>>,
        context_config: ContextConfig,
        generator: Arc<dyn Generator>,
        retrieval_config: RetrievalConfig,
    ) -> Self {
        Self {
            retriever,
            reranker,
            context_builder: ContextBuilder::new(context_config),
            generator,
            retrieval_config,
            active_streams: Mutex::new(HashSet::new()),
        }
    }

    async fn retrieve_and_rerank(
        &self,
        question: &str,
        document_filter: Option<&MetadataFilter>,
        embedder: &dyn Embedder,
    ) -> Result<Vec<SearchResult>> {
        let pool_size = self.context_builder_max_chunks() * RERANK_CANDIDATE_MULTIPLIER;
        let mut results = self.retriever.search(question, pool_size, document_filter, embedder).await?;

        if let Some(reranker) = &self.reranker {
            if !results.is_empty() {
                let documents: Vec<String> = results.iter().map(|r| r.content.clone()).collect();
                let rerank_scores = match reranker.predict(question, &documents).await {
                    Ok(scores) => scores,
                    Err(e) => {
                        warn!(error = %e, "reranker unavailable, falling back to embedding cosine similarity");
                        let query_vector = embedder.embed_one(question).await?;
                        let document_vectors = embedder.embed(&documents).await?;
                        let fallback = CosineFallbackReranker {
                            query_vector: &query_vector,
                            document_vectors: &document_vectors,
                        };
                        fallback.predict(question, &documents).await?
                    }
                };
                for (result, rerank_score) in results.iter_mut().zip(rerank_scores) {
                    result.score = fuse_scores(result.score, rerank_score);
                }
                results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            }
            results.truncate(self.retrieval_config.top_k_rerank);
        }

        Ok(results)
    }

    fn context_builder_max_chunks(&self) -> usize {
        self.retrieval_config.top_k_rerank.max(1)
    }

    fn system_prompt() -> String {
        "You are a knowledgeable assistant answering questions strictly from the \
         provided context. Ground every claim in the numbered sources below; cite \
         them inline as [1], [2], etc. If the context does not contain the answer, \
         say so plainly instead of guessing. Keep answers structured and precise."
            .to_string()
    }

    fn build_messages(&self, context_text: &str, question: &str, chat_history: &[Message]) -> Vec<Message> {
        let mut messages = vec![Message::system(Self::system_prompt())];
        let history_start = chat_history.len().saturating_sub(CHAT_HISTORY_WINDOW);
        messages.extend(chat_history[history_start..].iter().cloned());
        messages.push(Message::user(format!("Context:\n{context_text}\n\nQuestion: {question}")));
        messages
    }

    /// Non-streaming answer path (spec §4.9 `answer`).
    pub async fn answer(
        &self,
        question: &str,
        document_filter: Option<&MetadataFilter>,
        chat_history: &[Message],
        embedder: &dyn Embedder,
    ) -> Result<AnswerResult> {
        let candidates = self.retrieve_and_rerank(question, document_filter, embedder).await?;
        let bundle = self.context_builder.build(&candidates);
        let messages = self.build_messages(&bundle.text, question, chat_history);
        let response = match self.generator.generate(&messages, 0.7).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "generation failed, serving fallback error response");
                format!("Sorry, something went wrong while generating a response: {e}")
            }
        };

        Ok(AnswerResult {
            response,
            citations: bundle.citations,
            context_used: bundle.text,
        })
    }

    /// Streaming answer path (spec §4.9 `answer_stream`, P9 guard): only
    /// one stream may be in flight per `conversation_id` at a time.
    pub async fn answer_stream(
        &self,
        conversation_id: &str,
        question: &str,
        document_filter: Option<&MetadataFilter>,
        chat_history: &[Message],
        embedder: &dyn Embedder,
    ) -> Result<Vec<GenerationEvent>, GenerationError> {
        {
            let mut active = self.active_streams.lock();
            if !active.insert(conversation_id.to_string()) {
                return Err(GenerationError::Busy);
            }
        }

        let result = self.run_stream(question, document_filter, chat_history, embedder).await;

        self.active_streams.lock().remove(conversation_id);
        result.map_err(GenerationError::Failed)
    }

    async fn run_stream(
        &self,
        question: &str,
        document_filter: Option<&MetadataFilter>,
        chat_history: &[Message],
        embedder: &dyn Embedder,
    ) -> Result<Vec<GenerationEvent>> {
        let candidates = self.retrieve_and_rerank(question, document_filter, embedder).await?;
        let bundle = self.context_builder.build(&candidates);

        let mut events = vec![GenerationEvent::Sources(bundle.citations.clone())];

        let messages = self.build_messages(&bundle.text, question, chat_history);
        let mut stream = match self.generator.generate_stream(&messages, 0.7).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "generation stream failed, serving fallback error response");
                let fallback = format!("Sorry, something went wrong while generating a response: {e}");
                events.push(GenerationEvent::Content(fallback.clone()));
                events.push(GenerationEvent::Done { response: fallback, sources: bundle.citations });
                return Ok(events);
            }
        };

        let mut response = StreamingResponse::new();
        let mut thinking = ThinkingFilter::new();
        while let Some(token) = stream.next().await {
            for out in thinking.process(token) {
                response.add_token(out.clone());
                events.push(GenerationEvent::Content(out));
            }
        }
        response.complete();

        events.push(GenerationEvent::Done {
            response: response.get_text(),
            sources: bundle.citations,
        });
        Ok(events)
    }
}
