//! Token streaming primitives, kept close to the teacher's
//! `llm/streaming.rs`: a `mpsc`-backed pull stream of generated tokens plus
//! an accumulator that tracks whether generation finished.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

pub struct TokenStream {
    receiver: mpsc::Receiver<String>,
}

impl TokenStream {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self { receiver }
    }

    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub async fn collect(mut self) -> String {
        let mut out = String::new();
        while let Some(token) = self.next().await {
            out.push_str(&token);
        }
        out
    }
}

impl Stream for TokenStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Detects `<think>...</think>` sentinels inside a raw token stream and
/// wraps the enclosed passage in a delimited block (spec §4.9 "handles
/// special sentinels for model 'thinking' passages"). Ported from
/// `original_source/backend/app/services/llm.py`'s `chat_stream` consumer
/// loop, which buffers the open/close tags emitted by Qwen3-style models
/// around their reasoning trace.
#[derive(Debug, Default)]
pub struct ThinkingFilter {
    in_thinking: bool,
}

impl ThinkingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_thinking(&self) -> bool {
        self.in_thinking
    }

    /// Transform one raw token into zero or more output tokens, opening a
    /// `<think>\n` marker the moment a `<think>` tag appears and closing
    /// with `</think>\n\n` the moment `</think>` appears, stripping the
    /// raw tags themselves from the emitted text.
    pub fn process(&mut self, token: String) -> Vec<String> {
        let mut token = token;
        let mut out = Vec::new();

        if token.contains("<think>") {
            self.in_thinking = true;
            out.push("<think>\n".to_string());
            token = token.replace("<think>", "");
        }

        if token.contains("</think>") {
            self.in_thinking = false;
            out.push(token.replace("</think>", ""));
            out.push("</think>\n\n".to_string());
            return out;
        }

        out.push(token);
        out
    }
}

/// Accumulates streamed tokens into the final response text (spec §4.9).
#[derive(Debug, Clone, Default)]
pub struct StreamingResponse {
    tokens: Vec<String>,
    is_complete: bool,
}

impl StreamingResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_token(&mut self, token: String) {
        self.tokens.push(token);
    }

    pub fn complete(&mut self) {
        self.is_complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn total_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn get_text(&self) -> String {
        self.tokens.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_stream_yields_in_send_order() {
        let (tx, rx) = mpsc::channel(4);
        tx.send("a".to_string()).await.unwrap();
        tx.send("b".to_string()).await.unwrap();
        drop(tx);

        let mut stream = TokenStream::new(rx);
        assert_eq!(stream.next().await, Some("a".to_string()));
        assert_eq!(stream.next().await, Some("b".to_string()));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn collect_joins_all_tokens() {
        let (tx, rx) = mpsc::channel(4);
        tx.send("hel".to_string()).await.unwrap();
        tx.send("lo".to_string()).await.unwrap();
        drop(tx);

        let stream = TokenStream::new(rx);
        assert_eq!(stream.collect().await, "hello");
    }

    #[test]
    fn thinking_filter_wraps_reasoning_passage() {
        let mut filter = ThinkingFilter::new();
        let mut out = Vec::new();
        out.extend(filter.process("hello ".to_string()));
        out.extend(filter.process("<think>reasoning".to_string()));
        assert!(filter.in_thinking());
        out.extend(filter.process(" more</think>answer".to_string()));
        assert!(!filter.in_thinking());

        let joined = out.concat();
        assert_eq!(joined, "hello <think>\nreasoning moreanswer</think>\n\n");
    }

    #[test]
    fn streaming_response_tracks_completion() {
        let mut response = StreamingResponse::new();
        assert!(!response.is_complete());
        response.add_token("hi".to_string());
        response.complete();
        assert!(response.is_complete());
        assert_eq!(response.total_tokens(), 1);
        assert_eq!(response.get_text(), "hi");
    }
}
