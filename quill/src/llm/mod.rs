//! LLM client abstraction: one trait covers completion and token streaming.
//!
//! Role loops depend on a callable that turns ordered messages into assistant
//! text plus optional tool calls. Implementations: [`MockLlm`] (tests),
//! [`OpenAiChat`] (OpenAI-compatible API). [`ProviderChain`] stacks several
//! clients into a retrying fallback chain.

mod chain;
mod mock;
mod openai;

pub use chain::{ProviderChain, RETRY_ATTEMPTS_PER_PROVIDER};
pub use mock::MockLlm;
pub use openai::OpenAiChat;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::Message;

/// One tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Arguments as JSON text, exactly as supplied by the model.
    pub arguments: String,
}

/// Token usage for one call.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Complete reply for one call: assistant text, tool calls, usage when known.
#[derive(Clone, Debug, Default)]
pub struct LlmReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// Sampling profile for one call.
#[derive(Clone, Copy, Debug)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1500,
        }
    }
}

/// LLM client: given messages and sampling params, produce a reply.
///
/// # Streaming
///
/// `stream` forwards each upstream chunk through `chunk_tx` as it arrives
/// (no buffering beyond the single in-flight chunk) and still returns the
/// complete [`LlmReply`] at the end. The send is awaited, so a full channel
/// transitively pauses the upstream read (gateway back-pressure). Honor
/// `cancel`: when it fires, abort the upstream request and return promptly.
///
/// The default implementation calls `complete` and emits the content as one
/// chunk, which is correct for non-streaming backends.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message], params: SamplingParams) -> Result<LlmReply>;

    async fn stream(
        &self,
        messages: &[Message],
        params: SamplingParams,
        chunk_tx: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<LlmReply> {
        let reply = tokio::select! {
            r = self.complete(messages, params) => r?,
            _ = cancel.cancelled() => {
                return Err(crate::error::Error::Timeout {
                    what: "llm call cancelled".to_string(),
                    elapsed_ms: 0,
                });
            }
        };
        if !reply.content.is_empty() {
            let _ = chunk_tx.send(reply.content.clone()).await;
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct StubLlm {
        content: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _params: SamplingParams,
        ) -> Result<LlmReply> {
            Ok(LlmReply {
                content: self.content.clone(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn default_stream_sends_single_chunk() {
        let llm = StubLlm {
            content: "hello".to_string(),
        };
        let (tx, mut rx) = mpsc::channel(2);
        let cancel = CancellationToken::new();
        let reply = llm
            .stream(&[], SamplingParams::default(), tx, &cancel)
            .await
            .unwrap();
        assert_eq!(reply.content, "hello");
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn default_stream_skips_empty_content() {
        let llm = StubLlm {
            content: String::new(),
        };
        let (tx, mut rx) = mpsc::channel(2);
        let cancel = CancellationToken::new();
        llm.stream(&[], SamplingParams::default(), tx, &cancel)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn default_stream_observes_pre_fired_cancel() {
        struct Hang;
        #[async_trait]
        impl LlmClient for Hang {
            async fn complete(
                &self,
                _messages: &[Message],
                _params: SamplingParams,
            ) -> Result<LlmReply> {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Hang
            .stream(&[], SamplingParams::default(), tx, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
