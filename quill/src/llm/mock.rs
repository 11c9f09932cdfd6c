//! Mock LLM for tests: scripted replies, prompt echo, failure, and an
//! unbounded stream mode for cancellation tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::message::Message;

use super::{LlmClient, LlmReply, SamplingParams, ToolCall};

enum Mode {
    /// Pop scripted replies in order; repeat the last one when exhausted.
    Scripted(Mutex<VecDeque<LlmReply>>),
    /// Reply with the serialized prompt, so tests can assert on what the
    /// server composed.
    EchoPrompt,
    /// Stream chunks forever until cancelled.
    Hang,
    /// Fail every call with `Unavailable`.
    Unavailable,
}

pub struct MockLlm {
    mode: Mode,
}

impl MockLlm {
    /// Fixed single reply with no tool calls.
    pub fn reply(content: impl Into<String>) -> Self {
        Self::scripted(vec![LlmReply {
            content: content.into(),
            ..Default::default()
        }])
    }

    /// Scripted sequence of replies; the last one repeats once exhausted.
    pub fn scripted(replies: Vec<LlmReply>) -> Self {
        Self {
            mode: Mode::Scripted(Mutex::new(replies.into_iter().collect())),
        }
    }

    /// One reply carrying a tool call, then a plain closing reply.
    pub fn tool_call_then(name: &str, arguments: &str, closing: &str) -> Self {
        Self::scripted(vec![
            LlmReply {
                content: format!("Calling {name}."),
                tool_calls: vec![ToolCall {
                    id: Some("call-1".to_string()),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                }],
                ..Default::default()
            },
            LlmReply {
                content: closing.to_string(),
                ..Default::default()
            },
        ])
    }

    /// Echoes the serialized prompt back as the assistant reply.
    pub fn echo_prompt() -> Self {
        Self {
            mode: Mode::EchoPrompt,
        }
    }

    /// Streams forever; `complete` never returns until cancellation.
    pub fn hang() -> Self {
        Self { mode: Mode::Hang }
    }

    /// Fails every call with `Unavailable`.
    pub fn unavailable() -> Self {
        Self {
            mode: Mode::Unavailable,
        }
    }

    fn next_scripted(queue: &Mutex<VecDeque<LlmReply>>) -> LlmReply {
        let mut q = match queue.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        if q.len() > 1 {
            q.pop_front().unwrap_or_default()
        } else {
            q.front().cloned().unwrap_or_default()
        }
    }

    fn echo(messages: &[Message]) -> String {
        let mut out = String::new();
        for m in messages {
            out.push_str(m.role.as_str());
            out.push_str(": ");
            out.push_str(&m.content);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, messages: &[Message], _params: SamplingParams) -> Result<LlmReply> {
        match &self.mode {
            Mode::Scripted(queue) => Ok(Self::next_scripted(queue)),
            Mode::EchoPrompt => Ok(LlmReply {
                content: Self::echo(messages),
                ..Default::default()
            }),
            Mode::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            Mode::Unavailable => Err(Error::Unavailable("mock provider down".to_string())),
        }
    }

    async fn stream(
        &self,
        messages: &[Message],
        params: SamplingParams,
        chunk_tx: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<LlmReply> {
        match &self.mode {
            Mode::Hang => loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(Error::Timeout {
                            what: "llm stream cancelled".to_string(),
                            elapsed_ms: 0,
                        });
                    }
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {
                        let _ = chunk_tx.send("tick ".to_string()).await;
                    }
                }
            },
            _ => {
                let reply = self.complete(messages, params).await?;
                if !reply.content.is_empty() {
                    let _ = chunk_tx.send(reply.content.clone()).await;
                }
                Ok(reply)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies_pop_in_order_and_last_repeats() {
        let llm = MockLlm::scripted(vec![
            LlmReply {
                content: "one".into(),
                ..Default::default()
            },
            LlmReply {
                content: "two".into(),
                ..Default::default()
            },
        ]);
        let p = SamplingParams::default();
        assert_eq!(llm.complete(&[], p).await.unwrap().content, "one");
        assert_eq!(llm.complete(&[], p).await.unwrap().content, "two");
        assert_eq!(llm.complete(&[], p).await.unwrap().content, "two");
    }

    #[tokio::test]
    async fn echo_mode_serializes_the_prompt() {
        let llm = MockLlm::echo_prompt();
        let messages = vec![Message::system("be brief"), Message::user("What is Python?")];
        let reply = llm.complete(&messages, SamplingParams::default()).await.unwrap();
        assert!(reply.content.contains("system: be brief"));
        assert!(reply.content.contains("user: What is Python?"));
    }

    #[tokio::test]
    async fn tool_call_then_produces_call_then_closing() {
        let llm = MockLlm::tool_call_then("git_status", "{}", "All clean.");
        let p = SamplingParams::default();
        let first = llm.complete(&[], p).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].name, "git_status");
        let second = llm.complete(&[], p).await.unwrap();
        assert!(second.tool_calls.is_empty());
        assert_eq!(second.content, "All clean.");
    }

    #[tokio::test]
    async fn hang_stream_stops_on_cancel() {
        let llm = MockLlm::hang();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            llm.stream(&[], SamplingParams::default(), tx, &cancel_clone)
                .await
        });
        // Let a few chunks flow, then cancel.
        let first = rx.recv().await;
        assert!(first.is_some());
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(result.is_err());
    }
}
