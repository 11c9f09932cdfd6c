//! OpenAI-compatible Chat Completions client.
//!
//! Non-streaming calls go through `create`; streaming through `create_stream`
//! with each content delta forwarded as it arrives. Tool call fragments are
//! accumulated by index. A 15 s idle gap between chunks aborts the stream.

use std::collections::HashMap;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, ChatCompletionTool,
        ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{Message, Role};
use crate::tools::ToolSpec;

use super::{LlmClient, LlmReply, LlmUsage, SamplingParams, ToolCall};

/// How long the stream may go without a chunk before the call is abandoned.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
    tools: Option<Vec<ToolSpec>>,
}

impl OpenAiChat {
    /// API key from `OPENAI_API_KEY`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            tools: None,
        }
    }

    /// Custom key or base URL (any OpenAI-compatible endpoint).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            tools: None,
        }
    }

    /// Advertise tools so the model can return native tool_calls. Role loops
    /// still enforce their own whitelist on execution.
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_request_messages(messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(m.content.as_str()),
                ),
                // Tool results are folded in as user-visible context; the role
                // loop already labels them.
                Role::User | Role::Tool => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(m.content.as_str()),
                ),
                Role::Assistant => {
                    ChatCompletionRequestMessage::Assistant(m.content.as_str().into())
                }
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        params: SamplingParams,
        stream: bool,
    ) -> Result<async_openai::types::chat::CreateChatCompletionRequest> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(Self::to_request_messages(messages));
        args.temperature(params.temperature);
        args.max_completion_tokens(params.max_tokens);
        if stream {
            args.stream(true);
        }
        if let Some(ref tools) = self.tools {
            let chat_tools: Vec<ChatCompletionTools> = tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: Some(t.input_schema.clone()),
                            ..Default::default()
                        },
                    })
                })
                .collect();
            args.tools(chat_tools);
        }
        args.build()
            .map_err(|e| Error::InvalidInput(format!("request build failed: {e}")))
    }

    /// Maps provider errors into the taxonomy: rate limits and transport
    /// failures are retryable, request rejections are not.
    fn map_api_error(e: async_openai::error::OpenAIError) -> Error {
        let text = e.to_string();
        let lowered = text.to_lowercase();
        if lowered.contains("429") || lowered.contains("rate limit") {
            return Error::Unavailable(format!("rate limited: {text}"));
        }
        if lowered.contains("400") || lowered.contains("invalid") {
            return Error::InvalidInput(text);
        }
        Error::Unavailable(text)
    }
}

#[async_trait]
impl LlmClient for OpenAiChat {
    async fn complete(&self, messages: &[Message], params: SamplingParams) -> Result<LlmReply> {
        let request = self.build_request(messages, params, false)?;
        debug!(model = %self.model, message_count = messages.len(), "chat create");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(Self::map_api_error)?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Unavailable("provider returned no choices".to_string()))?;
        let msg = choice.message;
        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| match tc {
                ChatCompletionMessageToolCalls::Function(f) => Some(ToolCall {
                    id: Some(f.id),
                    name: f.function.name,
                    arguments: f.function.arguments,
                }),
                _ => None,
            })
            .collect();
        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        Ok(LlmReply {
            content: msg.content.unwrap_or_default(),
            tool_calls,
            usage,
        })
    }

    async fn stream(
        &self,
        messages: &[Message],
        params: SamplingParams,
        chunk_tx: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<LlmReply> {
        let request = self.build_request(messages, params, true)?;
        debug!(model = %self.model, message_count = messages.len(), "chat create_stream");
        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(Self::map_api_error)?;

        let mut content = String::new();
        // index -> (id, name, arguments), assembled from deltas
        let mut calls: HashMap<u32, (String, String, String)> = HashMap::new();
        let mut usage: Option<LlmUsage> = None;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    // Dropping the stream aborts the upstream request.
                    return Err(Error::Timeout {
                        what: "llm stream cancelled".to_string(),
                        elapsed_ms: 0,
                    });
                }
                r = tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()) => match r {
                    Ok(item) => item,
                    Err(_) => {
                        return Err(Error::Timeout {
                            what: "llm stream idle".to_string(),
                            elapsed_ms: STREAM_IDLE_TIMEOUT.as_millis() as u64,
                        });
                    }
                },
            };
            let Some(result) = next else { break };
            let chunk = result.map_err(Self::map_api_error)?;

            if let Some(ref u) = chunk.usage {
                usage = Some(LlmUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                });
            }
            for choice in chunk.choices {
                let delta = &choice.delta;
                if let Some(ref piece) = delta.content {
                    if !piece.is_empty() {
                        content.push_str(piece);
                        // Awaited send: a full channel pauses this read loop,
                        // which back-pressures the provider.
                        if chunk_tx.send(piece.clone()).await.is_err() {
                            return Err(Error::Timeout {
                                what: "stream receiver dropped".to_string(),
                                elapsed_ms: 0,
                            });
                        }
                    }
                }
                if let Some(ref tool_calls) = delta.tool_calls {
                    for tc in tool_calls {
                        let entry = calls.entry(tc.index).or_default();
                        if let Some(ref id) = tc.id {
                            if !id.is_empty() {
                                entry.0 = id.clone();
                            }
                        }
                        if let Some(ref func) = tc.function {
                            if let Some(ref name) = func.name {
                                entry.1.push_str(name);
                            }
                            if let Some(ref arguments) = func.arguments {
                                entry.2.push_str(arguments);
                            }
                        }
                    }
                }
            }
        }

        let mut indexes: Vec<u32> = calls.keys().copied().collect();
        indexes.sort_unstable();
        let tool_calls = indexes
            .into_iter()
            .filter_map(|i| calls.remove(&i))
            .map(|(id, name, arguments)| ToolCall {
                id: (!id.is_empty()).then_some(id),
                name,
                arguments,
            })
            .collect();

        Ok(LlmReply {
            content,
            tool_calls,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_and_without_tools() {
        let _ = OpenAiChat::new("gpt-4o-mini");
        let _ = OpenAiChat::new("gpt-4o-mini").with_tools(vec![ToolSpec {
            name: "read_file".into(),
            description: Some("Read a file".into()),
            input_schema: serde_json::json!({"type": "object"}),
        }]);
    }

    #[tokio::test]
    async fn complete_against_unreachable_base_is_unavailable() {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("http://127.0.0.1:1");
        let client = OpenAiChat::with_config(config, "gpt-4o-mini");
        let err = client
            .complete(&[Message::user("hi")], SamplingParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_) | Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn stream_observes_pre_fired_cancel() {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("http://127.0.0.1:1");
        let client = OpenAiChat::with_config(config, "gpt-4o-mini");
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client
            .stream(&[Message::user("hi")], SamplingParams::default(), tx, &cancel)
            .await;
        assert!(result.is_err());
    }
}
