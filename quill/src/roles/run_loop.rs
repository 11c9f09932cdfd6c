//! The shared role execution loop.
//!
//! Every role runs the same loop: compose the prompt, call the model, execute
//! any tool calls, feed results back, repeat until the reply carries no more
//! calls or the per-role iteration cap is reached. Tool failures are data:
//! they come back as tool turns, never as loop errors.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::{LlmClient, LlmReply, ToolCall};
use crate::message::{Message, ToolRecord};
use crate::tools::{ToolCallContext, ToolRegistry};

use super::{parse_directives, RoleProfile};

/// Process-wide services a role loop needs. Cheap to clone; built once by the
/// root constructor.
#[derive(Clone)]
pub struct RoleServices {
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolRegistry>,
    /// Iteration cap: tool calls executed per role invocation.
    pub tool_call_cap: usize,
}

/// Per-invocation input. Retrieval sections arrive pre-rendered (possibly as
/// degradation notices) so the loop itself never touches the indexes.
#[derive(Clone, Debug, Default)]
pub struct RoleInput {
    /// Rendered memory section, e.g. recalled turns or "(memory unavailable)".
    pub memory_section: Option<String>,
    /// Rendered codebase section or "(retrieval unavailable)".
    pub code_section: Option<String>,
    /// Recent conversation turns, oldest first.
    pub recent: Vec<Message>,
    /// The incoming user message or the upstream role's final message.
    pub input: String,
}

/// Result of one role invocation.
#[derive(Clone, Debug)]
pub struct RoleOutcome {
    pub content: String,
    pub tool_records: Vec<ToolRecord>,
    pub iterations: usize,
}

fn digest(text: &str) -> String {
    const CAP: usize = 200;
    if text.chars().count() <= CAP {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(CAP).collect();
        format!("{prefix}…")
    }
}

fn compose_messages(profile: &RoleProfile, input: &RoleInput) -> Vec<Message> {
    let mut system = profile.system_prompt.clone();
    if let Some(memory) = &input.memory_section {
        system.push_str("\n\n## Relevant memory\n");
        system.push_str(memory);
    }
    if let Some(code) = &input.code_section {
        system.push_str("\n\n## Relevant code\n");
        system.push_str(code);
    }
    let mut messages = vec![Message::system(system)];
    messages.extend(input.recent.iter().cloned());
    messages.push(Message::user(input.input.clone()));
    messages
}

/// Extracts tool calls from a reply: native calls first, fenced directives
/// as the fallback.
fn extract_calls(reply: &LlmReply) -> Vec<ToolCall> {
    if !reply.tool_calls.is_empty() {
        reply.tool_calls.clone()
    } else {
        parse_directives(&reply.content)
    }
}

/// Runs one role to completion.
///
/// When `chunk_tx` is `Some`, model output streams through it; tool-call
/// rounds stream too, so the client sees intermediate commentary. Cancellation
/// aborts the in-flight model call and any running tool via `tool_ctx.cancel`.
pub async fn run_role(
    services: &RoleServices,
    profile: &RoleProfile,
    input: RoleInput,
    chunk_tx: Option<mpsc::Sender<String>>,
    tool_ctx: &ToolCallContext,
    cancel: &CancellationToken,
) -> Result<RoleOutcome> {
    let mut messages = compose_messages(profile, &input);
    let mut tool_records = Vec::new();
    let mut iterations = 0usize;
    // The role's tool subset rides on the context so the registry enforces
    // and audits it.
    let tool_ctx = tool_ctx.clone().with_allowed_tools(profile.tools.clone());

    loop {
        let reply = match &chunk_tx {
            Some(tx) => {
                services
                    .llm
                    .stream(&messages, profile.sampling, tx.clone(), cancel)
                    .await?
            }
            None => {
                tokio::select! {
                    r = services.llm.complete(&messages, profile.sampling) => r?,
                    _ = cancel.cancelled() => {
                        return Err(Error::Timeout {
                            what: format!("role {} cancelled", profile.kind.as_str()),
                            elapsed_ms: 0,
                        });
                    }
                }
            }
        };

        let calls = extract_calls(&reply);
        if calls.is_empty() {
            return Ok(RoleOutcome {
                content: reply.content,
                tool_records,
                iterations,
            });
        }

        messages.push(Message::assistant(reply.content.clone()));

        for call in calls {
            if iterations >= services.tool_call_cap {
                debug!(
                    role = profile.kind.as_str(),
                    cap = services.tool_call_cap,
                    "iteration cap reached"
                );
                return Ok(RoleOutcome {
                    content: reply.content,
                    tool_records,
                    iterations,
                });
            }
            iterations += 1;

            let args: serde_json::Value =
                serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);
            let result = match args {
                serde_json::Value::Object(_) => {
                    services.tools.invoke(&call.name, args, &tool_ctx).await
                }
                _ => Err(Error::InvalidInput(format!(
                    "tool `{}`: arguments are not a JSON object",
                    call.name
                ))),
            };

            // Every outcome, error included, goes back to the model as a tool
            // turn; only cancellation unwinds.
            let (text, record_digest) = match result {
                Ok(out) => {
                    let d = digest(&out.text);
                    (out.text, d)
                }
                Err(Error::Timeout { what, elapsed_ms }) if cancel.is_cancelled() => {
                    return Err(Error::Timeout { what, elapsed_ms });
                }
                Err(e) => {
                    warn!(role = profile.kind.as_str(), tool = %call.name, error = %e, "tool turn failed");
                    let text = format!("[{}] {}", e.kind(), e.sanitized_message());
                    let d = digest(&text);
                    (text, d)
                }
            };
            tool_records.push(ToolRecord {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result_digest: record_digest,
            });
            messages.push(Message::tool(format!("[{}]\n{}", call.name, text)));
        }
    }
}
