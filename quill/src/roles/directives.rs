//! Tool-call directives embedded in prose.
//!
//! Providers without native tool calling emit a fenced block the loop can
//! tell apart from code fences meant for the user:
//!
//! ````text
//! ```tool
//! {"tool": "read_file", "args": {"path": "src/app.py"}}
//! ```
//! ````
//!
//! One JSON object per block; multiple blocks are allowed.

use serde::Deserialize;

use crate::llm::ToolCall;

#[derive(Deserialize)]
struct Directive {
    tool: String,
    #[serde(default)]
    args: serde_json::Value,
}

/// Extracts tool-call directives from an assistant reply. Malformed blocks
/// are skipped; prose and ordinary code fences are untouched.
pub fn parse_directives(content: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut rest = content;
    while let Some(open) = rest.find("```tool") {
        let after = &rest[open + "```tool".len()..];
        let Some(close) = after.find("```") else { break };
        let body = after[..close].trim();
        if let Ok(directive) = serde_json::from_str::<Directive>(body) {
            let args = if directive.args.is_null() {
                serde_json::json!({})
            } else {
                directive.args
            };
            calls.push(ToolCall {
                id: None,
                name: directive.tool,
                arguments: args.to_string(),
            });
        }
        rest = &after[close + 3..];
    }
    calls
}
