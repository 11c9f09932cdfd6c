//! Conversation turns and prompt messages.
//!
//! [`Turn`] is the persisted unit (session id, role, strictly increasing
//! index); [`Message`] is the transient prompt shape handed to the LLM client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker role of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Record of one tool invocation attached to a tool turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub name: String,
    /// Arguments as the model supplied them (JSON text).
    pub arguments: String,
    /// Short digest of the result, for the audit trail and memory metadata.
    pub result_digest: String,
}

/// One conversation turn within a session.
///
/// Invariant: `index` is strictly increasing per session; the session store
/// allocates indexes, callers never pick their own.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub index: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_record: Option<ToolRecord>,
}

impl Turn {
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>, index: u64) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            content: content.into(),
            index,
            created_at: Utc::now(),
            tool_record: None,
        }
    }
}

/// Prompt message for one LLM call. Built fresh per call from the system
/// instruction, retrieved context, and recent turns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

impl From<&Turn> for Message {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_serializes_without_empty_tool_record() {
        let t = Turn::new("s-1", Role::User, "hi", 0);
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("tool_record"));
        assert!(json.contains("\"role\":\"user\""));
    }

    #[test]
    fn message_from_turn_keeps_role_and_content() {
        let t = Turn::new("s-1", Role::Assistant, "done", 4);
        let m = Message::from(&t);
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.content, "done");
    }
}
