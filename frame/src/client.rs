//! Client-to-server frames.

use serde::{Deserialize, Serialize};

/// Uploaded file descriptor attached to a message. Content is UTF-8 text;
/// the gateway enforces the upload byte cap before building one of these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

/// A user message: content plus optional session affinity and attachments.
/// A missing `session_id` asks the gateway to create a new session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

/// One frame from client to server. Untagged: a plain message object (the
/// common case) or a tagged ping.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    Ping {
        #[serde(rename = "type")]
        kind: PingKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Message(ClientMessage),
}

/// Marker so the untagged ping variant only matches `{"type":"ping"}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PingKind {
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_parses() {
        let json = r#"{"content":"hello"}"#;
        let parsed: ClientFrame = serde_json::from_str(json).unwrap();
        match parsed {
            ClientFrame::Message(m) => {
                assert_eq!(m.content, "hello");
                assert!(m.session_id.is_none());
                assert!(m.attachments.is_none());
            }
            _ => panic!("expected message"),
        }
    }

    #[test]
    fn message_with_session_and_attachment_parses() {
        let json = r#"{"content":"look at this","session_id":"s-9","attachments":[{"name":"a.py","content":"print(1)"}]}"#;
        let parsed: ClientFrame = serde_json::from_str(json).unwrap();
        match parsed {
            ClientFrame::Message(m) => {
                assert_eq!(m.session_id.as_deref(), Some("s-9"));
                let atts = m.attachments.unwrap();
                assert_eq!(atts.len(), 1);
                assert_eq!(atts[0].name, "a.py");
            }
            _ => panic!("expected message"),
        }
    }

    #[test]
    fn ping_parses_as_ping_not_message() {
        let json = r#"{"type":"ping","id":"p-1"}"#;
        let parsed: ClientFrame = serde_json::from_str(json).unwrap();
        match parsed {
            ClientFrame::Ping { id, .. } => assert_eq!(id.as_deref(), Some("p-1")),
            _ => panic!("expected ping"),
        }
    }

    #[test]
    fn message_roundtrip_omits_empty_options() {
        let m = ClientFrame::Message(ClientMessage {
            content: "hi".to_string(),
            session_id: None,
            attachments: None,
        });
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"content":"hi"}"#);
    }
}
