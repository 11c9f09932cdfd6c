//! Server-to-client frames.

use serde::{Deserialize, Serialize};

/// Error frame payload: taxonomy kind (verbatim) plus a sanitized message.
/// No `end` frame follows an error; the session stays open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub kind: String,
    pub message: String,
}

/// One frame from server to client.
///
/// `Session` is sent once when the channel opens; each reply is bracketed by
/// `Start` and `End` with zero or more `Chunk` frames in between, emitted in
/// strict order. `turn_index` on `End` is the assistant turn just closed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Session {
        session_id: String,
    },
    Start {
        session_id: String,
    },
    Chunk {
        content: String,
    },
    End {
        session_id: String,
        turn_index: u64,
    },
    Error(ErrorFrame),
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}
