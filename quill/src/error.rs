//! Crate-wide error taxonomy.
//!
//! One enum covers every failure class the gateway can surface to a client;
//! [`Error::kind`] is the stable string carried verbatim in error frames and
//! audit records. `Tool` is data, not a system failure: inside a role loop it
//! is fed back to the model as a tool turn and never unwound.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed client frame, bad tool arguments, oversized attachment.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Policy violation: sensitive path, whitelist miss, rate limit, bad signature.
    #[error("not permitted: {0}")]
    NotPermitted(String),

    /// Upstream provider down or index locked; retried per policy before surfacing.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Deadline exceeded. `soft` timeouts are absorbed by the orchestrator.
    #[error("timeout after {elapsed_ms} ms: {what}")]
    Timeout { what: String, elapsed_ms: u64 },

    /// The tool ran but failed intrinsically (compile error, failing tests).
    #[error("tool error: {0}")]
    Tool(String),

    /// Bug or invariant violation; the session receives a generic error frame.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable taxonomy tag for frames, metrics labels, and audit outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NotPermitted(_) => "not_permitted",
            Error::Unavailable(_) => "unavailable",
            Error::Timeout { .. } => "timeout",
            Error::Tool(_) => "tool_error",
            Error::Internal(_) => "internal",
        }
    }

    /// Message safe to show a client: taxonomy kinds keep their text, internal
    /// errors are replaced by a generic notice.
    pub fn sanitized_message(&self) -> String {
        match self {
            Error::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// True for the retry class (`Unavailable`); `InvalidInput` is never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(Error::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(Error::NotPermitted("x".into()).kind(), "not_permitted");
        assert_eq!(Error::Unavailable("x".into()).kind(), "unavailable");
        assert_eq!(
            Error::Timeout {
                what: "llm".into(),
                elapsed_ms: 10
            }
            .kind(),
            "timeout"
        );
        assert_eq!(Error::Tool("x".into()).kind(), "tool_error");
        assert_eq!(Error::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn internal_message_is_sanitized() {
        let e = Error::Internal("stack details leak".into());
        assert_eq!(e.sanitized_message(), "internal error");
        let e = Error::NotPermitted("sensitive path".into());
        assert!(e.sanitized_message().contains("sensitive path"));
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(Error::Unavailable("x".into()).is_retryable());
        assert!(!Error::InvalidInput("x".into()).is_retryable());
        assert!(!Error::Tool("x".into()).is_retryable());
    }
}
