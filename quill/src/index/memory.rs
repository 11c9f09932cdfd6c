//! Long-term conversation memory over the vector index.
//!
//! After each completed assistant turn, the user message and the assistant
//! reply are appended as two records tagged {session, role, turn_index} and
//! the index is persisted. Recall queries k candidates and then re-filters by
//! session id: the index's native filter is a hint, the post-filter is the
//! guarantee against cross-session leakage.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::embed::Embedder;
use crate::error::Result;
use crate::index::{MetadataFilter, VectorIndex, VectorRecord};
use crate::message::Role;

/// One recalled memory.
#[derive(Clone, Debug)]
pub struct RecallHit {
    pub content: String,
    pub role: Role,
    pub turn_index: u64,
    pub score: f32,
}

pub struct MemoryLog {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    recall_k: usize,
    recall_limit: usize,
}

impl MemoryLog {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        recall_k: usize,
        recall_limit: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            recall_k,
            recall_limit,
        }
    }

    /// Appends the user/assistant pair for one completed turn, then persists.
    /// Records are never mutated afterwards.
    pub async fn record_turn(
        &self,
        session: &str,
        turn_index: u64,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<()> {
        let vectors = self.embedder.embed(&[user_text, assistant_text]).await?;
        let mut it = vectors.into_iter();
        let (Some(user_vec), Some(assistant_vec)) = (it.next(), it.next()) else {
            return Err(crate::error::Error::Unavailable(
                "embedder returned too few vectors".to_string(),
            ));
        };
        let records = vec![
            VectorRecord::new(
                format!("mem:{session}:{turn_index}:user"),
                user_vec,
                user_text,
            )
            .with_meta("session", session)
            .with_meta("role", "user")
            .with_meta("turn_index", turn_index),
            VectorRecord::new(
                format!("mem:{session}:{turn_index}:assistant"),
                assistant_vec,
                assistant_text,
            )
            .with_meta("session", session)
            .with_meta("role", "assistant")
            .with_meta("turn_index", turn_index),
        ];
        self.index.upsert(records).await?;
        self.index.persist().await?;
        debug!(session, turn_index, "memory recorded");
        Ok(())
    }

    /// Recalls up to `recall_limit` memories for `session` relevant to `query`.
    ///
    /// Ranks `recall_k` candidates across the whole index, then drops every
    /// record whose session tag differs; mandatory even though the query
    /// could filter natively.
    pub async fn recall(&self, session: &str, query: &str) -> Result<Vec<RecallHit>> {
        let vector = self
            .embedder
            .embed(&[query])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let ranked = self
            .index
            .query(&vector, self.recall_k, &MetadataFilter::new())
            .await?;
        let session_value = JsonValue::String(session.to_string());
        let hits = ranked
            .into_iter()
            .filter(|(r, _)| r.metadata.get("session") == Some(&session_value))
            .take(self.recall_limit)
            .map(|(r, score)| RecallHit {
                content: r.content,
                role: match r.metadata.get("role").and_then(|v| v.as_str()) {
                    Some("assistant") => Role::Assistant,
                    _ => Role::User,
                },
                turn_index: r
                    .metadata
                    .get("turn_index")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                score,
            })
            .collect();
        Ok(hits)
    }
}
