//! Sessions: per-connection state and the prompt context builder.
//!
//! A session carries the cancellation token, turn counters, and the recent
//! window; the gateway connection owns the actual frame channel. Within a
//! session user messages are strictly serial (the admission lock); across
//! sessions everything runs in parallel. Memory rows tagged with the session
//! id outlive the session itself.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::index::{MemoryLog, MetadataFilter, VectorIndex};
use crate::embed::Embedder;
use crate::message::{Message, Role, Turn};
use crate::roles::RoleInput;

pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// False once the client channel closed. The gateway connection owns the
    /// actual frame channel; the session only tracks its liveness.
    channel_open: AtomicBool,
    pub cancel: CancellationToken,
    turn_counter: AtomicU64,
    pub tools_invoked: AtomicU64,
    /// Serializes turns: the next user message is not admitted until the
    /// previous turn ended.
    pub admission: Mutex<()>,
    /// Recent turns, oldest first, capped at twice the context window.
    recent: Mutex<Vec<Turn>>,
    context_cap: usize,
    detached_jobs: AtomicUsize,
}

impl Session {
    /// Allocates the next strictly-increasing turn index.
    pub fn next_turn_index(&self) -> u64 {
        self.turn_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn channel_is_open(&self) -> bool {
        self.channel_open.load(Ordering::SeqCst)
    }

    /// Appends a turn to the in-session window.
    pub async fn push_turn(&self, turn: Turn) {
        let mut recent = self.recent.lock().await;
        recent.push(turn);
        let cap = self.context_cap * 2;
        if recent.len() > cap {
            let excess = recent.len() - cap;
            recent.drain(..excess);
        }
    }

    /// Recent turns as prompt messages, capped to the context window.
    pub async fn recent_messages(&self) -> Vec<Message> {
        let recent = self.recent.lock().await;
        let skip = recent.len().saturating_sub(self.context_cap);
        recent[skip..].iter().map(Message::from).collect()
    }

    /// Marks an autonomous job as holding this session across disconnects.
    pub fn attach_job(&self) {
        self.detached_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn detach_job(&self) {
        self.detached_jobs.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn has_detached_jobs(&self) -> bool {
        self.detached_jobs.load(Ordering::SeqCst) > 0
    }
}

pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    context_cap: usize,
}

impl SessionStore {
    pub fn new(context_cap: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            context_cap,
        }
    }

    /// Creates a session with an unguessable id.
    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            channel_open: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            turn_counter: AtomicU64::new(0),
            tools_invoked: AtomicU64::new(0),
            admission: Mutex::new(()),
            recent: Mutex::new(Vec::new()),
            context_cap: self.context_cap,
            detached_jobs: AtomicUsize::new(0),
        });
        self.sessions.insert(session.id.clone(), session.clone());
        debug!(session = %session.id, "session created");
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Channel closed: fire the token and remove the session unless a
    /// detached job still holds it.
    pub async fn close(&self, id: &str) {
        let Some(session) = self.get(id) else { return };
        session.cancel.cancel();
        session.channel_open.store(false, Ordering::SeqCst);
        if !session.has_detached_jobs() {
            self.sessions.remove(id);
            debug!(session = %id, "session removed");
        } else {
            debug!(session = %id, "session kept for detached job");
        }
    }

    /// Called when a detached job finishes; removes the session if its
    /// channel is already gone.
    pub async fn release_if_closed(&self, id: &str) {
        let Some(session) = self.get(id) else { return };
        if !session.channel_is_open() && !session.has_detached_jobs() {
            self.sessions.remove(id);
        }
    }
}

/// Builds the retrieval-enriched [`RoleInput`] for one turn. Retrieval
/// failures degrade to a short notice in the prompt; the turn proceeds.
pub struct ContextBuilder {
    memory: Arc<MemoryLog>,
    code_index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    codebase_k: usize,
}

impl ContextBuilder {
    pub fn new(
        memory: Arc<MemoryLog>,
        code_index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        codebase_k: usize,
    ) -> Self {
        Self {
            memory,
            code_index,
            embedder,
            codebase_k,
        }
    }

    async fn code_section(&self, query: &str) -> Result<Option<String>> {
        if self.code_index.is_empty().await {
            return Ok(None);
        }
        let vector = self
            .embedder
            .embed(&[query])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let hits = self
            .code_index
            .query(&vector, self.codebase_k, &MetadataFilter::new())
            .await?;
        if hits.is_empty() {
            return Ok(None);
        }
        let mut section = String::new();
        for (record, _) in hits {
            let path = record
                .metadata
                .get("path")
                .and_then(|v| v.as_str())
                .unwrap_or("<unknown>");
            section.push_str(&format!("--- {path}\n{}\n", record.content));
        }
        Ok(Some(section))
    }

    pub async fn build(&self, session: &Session, user_text: &str) -> RoleInput {
        let memory_section = match self.memory.recall(&session.id, user_text).await {
            Ok(hits) if hits.is_empty() => None,
            Ok(hits) => {
                let mut s = String::new();
                for hit in hits {
                    s.push_str(&format!("[turn {} {}] {}\n", hit.turn_index, hit.role.as_str(), hit.content));
                }
                Some(s)
            }
            Err(e) => {
                tracing::warn!(session = %session.id, error = %e, "memory recall failed");
                Some("(memory unavailable)".to_string())
            }
        };
        let code_section = match self.code_section(user_text).await {
            Ok(section) => section,
            Err(e) => {
                tracing::warn!(session = %session.id, error = %e, "codebase retrieval failed");
                Some("(retrieval unavailable)".to_string())
            }
        };
        RoleInput {
            memory_section,
            code_section,
            recent: session.recent_messages().await,
            input: user_text.to_string(),
        }
    }
}

/// Records a completed turn pair: session window first, then the memory index
/// (memory writes are ordered after the turn they record).
pub async fn record_completed_turn(
    session: &Session,
    memory: &MemoryLog,
    user_text: &str,
    assistant_text: &str,
    user_index: u64,
    assistant_index: u64,
) -> Result<()> {
    session
        .push_turn(Turn::new(&session.id, Role::User, user_text, user_index))
        .await;
    session
        .push_turn(Turn::new(
            &session.id,
            Role::Assistant,
            assistant_text,
            assistant_index,
        ))
        .await;
    memory
        .record_turn(&session.id, assistant_index, user_text, assistant_text)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;

    fn store() -> SessionStore {
        SessionStore::new(20)
    }

    #[test]
    fn session_ids_are_unguessable_uuids() {
        let s = store();
        let a = s.create();
        let b = s.create();
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 36);
    }

    #[test]
    fn turn_indexes_increase_strictly() {
        let s = store();
        let session = s.create();
        let a = session.next_turn_index();
        let b = session.next_turn_index();
        let c = session.next_turn_index();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn close_cancels_and_removes() {
        let s = store();
        let session = s.create();
        let id = session.id.clone();
        assert_eq!(s.len(), 1);
        s.close(&id).await;
        assert!(session.cancel.is_cancelled());
        assert!(s.get(&id).is_none());
    }

    #[tokio::test]
    async fn detached_job_keeps_session_past_close() {
        let s = store();
        let session = s.create();
        let id = session.id.clone();
        session.attach_job();
        s.close(&id).await;
        assert!(s.get(&id).is_some(), "session should survive while job runs");

        session.detach_job();
        s.release_if_closed(&id).await;
        assert!(s.get(&id).is_none());
    }

    #[tokio::test]
    async fn recent_messages_respect_context_cap() {
        let s = SessionStore::new(3);
        let session = s.create();
        for i in 0..10 {
            session
                .push_turn(Turn::new(&session.id, Role::User, format!("m{i}"), i))
                .await;
        }
        let recent = session.recent_messages().await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].content, "m9");
    }

    #[tokio::test]
    async fn context_builder_recalls_and_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        let mem_index = Arc::new(VectorIndex::load(
            dir.path().join("memory"),
            "memory",
            64,
            embedder.provenance(),
        ));
        let code_index = Arc::new(VectorIndex::load(
            dir.path().join("codebase"),
            "codebase",
            64,
            embedder.provenance(),
        ));
        let memory = Arc::new(MemoryLog::new(mem_index, embedder.clone(), 20, 10));
        let builder = ContextBuilder::new(memory.clone(), code_index, embedder, 15);

        let s = store();
        let session = s.create();
        memory
            .record_turn(&session.id, 1, "What is Python?", "Python is a language.")
            .await
            .unwrap();

        let input = builder.build(&session, "Give me an example.").await;
        let memory_section = input.memory_section.expect("memory section");
        assert!(memory_section.contains("Python"));
        // Empty codebase index: no section, no failure notice.
        assert!(input.code_section.is_none());
    }

    #[tokio::test]
    async fn record_completed_turn_writes_memory_after_turns() {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        let mem_index = Arc::new(VectorIndex::load(
            dir.path(),
            "memory",
            64,
            embedder.provenance(),
        ));
        let memory = MemoryLog::new(mem_index, embedder, 20, 10);

        let s = store();
        let session = s.create();
        let u = session.next_turn_index();
        let a = session.next_turn_index();
        record_completed_turn(&session, &memory, "question", "answer", u, a)
            .await
            .unwrap();

        assert_eq!(session.recent_messages().await.len(), 2);
        let hits = memory.recall(&session.id, "question").await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
