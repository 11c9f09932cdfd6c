//! # Quill
//!
//! Core library of the quill coding-assistant backend: role-bound agents over
//! a shared execution loop, a bounded orchestrator, vector-backed memory and
//! codebase retrieval, and a whitelisted tool sandbox.
//!
//! ## Main modules
//!
//! - [`llm`]: [`LlmClient`] trait, [`OpenAiChat`], [`ProviderChain`] (retry +
//!   fallback), [`MockLlm`] for tests.
//! - [`embed`]: [`Embedder`] trait, local [`HashEmbedder`] (default) and
//!   remote [`OpenAiEmbedder`].
//! - [`index`]: [`VectorIndex`] with self-describing persistence,
//!   [`CodebaseIndexer`], [`MemoryLog`] with mandatory session post-filtering.
//! - [`tools`]: [`Tool`] trait, [`ToolRegistry`] (validation, caps, audit),
//!   file/shell/git/python/http tools, path policy.
//! - [`roles`]: [`RoleKind`], [`RoleProfile`], the shared loop [`run_role`].
//! - [`orchestrator`]: single-role, planner → coder → reviewer pipeline, and
//!   the test-and-fix loop.
//! - [`session`]: [`SessionStore`], [`ContextBuilder`], turn recording.
//! - [`audit`]: append-only audit log.
//! - [`backend`]: [`Backend`], the single root constructor wiring it all.
//!
//! The gateway crate (`serve`) and the GitHub ingress crate (`gh`) sit on top
//! of this library; neither reaches around the [`Backend`].

pub mod audit;
pub mod backend;
pub mod embed;
pub mod error;
pub mod index;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod roles;
pub mod session;
pub mod settings;
pub mod tools;

pub use audit::{AuditLog, AuditRecord};
pub use backend::Backend;
pub use embed::{Embedder, HashEmbedder, OpenAiEmbedder};
pub use error::{Error, Result};
pub use index::{
    chunk_text, CodebaseIndexer, IndexReport, MemoryLog, MetadataFilter, RecallHit, VectorIndex,
    VectorRecord,
};
pub use llm::{LlmClient, LlmReply, LlmUsage, MockLlm, OpenAiChat, ProviderChain, SamplingParams, ToolCall};
pub use message::{Message, Role, ToolRecord, Turn};
pub use orchestrator::{
    run_pipeline, run_single_role, run_test_fix, FixLoopConfig, FixOutcome, FixReport,
    PipelineConfig, RoleTiming, TaskReport,
};
pub use roles::{parse_directives, run_role, RoleInput, RoleKind, RoleOutcome, RoleProfile, RoleServices};
pub use session::{record_completed_turn, ContextBuilder, Session, SessionStore};
pub use settings::{EmbeddingProvider, ProviderEntry, Settings};
pub use tools::{
    resolve_under, Capability, SensitivePaths, Tool, ToolCallContext, ToolOutput, ToolRegistry,
    ToolSpec,
};

/// When running `cargo test -p quill`, initializes tracing from `RUST_LOG` so
/// unit tests in `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
