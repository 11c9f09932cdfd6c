//! Root constructor: builds every process-wide service once and wires them
//! together. Nothing looks services up ambiently; the gateway and the
//! webhook pipeline receive this struct and pass small per-call contexts
//! down.

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::audit::AuditLog;
use crate::embed::{Embedder, HashEmbedder, OpenAiEmbedder};
use crate::error::{Error, Result};
use crate::index::{CodebaseIndexer, MemoryLog, VectorIndex};
use crate::llm::{LlmClient, LlmReply, OpenAiChat, ProviderChain, SamplingParams};
use crate::message::Message;
use crate::orchestrator::PipelineConfig;
use crate::roles::RoleServices;
use crate::session::{ContextBuilder, SessionStore};
use crate::settings::{EmbeddingProvider, Settings};
use crate::tools::{
    GitBranchesTool, GitCommitTool, GitCreateBranchTool, GitDiffTool, GitLogTool, GitStatusTool,
    HttpRequestTool, ListFilesTool, ReadFileTool, RunPythonTool, RunShellTool, SensitivePaths,
    ToolRegistry, WriteFileTool,
};

/// Caps concurrent LLM calls process-wide. Wraps the chain so every caller
/// (sessions, pipeline roles, webhook jobs) shares the same permits.
struct GatedLlm {
    inner: Arc<dyn LlmClient>,
    permits: Arc<Semaphore>,
}

#[async_trait]
impl LlmClient for GatedLlm {
    async fn complete(&self, messages: &[Message], params: SamplingParams) -> Result<LlmReply> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Internal("llm semaphore closed".to_string()))?;
        self.inner.complete(messages, params).await
    }

    async fn stream(
        &self,
        messages: &[Message],
        params: SamplingParams,
        chunk_tx: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<LlmReply> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Internal("llm semaphore closed".to_string()))?;
        self.inner.stream(messages, params, chunk_tx, cancel).await
    }
}

/// All process-wide services, built once at startup.
pub struct Backend {
    pub settings: Settings,
    pub audit: Arc<AuditLog>,
    pub llm: Arc<dyn LlmClient>,
    /// The raw chain, for health reporting.
    pub chain: Arc<ProviderChain>,
    pub embedder: Arc<dyn Embedder>,
    pub memory_index: Arc<VectorIndex>,
    pub codebase_index: Arc<VectorIndex>,
    pub memory: Arc<MemoryLog>,
    pub indexer: Arc<CodebaseIndexer>,
    pub tools: Arc<ToolRegistry>,
    pub sensitive: Arc<SensitivePaths>,
    pub sessions: SessionStore,
    pub context: ContextBuilder,
    pub roles: RoleServices,
    pub pipeline_config: PipelineConfig,
}

fn build_embedder(settings: &Settings) -> Arc<dyn Embedder> {
    match &settings.embedding {
        EmbeddingProvider::Local { dimension } => Arc::new(HashEmbedder::new(*dimension)),
        EmbeddingProvider::Remote { model } => Arc::new(OpenAiEmbedder::new(model.clone())),
    }
}

fn build_chain(settings: &Settings) -> ProviderChain {
    let mut chain = ProviderChain::new();
    for entry in &settings.providers {
        let mut config = OpenAIConfig::new();
        if let Ok(key) = std::env::var(&entry.credential_env) {
            config = config.with_api_key(key);
        }
        if let Some(base) = &entry.base_url {
            config = config.with_api_base(base.clone());
        }
        chain = chain.push(
            entry.model.clone(),
            Arc::new(OpenAiChat::with_config(config, entry.model.clone())),
        );
    }
    chain
}

fn build_registry(settings: &Settings, audit: Arc<AuditLog>) -> ToolRegistry {
    let mut registry = ToolRegistry::new(audit, settings.tool_inflight_cap);
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(ListFilesTool));
    registry.register(Arc::new(RunPythonTool::new()));
    registry.register(Arc::new(RunShellTool::new(settings.shell_whitelist.clone())));
    registry.register(Arc::new(GitCommitTool));
    registry.register(Arc::new(GitCreateBranchTool));
    registry.register(Arc::new(GitStatusTool));
    registry.register(Arc::new(GitDiffTool));
    registry.register(Arc::new(GitLogTool));
    registry.register(Arc::new(GitBranchesTool));
    registry.register(Arc::new(HttpRequestTool::new(
        settings.http_deny_hosts.clone(),
        settings.http_byte_cap,
    )));
    registry
}

impl Backend {
    /// Builds the default backend: provider chain from settings, all tools
    /// registered, indexes loaded from the data root if present.
    pub fn build(settings: Settings) -> Result<Arc<Self>> {
        let chain = Arc::new(build_chain(&settings));
        let embedder = build_embedder(&settings);
        Self::assemble(settings, chain, embedder)
    }

    /// Builds with an injected LLM and embedder: the test path, also used by
    /// operator tooling that wants a scripted model.
    pub fn build_with(
        settings: Settings,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<Self>> {
        let chain = Arc::new(ProviderChain::new().push("injected", llm));
        Self::assemble(settings, chain, embedder)
    }

    fn assemble(
        settings: Settings,
        chain: Arc<ProviderChain>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<Self>> {
        let audit = AuditLog::init(&settings.data_root)?;
        let llm_permits = Arc::new(Semaphore::new(settings.llm_inflight_cap.max(1)));
        let llm: Arc<dyn LlmClient> = Arc::new(GatedLlm {
            inner: chain.clone(),
            permits: llm_permits,
        });

        let memory_index = Arc::new(VectorIndex::load(
            settings.data_root.join("memory"),
            "memory",
            embedder.dimension(),
            embedder.provenance(),
        ));
        let codebase_index = Arc::new(VectorIndex::load(
            settings.data_root.join("codebase"),
            "codebase",
            embedder.dimension(),
            embedder.provenance(),
        ));
        let memory = Arc::new(MemoryLog::new(
            memory_index.clone(),
            embedder.clone(),
            settings.memory_recall_k,
            settings.memory_recall_limit,
        ));
        let indexer = Arc::new(CodebaseIndexer::new(
            codebase_index.clone(),
            embedder.clone(),
            settings.workspace_root.clone(),
            settings.chunk_size,
            settings.chunk_overlap,
            settings.index_file_cap,
            settings.embed_inflight_cap,
        ));
        let sensitive = Arc::new(SensitivePaths::new(settings.sensitive_paths.clone()));
        let tools = Arc::new(build_registry(&settings, audit.clone()));
        let sessions = SessionStore::new(settings.context_turns);
        let context = ContextBuilder::new(
            memory.clone(),
            codebase_index.clone(),
            embedder.clone(),
            settings.codebase_recall_k,
        );
        let roles = RoleServices {
            llm: llm.clone(),
            tools: tools.clone(),
            tool_call_cap: settings.role_tool_call_cap,
        };
        let pipeline_config = PipelineConfig {
            single_deadline: settings.llm_deadline,
            role_soft_deadline: settings.role_soft_deadline,
            role_hard_deadline: settings.role_hard_deadline,
        };

        info!(
            data_root = %settings.data_root.display(),
            workspace = %settings.workspace_root.display(),
            providers = settings.providers.len(),
            "backend assembled"
        );
        Ok(Arc::new(Self {
            settings,
            audit,
            llm,
            chain,
            embedder,
            memory_index,
            codebase_index,
            memory,
            indexer,
            tools,
            sensitive,
            sessions,
            context,
            roles,
            pipeline_config,
        }))
    }

    /// Flushes durable state: both indexes and the audit log.
    pub async fn shutdown(&self) -> Result<()> {
        self.memory_index.persist().await?;
        self.codebase_index.persist().await?;
        self.audit.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn test_settings(data: &std::path::Path, workspace: &std::path::Path) -> Settings {
        Settings {
            data_root: data.to_path_buf(),
            workspace_root: workspace.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn backend_builds_with_injected_llm() {
        let data = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let backend = Backend::build_with(
            test_settings(data.path(), ws.path()),
            Arc::new(MockLlm::reply("ok")),
            Arc::new(HashEmbedder::new(64)),
        )
        .unwrap();
        assert!(backend.tools.contains("read_file"));
        assert!(backend.tools.contains("git_commit"));
        assert!(backend.tools.contains("run_python"));
        assert!(backend.tools.contains("http_request"));
        assert!(backend.sessions.is_empty());
        backend.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn llm_inflight_cap_is_enforced() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting {
            current: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl LlmClient for Counting {
            async fn complete(
                &self,
                _messages: &[Message],
                _params: SamplingParams,
            ) -> Result<LlmReply> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(LlmReply::default())
            }
        }

        let data = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let counting = Arc::new(Counting {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let settings = Settings {
            llm_inflight_cap: 2,
            ..test_settings(data.path(), ws.path())
        };
        let backend =
            Backend::build_with(settings, counting.clone(), Arc::new(HashEmbedder::new(64)))
                .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let llm = backend.llm.clone();
            handles.push(tokio::spawn(async move {
                llm.complete(&[], SamplingParams::default()).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(
            counting.peak.load(Ordering::SeqCst) <= 2,
            "in-flight calls exceeded the cap"
        );
    }
}
