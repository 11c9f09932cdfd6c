//! Recognized configuration options with their defaults.
//!
//! The `config` crate applies `.env`/XDG values to the process environment at
//! startup; [`Settings::from_env`] then reads `QUILL_*` variables on top of
//! the defaults. Components receive the parts they need from the root
//! constructor; nothing reads the environment after startup.

use std::path::PathBuf;
use std::time::Duration;

/// One LLM provider entry in the fallback chain.
#[derive(Clone, Debug)]
pub struct ProviderEntry {
    /// Model name, e.g. `gpt-4o-mini`.
    pub model: String,
    /// Environment variable holding the credential (never the credential itself).
    pub credential_env: String,
    /// Optional OpenAI-compatible base URL override.
    pub base_url: Option<String>,
}

/// Embedding source: local feature-hash model or a remote endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Deterministic local embedder (no network); the default.
    Local { dimension: usize },
    /// Remote embedding endpoint (OpenAI-compatible model name).
    Remote { model: String },
}

#[derive(Clone, Debug)]
pub struct Settings {
    /// Ordered provider chain: primary first, fallbacks after.
    pub providers: Vec<ProviderEntry>,
    pub embedding: EmbeddingProvider,

    /// Root the file tools and the indexer operate under.
    pub workspace_root: PathBuf,
    /// Root for persistent state (indexes, audit log, jobs, scratch work).
    pub data_root: PathBuf,

    /// Recent turns included in each prompt.
    pub context_turns: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Files larger than this are not indexed.
    pub index_file_cap: u64,
    pub memory_recall_k: usize,
    /// Post-filter cap applied after the session filter.
    pub memory_recall_limit: usize,
    pub codebase_recall_k: usize,

    pub llm_deadline: Duration,
    pub stream_idle_timeout: Duration,
    pub tool_deadline: Duration,
    pub role_soft_deadline: Duration,
    pub role_hard_deadline: Duration,
    pub job_deadline: Duration,

    pub fix_loop_cap: usize,
    pub role_tool_call_cap: usize,

    pub llm_inflight_cap: usize,
    pub tool_inflight_cap: usize,
    pub embed_inflight_cap: usize,

    /// Requests per principal per hour.
    pub rate_limit_per_hour: u32,
    pub attachment_byte_cap: usize,
    /// Code points of each attachment spliced into the prompt.
    pub attachment_prompt_slice: usize,
    /// Bounded per-session chunk buffer.
    pub session_buffer: usize,

    pub shell_whitelist: Vec<String>,
    /// Substring patterns of paths tools must never touch.
    pub sensitive_paths: Vec<String>,
    /// Hosts the http tool refuses.
    pub http_deny_hosts: Vec<String>,
    pub http_byte_cap: usize,

    pub webhook_secret: Option<String>,
    pub webhook_idempotency_window: Duration,
    /// Patch size cap for the autonomous pipeline (changed lines).
    pub patch_line_cap: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            embedding: EmbeddingProvider::Local { dimension: 256 },
            workspace_root: PathBuf::from("."),
            data_root: PathBuf::from("./.state"),
            context_turns: 20,
            chunk_size: 2000,
            chunk_overlap: 200,
            index_file_cap: 1024 * 1024,
            memory_recall_k: 20,
            memory_recall_limit: 10,
            codebase_recall_k: 15,
            llm_deadline: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(15),
            tool_deadline: Duration::from_secs(10),
            role_soft_deadline: Duration::from_secs(5),
            role_hard_deadline: Duration::from_secs(15),
            job_deadline: Duration::from_secs(15 * 60),
            fix_loop_cap: 5,
            role_tool_call_cap: 4,
            llm_inflight_cap: 8,
            tool_inflight_cap: 16,
            embed_inflight_cap: 4,
            rate_limit_per_hour: 60,
            attachment_byte_cap: 5 * 1024 * 1024,
            attachment_prompt_slice: 1000,
            session_buffer: 64,
            shell_whitelist: vec![
                "git".to_string(),
                "pytest".to_string(),
                "python3".to_string(),
            ],
            sensitive_paths: vec![
                ".git/".to_string(),
                ".env".to_string(),
                ".ssh/".to_string(),
                ".aws/".to_string(),
                "credentials".to_string(),
                "node_modules/".to_string(),
                "__pycache__/".to_string(),
            ],
            http_deny_hosts: vec![
                "169.254.169.254".to_string(),
                "localhost".to_string(),
                "127.0.0.1".to_string(),
            ],
            http_byte_cap: 1024 * 1024,
            webhook_secret: None,
            webhook_idempotency_window: Duration::from_secs(24 * 60 * 60),
            patch_line_cap: 500,
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

impl Settings {
    /// Reads `QUILL_*` variables on top of the defaults.
    ///
    /// The provider chain comes from `QUILL_MODELS` (comma-separated model
    /// names, first is primary); each model uses `OPENAI_API_KEY` unless
    /// `QUILL_CREDENTIAL_ENV` names another variable.
    pub fn from_env() -> Self {
        let mut s = Settings::default();

        if let Ok(models) = std::env::var("QUILL_MODELS") {
            let credential_env = std::env::var("QUILL_CREDENTIAL_ENV")
                .unwrap_or_else(|_| "OPENAI_API_KEY".to_string());
            let base_url = std::env::var("QUILL_BASE_URL").ok();
            s.providers = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(|m| ProviderEntry {
                    model: m.to_string(),
                    credential_env: credential_env.clone(),
                    base_url: base_url.clone(),
                })
                .collect();
        }
        if let Ok(model) = std::env::var("QUILL_EMBED_MODEL") {
            s.embedding = EmbeddingProvider::Remote { model };
        } else if let Some(d) = env_usize("QUILL_EMBED_DIM") {
            s.embedding = EmbeddingProvider::Local { dimension: d };
        }
        if let Ok(root) = std::env::var("QUILL_WORKSPACE_ROOT") {
            s.workspace_root = PathBuf::from(root);
        }
        if let Ok(root) = std::env::var("QUILL_DATA_ROOT") {
            s.data_root = PathBuf::from(root);
        }
        if let Some(n) = env_usize("QUILL_CONTEXT_TURNS") {
            s.context_turns = n;
        }
        if let Some(n) = env_usize("QUILL_MEMORY_RECALL_LIMIT") {
            s.memory_recall_limit = n;
        }
        if let Some(n) = env_usize("QUILL_FIX_LOOP_CAP") {
            s.fix_loop_cap = n;
        }
        if let Some(n) = env_usize("QUILL_LLM_INFLIGHT_CAP") {
            s.llm_inflight_cap = n;
        }
        if let Some(n) = env_usize("QUILL_TOOL_INFLIGHT_CAP") {
            s.tool_inflight_cap = n;
        }
        if let Some(n) = env_u64("QUILL_RATE_LIMIT_PER_HOUR") {
            s.rate_limit_per_hour = n as u32;
        }
        if let Some(list) = env_list("QUILL_SHELL_WHITELIST") {
            s.shell_whitelist = list;
        }
        if let Some(list) = env_list("QUILL_SENSITIVE_PATHS") {
            s.sensitive_paths = list;
        }
        if let Some(list) = env_list("QUILL_HTTP_DENY_HOSTS") {
            s.http_deny_hosts = list;
        }
        if let Ok(secret) = std::env::var("QUILL_WEBHOOK_SECRET") {
            s.webhook_secret = Some(secret);
        }
        if let Some(secs) = env_u64("QUILL_IDEMPOTENCY_WINDOW_SECS") {
            s.webhook_idempotency_window = Duration::from_secs(secs);
        }
        s
    }
}
