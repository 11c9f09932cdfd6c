//! Codebase indexer: walk, chunk, embed, upsert.
//!
//! Walks the workspace honoring ignore files, skips binaries, symlinks, and
//! oversized files, splits text into overlapping line-aligned chunks, embeds
//! in batches under a small concurrency cap, and streams records into the
//! codebase index. Re-indexing is idempotent on (path, content hash): files
//! whose persisted hash matches are not re-embedded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::index::{VectorIndex, VectorRecord};

/// Outcome of one indexing pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub files_skipped_unchanged: usize,
    pub files_skipped_policy: usize,
    pub chunks_written: usize,
}

/// Splits `content` into chunks of at most `chunk_size` code points with
/// `overlap` code points shared between neighbors, cutting at line boundaries
/// where one falls in the back half of the window. Deterministic: the same
/// content and configuration always yield the same boundaries.
pub fn chunk_text(content: &str, chunk_size: usize, overlap: usize) -> Vec<(usize, String)> {
    let chars: Vec<char> = content.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size / 2);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let hard_end = (start + chunk_size).min(chars.len());
        let mut end = hard_end;
        if hard_end < chars.len() {
            // Prefer the last newline in the back half of the window.
            let floor = start + chunk_size / 2;
            if let Some(pos) = (floor..hard_end).rev().find(|&i| chars[i] == '\n') {
                end = pos + 1;
            }
        }
        chunks.push((start, chars[start..end].iter().collect::<String>()));
        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap);
    }
    chunks
}

fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)
}

/// True when the first bytes look like binary data (NUL byte present).
fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|b| *b == 0)
}

pub struct CodebaseIndexer {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    root: PathBuf,
    chunk_size: usize,
    overlap: usize,
    file_cap: u64,
    embed_permits: Arc<Semaphore>,
}

impl CodebaseIndexer {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        root: impl Into<PathBuf>,
        chunk_size: usize,
        overlap: usize,
        file_cap: u64,
        embed_inflight_cap: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            root: root.into(),
            chunk_size,
            overlap,
            file_cap,
            embed_permits: Arc::new(Semaphore::new(embed_inflight_cap.max(1))),
        }
    }

    /// Default behavior: load-if-present. Indexes only when the store is
    /// empty; a full pass is an explicit operator command (`force`).
    pub async fn ensure_indexed(&self, force: bool, cancel: &CancellationToken) -> Result<IndexReport> {
        if !force && !self.index.is_empty().await {
            debug!(count = self.index.len().await, "codebase index already loaded");
            return Ok(IndexReport::default());
        }
        self.reindex(cancel).await
    }

    /// Walks the tree and (re)indexes changed files.
    pub async fn reindex(&self, cancel: &CancellationToken) -> Result<IndexReport> {
        let known_hashes = self.index.metadata_pairs("path", "hash").await;
        let mut report = IndexReport::default();
        let files = self.collect_files()?;

        for path in files {
            if cancel.is_cancelled() {
                return Err(Error::Timeout {
                    what: "indexing cancelled".to_string(),
                    elapsed_ms: 0,
                });
            }
            let rel = path
                .strip_prefix(&self.root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %rel, error = %e, "unreadable file skipped");
                    report.files_skipped_policy += 1;
                    continue;
                }
            };
            if looks_binary(&bytes) {
                report.files_skipped_policy += 1;
                continue;
            }
            let Ok(content) = String::from_utf8(bytes) else {
                report.files_skipped_policy += 1;
                continue;
            };
            let hash = content_hash(&content);
            if known_hashes.get(&rel) == Some(&JsonValue::String(hash.clone())) {
                report.files_skipped_unchanged += 1;
                continue;
            }
            // Hash changed: replace every chunk of this file.
            self.index
                .remove_where("path", &JsonValue::String(rel.clone()))
                .await;

            let chunks = chunk_text(&content, self.chunk_size, self.overlap);
            let written = self.embed_and_upsert(&rel, &hash, chunks, cancel).await?;
            report.chunks_written += written;
            report.files_indexed += 1;
        }

        self.index.persist().await?;
        info!(
            files = report.files_indexed,
            unchanged = report.files_skipped_unchanged,
            chunks = report.chunks_written,
            "codebase indexing pass complete"
        );
        Ok(report)
    }

    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkBuilder::new(&self.root).follow_links(false).build() {
            let entry = entry.map_err(|e| Error::Internal(format!("walk error: {e}")))?;
            let Some(ft) = entry.file_type() else { continue };
            if !ft.is_file() || ft.is_symlink() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if meta.len() > self.file_cap {
                    continue;
                }
            }
            files.push(entry.into_path());
        }
        files.sort();
        Ok(files)
    }

    /// Embeds chunk batches under the concurrency cap and upserts records.
    async fn embed_and_upsert(
        &self,
        rel: &str,
        hash: &str,
        chunks: Vec<(usize, String)>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        const BATCH: usize = 16;
        let mut written = 0usize;
        for (batch_no, batch) in chunks.chunks(BATCH).enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Timeout {
                    what: "indexing cancelled".to_string(),
                    elapsed_ms: 0,
                });
            }
            let _permit = self
                .embed_permits
                .acquire()
                .await
                .map_err(|_| Error::Internal("embed semaphore closed".to_string()))?;
            let texts: Vec<&str> = batch.iter().map(|(_, t)| t.as_str()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            let records: Vec<VectorRecord> = batch
                .iter()
                .zip(vectors)
                .enumerate()
                .map(|(i, ((start, text), vector))| {
                    let chunk_index = batch_no * BATCH + i;
                    VectorRecord::new(format!("{rel}#{chunk_index}"), vector, text.clone())
                        .with_meta("path", rel)
                        .with_meta("hash", hash)
                        .with_meta("start", *start as u64)
                        .with_meta("chunk", chunk_index as u64)
                })
                .collect();
            written += records.len();
            self.index.upsert(records).await?;
        }
        Ok(written)
    }
}
