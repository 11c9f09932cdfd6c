//! Persistent approximate-nearest-neighbor store.
//!
//! Exact cosine ranking over an in-memory table, many-readers single-writer
//! behind an async RwLock. The persisted form is a self-describing JSON file
//! (version, dimension, count, embedding provenance) written atomically via
//! tmp + rename; a reader that loads it sees the snapshot of the last
//! successful [`VectorIndex::persist`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const FORMAT_VERSION: u32 = 1;
const INDEX_FILE: &str = "index.json";

/// One stored quadruple.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, JsonValue>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector,
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Equality predicate over metadata, applied after ranking. The underlying
/// index's native filtering is treated as a hint only; callers re-filter.
#[derive(Clone, Debug, Default)]
pub struct MetadataFilter {
    conditions: Vec<(String, JsonValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.conditions.push((key.to_string(), value.into()));
        self
    }

    pub fn matches(&self, record: &VectorRecord) -> bool {
        self.conditions
            .iter()
            .all(|(k, v)| record.metadata.get(k) == Some(v))
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    name: String,
    dimension: usize,
    count: usize,
    provenance: String,
    records: Vec<VectorRecord>,
}

/// Persistent vector index with metadata post-filtering.
pub struct VectorIndex {
    name: String,
    dimension: usize,
    provenance: String,
    dir: PathBuf,
    records: RwLock<HashMap<String, VectorRecord>>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

impl VectorIndex {
    /// Loads the persisted state from `dir` when present and compatible
    /// (matching dimension and provenance), otherwise starts empty.
    pub fn load(
        dir: impl Into<PathBuf>,
        name: impl Into<String>,
        dimension: usize,
        provenance: impl Into<String>,
    ) -> Self {
        let dir = dir.into();
        let name = name.into();
        let provenance = provenance.into();
        let mut records = HashMap::new();

        let path = dir.join(INDEX_FILE);
        if path.is_file() {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<PersistedIndex>(&s).map_err(|e| e.to_string()))
            {
                Ok(persisted)
                    if persisted.version == FORMAT_VERSION
                        && persisted.dimension == dimension
                        && persisted.provenance == provenance =>
                {
                    debug!(
                        index = %name,
                        count = persisted.records.len(),
                        "loaded persisted index"
                    );
                    records = persisted
                        .records
                        .into_iter()
                        .map(|r| (r.id.clone(), r))
                        .collect();
                }
                Ok(persisted) => {
                    warn!(
                        index = %name,
                        persisted_dim = persisted.dimension,
                        persisted_provenance = %persisted.provenance,
                        "persisted index incompatible, starting empty"
                    );
                }
                Err(e) => {
                    warn!(index = %name, error = %e, "persisted index unreadable, starting empty");
                }
            }
        }

        Self {
            name,
            dimension,
            provenance,
            dir,
            records: RwLock::new(records),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Inserts or replaces records by id. The whole batch is applied under one
    /// write lock, so readers see either none or all of it.
    pub async fn upsert(&self, batch: Vec<VectorRecord>) -> Result<()> {
        for r in &batch {
            if r.vector.len() != self.dimension {
                return Err(Error::InvalidInput(format!(
                    "vector dimension {} does not match index dimension {}",
                    r.vector.len(),
                    self.dimension
                )));
            }
        }
        let mut guard = self.records.write().await;
        for r in batch {
            guard.insert(r.id.clone(), r);
        }
        Ok(())
    }

    /// Removes every record whose metadata key equals `value`. Used by the
    /// codebase indexer when a file's content hash changes.
    pub async fn remove_where(&self, key: &str, value: &JsonValue) -> usize {
        let mut guard = self.records.write().await;
        let before = guard.len();
        guard.retain(|_, r| r.metadata.get(key) != Some(value));
        before - guard.len()
    }

    /// Top-k by descending cosine similarity; `filter` applied after ranking.
    pub async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<(VectorRecord, f32)>> {
        if vector.len() != self.dimension {
            return Err(Error::InvalidInput(format!(
                "query dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        let guard = self.records.read().await;
        let mut scored: Vec<(&VectorRecord, f32)> = guard
            .values()
            .map(|r| (r, cosine(vector, &r.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .filter(|(r, _)| filter.matches(r))
            .take(k)
            .map(|(r, s)| (r.clone(), s))
            .collect())
    }

    /// Returns the distinct values of a metadata key mapped to another key's
    /// value. Used to read back path/hash pairs without exposing the table.
    pub async fn metadata_pairs(&self, key: &str, value_key: &str) -> HashMap<String, JsonValue> {
        let guard = self.records.read().await;
        let mut out = HashMap::new();
        for r in guard.values() {
            if let (Some(JsonValue::String(k)), Some(v)) =
                (r.metadata.get(key), r.metadata.get(value_key))
            {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Writes the current state durably: serialize to `<dir>/index.json.tmp`,
    /// then rename over the live file.
    pub async fn persist(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Internal(format!("create index dir: {e}")))?;
        let guard = self.records.read().await;
        let mut records: Vec<VectorRecord> = guard.values().cloned().collect();
        drop(guard);
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let persisted = PersistedIndex {
            version: FORMAT_VERSION,
            name: self.name.clone(),
            dimension: self.dimension,
            count: records.len(),
            provenance: self.provenance.clone(),
            records,
        };
        let json = serde_json::to_string(&persisted)
            .map_err(|e| Error::Internal(format!("serialize index: {e}")))?;
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        let live = self.dir.join(INDEX_FILE);
        std::fs::write(&tmp, json).map_err(|e| Error::Internal(format!("write index: {e}")))?;
        std::fs::rename(&tmp, &live)
            .map_err(|e| Error::Internal(format!("rename index: {e}")))?;
        debug!(index = %self.name, count = persisted.count, "persisted index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, vector: Vec<f32>, content: &str) -> VectorRecord {
        VectorRecord::new(id, vector, content)
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_id() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::load(dir.path(), "test", 3, "hash-v1-d3");
        index
            .upsert(vec![rec("a", vec![1.0, 0.0, 0.0], "first")])
            .await
            .unwrap();
        index
            .upsert(vec![rec("a", vec![0.0, 1.0, 0.0], "replaced")])
            .await
            .unwrap();
        assert_eq!(index.len().await, 1);
        let hits = index
            .query(&[0.0, 1.0, 0.0], 1, &MetadataFilter::new())
            .await
            .unwrap();
        assert_eq!(hits[0].0.content, "replaced");
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::load(dir.path(), "test", 3, "hash-v1-d3");
        let err = index
            .upsert(vec![rec("a", vec![1.0, 0.0], "short")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_and_post_filters() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::load(dir.path(), "test", 2, "hash-v1-d2");
        index
            .upsert(vec![
                rec("near", vec![1.0, 0.0], "near").with_meta("session", "s1"),
                rec("far", vec![0.0, 1.0], "far").with_meta("session", "s1"),
                rec("other", vec![1.0, 0.1], "other session").with_meta("session", "s2"),
            ])
            .await
            .unwrap();

        let all = index
            .query(&[1.0, 0.0], 3, &MetadataFilter::new())
            .await
            .unwrap();
        assert_eq!(all[0].0.id, "near");

        let filtered = index
            .query(&[1.0, 0.0], 3, &MetadataFilter::new().eq("session", "s1"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|(r, _)| {
            r.metadata.get("session") == Some(&JsonValue::String("s1".into()))
        }));
    }

    #[tokio::test]
    async fn roundtrip_upsert_query_by_id_filter() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::load(dir.path(), "test", 2, "hash-v1-d2");
        let r = rec("r1", vec![0.6, 0.8], "payload").with_meta("id", "r1");
        index.upsert(vec![r.clone()]).await.unwrap();
        let hits = index
            .query(&r.vector, 1, &MetadataFilter::new().eq("id", "r1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "r1");
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn persist_and_reload_returns_same_ids() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = VectorIndex::load(dir.path(), "codebase", 2, "hash-v1-d2");
            index
                .upsert(vec![
                    rec("a", vec![1.0, 0.0], "alpha"),
                    rec("b", vec![0.0, 1.0], "beta"),
                ])
                .await
                .unwrap();
            index.persist().await.unwrap();
        }
        let reloaded = VectorIndex::load(dir.path(), "codebase", 2, "hash-v1-d2");
        assert_eq!(reloaded.len().await, 2);
        let hits = reloaded
            .query(&[1.0, 0.0], 2, &MetadataFilter::new())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|(r, _)| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn incompatible_persisted_state_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = VectorIndex::load(dir.path(), "m", 2, "hash-v1-d2");
            index.upsert(vec![rec("a", vec![1.0, 0.0], "x")]).await.unwrap();
            index.persist().await.unwrap();
        }
        // Different provenance: must not load the old vectors.
        let other = VectorIndex::load(dir.path(), "m", 2, "openai-text-embedding-3-small");
        assert!(other.is_empty().await);
    }

    #[tokio::test]
    async fn remove_where_drops_matching_records() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::load(dir.path(), "test", 2, "p");
        index
            .upsert(vec![
                rec("a", vec![1.0, 0.0], "x").with_meta("path", "a.py"),
                rec("b", vec![0.0, 1.0], "y").with_meta("path", "b.py"),
            ])
            .await
            .unwrap();
        let removed = index
            .remove_where("path", &JsonValue::String("a.py".into()))
            .await;
        assert_eq!(removed, 1);
        assert_eq!(index.len().await, 1);
    }
}
