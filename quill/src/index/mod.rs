//! Vector indexes and their ingestion pipelines.
//!
//! [`VectorIndex`] is the shared store: id/vector/content/metadata quadruples
//! with cosine top-k queries and a self-describing persisted form. Two
//! instances exist per process: memory (chat turns, fed by [`MemoryLog`])
//! and codebase (source chunks, fed by [`CodebaseIndexer`]).

mod codebase;
mod memory;
mod store;

pub use codebase::{chunk_text, CodebaseIndexer, IndexReport};
pub use memory::{MemoryLog, RecallHit};
pub use store::{MetadataFilter, VectorIndex, VectorRecord};
