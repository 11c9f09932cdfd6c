//! Embedders: text to fixed-dimension vectors.
//!
//! Two implementations: [`HashEmbedder`] (deterministic local CPU model, the
//! default) and [`OpenAiEmbedder`] (remote endpoint). The index records each
//! embedder's provenance tag so a persisted store is never queried with
//! vectors from a different embedder.

mod hash;
mod openai;

pub use hash::HashEmbedder;
pub use openai::OpenAiEmbedder;

use async_trait::async_trait;

use crate::error::Result;

/// Produces fixed-size float vectors from text.
///
/// `embed` returns one vector per input, in order, each of [`Embedder::dimension`]
/// length. `provenance` identifies the model so persisted indexes can refuse
/// mismatched loads.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn provenance(&self) -> String;
}
