//! Local feature-hash embedder.
//!
//! Tokenizes on non-alphanumeric boundaries, hashes each token into a fixed
//! number of buckets with a sign bit, and L2-normalizes. Deterministic across
//! processes, so persisted indexes survive restarts byte-for-byte.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

use super::Embedder;

pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimension;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provenance(&self) -> String {
        format!("hash-v1-d{}", self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_across_calls() {
        let e = HashEmbedder::new(64);
        let a = e.embed(&["fn main() { println!(\"hi\") }"]).await.unwrap();
        let b = e.embed(&["fn main() { println!(\"hi\") }"]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let e = HashEmbedder::new(256);
        let vs = e
            .embed(&[
                "parse the json config file",
                "read json configuration from a file",
                "tokio spawn a background task",
            ])
            .await
            .unwrap();
        let cos = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        let related = cos(&vs[0], &vs[1]);
        let unrelated = cos(&vs[0], &vs[2]);
        assert!(
            related > unrelated,
            "related {related} should beat unrelated {unrelated}"
        );
    }

    #[tokio::test]
    async fn vectors_are_normalized() {
        let e = HashEmbedder::new(32);
        let v = &e.embed(&["some text to embed"]).await.unwrap()[0];
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn provenance_carries_dimension() {
        assert_eq!(HashEmbedder::new(128).provenance(), "hash-v1-d128");
    }

    #[tokio::test]
    async fn empty_text_gives_zero_vector() {
        let e = HashEmbedder::new(16);
        let v = &e.embed(&[""]).await.unwrap()[0];
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
