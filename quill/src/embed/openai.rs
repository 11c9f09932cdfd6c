//! Remote embedder over the OpenAI Embeddings API.

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;

use crate::error::{Error, Result};

use super::Embedder;

/// OpenAI Embeddings client. Default model `text-embedding-3-small` (1536).
pub struct OpenAiEmbedder {
    config: OpenAIConfig,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_config(OpenAIConfig::new(), model)
    }

    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = Self::model_dimension(&model);
        Self {
            config,
            model,
            dimension,
        }
    }

    fn model_dimension(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<String> = texts.iter().map(|s| s.to_string()).collect();
        let input = if inputs.len() == 1 {
            EmbeddingInput::String(inputs.into_iter().next().unwrap_or_default())
        } else {
            EmbeddingInput::StringArray(inputs)
        };
        let request = CreateEmbeddingRequest {
            input,
            model: self.model.clone(),
            ..Default::default()
        };
        let client = Client::with_config(self.config.clone());
        let response = client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| Error::Unavailable(format!("embedding API error: {e}")))?;
        if response.data.len() != texts.len() {
            return Err(Error::Unavailable(format!(
                "embedding API returned {} vectors for {} inputs",
                response.data.len(),
                texts.len()
            )));
        }
        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provenance(&self) -> String {
        format!("openai-{}", self.model)
    }
}
