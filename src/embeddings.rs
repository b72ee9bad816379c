//! Embedding models
//!
//! Used for pgvector placeholder substitution and for ranking tables in the
//! schema retriever.

use crate::config::LlmConfig;
use crate::error::{NlSqlError, Result};
use crate::llm::DUMMY_API_KEY;
use async_trait::async_trait;

pub type Embedding = Vec<f32>;

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embeds a user question.
    fn get_query_embedding(&self, query: &str) -> Result<Embedding>;

    /// Embeds a stored document. Defaults to the query embedding.
    fn get_text_embedding(&self, text: &str) -> Result<Embedding> {
        self.get_query_embedding(text)
    }

    /// Non-blocking counterpart of [`EmbeddingModel::get_query_embedding`].
    /// Defaults to the sync call; models that do network I/O override it.
    async fn aget_query_embedding(&self, query: &str) -> Result<Embedding> {
        self.get_query_embedding(query)
    }
}

/// Embedding client using the OpenAI embeddings API
pub struct OpenAiEmbedding {
    api_key: String,
    base_url: String,
    model: String, // e.g., "text-embedding-3-small"
}

impl OpenAiEmbedding {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.embedding_model.clone(),
        )
    }

    fn dummy_embedding(&self) -> Option<Embedding> {
        // 1536 dimensions for text-embedding-3-small
        (self.api_key == DUMMY_API_KEY).then(|| vec![0.1; 1536])
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "input": text,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    /// Blocking request. Must not be called from inside an async runtime.
    fn embed_text_blocking(&self, text: &str) -> Result<Embedding> {
        if let Some(embedding) = self.dummy_embedding() {
            return Ok(embedding);
        }

        let client = reqwest::blocking::Client::new();
        let response = client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(text))
            .send()
            .map_err(|e| NlSqlError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NlSqlError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .map_err(|e| NlSqlError::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        parse_embedding(&response_json)
    }

    pub async fn embed_text(&self, text: &str) -> Result<Embedding> {
        if let Some(embedding) = self.dummy_embedding() {
            return Ok(embedding);
        }

        let client = reqwest::Client::new();
        let response = client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| NlSqlError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NlSqlError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NlSqlError::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        parse_embedding(&response_json)
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbedding {
    fn get_query_embedding(&self, query: &str) -> Result<Embedding> {
        self.embed_text_blocking(query)
    }

    async fn aget_query_embedding(&self, query: &str) -> Result<Embedding> {
        self.embed_text(query).await
    }
}

fn parse_embedding(response_json: &serde_json::Value) -> Result<Embedding> {
    let data = response_json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| NlSqlError::Embedding("No embedding data in response".to_string()))?;

    let embedding = data
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| NlSqlError::Embedding("No embedding vector in response".to_string()))?
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    Ok(embedding)
}

/// Renders a vector the way it is spliced into SQL literals: `[0.1, 0.2]`.
pub fn embedding_to_string(embedding: &[f32]) -> String {
    format!("{:?}", embedding)
}
