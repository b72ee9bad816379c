use crate::config::LlmConfig;
use crate::embeddings::{EmbeddingModel, OpenAiEmbedding};
use crate::llm::{LlmClient, LlmPredictor};
use std::sync::Arc;

/// Model collaborators shared by the query engines.
#[derive(Clone)]
pub struct ServiceContext {
    pub llm: Arc<dyn LlmPredictor>,
    pub embed_model: Arc<dyn EmbeddingModel>,
}

impl ServiceContext {
    pub fn new(llm: Arc<dyn LlmPredictor>, embed_model: Arc<dyn EmbeddingModel>) -> Self {
        Self { llm, embed_model }
    }

    /// OpenAI-compatible chat and embedding clients built from `config`.
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            llm: Arc::new(LlmClient::from_config(config)),
            embed_model: Arc::new(OpenAiEmbedding::from_config(config)),
        }
    }
}
