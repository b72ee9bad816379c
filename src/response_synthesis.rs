//! Response synthesis
//!
//! Turns retrieved text nodes into a natural-language answer with one model
//! call. The SQL engines hand over a single node carrying the raw result.

use crate::error::{NlSqlError, Result};
use crate::llm::LlmPredictor;
use crate::prompts::{PromptTemplate, DEFAULT_TEXT_QA_PROMPT};
use crate::schema::{Metadata, NodeWithScore, Response};
use async_trait::async_trait;
use itertools::Itertools;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait ResponseSynthesizer: Send + Sync {
    fn synthesize(&self, query: &str, nodes: Vec<NodeWithScore>) -> Result<Response>;

    async fn asynthesize(&self, query: &str, nodes: Vec<NodeWithScore>) -> Result<Response>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseMode {
    /// Pack every node into one prompt and answer in a single call.
    #[default]
    Compact,
    /// Return the source nodes without calling the model.
    NoText,
}

#[derive(Clone)]
pub struct SynthesizerConfig {
    pub llm: Arc<dyn LlmPredictor>,
    pub response_mode: ResponseMode,
    /// Must accept `context_str` and `query_str` (other variables pre-bound).
    pub text_qa_template: PromptTemplate,
}

impl SynthesizerConfig {
    pub fn new(llm: Arc<dyn LlmPredictor>) -> Self {
        Self {
            llm,
            response_mode: ResponseMode::default(),
            text_qa_template: DEFAULT_TEXT_QA_PROMPT.clone(),
        }
    }

    pub fn with_response_mode(mut self, response_mode: ResponseMode) -> Self {
        self.response_mode = response_mode;
        self
    }

    pub fn with_text_qa_template(mut self, text_qa_template: PromptTemplate) -> Self {
        self.text_qa_template = text_qa_template;
        self
    }
}

pub fn get_response_synthesizer(config: SynthesizerConfig) -> Box<dyn ResponseSynthesizer> {
    match config.response_mode {
        ResponseMode::Compact => Box::new(CompactSynthesizer {
            llm: config.llm,
            text_qa_template: config.text_qa_template,
        }),
        ResponseMode::NoText => Box::new(NoTextSynthesizer),
    }
}

struct CompactSynthesizer {
    llm: Arc<dyn LlmPredictor>,
    text_qa_template: PromptTemplate,
}

impl CompactSynthesizer {
    fn context_str(nodes: &[NodeWithScore]) -> String {
        nodes.iter().map(|n| n.node.text.as_str()).join("\n\n")
    }

    fn build_response(answer: String, nodes: Vec<NodeWithScore>) -> Response {
        Response {
            response: Some(answer),
            source_nodes: nodes,
            metadata: Metadata::new(),
        }
    }
}

#[async_trait]
impl ResponseSynthesizer for CompactSynthesizer {
    fn synthesize(&self, query: &str, nodes: Vec<NodeWithScore>) -> Result<Response> {
        let context_str = Self::context_str(&nodes);
        debug!("Synthesizing from {} node(s)", nodes.len());
        let answer = self
            .llm
            .predict(
                &self.text_qa_template,
                &[("query_str", query), ("context_str", context_str.as_str())],
            )
            .map_err(into_synthesis_error)?;
        Ok(Self::build_response(answer.trim().to_string(), nodes))
    }

    async fn asynthesize(&self, query: &str, nodes: Vec<NodeWithScore>) -> Result<Response> {
        let context_str = Self::context_str(&nodes);
        debug!("Synthesizing from {} node(s)", nodes.len());
        let answer = self
            .llm
            .apredict(
                &self.text_qa_template,
                &[("query_str", query), ("context_str", context_str.as_str())],
            )
            .await
            .map_err(into_synthesis_error)?;
        Ok(Self::build_response(answer.trim().to_string(), nodes))
    }
}

struct NoTextSynthesizer;

#[async_trait]
impl ResponseSynthesizer for NoTextSynthesizer {
    fn synthesize(&self, _query: &str, nodes: Vec<NodeWithScore>) -> Result<Response> {
        Ok(Response {
            response: None,
            source_nodes: nodes,
            metadata: Metadata::new(),
        })
    }

    async fn asynthesize(&self, query: &str, nodes: Vec<NodeWithScore>) -> Result<Response> {
        self.synthesize(query, nodes)
    }
}

/// Model failures during synthesis are reported as synthesis errors;
/// configuration problems (bad templates) keep their kind.
fn into_synthesis_error(err: NlSqlError) -> NlSqlError {
    match err {
        NlSqlError::Llm(msg) => NlSqlError::Synthesis(msg),
        other => other,
    }
}
