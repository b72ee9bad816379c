use crate::config::LlmConfig;
use crate::error::{NlSqlError, Result};
use crate::prompts::PromptTemplate;
use async_trait::async_trait;
use tracing::{debug, warn};

/// API key that switches [`LlmClient`] into offline dummy mode.
pub const DUMMY_API_KEY: &str = "dummy-api-key";

/// Language model that completes prompt templates.
#[async_trait]
pub trait LlmPredictor: Send + Sync {
    /// Formats `prompt` with `bindings` and returns the completion.
    fn predict(&self, prompt: &PromptTemplate, bindings: &[(&str, &str)]) -> Result<String>;

    /// Non-blocking counterpart of [`LlmPredictor::predict`].
    async fn apredict(&self, prompt: &PromptTemplate, bindings: &[(&str, &str)]) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            temperature: 0.1,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.model.clone(),
            config.base_url.clone(),
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn is_dummy(&self) -> bool {
        self.api_key == DUMMY_API_KEY
    }

    /// Canned completions for offline runs. Text-to-SQL prompts end with the
    /// `SQLQuery:` cue, so those get a labelled statement back.
    fn dummy_completion(prompt: &str) -> String {
        if prompt.trim_end().ends_with("SQLQuery:") {
            "SQLQuery: SELECT 1\nSQLResult: [(1,)]\nAnswer: 1".to_string()
        } else {
            "Dummy response".to_string()
        }
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
        });

        // Reasoning models spend completion tokens on reasoning
        if self.model.starts_with("gpt-5") || self.model.contains("o1") {
            body["max_completion_tokens"] = serde_json::json!(2000);
        } else if self.model.starts_with("gpt-4") {
            body["max_completion_tokens"] = serde_json::json!(1000);
        } else {
            body["max_tokens"] = serde_json::json!(1000);
        }
        body
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Blocking chat completion. Must not be called from inside an async runtime.
    pub fn call_llm_blocking(&self, prompt: &str) -> Result<String> {
        if self.is_dummy() {
            return Ok(Self::dummy_completion(prompt));
        }

        let client = reqwest::blocking::Client::new();
        let response = client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .map_err(|e| NlSqlError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NlSqlError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .map_err(|e| NlSqlError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_json)
    }

    pub async fn call_llm(&self, prompt: &str) -> Result<String> {
        if self.is_dummy() {
            return Ok(Self::dummy_completion(prompt));
        }

        let client = reqwest::Client::new();
        let response = client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| NlSqlError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NlSqlError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NlSqlError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_json)
    }
}

#[async_trait]
impl LlmPredictor for LlmClient {
    fn predict(&self, prompt: &PromptTemplate, bindings: &[(&str, &str)]) -> Result<String> {
        let formatted = prompt.format(bindings)?;
        debug!(model = %self.model, "predict: {} prompt chars", formatted.len());
        self.call_llm_blocking(&formatted)
    }

    async fn apredict(&self, prompt: &PromptTemplate, bindings: &[(&str, &str)]) -> Result<String> {
        let formatted = prompt.format(bindings)?;
        debug!(model = %self.model, "apredict: {} prompt chars", formatted.len());
        self.call_llm(&formatted).await
    }
}

/// Pulls the first choice's message content out of a chat completions payload.
fn extract_content(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(NlSqlError::Llm(format!("LLM API error: {}", error)));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| NlSqlError::Llm(format!("No choices array in LLM response. Response: {}", response_json)))?;

    let first = choices
        .first()
        .ok_or_else(|| NlSqlError::Llm(format!("Empty choices array in LLM response. Response: {}", response_json)))?;

    match first.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(NlSqlError::Llm("LLM response was filtered by content policy".to_string()));
        }
        _ => {}
    }

    let content = first["message"]["content"]
        .as_str()
        .ok_or_else(|| NlSqlError::Llm(format!("No content in LLM response. Response: {}", response_json)))?;

    if content.is_empty() {
        return Err(NlSqlError::Llm(format!("Empty content in LLM response. Response: {}", response_json)));
    }

    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::DEFAULT_TEXT_TO_SQL_PROMPT;
    use serde_json::json;

    fn dummy_client() -> LlmClient {
        LlmClient::new(
            DUMMY_API_KEY.to_string(),
            "gpt-4o-mini".to_string(),
            "http://localhost".to_string(),
        )
    }

    #[test]
    fn test_extract_content() {
        let payload = json!({
            "choices": [{"message": {"content": "SQLQuery: SELECT 1"}, "finish_reason": "stop"}]
        });
        assert_eq!(extract_content(&payload).unwrap(), "SQLQuery: SELECT 1");
    }

    #[test]
    fn test_extract_content_errors() {
        let cases = [
            json!({"error": {"message": "rate limited"}}),
            json!({"choices": []}),
            json!({"id": "x"}),
            json!({"choices": [{"message": {"content": "x"}, "finish_reason": "content_filter"}]}),
            json!({"choices": [{"message": {"content": ""}}]}),
        ];
        for payload in cases {
            assert!(matches!(extract_content(&payload), Err(NlSqlError::Llm(_))));
        }
    }

    #[test]
    fn test_dummy_predict() {
        let client = dummy_client();
        let completion = client
            .predict(
                &DEFAULT_TEXT_TO_SQL_PROMPT,
                &[("query_str", "one?"), ("schema", ""), ("dialect", "sqlite")],
            )
            .unwrap();
        assert!(completion.starts_with("SQLQuery: SELECT 1"));
    }

    #[tokio::test]
    async fn test_dummy_apredict_formats_prompt_first() {
        let client = dummy_client();
        let err = client
            .apredict(&DEFAULT_TEXT_TO_SQL_PROMPT, &[("query_str", "one?")])
            .await
            .unwrap_err();
        assert!(matches!(err, NlSqlError::Configuration(_)));
    }
}
