//! Configuration
//!
//! LLM credentials come from the environment (optionally a `.env` file);
//! engine options come from a JSON file.

use crate::error::{NlSqlError, Result};
use crate::llm::DUMMY_API_KEY;
use crate::schema::TableRef;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub embedding_model: String,
}

impl LlmConfig {
    /// Reads `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_BASE_URL` and
    /// `OPENAI_EMBEDDING_MODEL`, loading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        Self::from_env_or(None)
    }

    /// Like [`LlmConfig::from_env`], with `api_key` taking precedence over
    /// `OPENAI_API_KEY`.
    pub fn from_env_or(api_key: Option<String>) -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| match key {
            "OPENAI_API_KEY" => api_key.clone().or_else(|| std::env::var(key).ok()),
            _ => std::env::var(key).ok(),
        })
    }

    /// Config for the clients' offline dummy mode; no network access.
    pub fn offline() -> Self {
        Self {
            api_key: DUMMY_API_KEY.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("OPENAI_API_KEY").ok_or_else(|| {
            NlSqlError::Configuration("OPENAI_API_KEY is not set".to_string())
        })?;
        Ok(Self {
            api_key,
            model: lookup("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: lookup("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            embedding_model: lookup("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
        })
    }
}

fn default_true() -> bool {
    true
}

/// Engine options as stored on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub synthesize_response: bool,
    /// Table names or `{"name": ..}` handles; validated by [`EngineConfig::table_refs`].
    #[serde(default)]
    pub tables: Option<Vec<serde_json::Value>>,
    /// Optional per-table descriptions keyed by table name.
    #[serde(default)]
    pub context_query_kwargs: HashMap<String, String>,
    #[serde(default)]
    pub context_str_prefix: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            synthesize_response: true,
            tables: None,
            context_query_kwargs: HashMap::new(),
            context_str_prefix: None,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Converts the raw table list, failing on entries that are neither a
    /// name nor a table handle.
    pub fn table_refs(&self) -> Result<Option<Vec<TableRef>>> {
        self.tables
            .as_ref()
            .map(|values| {
                values
                    .iter()
                    .cloned()
                    .map(TableRef::try_from)
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()
    }
}
