use thiserror::Error;

#[derive(Error, Debug)]
pub enum NlSqlError {
    /// Invalid engine wiring: bad table references, prompts missing required
    /// variables, absent context data or missing environment settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for NlSqlError {
    fn from(err: rusqlite::Error) -> Self {
        NlSqlError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NlSqlError>;
