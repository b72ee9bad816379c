//! SQL extraction from model completions
//!
//! Text-to-SQL prompts ask the model to answer as
//! `SQLQuery: <sql>\nSQLResult: <result>\nAnswer: <answer>`. Only the part
//! between the two labels is executable; whatever follows `SQLResult:` is the
//! model's guess at the result and is dropped.

use crate::embeddings::{embedding_to_string, EmbeddingModel};
use crate::error::Result;
use crate::schema::QueryBundle;
use std::sync::Arc;
use tracing::debug;

pub const SQL_QUERY_LABEL: &str = "SQLQuery:";
pub const SQL_RESULT_LABEL: &str = "SQLResult:";
pub const QUERY_VECTOR_PLACEHOLDER: &str = "[query_vector]";

/// Drops everything from the first `SQLResult:` onward.
fn crop_result(response: &str) -> &str {
    match response.find(SQL_RESULT_LABEL) {
        Some(idx) => &response[..idx],
        None => response,
    }
}

/// Isolates the SQL statement in a model completion.
///
/// When the `SQLQuery:` label is missing the whole completion (up to any
/// `SQLResult:`) is taken as the statement. Conversational preamble is not
/// detected here and will surface as a database error.
pub fn extract_sql(response: &str) -> String {
    let response = match response.find(SQL_QUERY_LABEL) {
        Some(idx) => &response[idx + SQL_QUERY_LABEL.len()..],
        None => {
            debug!("No {} label in completion, using it verbatim", SQL_QUERY_LABEL);
            response
        }
    };
    crop_result(response)
        .trim()
        .trim_matches('`')
        .trim()
        .to_string()
}

/// Extraction rule of the legacy natural-language engine: crop at
/// `SQLResult:` and trim, nothing else.
pub fn parse_legacy_sql(response: &str) -> String {
    crop_result(response).trim().to_string()
}

/// Replaces every `[query_vector]` with the rendered embedding. The embedding
/// model is only consulted when the placeholder is present.
pub fn substitute_query_vector(
    sql: &str,
    query: &QueryBundle,
    embed_model: &dyn EmbeddingModel,
) -> Result<String> {
    if !sql.contains(QUERY_VECTOR_PLACEHOLDER) {
        return Ok(sql.to_string());
    }
    let embedding = embed_model.get_query_embedding(&query.query_str)?;
    Ok(sql.replace(QUERY_VECTOR_PLACEHOLDER, &embedding_to_string(&embedding)))
}

/// Non-blocking counterpart of [`substitute_query_vector`].
pub async fn asubstitute_query_vector(
    sql: &str,
    query: &QueryBundle,
    embed_model: &dyn EmbeddingModel,
) -> Result<String> {
    if !sql.contains(QUERY_VECTOR_PLACEHOLDER) {
        return Ok(sql.to_string());
    }
    let embedding = embed_model.aget_query_embedding(&query.query_str).await?;
    Ok(sql.replace(QUERY_VECTOR_PLACEHOLDER, &embedding_to_string(&embedding)))
}

/// How an engine turns a completion into executable SQL.
#[derive(Clone)]
pub enum SqlParserMode {
    Default,
    /// pgvector dialect: `[query_vector]` is filled with the question embedding.
    PgVector(Arc<dyn EmbeddingModel>),
}

impl SqlParserMode {
    pub fn parse_response_to_sql(&self, response: &str, query: &QueryBundle) -> Result<String> {
        let sql = extract_sql(response);
        match self {
            SqlParserMode::Default => Ok(sql),
            SqlParserMode::PgVector(embed_model) => {
                substitute_query_vector(&sql, query, embed_model.as_ref())
            }
        }
    }

    pub async fn aparse_response_to_sql(&self, response: &str, query: &QueryBundle) -> Result<String> {
        let sql = extract_sql(response);
        match self {
            SqlParserMode::Default => Ok(sql),
            SqlParserMode::PgVector(embed_model) => {
                asubstitute_query_vector(&sql, query, embed_model.as_ref()).await
            }
        }
    }
}

impl std::fmt::Debug for SqlParserMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlParserMode::Default => write!(f, "Default"),
            SqlParserMode::PgVector(_) => write!(f, "PgVector"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedding;
    use crate::error::NlSqlError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbedding {
        calls: AtomicUsize,
    }

    impl EmbeddingModel for FixedEmbedding {
        fn get_query_embedding(&self, _query: &str) -> Result<Embedding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.5, -1.0])
        }
    }

    struct FailingEmbedding;

    impl EmbeddingModel for FailingEmbedding {
        fn get_query_embedding(&self, _query: &str) -> Result<Embedding> {
            Err(NlSqlError::Embedding("offline".to_string()))
        }
    }

    /// Only answers on the async path.
    struct AsyncOnlyEmbedding;

    #[async_trait]
    impl EmbeddingModel for AsyncOnlyEmbedding {
        fn get_query_embedding(&self, _query: &str) -> Result<Embedding> {
            Err(NlSqlError::Embedding("blocking path used".to_string()))
        }

        async fn aget_query_embedding(&self, _query: &str) -> Result<Embedding> {
            Ok(vec![2.0, 0.25])
        }
    }

    #[test]
    fn test_extract_between_labels() {
        assert_eq!(
            extract_sql("SQLQuery: SELECT COUNT(*) FROM orders SQLResult: 5"),
            "SELECT COUNT(*) FROM orders"
        );
        assert_eq!(
            extract_sql("Question: how many?\nSQLQuery: SELECT 1\nSQLResult: [(1,)]\nAnswer: 1"),
            "SELECT 1"
        );
    }

    #[test]
    fn test_extract_without_query_label() {
        assert_eq!(extract_sql("  SELECT name FROM users  "), "SELECT name FROM users");
        assert_eq!(
            extract_sql("SELECT name FROM users\nSQLResult: [('Ada',)]"),
            "SELECT name FROM users"
        );
    }

    #[test]
    fn test_extract_strips_code_fences() {
        assert_eq!(
            extract_sql("SQLQuery: ```SELECT 1``` SQLResult:"),
            "SELECT 1"
        );
        assert_eq!(extract_sql("```\nSELECT 2\n```"), "SELECT 2");
    }

    #[test]
    fn test_extract_uses_first_labels() {
        assert_eq!(
            extract_sql("SQLQuery: SELECT 1 SQLResult: x SQLQuery: SELECT 2"),
            "SELECT 1"
        );
    }

    #[test]
    fn test_legacy_parse_keeps_query_label() {
        assert_eq!(
            parse_legacy_sql("SQLQuery: SELECT 1\nSQLResult: 1"),
            "SQLQuery: SELECT 1"
        );
        assert_eq!(parse_legacy_sql(" SELECT 1 "), "SELECT 1");
    }

    #[test]
    fn test_query_vector_substitution() {
        let model = FixedEmbedding { calls: AtomicUsize::new(0) };
        let query = QueryBundle::new("similar items");
        let sql = substitute_query_vector(
            "SELECT * FROM items ORDER BY embedding <-> '[query_vector]' LIMIT 5; -- [query_vector]",
            &query,
            &model,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM items ORDER BY embedding <-> '[0.5, -1.0]' LIMIT 5; -- [0.5, -1.0]"
        );
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_query_vector_noop_without_placeholder() {
        let query = QueryBundle::new("anything");
        let sql = substitute_query_vector("SELECT 1", &query, &FailingEmbedding).unwrap();
        assert_eq!(sql, "SELECT 1");
    }

    #[test]
    fn test_pgvector_mode() {
        let mode = SqlParserMode::PgVector(Arc::new(FixedEmbedding { calls: AtomicUsize::new(0) }));
        let query = QueryBundle::new("q");
        let sql = mode
            .parse_response_to_sql("SQLQuery: SELECT '[query_vector]' SQLResult: x", &query)
            .unwrap();
        assert_eq!(sql, "SELECT '[0.5, -1.0]'");
        assert_eq!(
            SqlParserMode::Default
                .parse_response_to_sql("SQLQuery: SELECT '[query_vector]'", &query)
                .unwrap(),
            "SELECT '[query_vector]'"
        );
    }

    #[tokio::test]
    async fn test_pgvector_mode_async_uses_async_embedding() {
        let mode = SqlParserMode::PgVector(Arc::new(AsyncOnlyEmbedding));
        let query = QueryBundle::new("q");
        let sql = mode
            .aparse_response_to_sql("SQLQuery: SELECT '[query_vector]'", &query)
            .await
            .unwrap();
        assert_eq!(sql, "SELECT '[2.0, 0.25]'");

        let sql = asubstitute_query_vector("SELECT 1", &query, &FailingEmbedding)
            .await
            .unwrap();
        assert_eq!(sql, "SELECT 1");
    }
}
