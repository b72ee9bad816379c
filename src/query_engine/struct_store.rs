//! Struct-store query engines
//!
//! Older engines kept for existing callers. [`SqlStructStoreQueryEngine`] runs
//! the query text as SQL. [`NlStructStoreQueryEngine`] is the first
//! natural-language engine: it reads a precomputed context container, only
//! crops completions at `SQLResult:` and synthesizes with one prompt.
//! New code should use [`SqlTableQueryEngine`](super::SqlTableQueryEngine).

use crate::error::{NlSqlError, Result};
use crate::prompts::{PromptTemplate, DEFAULT_RESPONSE_SYNTHESIS_PROMPT, DEFAULT_TEXT_TO_SQL_PROMPT};
use crate::query_engine::QueryEngine;
use crate::schema::{Metadata, QueryBundle, Response, SQL_QUERY_KEY};
use crate::service_context::ServiceContext;
use crate::sql_database::SqlDatabase;
use crate::sql_parser::parse_legacy_sql;
use crate::table_context::{join_context, table_schema_text};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Precomputed table context for the struct-store engines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlContextContainer {
    /// Used verbatim when set.
    pub context_str: Option<String>,
    /// Per-table context in insertion order.
    pub context_dict: Option<Vec<(String, String)>>,
}

impl SqlContextContainer {
    pub fn from_context_str(context_str: impl Into<String>) -> Self {
        Self {
            context_str: Some(context_str.into()),
            context_dict: None,
        }
    }

    pub fn from_context_dict(context_dict: Vec<(String, String)>) -> Self {
        Self {
            context_str: None,
            context_dict: Some(context_dict),
        }
    }

    /// Describes every usable table of `db`, adding `table_context` entries
    /// where a table has one.
    pub fn build(db: &dyn SqlDatabase, table_context: &HashMap<String, String>) -> Result<Self> {
        let context_dict = db
            .get_usable_table_names()?
            .into_iter()
            .map(|name| {
                let text = table_schema_text(db, &name, table_context.get(&name).map(String::as_str))?;
                Ok((name, text))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_context_dict(context_dict))
    }

    /// The context string if set, else the dict's values joined by blank lines.
    pub fn table_context(&self) -> Result<String> {
        if let Some(ref context_str) = self.context_str {
            return Ok(context_str.clone());
        }
        let context_dict = self.context_dict.as_ref().ok_or_else(|| {
            NlSqlError::Configuration(
                "context_dict must be provided. There is currently no table context.".to_string(),
            )
        })?;
        Ok(join_context(context_dict.iter().map(|(_, desc)| desc.clone())))
    }
}

pub struct SqlStructStoreIndex {
    pub sql_database: Arc<dyn SqlDatabase>,
    pub sql_context_container: SqlContextContainer,
    pub service_context: ServiceContext,
}

impl SqlStructStoreIndex {
    pub fn new(
        sql_database: Arc<dyn SqlDatabase>,
        sql_context_container: SqlContextContainer,
        service_context: ServiceContext,
    ) -> Self {
        Self {
            sql_database,
            sql_context_container,
            service_context,
        }
    }
}

/// Runs the query text verbatim as SQL; no model calls. Does not descend
/// into composed indices.
pub struct SqlStructStoreQueryEngine {
    sql_database: Arc<dyn SqlDatabase>,
    sql_context_container: SqlContextContainer,
}

impl SqlStructStoreQueryEngine {
    pub fn new(index: &SqlStructStoreIndex, sql_context_container: Option<SqlContextContainer>) -> Self {
        Self {
            sql_database: index.sql_database.clone(),
            sql_context_container: sql_context_container
                .unwrap_or_else(|| index.sql_context_container.clone()),
        }
    }

    pub fn sql_context_container(&self) -> &SqlContextContainer {
        &self.sql_context_container
    }
}

#[async_trait]
impl QueryEngine for SqlStructStoreQueryEngine {
    fn query(&self, query: &QueryBundle) -> Result<Response> {
        let (response_str, metadata) = self.sql_database.run_sql(&query.query_str)?;
        Ok(Response::new(response_str, metadata))
    }

    async fn aquery(&self, query: &QueryBundle) -> Result<Response> {
        self.query(query)
    }
}

/// Natural-language engine over a [`SqlStructStoreIndex`].
pub struct NlStructStoreQueryEngine {
    sql_database: Arc<dyn SqlDatabase>,
    sql_context_container: SqlContextContainer,
    service_context: ServiceContext,
    text_to_sql_prompt: PromptTemplate,
    response_synthesis_prompt: PromptTemplate,
    synthesize_response: bool,
}

impl NlStructStoreQueryEngine {
    pub fn new(index: &SqlStructStoreIndex) -> Self {
        Self {
            sql_database: index.sql_database.clone(),
            sql_context_container: index.sql_context_container.clone(),
            service_context: index.service_context.clone(),
            text_to_sql_prompt: DEFAULT_TEXT_TO_SQL_PROMPT.clone(),
            response_synthesis_prompt: DEFAULT_RESPONSE_SYNTHESIS_PROMPT.clone(),
            synthesize_response: true,
        }
    }

    pub fn with_text_to_sql_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.text_to_sql_prompt = prompt;
        self
    }

    /// Formatted with `query_str`, `sql_query` and `sql_response_str`.
    pub fn with_response_synthesis_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.response_synthesis_prompt = prompt;
        self
    }

    pub fn with_synthesize_response(mut self, synthesize_response: bool) -> Self {
        self.synthesize_response = synthesize_response;
        self
    }

    pub fn service_context(&self) -> &ServiceContext {
        &self.service_context
    }

    fn run_sql(&self, sql_query_str: &str) -> Result<(String, Metadata)> {
        let (raw_response_str, mut metadata) = self.sql_database.run_sql(sql_query_str)?;
        metadata.insert(SQL_QUERY_KEY.to_string(), Value::String(sql_query_str.to_string()));
        Ok((raw_response_str, metadata))
    }
}

#[async_trait]
impl QueryEngine for NlStructStoreQueryEngine {
    fn query(&self, query: &QueryBundle) -> Result<Response> {
        let table_desc_str = self.sql_context_container.table_context()?;
        info!("> Table desc str: {}", table_desc_str);

        let response_str = self.service_context.llm.predict(
            &self.text_to_sql_prompt,
            &[
                ("query_str", query.query_str.as_str()),
                ("schema", table_desc_str.as_str()),
                ("dialect", self.sql_database.dialect()),
            ],
        )?;

        let sql_query_str = parse_legacy_sql(&response_str);
        debug!("> Predicted SQL query: {}", sql_query_str);

        let (raw_response_str, metadata) = self.run_sql(&sql_query_str)?;

        let response_str = if self.synthesize_response {
            self.service_context.llm.predict(
                &self.response_synthesis_prompt,
                &[
                    ("query_str", query.query_str.as_str()),
                    ("sql_query", sql_query_str.as_str()),
                    ("sql_response_str", raw_response_str.as_str()),
                ],
            )?
        } else {
            raw_response_str
        };

        Ok(Response::new(response_str, metadata))
    }

    async fn aquery(&self, query: &QueryBundle) -> Result<Response> {
        let table_desc_str = self.sql_context_container.table_context()?;
        info!("> Table desc str: {}", table_desc_str);

        let response_str = self
            .service_context
            .llm
            .apredict(
                &self.text_to_sql_prompt,
                &[
                    ("query_str", query.query_str.as_str()),
                    ("schema", table_desc_str.as_str()),
                    ("dialect", self.sql_database.dialect()),
                ],
            )
            .await?;

        let sql_query_str = parse_legacy_sql(&response_str);
        debug!("> Predicted SQL query: {}", sql_query_str);

        let (raw_response_str, metadata) = self.run_sql(&sql_query_str)?;

        let response_str = if self.synthesize_response {
            self.service_context
                .llm
                .apredict(
                    &self.response_synthesis_prompt,
                    &[
                        ("query_str", query.query_str.as_str()),
                        ("sql_query", sql_query_str.as_str()),
                        ("sql_response_str", raw_response_str.as_str()),
                    ],
                )
                .await?
        } else {
            raw_response_str
        };

        Ok(Response::new(response_str, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_database::SqliteDatabase;

    fn sample_db() -> SqliteDatabase {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE users (id INTEGER);
             CREATE TABLE orders (id INTEGER);",
        )
        .unwrap();
        db
    }

    #[test]
    fn test_container_prefers_context_str() {
        let container = SqlContextContainer {
            context_str: Some("fixed".to_string()),
            context_dict: Some(vec![("t".to_string(), "ignored".to_string())]),
        };
        assert_eq!(container.table_context().unwrap(), "fixed");
    }

    #[test]
    fn test_container_joins_dict_in_insertion_order() {
        let container = SqlContextContainer::from_context_dict(vec![
            ("b".to_string(), "second table".to_string()),
            ("a".to_string(), "first table".to_string()),
        ]);
        assert_eq!(container.table_context().unwrap(), "second table\n\nfirst table");
    }

    #[test]
    fn test_container_without_context_is_configuration_error() {
        let err = SqlContextContainer::default().table_context().unwrap_err();
        assert!(matches!(err, NlSqlError::Configuration(_)));
    }

    #[test]
    fn test_container_build_from_database() {
        let db = sample_db();
        let mut table_context = HashMap::new();
        table_context.insert("users".to_string(), "Registered people".to_string());

        let container = SqlContextContainer::build(&db, &table_context).unwrap();
        let dict = container.context_dict.unwrap();
        let names: Vec<&str> = dict.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["orders", "users"]);
        assert!(dict[0].1.starts_with("Schema of table orders:\n"));
        assert!(dict[1].1.ends_with("Context of table users:\nRegistered people"));
    }
}
