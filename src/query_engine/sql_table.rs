//! Text-to-SQL query engine
//!
//! Every query runs four stages in order, and a failing stage aborts the rest:
//! 1. table context: the provider renders the schema block
//! 2. generation: the model writes SQL, which is cut out of the completion
//! 3. execution: the database runs it and the SQL is recorded in metadata
//! 4. synthesis (optional): the model phrases the raw result as an answer

use crate::error::{NlSqlError, Result};
use crate::prompts::{
    PromptTemplate, DEFAULT_RESPONSE_SYNTHESIS_PROMPT_V2, DEFAULT_TEXT_TO_SQL_PGVECTOR_PROMPT,
    DEFAULT_TEXT_TO_SQL_PROMPT,
};
use crate::query_engine::QueryEngine;
use crate::response_synthesis::{
    get_response_synthesizer, ResponseMode, ResponseSynthesizer, SynthesizerConfig,
};
use crate::schema::{Metadata, NodeWithScore, QueryBundle, Response, TableRef, TextNode, SQL_QUERY_KEY};
use crate::schema_rag::ObjectRetriever;
use crate::service_context::ServiceContext;
use crate::sql_database::SqlDatabase;
use crate::sql_parser::SqlParserMode;
use crate::table_context::{AllTables, RetrievedTables, SelectedTables, TableContextProvider};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

const REQUIRED_SYNTHESIS_VARS: [&str; 3] = ["query_str", "sql_query", "context_str"];

/// Rejects synthesis prompts that do not declare exactly
/// `query_str`, `sql_query` and `context_str`.
pub fn validate_synthesis_prompt(prompt: &PromptTemplate) -> Result<()> {
    let declared = prompt.template_vars();
    let required: BTreeSet<String> = REQUIRED_SYNTHESIS_VARS.iter().map(|v| v.to_string()).collect();
    if declared != required {
        return Err(NlSqlError::Configuration(format!(
            "response_synthesis_prompt must have the following template variables: {} (found: {})",
            REQUIRED_SYNTHESIS_VARS.join(", "),
            declared.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }
    Ok(())
}

pub struct SqlTableQueryEngine {
    sql_database: Arc<dyn SqlDatabase>,
    context_provider: Box<dyn TableContextProvider>,
    sql_parser: SqlParserMode,
    text_to_sql_prompt: PromptTemplate,
    response_synthesis_prompt: PromptTemplate,
    synthesize_response: bool,
    response_mode: ResponseMode,
    service_context: ServiceContext,
}

impl SqlTableQueryEngine {
    pub fn builder(
        sql_database: Arc<dyn SqlDatabase>,
        service_context: ServiceContext,
    ) -> SqlTableQueryEngineBuilder {
        SqlTableQueryEngineBuilder::new(sql_database, service_context)
    }

    pub fn service_context(&self) -> &ServiceContext {
        &self.service_context
    }

    pub fn sql_database(&self) -> &Arc<dyn SqlDatabase> {
        &self.sql_database
    }

    /// Schema block for `query` as rendered by the configured provider.
    pub fn get_table_context(&self, query: &QueryBundle) -> Result<String> {
        self.context_provider
            .get_table_context(self.sql_database.as_ref(), query)
    }

    fn run_sql(&self, sql_query_str: &str) -> Result<(String, Metadata)> {
        let (raw_response_str, mut metadata) = self.sql_database.run_sql(sql_query_str)?;
        metadata.insert(SQL_QUERY_KEY.to_string(), Value::String(sql_query_str.to_string()));
        Ok((raw_response_str, metadata))
    }

    fn response_synthesizer(&self, sql_query_str: &str) -> Box<dyn ResponseSynthesizer> {
        let partial_synthesis_prompt = self
            .response_synthesis_prompt
            .partial_format(&[("sql_query", sql_query_str)]);
        get_response_synthesizer(
            SynthesizerConfig::new(self.service_context.llm.clone())
                .with_response_mode(self.response_mode)
                .with_text_qa_template(partial_synthesis_prompt),
        )
    }

    fn raw_response(raw_response_str: String, metadata: Metadata) -> Response {
        Response::new(raw_response_str, metadata)
    }
}

/// Execution metadata wins over anything the synthesizer recorded.
fn merge_metadata(mut response: Response, metadata: Metadata) -> Response {
    response.metadata.extend(metadata);
    response
}

fn result_nodes(raw_response_str: String) -> Vec<NodeWithScore> {
    vec![NodeWithScore::new(TextNode::new(raw_response_str))]
}

#[async_trait]
impl QueryEngine for SqlTableQueryEngine {
    fn query(&self, query: &QueryBundle) -> Result<Response> {
        let table_desc_str = self.get_table_context(query)?;
        info!("> Table desc str: {}", table_desc_str);

        let response_str = self.service_context.llm.predict(
            &self.text_to_sql_prompt,
            &[
                ("query_str", query.query_str.as_str()),
                ("schema", table_desc_str.as_str()),
                ("dialect", self.sql_database.dialect()),
            ],
        )?;

        let sql_query_str = self.sql_parser.parse_response_to_sql(&response_str, query)?;
        debug!("> Predicted SQL query: {}", sql_query_str);

        let (raw_response_str, metadata) = self.run_sql(&sql_query_str)?;

        if !self.synthesize_response {
            return Ok(Self::raw_response(raw_response_str, metadata));
        }

        let response = self
            .response_synthesizer(&sql_query_str)
            .synthesize(&query.query_str, result_nodes(raw_response_str))?;
        Ok(merge_metadata(response, metadata))
    }

    async fn aquery(&self, query: &QueryBundle) -> Result<Response> {
        let table_desc_str = self
            .context_provider
            .aget_table_context(self.sql_database.as_ref(), query)
            .await?;
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

        let sql_query_str = self
            .sql_parser
            .aparse_response_to_sql(&response_str, query)
            .await?;
        debug!("> Predicted SQL query: {}", sql_query_str);

        // The database wrapper has no async path; this call blocks.
        let (raw_response_str, metadata) = self.run_sql(&sql_query_str)?;

        if !self.synthesize_response {
            return Ok(Self::raw_response(raw_response_str, metadata));
        }

        let response = self
            .response_synthesizer(&sql_query_str)
            .asynthesize(&query.query_str, result_nodes(raw_response_str))
            .await?;
        Ok(merge_metadata(response, metadata))
    }
}

/// Shared options for the text-to-SQL engines. Finish with [`nl_sql`],
/// [`pgvector`], [`table_retriever`] or [`build`].
///
/// [`nl_sql`]: SqlTableQueryEngineBuilder::nl_sql
/// [`pgvector`]: SqlTableQueryEngineBuilder::pgvector
/// [`table_retriever`]: SqlTableQueryEngineBuilder::table_retriever
/// [`build`]: SqlTableQueryEngineBuilder::build
pub struct SqlTableQueryEngineBuilder {
    sql_database: Arc<dyn SqlDatabase>,
    service_context: ServiceContext,
    text_to_sql_prompt: Option<PromptTemplate>,
    response_synthesis_prompt: Option<PromptTemplate>,
    context_query_kwargs: HashMap<String, String>,
    synthesize_response: bool,
    response_mode: ResponseMode,
}

impl SqlTableQueryEngineBuilder {
    pub fn new(sql_database: Arc<dyn SqlDatabase>, service_context: ServiceContext) -> Self {
        Self {
            sql_database,
            service_context,
            text_to_sql_prompt: None,
            response_synthesis_prompt: None,
            context_query_kwargs: HashMap::new(),
            synthesize_response: true,
            response_mode: ResponseMode::default(),
        }
    }

    pub fn text_to_sql_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.text_to_sql_prompt = Some(prompt);
        self
    }

    pub fn response_synthesis_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.response_synthesis_prompt = Some(prompt);
        self
    }

    /// Per-table descriptions appended to the schema block, keyed by table name.
    pub fn context_query_kwargs(mut self, context_query_kwargs: HashMap<String, String>) -> Self {
        self.context_query_kwargs = context_query_kwargs;
        self
    }

    pub fn synthesize_response(mut self, synthesize_response: bool) -> Self {
        self.synthesize_response = synthesize_response;
        self
    }

    pub fn response_mode(mut self, response_mode: ResponseMode) -> Self {
        self.response_mode = response_mode;
        self
    }

    /// Natural-language engine over `tables`, or over every usable table
    /// when `tables` is `None` or empty.
    pub fn nl_sql(self, tables: Option<Vec<TableRef>>) -> Result<SqlTableQueryEngine> {
        let provider = self.table_provider(tables);
        self.build(provider, SqlParserMode::Default)
    }

    /// Natural-language engine for pgvector databases: the prompt teaches the
    /// `[query_vector]` placeholder and the parser fills it in.
    pub fn pgvector(mut self, tables: Option<Vec<TableRef>>) -> Result<SqlTableQueryEngine> {
        if self.text_to_sql_prompt.is_none() {
            self.text_to_sql_prompt = Some(DEFAULT_TEXT_TO_SQL_PGVECTOR_PROMPT.clone());
        }
        let provider = self.table_provider(tables);
        let parser = SqlParserMode::PgVector(self.service_context.embed_model.clone());
        self.build(provider, parser)
    }

    /// Engine whose tables are picked per query by `retriever`.
    pub fn table_retriever(
        self,
        retriever: Arc<dyn ObjectRetriever>,
        context_str_prefix: Option<String>,
    ) -> Result<SqlTableQueryEngine> {
        let provider = Box::new(RetrievedTables::new(retriever, context_str_prefix));
        self.build(provider, SqlParserMode::Default)
    }

    pub fn build(
        self,
        context_provider: Box<dyn TableContextProvider>,
        sql_parser: SqlParserMode,
    ) -> Result<SqlTableQueryEngine> {
        let response_synthesis_prompt = self
            .response_synthesis_prompt
            .unwrap_or_else(|| DEFAULT_RESPONSE_SYNTHESIS_PROMPT_V2.clone());
        validate_synthesis_prompt(&response_synthesis_prompt)?;

        Ok(SqlTableQueryEngine {
            sql_database: self.sql_database,
            context_provider,
            sql_parser,
            text_to_sql_prompt: self
                .text_to_sql_prompt
                .unwrap_or_else(|| DEFAULT_TEXT_TO_SQL_PROMPT.clone()),
            response_synthesis_prompt,
            synthesize_response: self.synthesize_response,
            response_mode: self.response_mode,
            service_context: self.service_context,
        })
    }

    fn table_provider(&self, tables: Option<Vec<TableRef>>) -> Box<dyn TableContextProvider> {
        match tables {
            Some(tables) if !tables.is_empty() => {
                Box::new(SelectedTables::new(tables, self.context_query_kwargs.clone()))
            }
            _ => Box::new(AllTables::new(self.context_query_kwargs.clone())),
        }
    }
}
