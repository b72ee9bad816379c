//! Prompt templates
//!
//! `{name}` placeholders are substituted on format; `{{` and `}}` render as
//! literal braces. Partial bindings are stored on the template and applied on
//! every later `format` call.

use crate::error::{NlSqlError, Result};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};

lazy_static! {
    static ref TEMPLATE_TOKEN: Regex =
        Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid template regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptType {
    TextToSql,
    SqlResponseSynthesis,
    SqlResponseSynthesisV2,
    QuestionAnswer,
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    template: String,
    prompt_type: PromptType,
    partial_vars: BTreeMap<String, String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self::with_type(template, PromptType::Custom)
    }

    pub fn with_type(template: impl Into<String>, prompt_type: PromptType) -> Self {
        Self {
            template: template.into(),
            prompt_type,
            partial_vars: BTreeMap::new(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn prompt_type(&self) -> PromptType {
        self.prompt_type
    }

    /// Every variable the template declares, including partially bound ones.
    pub fn template_vars(&self) -> BTreeSet<String> {
        TEMPLATE_TOKEN
            .captures_iter(&self.template)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Returns a copy with `bindings` pre-bound. Later bindings win over
    /// earlier partial ones.
    pub fn partial_format(&self, bindings: &[(&str, &str)]) -> Self {
        let mut partial = self.clone();
        for (name, value) in bindings {
            partial
                .partial_vars
                .insert((*name).to_string(), (*value).to_string());
        }
        partial
    }

    /// Renders the template. Bindings for variables the template does not
    /// declare are ignored; a declared variable with no binding is an error.
    pub fn format(&self, bindings: &[(&str, &str)]) -> Result<String> {
        let mut values: BTreeMap<&str, &str> = self
            .partial_vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        values.extend(bindings.iter().copied());

        if let Some(missing) = self
            .template_vars()
            .into_iter()
            .find(|var| !values.contains_key(var.as_str()))
        {
            return Err(NlSqlError::Configuration(format!(
                "Missing value for template variable '{}'",
                missing
            )));
        }

        let rendered = TEMPLATE_TOKEN.replace_all(&self.template, |caps: &Captures| {
            match caps.get(1) {
                Some(var) => values.get(var.as_str()).copied().unwrap_or_default().to_string(),
                None if &caps[0] == "{{" => "{".to_string(),
                None => "}".to_string(),
            }
        });
        Ok(rendered.into_owned())
    }
}

const TEXT_TO_SQL_TMPL: &str = "Given an input question, first create a syntactically correct {dialect} \
query to run, then look at the results of the query and return the answer. \
You can order the results by a relevant column to return the most interesting examples in the database.\n\n\
Never query for all the columns from a specific table, only ask for a few relevant columns given the question.\n\n\
Pay attention to use only the column names that you can see in the schema description. \
Be careful to not query for columns that do not exist. \
Pay attention to which column is in which table. \
Also, qualify column names with the table name when needed. \
You are required to use the following format, each taking one line:\n\n\
Question: Question here\n\
SQLQuery: SQL Query to run\n\
SQLResult: Result of the SQLQuery\n\
Answer: Final answer here\n\n\
Only use tables listed below.\n\
{schema}\n\n\
Question: {query_str}\n\
SQLQuery: ";

const TEXT_TO_SQL_PGVECTOR_TMPL: &str = "Given an input question, first create a syntactically correct {dialect} \
query to run, then look at the results of the query and return the answer. \
You can order the results by a relevant column to return the most interesting examples in the database.\n\n\
Pay attention to use only the column names that you can see in the schema description. \
Be careful to not query for columns that do not exist. \
Pay attention to which column is in which table. \
Also, qualify column names with the table name when needed.\n\n\
IMPORTANT NOTE: you can use specialized pgvector syntax (`<->`) to do nearest neighbors/semantic search \
to a given vector from an embeddings column in the table. \
The embeddings value for a given row typically represents the semantic meaning of that row. \
The vector represents an embedding representation of the question, given below. \
Do NOT fill in the vector values directly, but rather specify a `[query_vector]` placeholder. \
For instance, some select statement examples below (the name of the embeddings column is `embedding`):\n\
SELECT * FROM items ORDER BY embedding <-> '[query_vector]' LIMIT 5;\n\
SELECT * FROM items WHERE id != 1 ORDER BY embedding <-> (SELECT embedding FROM items WHERE id = 1) LIMIT 5;\n\
SELECT * FROM items WHERE embedding <-> '[query_vector]' < 5;\n\n\
You are required to use the following format, each taking one line:\n\n\
Question: Question here\n\
SQLQuery: SQL Query to run\n\
SQLResult: Result of the SQLQuery\n\
Answer: Final answer here\n\n\
Only use tables listed below.\n\
{schema}\n\n\
Question: {query_str}\n\
SQLQuery: ";

const RESPONSE_SYNTHESIS_TMPL: &str = "Given an input question, synthesize a response from the query results.\n\
Query: {query_str}\n\
SQL: {sql_query}\n\
SQL Response: {sql_response_str}\n\
Response: ";

const RESPONSE_SYNTHESIS_TMPL_V2: &str = "Given an input question, synthesize a response from the query results.\n\
Query: {query_str}\n\
SQL: {sql_query}\n\
SQL Response: {context_str}\n\
Response: ";

const TEXT_QA_TMPL: &str = "Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query_str}\n\
Answer: ";

lazy_static! {
    pub static ref DEFAULT_TEXT_TO_SQL_PROMPT: PromptTemplate =
        PromptTemplate::with_type(TEXT_TO_SQL_TMPL, PromptType::TextToSql);
    pub static ref DEFAULT_TEXT_TO_SQL_PGVECTOR_PROMPT: PromptTemplate =
        PromptTemplate::with_type(TEXT_TO_SQL_PGVECTOR_TMPL, PromptType::TextToSql);
    /// Used only by the legacy natural-language engine.
    pub static ref DEFAULT_RESPONSE_SYNTHESIS_PROMPT: PromptTemplate =
        PromptTemplate::with_type(RESPONSE_SYNTHESIS_TMPL, PromptType::SqlResponseSynthesis);
    pub static ref DEFAULT_RESPONSE_SYNTHESIS_PROMPT_V2: PromptTemplate =
        PromptTemplate::with_type(RESPONSE_SYNTHESIS_TMPL_V2, PromptType::SqlResponseSynthesisV2);
    pub static ref DEFAULT_TEXT_QA_PROMPT: PromptTemplate =
        PromptTemplate::with_type(TEXT_QA_TMPL, PromptType::QuestionAnswer);
}
