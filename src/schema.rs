//! Core data model shared by the query engines.

use crate::error::{NlSqlError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata attached to execution results and responses.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key under which the executed SQL text is always recorded.
pub const SQL_QUERY_KEY: &str = "sql_query";

/// A single question posed to an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBundle {
    pub query_str: String,
    /// Precomputed question embedding. Engines never read it.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl QueryBundle {
    pub fn new(query_str: impl Into<String>) -> Self {
        Self {
            query_str: query_str.into(),
            embedding: None,
        }
    }
}

impl From<&str> for QueryBundle {
    fn from(query_str: &str) -> Self {
        Self::new(query_str)
    }
}

impl From<String> for QueryBundle {
    fn from(query_str: String) -> Self {
        Self::new(query_str)
    }
}

/// Table name paired with an optional human-written description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    #[serde(default)]
    pub context_str: Option<String>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            context_str: None,
        }
    }

    pub fn with_context(mut self, context_str: impl Into<String>) -> Self {
        self.context_str = Some(context_str.into());
        self
    }
}

/// A reflected table handle, richer than a bare name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlTable {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
}

/// Either a table name or a table handle; both normalize to a name.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Name(String),
    Table(SqlTable),
}

impl TableRef {
    pub fn name(&self) -> &str {
        match self {
            TableRef::Name(name) => name,
            TableRef::Table(table) => &table.name,
        }
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        TableRef::Name(name.to_string())
    }
}

impl From<String> for TableRef {
    fn from(name: String) -> Self {
        TableRef::Name(name)
    }
}

impl From<SqlTable> for TableRef {
    fn from(table: SqlTable) -> Self {
        TableRef::Table(table)
    }
}

/// Table references arrive as loose JSON in engine configs: a string or a
/// `{"name": ..}` object. Anything else is rejected.
impl TryFrom<serde_json::Value> for TableRef {
    type Error = NlSqlError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(name) => Ok(TableRef::Name(name)),
            serde_json::Value::Object(_) => serde_json::from_value::<SqlTable>(value.clone())
                .map(TableRef::Table)
                .map_err(|_| NlSqlError::Configuration(format!("Unknown table type: {}", value))),
            other => Err(NlSqlError::Configuration(format!("Unknown table type: {}", other))),
        }
    }
}

/// Plain text payload handed to a response synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub text: String,
}

impl TextNode {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWithScore {
    pub node: TextNode,
    #[serde(default)]
    pub score: Option<f32>,
}

impl NodeWithScore {
    pub fn new(node: TextNode) -> Self {
        Self { node, score: None }
    }
}

/// Final answer returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response: Option<String>,
    #[serde(default)]
    pub source_nodes: Vec<NodeWithScore>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Response {
    pub fn new(response: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            response: Some(response.into()),
            source_nodes: Vec::new(),
            metadata,
        }
    }

    /// The SQL statement that produced this response, if recorded.
    pub fn sql_query(&self) -> Option<&str> {
        self.metadata.get(SQL_QUERY_KEY).and_then(|v| v.as_str())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.response.as_deref().unwrap_or("None"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_ref_from_json() {
        let by_name = TableRef::try_from(json!("orders")).unwrap();
        assert_eq!(by_name.name(), "orders");

        let by_handle = TableRef::try_from(json!({"name": "users", "schema": "main"})).unwrap();
        assert_eq!(by_handle.name(), "users");
        assert!(matches!(by_handle, TableRef::Table(_)));
    }

    #[test]
    fn test_table_ref_rejects_unknown_types() {
        for value in [json!(42), json!(null), json!(["orders"]), json!({"table": "orders"})] {
            let err = TableRef::try_from(value).unwrap_err();
            assert!(matches!(err, NlSqlError::Configuration(_)));
        }
    }

    #[test]
    fn test_response_display() {
        let mut metadata = Metadata::new();
        metadata.insert(SQL_QUERY_KEY.to_string(), json!("SELECT 1"));
        let response = Response::new("1", metadata);
        assert_eq!(response.to_string(), "1");
        assert_eq!(response.sql_query(), Some("SELECT 1"));
        assert_eq!(Response::default().to_string(), "None");
    }
}
