//! Natural-language questions over SQL databases.
//!
//! A query engine describes the relevant tables to a language model, runs the
//! SQL it writes and optionally has the model phrase the result as an answer.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod query_engine;
pub mod response_synthesis;
pub mod schema;
pub mod schema_rag;
pub mod service_context;
pub mod sql_database;
pub mod sql_parser;
pub mod table_context;

pub use error::{NlSqlError, Result};
pub use query_engine::{
    NlStructStoreQueryEngine, QueryEngine, SqlStructStoreIndex, SqlStructStoreQueryEngine,
    SqlTableQueryEngine, SqlTableQueryEngineBuilder,
};
pub use schema::{QueryBundle, Response, TableRef, TableSchema, SQL_QUERY_KEY};
pub use service_context::ServiceContext;
pub use sql_database::{SqlDatabase, SqliteDatabase};
