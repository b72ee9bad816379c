//! Table context providers
//!
//! A provider turns a query into the schema block handed to the text-to-SQL
//! prompt. All providers render tables through [`describe_table`] and join
//! them with [`join_context`]; they only differ in which tables they pick.

use crate::error::Result;
use crate::schema::{QueryBundle, TableRef, TableSchema};
use crate::schema_rag::ObjectRetriever;
use crate::sql_database::SqlDatabase;
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;

/// Phrase joining a table's structural info and its description.
pub const TABLE_DESCRIPTION_PREFIX: &str = " The table description is: ";

#[async_trait]
pub trait TableContextProvider: Send + Sync {
    fn get_table_context(&self, db: &dyn SqlDatabase, query: &QueryBundle) -> Result<String>;

    /// Used by async query paths. Only providers that consult a remote
    /// collaborator need to override it.
    async fn aget_table_context(&self, db: &dyn SqlDatabase, query: &QueryBundle) -> Result<String> {
        self.get_table_context(db, query)
    }
}

/// Structural info for `table_name`, with `annotation` appended when given.
pub fn describe_table(
    db: &dyn SqlDatabase,
    table_name: &str,
    annotation: Option<&str>,
) -> Result<String> {
    let mut table_info = db.get_single_table_info(table_name)?;
    if let Some(annotation) = annotation {
        table_info.push_str(TABLE_DESCRIPTION_PREFIX);
        table_info.push_str(annotation);
    }
    Ok(table_info)
}

/// Long-form table text used for embedding and for legacy context
/// containers: a `Schema of table` header, the structural info and an
/// optional `Context of table` section.
pub fn table_schema_text(
    db: &dyn SqlDatabase,
    table_name: &str,
    context: Option<&str>,
) -> Result<String> {
    let table_info = db.get_single_table_info(table_name)?;
    let mut text = format!("Schema of table {}:\n{}\n", table_name, table_info);
    if let Some(context) = context {
        text.push_str(&format!("Context of table {}:\n{}", table_name, context));
    }
    Ok(text)
}

pub fn join_context<I>(parts: I) -> String
where
    I: IntoIterator<Item = String>,
{
    parts.into_iter().join("\n\n")
}

/// Caller-chosen tables, rendered in the given order.
pub struct SelectedTables {
    tables: Vec<TableRef>,
    context_query_kwargs: HashMap<String, String>,
}

impl SelectedTables {
    pub fn new(tables: Vec<TableRef>, context_query_kwargs: HashMap<String, String>) -> Self {
        Self {
            tables,
            context_query_kwargs,
        }
    }
}

impl TableContextProvider for SelectedTables {
    fn get_table_context(&self, db: &dyn SqlDatabase, _query: &QueryBundle) -> Result<String> {
        let parts = self
            .tables
            .iter()
            .map(|table| {
                let name = table.name();
                describe_table(db, name, self.context_query_kwargs.get(name).map(String::as_str))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(join_context(parts))
    }
}

/// Every usable table, in the order the database reports them.
pub struct AllTables {
    context_query_kwargs: HashMap<String, String>,
}

impl AllTables {
    pub fn new(context_query_kwargs: HashMap<String, String>) -> Self {
        Self { context_query_kwargs }
    }
}

impl TableContextProvider for AllTables {
    fn get_table_context(&self, db: &dyn SqlDatabase, _query: &QueryBundle) -> Result<String> {
        let parts = db
            .get_usable_table_names()?
            .iter()
            .map(|name| {
                describe_table(db, name, self.context_query_kwargs.get(name).map(String::as_str))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(join_context(parts))
    }
}

/// Tables chosen per query by an [`ObjectRetriever`], annotated with their
/// own context strings.
pub struct RetrievedTables {
    retriever: Arc<dyn ObjectRetriever>,
    context_str_prefix: Option<String>,
}

impl RetrievedTables {
    pub fn new(retriever: Arc<dyn ObjectRetriever>, context_str_prefix: Option<String>) -> Self {
        Self {
            retriever,
            context_str_prefix,
        }
    }
}

impl RetrievedTables {
    fn render(&self, db: &dyn SqlDatabase, table_schemas: Vec<TableSchema>) -> Result<String> {
        let mut parts: Vec<String> = self.context_str_prefix.iter().cloned().collect();

        for table_schema in table_schemas {
            let annotation = table_schema.context_str.as_deref().filter(|c| !c.is_empty());
            parts.push(describe_table(db, &table_schema.table_name, annotation)?);
        }

        Ok(join_context(parts))
    }
}

#[async_trait]
impl TableContextProvider for RetrievedTables {
    fn get_table_context(&self, db: &dyn SqlDatabase, query: &QueryBundle) -> Result<String> {
        let table_schemas = self.retriever.retrieve(query)?;
        self.render(db, table_schemas)
    }

    async fn aget_table_context(&self, db: &dyn SqlDatabase, query: &QueryBundle) -> Result<String> {
        let table_schemas = self.retriever.aretrieve(query).await?;
        self.render(db, table_schemas)
    }
}
