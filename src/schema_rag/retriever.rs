//! Table schema retrieval
//!
//! Selects the tables relevant to a question by embedding each table's
//! description once and ranking them against the question embedding.

use crate::embeddings::EmbeddingModel;
use crate::error::Result;
use crate::schema::{QueryBundle, TableSchema};
use crate::schema_rag::vector_store::{Document, InMemoryVectorStore};
use crate::sql_database::SqlDatabase;
use crate::table_context::table_schema_text;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Source of table schema descriptors for a query.
#[async_trait]
pub trait ObjectRetriever: Send + Sync {
    fn retrieve(&self, query: &QueryBundle) -> Result<Vec<TableSchema>>;

    /// Non-blocking counterpart of [`ObjectRetriever::retrieve`]. Defaults to
    /// the sync call, which suits retrievers that do no I/O.
    async fn aretrieve(&self, query: &QueryBundle) -> Result<Vec<TableSchema>> {
        self.retrieve(query)
    }
}

/// Embedding-backed retriever over a fixed set of table schemas.
pub struct TableSchemaRetriever {
    vector_store: InMemoryVectorStore<TableSchema>,
    embed_model: Arc<dyn EmbeddingModel>,
    similarity_top_k: usize,
}

impl TableSchemaRetriever {
    pub const DEFAULT_SIMILARITY_TOP_K: usize = 1;

    /// Embeds every schema's table info plus its context string.
    pub fn from_table_schemas(
        db: &dyn SqlDatabase,
        table_schemas: Vec<TableSchema>,
        embed_model: Arc<dyn EmbeddingModel>,
    ) -> Result<Self> {
        let mut vector_store = InMemoryVectorStore::new();
        for schema in table_schemas {
            let text = table_schema_text(db, &schema.table_name, schema.context_str.as_deref())?;
            let embedding = embed_model.get_text_embedding(&text)?;
            vector_store.add_document(Document {
                id: format!("table:{}", schema.table_name),
                text,
                payload: schema,
                embedding,
            });
        }
        info!("Indexed {} table schemas", vector_store.len());

        Ok(Self {
            vector_store,
            embed_model,
            similarity_top_k: Self::DEFAULT_SIMILARITY_TOP_K,
        })
    }

    pub fn with_similarity_top_k(mut self, similarity_top_k: usize) -> Self {
        self.similarity_top_k = similarity_top_k;
        self
    }

    pub fn len(&self) -> usize {
        self.vector_store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector_store.is_empty()
    }
}

impl TableSchemaRetriever {
    fn rank(&self, query_embedding: &[f32]) -> Result<Vec<TableSchema>> {
        let results = self.vector_store.search(query_embedding, self.similarity_top_k)?;
        debug!(
            "Retrieved tables: {:?}",
            results.iter().map(|r| (&r.document.payload.table_name, r.score)).collect::<Vec<_>>()
        );
        Ok(results.into_iter().map(|r| r.document.payload).collect())
    }
}

#[async_trait]
impl ObjectRetriever for TableSchemaRetriever {
    fn retrieve(&self, query: &QueryBundle) -> Result<Vec<TableSchema>> {
        let query_embedding = match query.embedding {
            Some(ref embedding) => embedding.clone(),
            None => self.embed_model.get_query_embedding(&query.query_str)?,
        };
        self.rank(&query_embedding)
    }

    async fn aretrieve(&self, query: &QueryBundle) -> Result<Vec<TableSchema>> {
        let query_embedding = match query.embedding {
            Some(ref embedding) => embedding.clone(),
            None => self.embed_model.aget_query_embedding(&query.query_str).await?,
        };
        self.rank(&query_embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedding;
    use crate::error::NlSqlError;
    use crate::sql_database::SqliteDatabase;

    /// Scores text by whether it mentions orders or users.
    struct KeywordEmbedding;

    impl EmbeddingModel for KeywordEmbedding {
        fn get_query_embedding(&self, text: &str) -> Result<Embedding> {
            let text = text.to_lowercase();
            Ok(vec![
                if text.contains("order") { 1.0 } else { 0.0 },
                if text.contains("user") { 1.0 } else { 0.0 },
                0.1,
            ])
        }
    }

    /// Indexes like [`KeywordEmbedding`] but refuses blocking query calls.
    struct AsyncQueryEmbedding;

    #[async_trait]
    impl EmbeddingModel for AsyncQueryEmbedding {
        fn get_query_embedding(&self, _text: &str) -> Result<Embedding> {
            Err(NlSqlError::Embedding("blocking path used".to_string()))
        }

        fn get_text_embedding(&self, text: &str) -> Result<Embedding> {
            KeywordEmbedding.get_query_embedding(text)
        }

        async fn aget_query_embedding(&self, text: &str) -> Result<Embedding> {
            KeywordEmbedding.get_query_embedding(text)
        }
    }

    fn sample_db() -> SqliteDatabase {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE users (id INTEGER, name TEXT);
             CREATE TABLE orders (id INTEGER, total REAL);",
        )
        .unwrap();
        db
    }

    #[test]
    fn test_retrieves_most_similar_table() {
        let db = sample_db();
        let retriever = TableSchemaRetriever::from_table_schemas(
            &db,
            vec![
                TableSchema::new("users").with_context("People with accounts"),
                TableSchema::new("orders").with_context("Purchases"),
            ],
            Arc::new(KeywordEmbedding),
        )
        .unwrap();
        assert_eq!(retriever.len(), 2);

        let tables = retriever.retrieve(&QueryBundle::new("total order value")).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table_name, "orders");
        assert_eq!(tables[0].context_str.as_deref(), Some("Purchases"));

        let retriever = retriever.with_similarity_top_k(5);
        let tables = retriever.retrieve(&QueryBundle::new("which user?")).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].table_name, "users");
    }

    #[test]
    fn test_unknown_table_fails_indexing() {
        let db = sample_db();
        let result = TableSchemaRetriever::from_table_schemas(
            &db,
            vec![TableSchema::new("missing")],
            Arc::new(KeywordEmbedding),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_aretrieve_uses_async_embedding() {
        let db = sample_db();
        let retriever = TableSchemaRetriever::from_table_schemas(
            &db,
            vec![TableSchema::new("users"), TableSchema::new("orders")],
            Arc::new(AsyncQueryEmbedding),
        )
        .unwrap();

        let tables = retriever.aretrieve(&QueryBundle::new("largest order")).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table_name, "orders");
        assert!(retriever.retrieve(&QueryBundle::new("largest order")).is_err());
    }
}
