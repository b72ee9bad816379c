use async_trait::async_trait;
use sql_query_engine::embeddings::{Embedding, EmbeddingModel};
use sql_query_engine::llm::LlmPredictor;
use sql_query_engine::prompts::PromptTemplate;
use sql_query_engine::query_engine::SqlContextContainer;
use sql_query_engine::{
    NlSqlError, NlStructStoreQueryEngine, QueryBundle, QueryEngine, Result, ServiceContext,
    SqlStructStoreIndex, SqlStructStoreQueryEngine, SqliteDatabase,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

struct QueuedLlm {
    completions: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<String>>,
}

impl QueuedLlm {
    fn new(completions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            completions: Mutex::new(completions.iter().map(|c| c.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmPredictor for QueuedLlm {
    fn predict(&self, prompt: &PromptTemplate, bindings: &[(&str, &str)]) -> Result<String> {
        self.calls.lock().unwrap().push(prompt.format(bindings)?);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| NlSqlError::Llm("no completion queued".to_string()))
    }

    async fn apredict(&self, prompt: &PromptTemplate, bindings: &[(&str, &str)]) -> Result<String> {
        self.predict(prompt, bindings)
    }
}

struct NoEmbedding;

impl EmbeddingModel for NoEmbedding {
    fn get_query_embedding(&self, _query: &str) -> Result<Embedding> {
        Err(NlSqlError::Embedding("embeddings are not used here".to_string()))
    }
}

fn inventory_db() -> Arc<SqliteDatabase> {
    let db = SqliteDatabase::open_in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE items (id INTEGER, label TEXT, qty INTEGER);
         INSERT INTO items VALUES (1, 'bolt', 40), (2, 'nut', 15), (3, 'washer', NULL);",
    )
    .unwrap();
    Arc::new(db)
}

fn index(llm: Arc<QueuedLlm>, container: SqlContextContainer) -> SqlStructStoreIndex {
    SqlStructStoreIndex::new(
        inventory_db(),
        container,
        ServiceContext::new(llm, Arc::new(NoEmbedding)),
    )
}

#[test]
fn test_direct_sql_engine_makes_no_model_call() {
    let llm = QueuedLlm::new(&[]);
    let engine = SqlStructStoreQueryEngine::new(&index(llm.clone(), SqlContextContainer::default()), None);

    let response = engine
        .query(&QueryBundle::new("SELECT label, qty FROM items ORDER BY id"))
        .unwrap();

    assert_eq!(
        response.response.as_deref(),
        Some("[('bolt', 40), ('nut', 15), ('washer', None)]")
    );
    assert_eq!(response.metadata["col_keys"], serde_json::json!(["label", "qty"]));
    assert!(response.sql_query().is_none());
    assert!(llm.calls().is_empty());
}

#[tokio::test]
async fn test_direct_sql_engine_async() {
    let llm = QueuedLlm::new(&[]);
    let engine = SqlStructStoreQueryEngine::new(&index(llm.clone(), SqlContextContainer::default()), None);

    let response = engine
        .aquery(&QueryBundle::new("SELECT SUM(qty) FROM items"))
        .await
        .unwrap();

    assert_eq!(response.response.as_deref(), Some("[(55,)]"));
    assert!(llm.calls().is_empty());
}

#[test]
fn test_direct_sql_engine_container_override() {
    let llm = QueuedLlm::new(&[]);
    let idx = index(llm, SqlContextContainer::from_context_str("index context"));

    let default_engine = SqlStructStoreQueryEngine::new(&idx, None);
    assert_eq!(default_engine.sql_context_container().table_context().unwrap(), "index context");

    let engine = SqlStructStoreQueryEngine::new(&idx, Some(SqlContextContainer::from_context_str("override")));
    assert_eq!(engine.sql_context_container().table_context().unwrap(), "override");
}

#[test]
fn test_nl_engine_with_built_container() {
    let db = inventory_db();
    let mut table_context = HashMap::new();
    table_context.insert("items".to_string(), "Warehouse stock".to_string());
    let container = SqlContextContainer::build(db.as_ref(), &table_context).unwrap();

    let llm = QueuedLlm::new(&["SELECT label FROM items WHERE qty > 20", "Only bolts."]);
    let idx = SqlStructStoreIndex::new(
        db,
        container,
        ServiceContext::new(llm.clone(), Arc::new(NoEmbedding)),
    );
    let engine = NlStructStoreQueryEngine::new(&idx);

    let response = engine.query(&QueryBundle::new("What is well stocked?")).unwrap();

    assert_eq!(response.response.as_deref(), Some("Only bolts."));
    assert_eq!(response.sql_query(), Some("SELECT label FROM items WHERE qty > 20"));

    let calls = llm.calls();
    assert!(calls[0].contains("Schema of table items:\nTable 'items' has columns"));
    assert!(calls[0].contains("Context of table items:\nWarehouse stock"));
    assert!(calls[1].contains("SQL Response: [('bolt',)]"));
}

#[test]
fn test_nl_engine_only_crops_at_result_label() {
    let llm = QueuedLlm::new(&["SELECT COUNT(*) FROM items\nSQLResult: 3\nAnswer: 3"]);
    let engine = NlStructStoreQueryEngine::new(&index(
        llm,
        SqlContextContainer::from_context_str("items(id, label, qty)"),
    ))
    .with_synthesize_response(false);

    let response = engine.query(&QueryBundle::new("How many items?")).unwrap();

    assert_eq!(response.response.as_deref(), Some("[(3,)]"));
    assert_eq!(response.sql_query(), Some("SELECT COUNT(*) FROM items"));
}

#[test]
fn test_nl_engine_keeps_query_label() {
    let llm = QueuedLlm::new(&["SQLQuery: SELECT COUNT(*) FROM items"]);
    let engine = NlStructStoreQueryEngine::new(&index(
        llm,
        SqlContextContainer::from_context_str("items(id, label, qty)"),
    ))
    .with_synthesize_response(false);

    let err = engine.query(&QueryBundle::new("How many items?")).unwrap_err();
    assert!(matches!(err, NlSqlError::Database(_)));
}

#[tokio::test]
async fn test_nl_engine_async_synthesizes() {
    let llm = QueuedLlm::new(&["SELECT MAX(qty) FROM items", "The largest stock is 40."]);
    let engine = NlStructStoreQueryEngine::new(&index(
        llm.clone(),
        SqlContextContainer::from_context_str("items(id, label, qty)"),
    ));

    let response = engine.aquery(&QueryBundle::new("Largest stock?")).await.unwrap();

    assert_eq!(response.response.as_deref(), Some("The largest stock is 40."));
    assert_eq!(llm.calls().len(), 2);
}

#[test]
fn test_nl_engine_without_context_fails_before_model_call() {
    let llm = QueuedLlm::new(&["SELECT 1"]);
    let engine = NlStructStoreQueryEngine::new(&index(llm.clone(), SqlContextContainer::default()));

    let err = engine.query(&QueryBundle::new("anything")).unwrap_err();

    assert!(matches!(err, NlSqlError::Configuration(_)));
    assert!(err.to_string().contains("context_dict must be provided"));
    assert!(llm.calls().is_empty());
}
