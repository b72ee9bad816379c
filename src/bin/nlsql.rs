use anyhow::{Context, Result};
use clap::Parser;
use sql_query_engine::config::{EngineConfig, LlmConfig};
use sql_query_engine::query_engine::SqlContextContainer;
use sql_query_engine::schema_rag::TableSchemaRetriever;
use sql_query_engine::{
    QueryBundle, QueryEngine, ServiceContext, SqlDatabase, SqlStructStoreIndex,
    SqlStructStoreQueryEngine, SqlTableQueryEngine, SqliteDatabase, TableRef, TableSchema,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlsql")]
#[command(about = "Ask natural-language questions against a SQLite database")]
#[command(version)]
struct Args {
    /// The question in natural language (or SQL with --raw-sql)
    question: String,

    /// Path to the SQLite database file
    #[arg(short, long)]
    db: PathBuf,

    /// Comma-separated tables to describe to the model (default: all tables)
    #[arg(short, long, value_delimiter = ',')]
    tables: Vec<String>,

    /// JSON engine config (tables, context_query_kwargs, synthesize_response)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the raw SQL result instead of a synthesized answer
    #[arg(long)]
    no_synthesis: bool,

    /// Use the blocking query path instead of the async one
    #[arg(long)]
    sync: bool,

    /// Run the question as SQL without calling the model
    #[arg(long)]
    raw_sql: bool,

    /// Tables retrieved per question when the config sets context_str_prefix
    #[arg(long, default_value_t = TableSchemaRetriever::DEFAULT_SIMILARITY_TOP_K)]
    top_k: usize,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let sql_database = Arc::new(
        SqliteDatabase::open_read_only(&args.db)
            .with_context(|| format!("Failed to open {}", args.db.display()))?,
    );

    let engine: Box<dyn QueryEngine> = if args.raw_sql {
        let llm_config =
            LlmConfig::from_env_or(args.api_key.clone()).unwrap_or_else(|_| LlmConfig::offline());
        let index = SqlStructStoreIndex::new(
            sql_database,
            SqlContextContainer::default(),
            ServiceContext::from_config(&llm_config),
        );
        Box::new(SqlStructStoreQueryEngine::new(&index, None))
    } else {
        let llm_config = LlmConfig::from_env_or(args.api_key.clone())?;
        info!("Using model {} at {}", llm_config.model, llm_config.base_url);

        let engine_config = match args.config {
            Some(ref path) => EngineConfig::from_file(path)
                .with_context(|| format!("Failed to load engine config {}", path.display()))?,
            None => EngineConfig::default(),
        };

        let tables = if args.tables.is_empty() {
            engine_config.table_refs()?
        } else {
            Some(args.tables.iter().cloned().map(TableRef::from).collect())
        };

        let service_context = ServiceContext::from_config(&llm_config);
        let builder = SqlTableQueryEngine::builder(sql_database.clone(), service_context.clone())
            .context_query_kwargs(engine_config.context_query_kwargs.clone())
            .synthesize_response(engine_config.synthesize_response && !args.no_synthesis);

        match engine_config.context_str_prefix {
            Some(prefix) => {
                let table_schemas: Vec<TableSchema> = match tables {
                    Some(tables) if !tables.is_empty() => {
                        tables.iter().map(|t| t.name().to_string()).collect::<Vec<_>>()
                    }
                    _ => sql_database.get_usable_table_names()?,
                }
                .into_iter()
                .map(|name| match engine_config.context_query_kwargs.get(&name) {
                    Some(context) => TableSchema::new(name.as_str()).with_context(context.as_str()),
                    None => TableSchema::new(name),
                })
                .collect();
                let retriever = TableSchemaRetriever::from_table_schemas(
                    sql_database.as_ref(),
                    table_schemas,
                    service_context.embed_model.clone(),
                )?
                .with_similarity_top_k(args.top_k);
                Box::new(builder.table_retriever(Arc::new(retriever), Some(prefix))?)
            }
            None => Box::new(builder.nl_sql(tables)?),
        }
    };

    let query = QueryBundle::new(args.question.clone());
    let response = if args.sync {
        engine.query(&query)?
    } else {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(engine.aquery(&query))?
    };

    println!("{}", response);
    if let Some(sql) = response.sql_query() {
        println!("\nSQL: {}", sql);
    }

    Ok(())
}
