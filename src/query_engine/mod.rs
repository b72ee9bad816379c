//! Query engines
//!
//! `sql_table` holds the text-to-SQL orchestrator; `struct_store` keeps the
//! older direct-SQL and natural-language engines for existing callers.

pub mod sql_table;
pub mod struct_store;

pub use sql_table::*;
pub use struct_store::*;

use crate::error::Result;
use crate::schema::{QueryBundle, Response};
use async_trait::async_trait;

#[async_trait]
pub trait QueryEngine: Send + Sync {
    fn query(&self, query: &QueryBundle) -> Result<Response>;

    async fn aquery(&self, query: &QueryBundle) -> Result<Response>;
}
