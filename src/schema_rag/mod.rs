pub mod retriever;
pub mod vector_store;

pub use retriever::*;
pub use vector_store::*;
