//! In-memory vector store with linear cosine-similarity search.

use crate::embeddings::Embedding;
use crate::error::{NlSqlError, Result};
use tracing::warn;

/// Document in the vector store
#[derive(Debug, Clone)]
pub struct Document<T> {
    pub id: String,
    pub text: String,
    pub payload: T,
    pub embedding: Embedding,
}

/// Search result from vector store
#[derive(Debug, Clone)]
pub struct SearchResult<T> {
    pub document: Document<T>,
    pub score: f32,
}

/// Documents are kept in insertion order; search is O(n) over all of them.
pub struct InMemoryVectorStore<T> {
    documents: Vec<Document<T>>,
    /// Dimension of the first stored embedding
    dimension: Option<usize>,
}

impl<T: Clone> InMemoryVectorStore<T> {
    pub fn new() -> Self {
        Self {
            documents: Vec::new(),
            dimension: None,
        }
    }

    /// Add a document to the store. Documents whose embedding dimension
    /// disagrees with the store are skipped.
    pub fn add_document(&mut self, document: Document<T>) {
        let dimension = *self.dimension.get_or_insert(document.embedding.len());
        if document.embedding.len() != dimension {
            warn!(
                "Embedding dimension {} doesn't match store dimension {}, skipping {}",
                document.embedding.len(),
                dimension,
                document.id
            );
            return;
        }
        self.documents.push(document);
    }

    pub fn add_documents(&mut self, documents: Vec<Document<T>>) {
        for doc in documents {
            self.add_document(doc);
        }
    }

    /// Returns up to `top_k` documents ordered by descending similarity.
    /// Ties keep insertion order.
    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult<T>>> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };

        if query_embedding.len() != dimension {
            return Err(NlSqlError::Embedding(format!(
                "Query embedding dimension {} doesn't match store dimension {}",
                query_embedding.len(),
                dimension
            )));
        }

        let mut results: Vec<SearchResult<T>> = self
            .documents
            .iter()
            .map(|doc| SearchResult {
                document: doc.clone(),
                score: cosine_similarity(query_embedding, &doc.embedding),
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);

        Ok(results)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl<T: Clone> Default for InMemoryVectorStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
