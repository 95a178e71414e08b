//! Vector database adapter contract and shared data models.

use crate::error::VectorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A document to store in a vector collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Assigned on insert when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub text: String,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Pre-computed embedding; documents without one are auto-embedded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A single result from a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Normalized similarity in [0, 1]
    pub score: f32,
}

/// The vector database backend contract.
#[async_trait]
pub trait VectorDb: Send + Sync {
    /// Search a collection by vector similarity.
    ///
    /// Results are ordered by descending score with ties broken by
    /// ascending id.
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> std::result::Result<Vec<SearchHit>, VectorError>;

    /// Insert documents. Returns assigned IDs in input order.
    async fn insert(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> std::result::Result<Vec<String>, VectorError>;

    /// Update existing documents by ID (paired positionally).
    async fn update(
        &self,
        collection: &str,
        ids: &[String],
        documents: Vec<Document>,
    ) -> std::result::Result<(), VectorError>;

    /// Delete documents by ID.
    async fn delete(
        &self,
        collection: &str,
        ids: &[String],
    ) -> std::result::Result<(), VectorError>;

    /// List all collections.
    async fn list_collections(&self) -> std::result::Result<Vec<String>, VectorError>;

    /// The embedding dimension of a collection, if it has one yet.
    async fn dimension(&self, collection: &str) -> std::result::Result<Option<usize>, VectorError>;
}
