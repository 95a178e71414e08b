//! File-backed vector store.
//!
//! Each collection persists as one JSON file under a root directory. The
//! first insert fixes the collection's embedding dimension; later writes
//! must match it. Search scores are cosine similarity mapped into [0, 1],
//! descending, with ties broken by ascending id.
//!
//! This is a bundled backend behind the `VectorDb` trait, not a vector
//! database engine — collections are expected to stay small enough for a
//! full scan per query.

use async_trait::async_trait;
use domekit_core::error::VectorError;
use domekit_core::vector::{Document, SearchHit, VectorDb};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]; 0.0 when either vector is empty or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}

/// Map a cosine similarity into the [0, 1] score range.
fn normalize_score(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDoc {
    id: String,
    text: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Collection {
    dimension: Option<usize>,
    docs: Vec<StoredDoc>,
}

/// A vector store persisting one JSON file per collection.
pub struct FileVectorStore {
    root: PathBuf,
    collections: RwLock<HashMap<String, Collection>>,
}

impl FileVectorStore {
    /// Open a store rooted at `root`, loading any existing collections.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, VectorError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| VectorError::Storage(format!("create {}: {e}", root.display())))?;

        let mut collections = HashMap::new();
        let entries = std::fs::read_dir(&root)
            .map_err(|e| VectorError::Storage(format!("read {}: {e}", root.display())))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| VectorError::Storage(format!("read {}: {e}", path.display())))?;
            let collection: Collection = serde_json::from_str(&raw)
                .map_err(|e| VectorError::Storage(format!("parse {}: {e}", path.display())))?;
            collections.insert(name.to_string(), collection);
        }
        debug!(root = %root.display(), collections = collections.len(), "vector store opened");

        Ok(Self {
            root,
            collections: RwLock::new(collections),
        })
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    fn persist(&self, name: &str, collection: &Collection) -> Result<(), VectorError> {
        let path = self.collection_path(name);
        let body = serde_json::to_string(collection)
            .map_err(|e| VectorError::Storage(e.to_string()))?;
        std::fs::write(&path, body)
            .map_err(|e| VectorError::Storage(format!("write {}: {e}", path.display())))
    }

    /// Collection names become file names; keep them path-safe.
    fn validate_name(name: &str) -> Result<(), VectorError> {
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
            || name.starts_with('.')
        {
            return Err(VectorError::InvalidCollection(name.to_string()));
        }
        Ok(())
    }

    fn check_dimension(
        collection: &mut Collection,
        embedding: &[f32],
    ) -> Result<(), VectorError> {
        match collection.dimension {
            None => {
                collection.dimension = Some(embedding.len());
                Ok(())
            }
            Some(expected) if expected == embedding.len() => Ok(()),
            Some(expected) => Err(VectorError::DimensionMismatch {
                expected,
                got: embedding.len(),
            }),
        }
    }
}

#[async_trait]
impl VectorDb for FileVectorStore {
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, VectorError> {
        Self::validate_name(collection)?;
        let collections = self.collections.read().await;
        let col = collections
            .get(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        if let Some(expected) = col.dimension {
            if expected != query_vector.len() {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    got: query_vector.len(),
                });
            }
        }

        let mut hits: Vec<SearchHit> = col
            .docs
            .iter()
            .map(|doc| SearchHit {
                id: doc.id.clone(),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
                score: normalize_score(cosine_similarity(&doc.embedding, query_vector)),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn insert(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<String>, VectorError> {
        Self::validate_name(collection)?;
        let mut collections = self.collections.write().await;
        let col = collections.entry(collection.to_string()).or_default();

        let mut ids = Vec::with_capacity(documents.len());
        for doc in documents {
            let embedding = doc.embedding.ok_or_else(|| {
                VectorError::Storage(format!(
                    "document '{}' has no embedding",
                    doc.id.as_deref().unwrap_or("<unnamed>")
                ))
            })?;
            Self::check_dimension(col, &embedding)?;
            let id = doc.id.unwrap_or_else(|| Uuid::new_v4().to_string());
            col.docs.retain(|d| d.id != id);
            col.docs.push(StoredDoc {
                id: id.clone(),
                text: doc.text,
                metadata: doc.metadata,
                embedding,
            });
            ids.push(id);
        }
        self.persist(collection, col)?;
        Ok(ids)
    }

    async fn update(
        &self,
        collection: &str,
        ids: &[String],
        documents: Vec<Document>,
    ) -> Result<(), VectorError> {
        Self::validate_name(collection)?;
        if ids.len() != documents.len() {
            return Err(VectorError::Storage(format!(
                "ids/documents length mismatch: {} vs {}",
                ids.len(),
                documents.len()
            )));
        }
        let mut collections = self.collections.write().await;
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        for (id, doc) in ids.iter().zip(documents) {
            let embedding = doc
                .embedding
                .ok_or_else(|| VectorError::Storage(format!("document '{id}' has no embedding")))?;
            Self::check_dimension(col, &embedding)?;
            let slot = col
                .docs
                .iter_mut()
                .find(|d| &d.id == id)
                .ok_or_else(|| VectorError::Storage(format!("no document with id '{id}'")))?;
            slot.text = doc.text;
            slot.metadata = doc.metadata;
            slot.embedding = embedding;
        }
        self.persist(collection, col)?;
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), VectorError> {
        Self::validate_name(collection)?;
        let mut collections = self.collections.write().await;
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;
        col.docs.retain(|d| !ids.contains(&d.id));
        self.persist(collection, col)?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorError> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn dimension(&self, collection: &str) -> Result<Option<usize>, VectorError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|c| c.dimension))
    }
}
