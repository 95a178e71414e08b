//! vector_manage tool — insert, update, delete in a local vector collection.

use async_trait::async_trait;
use domekit_core::adapter::EmbeddingAdapter;
use domekit_core::error::ToolError;
use domekit_core::policy::VectorOp;
use domekit_core::tool::{Tool, ToolContext, ToolDefinition, ToolOutput};
use domekit_core::vector::{Document, VectorDb};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct VectorManageArgs {
    collection: String,
    operation: String,
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    ids: Vec<String>,
}

pub struct VectorManageTool {
    embedding: Option<Arc<dyn EmbeddingAdapter>>,
    vector: Option<Arc<dyn VectorDb>>,
}

impl VectorManageTool {
    pub fn new(
        embedding: Option<Arc<dyn EmbeddingAdapter>>,
        vector: Option<Arc<dyn VectorDb>>,
    ) -> Self {
        Self { embedding, vector }
    }

    /// Embed every document that arrived without a pre-computed embedding.
    async fn auto_embed(&self, mut documents: Vec<Document>) -> Result<Vec<Document>, String> {
        let mut texts = Vec::new();
        let mut indices = Vec::new();
        for (i, doc) in documents.iter().enumerate() {
            if doc.embedding.is_none() {
                texts.push(doc.text.clone());
                indices.push(i);
            }
        }
        if texts.is_empty() {
            return Ok(documents);
        }

        let Some(embedding) = &self.embedding else {
            return Err("Embedding adapter not configured; provide embeddings inline.".into());
        };
        let vectors = embedding
            .embed(&texts)
            .await
            .map_err(|e| format!("Embedding failed: {e}"))?;
        if vectors.len() != indices.len() {
            return Err(format!(
                "Embedding returned {} vectors for {} texts",
                vectors.len(),
                indices.len()
            ));
        }
        for (idx, vector) in indices.into_iter().zip(vectors) {
            documents[idx].embedding = Some(vector);
        }
        Ok(documents)
    }
}

#[async_trait]
impl Tool for VectorManageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "vector_manage".into(),
            description: "Insert, update, or delete documents in a local vector database collection."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Name of the vector collection."
                    },
                    "operation": {
                        "type": "string",
                        "enum": ["insert", "update", "delete"],
                        "description": "Operation to perform."
                    },
                    "documents": {
                        "type": "array",
                        "items": {"type": "object"},
                        "description": "Documents with text and optional metadata."
                    },
                    "ids": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Document IDs (for update/delete)."
                    },
                },
                "required": ["collection", "operation"],
                "additionalProperties": false,
            }),
            permissions: vec!["data:vector_db_write".into()],
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let args: VectorManageArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let decision = ctx.policy.check_vector(&args.collection, VectorOp::Write);
        if !decision.is_allow() {
            return Ok(ToolOutput::fail(decision.reason));
        }

        let Some(vector_db) = &self.vector else {
            return Ok(ToolOutput::fail("Vector database backend not configured."));
        };

        match args.operation.as_str() {
            "insert" => {
                if args.documents.is_empty() {
                    return Ok(ToolOutput::fail("No documents provided for insert."));
                }
                let documents = match self.auto_embed(args.documents).await {
                    Ok(docs) => docs,
                    Err(e) => return Ok(ToolOutput::fail(e)),
                };
                match vector_db.insert(&args.collection, documents).await {
                    Ok(ids) => {
                        let count = ids.len();
                        Ok(ToolOutput::ok(serde_json::json!({
                            "operation": "insert",
                            "ids": ids,
                            "count": count,
                        })))
                    }
                    Err(e) => Ok(ToolOutput::fail(format!("Insert failed: {e}"))),
                }
            }
            "update" => {
                if args.ids.is_empty() {
                    return Ok(ToolOutput::fail("No IDs provided for update."));
                }
                if args.documents.is_empty() {
                    return Ok(ToolOutput::fail("No documents provided for update."));
                }
                let documents = match self.auto_embed(args.documents).await {
                    Ok(docs) => docs,
                    Err(e) => return Ok(ToolOutput::fail(e)),
                };
                match vector_db.update(&args.collection, &args.ids, documents).await {
                    Ok(()) => {
                        let count = args.ids.len();
                        Ok(ToolOutput::ok(serde_json::json!({
                            "operation": "update",
                            "ids": args.ids,
                            "count": count,
                        })))
                    }
                    Err(e) => Ok(ToolOutput::fail(format!("Update failed: {e}"))),
                }
            }
            "delete" => {
                if args.ids.is_empty() {
                    return Ok(ToolOutput::fail("No IDs provided for delete."));
                }
                match vector_db.delete(&args.collection, &args.ids).await {
                    Ok(()) => {
                        let count = args.ids.len();
                        Ok(ToolOutput::ok(serde_json::json!({
                            "operation": "delete",
                            "ids": args.ids,
                            "count": count,
                        })))
                    }
                    Err(e) => Ok(ToolOutput::fail(format!("Delete failed: {e}"))),
                }
            }
            other => Ok(ToolOutput::fail(format!("Unknown operation: {other}"))),
        }
    }
}
