//! vector_search tool — similarity search against a local vector collection.

use async_trait::async_trait;
use domekit_core::adapter::EmbeddingAdapter;
use domekit_core::error::ToolError;
use domekit_core::policy::VectorOp;
use domekit_core::tool::{Tool, ToolContext, ToolDefinition, ToolOutput};
use domekit_core::vector::VectorDb;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct VectorSearchArgs {
    collection: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    query_vector: Option<Vec<f32>>,
    #[serde(default)]
    top_k: Option<usize>,
}

pub struct VectorSearchTool {
    embedding: Option<Arc<dyn EmbeddingAdapter>>,
    vector: Option<Arc<dyn VectorDb>>,
}

impl VectorSearchTool {
    pub fn new(
        embedding: Option<Arc<dyn EmbeddingAdapter>>,
        vector: Option<Arc<dyn VectorDb>>,
    ) -> Self {
        Self { embedding, vector }
    }
}

#[async_trait]
impl Tool for VectorSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "vector_search".into(),
            description: "Search a local vector database collection by semantic similarity."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Name of the vector collection."
                    },
                    "query": {
                        "type": "string",
                        "description": "Text to search for (auto-embedded)."
                    },
                    "query_vector": {
                        "type": "array",
                        "items": {"type": "number"},
                        "description": "Raw embedding vector (alternative to text query)."
                    },
                    "top_k": {
                        "type": "integer",
                        "description": "Number of results to return."
                    },
                },
                "required": ["collection"],
                "additionalProperties": false,
            }),
            permissions: vec!["data:vector_db".into()],
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let args: VectorSearchArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let decision = ctx.policy.check_vector(&args.collection, VectorOp::Read);
        if !decision.is_allow() {
            return Ok(ToolOutput::fail(decision.reason));
        }

        let Some(vector_db) = &self.vector else {
            return Ok(ToolOutput::fail("Vector database backend not configured."));
        };

        let top_k = args
            .top_k
            .unwrap_or(ctx.limits.default_top_k)
            .clamp(1, ctx.limits.default_top_k.max(1));

        let query_vector = match (args.query_vector, args.query) {
            (Some(v), _) => v,
            (None, Some(text)) => {
                let Some(embedding) = &self.embedding else {
                    return Ok(ToolOutput::fail(
                        "Embedding adapter not configured; provide query_vector instead.",
                    ));
                };
                match embedding.embed(&[text]).await {
                    Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
                    Ok(_) => return Ok(ToolOutput::fail("Embedding returned no vectors.")),
                    Err(e) => return Ok(ToolOutput::fail(format!("Embedding failed: {e}"))),
                }
            }
            (None, None) => {
                return Ok(ToolOutput::fail(
                    "Either 'query' or 'query_vector' must be provided.",
                ));
            }
        };

        match vector_db.search(&args.collection, &query_vector, top_k).await {
            Ok(hits) => {
                let count = hits.len();
                Ok(ToolOutput::ok(serde_json::json!({
                    "results": hits,
                    "count": count,
                })))
            }
            Err(e) => Ok(ToolOutput::fail(format!("Search failed: {e}"))),
        }
    }
}
