//! Built-in tool sandboxes for DomeKit.
//!
//! Each tool enforces its own resource constraints: sql_query opens the
//! database read-only and caps rows, the file tools cap bytes and re-check
//! the filesystem policy on the exact path they touch, the vector tools
//! re-check collection policy and auto-embed text.

pub mod read_file;
pub mod sql_query;
pub mod vector_manage;
pub mod vector_search;
pub mod write_file;

pub use read_file::ReadFileTool;
pub use sql_query::SqlQueryTool;
pub use vector_manage::VectorManageTool;
pub use vector_search::VectorSearchTool;
pub use write_file::WriteFileTool;

use domekit_core::adapter::EmbeddingAdapter;
use domekit_core::tool::ToolRegistry;
use domekit_core::vector::VectorDb;
use std::sync::Arc;

/// Create the default registry with all five built-in tools.
///
/// The vector tools degrade gracefully when no embedding or vector backend
/// is configured — they fail per-call with a clear message instead of
/// being absent from the registry.
pub fn default_registry(
    embedding: Option<Arc<dyn EmbeddingAdapter>>,
    vector: Option<Arc<dyn VectorDb>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SqlQueryTool));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(VectorSearchTool::new(
        embedding.clone(),
        vector.clone(),
    )));
    registry.register(Arc::new(VectorManageTool::new(embedding, vector)));
    registry
}
