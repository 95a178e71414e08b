//! write_file tool — size-capped writes within allowed prefixes.
//!
//! Writes are atomic: content lands in a sibling temp file which is then
//! renamed over the target, so readers never observe a half-written file.

use async_trait::async_trait;
use domekit_core::error::ToolError;
use domekit_core::tool::{Tool, ToolContext, ToolDefinition, ToolOutput};
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

pub struct WriteFileTool;

async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "write".into()),
        Uuid::new_v4().simple()
    ));
    tokio::fs::write(&tmp, content).await?;
    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(e)
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".into(),
            description: "Write content to a file on the local filesystem.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Absolute or relative file path to write."
                    },
                    "content": {
                        "type": "string",
                        "description": "Content to write to the file."
                    },
                },
                "required": ["path", "content"],
                "additionalProperties": false,
            }),
            permissions: vec!["fs:write".into()],
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let args: WriteFileArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let decision = ctx.policy.check_write(&args.path);
        if !decision.is_allow() {
            return Ok(ToolOutput::fail(decision.reason));
        }

        let bytes = args.content.len() as u64;
        if bytes > ctx.limits.max_bytes {
            return Ok(ToolOutput::fail(format!(
                "Content exceeds max_bytes limit ({})",
                ctx.limits.max_bytes
            )));
        }

        match write_atomic(Path::new(&args.path), &args.content).await {
            Ok(()) => Ok(ToolOutput::ok(serde_json::json!({
                "status": "ok",
                "bytes_written": bytes,
            }))),
            Err(e) => Ok(ToolOutput::fail(format!("Failed to write file: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx_from_yaml;

    fn ctx_writing(dir: &std::path::Path, max_bytes: Option<u64>) -> domekit_core::tool::ToolContext {
        let cap = max_bytes
            .map(|n| format!("tools:\n  write_file:\n    max_bytes: {n}\n"))
            .unwrap_or_default();
        ctx_from_yaml(&format!(
            "app:\n  name: test\npolicy:\n  data:\n    filesystem:\n      allow_write: [\"{}\"]\n{cap}",
            dir.display()
        ))
    }

    #[tokio::test]
    async fn write_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let ctx = ctx_writing(dir.path(), None);
        let out = WriteFileTool
            .run(
                &ctx,
                serde_json::json!({"path": path.to_str().unwrap(), "content": "written!"}),
            )
            .await
            .unwrap();

        assert!(out.success);
        assert_eq!(out.result["bytes_written"], 8);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "written!");
        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn parent_directories_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/file.txt");

        let ctx = ctx_writing(dir.path(), None);
        let out = WriteFileTool
            .run(
                &ctx,
                serde_json::json!({"path": path.to_str().unwrap(), "content": "nested"}),
            )
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "nested");
    }

    #[tokio::test]
    async fn overwrite_is_atomic_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "old").unwrap();

        let ctx = ctx_writing(dir.path(), None);
        let out = WriteFileTool
            .run(
                &ctx,
                serde_json::json!({"path": path.to_str().unwrap(), "content": "new"}),
            )
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[tokio::test]
    async fn oversized_content_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");

        let ctx = ctx_writing(dir.path(), Some(4));
        let out = WriteFileTool
            .run(
                &ctx,
                serde_json::json!({"path": path.to_str().unwrap(), "content": "way too long"}),
            )
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.error.unwrap().contains("max_bytes"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn path_outside_prefix_denied() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_writing(dir.path(), None);

        let out = WriteFileTool
            .run(
                &ctx,
                serde_json::json!({"path": "/etc/crontab", "content": "evil"}),
            )
            .await
            .unwrap();
        assert!(!out.success);
    }

    #[tokio::test]
    async fn traversal_denied() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_writing(dir.path(), None);
        let sneaky = format!("{}/../../../tmp/escape.txt", dir.path().display());

        let out = WriteFileTool
            .run(&ctx, serde_json::json!({"path": sneaky, "content": "x"}))
            .await
            .unwrap();
        assert!(!out.success);
    }

    #[tokio::test]
    async fn missing_content_argument() {
        let ctx = crate::test_support::dev_ctx();
        let err = WriteFileTool
            .run(&ctx, serde_json::json!({"path": "/tmp/x.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
