//! read_file tool — read files within allowed prefixes, capped in size.

use async_trait::async_trait;
use domekit_core::error::ToolError;
use domekit_core::tool::{Tool, ToolContext, ToolDefinition, ToolOutput};
use serde::Deserialize;
use tokio::io::AsyncReadExt;

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".into(),
            description: "Read the contents of a file on the local filesystem.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Absolute or relative file path to read."
                    },
                },
                "required": ["path"],
                "additionalProperties": false,
            }),
            permissions: vec!["fs:read".into()],
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let args: ReadFileArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let decision = ctx.policy.check_read(&args.path);
        if !decision.is_allow() {
            return Ok(ToolOutput::fail(decision.reason));
        }

        let max_bytes = ctx.limits.max_bytes;
        let file = match tokio::fs::File::open(&args.path).await {
            Ok(f) => f,
            Err(e) => return Ok(ToolOutput::fail(format!("Failed to open file: {e}"))),
        };

        // Read one byte past the cap so a too-large file is detected
        // without slurping the whole thing.
        let mut buf = Vec::with_capacity((max_bytes.min(64 * 1024) + 1) as usize);
        let mut limited = file.take(max_bytes + 1);
        if let Err(e) = limited.read_to_end(&mut buf).await {
            return Ok(ToolOutput::fail(format!("Failed to read file: {e}")));
        }
        if buf.len() as u64 > max_bytes {
            return Err(ToolError::FileTooLarge {
                path: args.path,
                max_bytes,
            });
        }

        let text = String::from_utf8_lossy(&buf).into_owned();
        Ok(ToolOutput::ok(serde_json::json!({
            "content": text,
            "bytes": buf.len(),
        })))
    }
}
