//! sql_query tool — read-only SQLite queries against allow-listed databases.
//!
//! Model-provided SQL is executed verbatim: this tool is an intentional
//! data-query interface, and safety comes from the read-only URI open, the
//! exact-path whitelist, and the row cap — not from restricting SELECTs.

use async_trait::async_trait;
use domekit_core::error::ToolError;
use domekit_core::tool::{Tool, ToolContext, ToolDefinition, ToolOutput};
use domekit_policy::canonical_path;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;

#[derive(Deserialize)]
struct SqlQueryArgs {
    db_path: String,
    query: String,
}

pub struct SqlQueryTool;

fn value_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::json!(i),
        ValueRef::Real(f) => serde_json::json!(f),
        ValueRef::Text(t) => serde_json::json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => serde_json::json!(String::from_utf8_lossy(b)),
    }
}

/// Run the query on a short-lived read-only connection.
fn execute_readonly(
    canonical: &str,
    query: &str,
    max_rows: usize,
) -> Result<serde_json::Value, String> {
    let uri = format!("file:{canonical}?mode=ro");
    let conn = Connection::open_with_flags(
        &uri,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| e.to_string())?;

    let mut stmt = conn.prepare(query).map_err(|e| e.to_string())?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let column_count = columns.len();

    let mut rows = stmt.query([]).map_err(|e| e.to_string())?;
    let mut out: Vec<Vec<serde_json::Value>> = Vec::new();
    let mut truncated = false;

    while let Some(row) = rows.next().map_err(|e| e.to_string())? {
        if out.len() == max_rows {
            truncated = true;
            break;
        }
        let mut record = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let cell = row.get_ref(i).map_err(|e| e.to_string())?;
            record.push(value_to_json(cell));
        }
        out.push(record);
    }

    Ok(serde_json::json!({
        "columns": columns,
        "rows": out,
        "truncated": truncated,
    }))
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "sql_query".into(),
            description: "Run a read-only SQL query against a local SQLite database.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "db_path": {
                        "type": "string",
                        "description": "Path to the SQLite database file."
                    },
                    "query": {
                        "type": "string",
                        "description": "SQL query to execute (read-only)."
                    },
                },
                "required": ["db_path", "query"],
                "additionalProperties": false,
            }),
            permissions: vec!["data:sqlite".into()],
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let args: SqlQueryArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let decision = ctx.policy.check_sqlite(&args.db_path);
        if !decision.is_allow() {
            return Ok(ToolOutput::fail(decision.reason));
        }

        let canonical = canonical_path(&args.db_path)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if !canonical.exists() {
            return Ok(ToolOutput::fail(format!(
                "Database not found: {}",
                args.db_path
            )));
        }

        let canonical = canonical.to_string_lossy().into_owned();
        let query = args.query;
        let max_rows = ctx.limits.max_rows;

        let result = tokio::task::spawn_blocking(move || {
            execute_readonly(&canonical, &query, max_rows)
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "sql_query".into(),
            reason: e.to_string(),
        })?;

        match result {
            Ok(payload) => Ok(ToolOutput::ok(payload)),
            Err(message) => Ok(ToolOutput::fail(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx_from_yaml;

    fn make_db(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("h.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, weight REAL);
             INSERT INTO t (name, weight) VALUES ('alpha', 1.5), ('beta', 2.5), ('gamma', 3.5);",
        )
        .unwrap();
        path
    }

    fn ctx_allowing(db: &std::path::Path, max_rows: Option<usize>) -> domekit_core::tool::ToolContext {
        let rows = max_rows
            .map(|n| format!("tools:\n  sql_query:\n    max_rows: {n}\n"))
            .unwrap_or_default();
        ctx_from_yaml(&format!(
            "app:\n  name: test\npolicy:\n  data:\n    sqlite:\n      allow: [\"{}\"]\n{rows}",
            db.display()
        ))
    }

    #[tokio::test]
    async fn query_allowed_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_db(dir.path());
        let ctx = ctx_allowing(&db, None);

        let out = SqlQueryTool
            .run(
                &ctx,
                serde_json::json!({
                    "db_path": db.to_str().unwrap(),
                    "query": "SELECT COUNT(*) c FROM t",
                }),
            )
            .await
            .unwrap();

        assert!(out.success);
        assert_eq!(out.result["columns"], serde_json::json!(["c"]));
        assert_eq!(out.result["rows"][0][0], serde_json::json!(3));
        assert_eq!(out.result["truncated"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn row_cap_sets_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_db(dir.path());
        let ctx = ctx_allowing(&db, Some(2));

        let out = SqlQueryTool
            .run(
                &ctx,
                serde_json::json!({
                    "db_path": db.to_str().unwrap(),
                    "query": "SELECT name FROM t ORDER BY id",
                }),
            )
            .await
            .unwrap();

        assert!(out.success);
        assert_eq!(out.result["rows"].as_array().unwrap().len(), 2);
        assert_eq!(out.result["truncated"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn disallowed_path_fails_without_io() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_db(dir.path());
        let ctx = ctx_allowing(&db, None);

        let out = SqlQueryTool
            .run(
                &ctx,
                serde_json::json!({
                    "db_path": "/etc/passwd",
                    "query": "SELECT 1",
                }),
            )
            .await
            .unwrap();

        assert!(!out.success);
        assert!(out.error.unwrap().contains("/etc/passwd"));
    }

    #[tokio::test]
    async fn writes_rejected_by_readonly_mode() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_db(dir.path());
        let ctx = ctx_allowing(&db, None);

        let out = SqlQueryTool
            .run(
                &ctx,
                serde_json::json!({
                    "db_path": db.to_str().unwrap(),
                    "query": "INSERT INTO t (name) VALUES ('evil')",
                }),
            )
            .await
            .unwrap();

        assert!(!out.success);
        let err = out.error.unwrap().to_lowercase();
        assert!(err.contains("readonly") || err.contains("read-only"), "{err}");
    }

    #[tokio::test]
    async fn syntax_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_db(dir.path());
        let ctx = ctx_allowing(&db, None);

        let out = SqlQueryTool
            .run(
                &ctx,
                serde_json::json!({
                    "db_path": db.to_str().unwrap(),
                    "query": "SELEKT broken",
                }),
            )
            .await
            .unwrap();
        assert!(!out.success);
    }

    #[tokio::test]
    async fn missing_database_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.db");
        let ctx = ctx_from_yaml(&format!(
            "app:\n  name: test\npolicy:\n  data:\n    sqlite:\n      allow: [\"{}\"]\n",
            missing.display()
        ));

        let out = SqlQueryTool
            .run(
                &ctx,
                serde_json::json!({
                    "db_path": missing.to_str().unwrap(),
                    "query": "SELECT 1",
                }),
            )
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn missing_arguments_rejected() {
        let ctx = crate::test_support::dev_ctx();
        let err = SqlQueryTool
            .run(&ctx, serde_json::json!({"db_path": "/tmp/h.db"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

}
