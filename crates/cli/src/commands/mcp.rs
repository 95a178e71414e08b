//! `domekit mcp` — serve the tool registry over stdio.

use domekit_gateway::stdio::McpServer;
use domekit_manifest::Manifest;

pub async fn run(manifest_path: &str) -> i32 {
    let manifest = match Manifest::load(manifest_path) {
        Ok(m) => m,
        Err(err) => {
            eprintln!("Error loading manifest: {err}");
            return 1;
        }
    };

    let state = match domekit_gateway::build_state(manifest) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("Error building runtime: {err}");
            return 1;
        }
    };

    match McpServer::new(state).serve().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("stdio transport error: {err}");
            1
        }
    }
}
