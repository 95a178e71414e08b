//! `domekit run` — validate the manifest and start the HTTP runtime.

use domekit_manifest::Manifest;

pub async fn run(manifest_path: &str, host: &str, port: u16) -> i32 {
    let manifest = match Manifest::load(manifest_path) {
        Ok(m) => m,
        Err(err) => {
            eprintln!("Error loading manifest: {err}");
            return 1;
        }
    };

    println!("Starting DomeKit runtime for '{}'...", manifest.app.name);
    println!("  Manifest: {manifest_path}");
    println!("  Host:     {host}");
    println!("  Port:     {port}");
    println!("  Policy:   {}", manifest.runtime.policy_mode.as_str());
    println!();

    match domekit_gateway::start(manifest, host, port).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Runtime error: {err}");
            1
        }
    }
}
