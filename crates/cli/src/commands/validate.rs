//! `domekit validate` — parse and validate a manifest, exit 0/1.

use domekit_manifest::Manifest;

pub fn run(manifest_path: &str) -> i32 {
    let manifest = match Manifest::load(manifest_path) {
        Ok(m) => m,
        Err(err) => {
            eprintln!("Error: invalid manifest: {err}");
            return 1;
        }
    };

    println!(
        "Manifest OK: {} v{}",
        manifest.app.name, manifest.app.version
    );
    println!("  Policy mode:   {}", manifest.runtime.policy_mode.as_str());
    println!("  Model backend: {}", manifest.models.backend);
    println!(
        "  Default model: {}",
        if manifest.models.default.is_empty() {
            "(none)"
        } else {
            &manifest.models.default
        }
    );
    let allowed = manifest.policy.tools.allow.join(", ");
    println!(
        "  Allowed tools: {}",
        if allowed.is_empty() { "(none)" } else { &allowed }
    );
    println!("  Audit path:    {}", manifest.audit.path);

    // Warn when an allow-listed tool is not a known built-in.
    let registry = domekit_tools::default_registry(None, None);
    let available = registry.names();
    for tool in &manifest.policy.tools.allow {
        if !available.contains(tool) {
            println!("  Warning: tool '{tool}' is not a known built-in tool");
        }
    }

    0
}
