//! DomeKit CLI — the main entry point.
//!
//! Commands:
//! - `validate` — Parse and validate a manifest
//! - `run`      — Start the HTTP runtime server
//! - `logs`     — Query the audit log
//! - `mcp`      — Serve the tool registry over stdio (JSON-RPC)

use clap::{Parser, Subcommand};

mod commands;

/// Default manifest path: $DOMEKIT_MANIFEST, then ./domekit.yaml.
fn default_manifest_path() -> String {
    std::env::var("DOMEKIT_MANIFEST").unwrap_or_else(|_| "./domekit.yaml".into())
}

#[derive(Parser)]
#[command(
    name = "domekit",
    about = "DomeKit — local-first AI runtime gateway",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a domekit.yaml manifest
    Validate {
        /// Manifest path
        manifest: Option<String>,
    },

    /// Start the runtime HTTP server
    Run {
        /// Manifest path
        manifest: Option<String>,

        /// Bind host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },

    /// Query the audit log
    Logs {
        /// Audit log path
        audit_path: String,

        /// Filter by request id
        #[arg(short = 'r', long)]
        request_id: Option<String>,

        /// Filter by event kind (e.g. policy.block)
        #[arg(short = 'e', long)]
        event: Option<String>,

        /// Maximum entries to print
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Print raw JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Serve the policy-checked tool registry over stdio (JSON-RPC)
    Mcp {
        /// Manifest path
        manifest: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let code = match cli.command {
        Commands::Validate { manifest } => {
            commands::validate::run(&manifest.unwrap_or_else(default_manifest_path))
        }
        Commands::Run {
            manifest,
            host,
            port,
        } => {
            commands::run::run(
                &manifest.unwrap_or_else(default_manifest_path),
                &host,
                port,
            )
            .await
        }
        Commands::Logs {
            audit_path,
            request_id,
            event,
            limit,
            json,
        } => commands::logs::run(&audit_path, request_id, event, limit, json),
        Commands::Mcp { manifest } => {
            commands::mcp::run(&manifest.unwrap_or_else(default_manifest_path)).await
        }
    };

    std::process::exit(code);
}
