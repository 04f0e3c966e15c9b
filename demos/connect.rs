//! Connect to the local backend and send one command.
//!
//! Demonstrates:
//! - Building a manager with file-backed relay and settings stores
//! - Observing state changes and pushed messages
//! - Diagnosing every transport
//! - Sending a command over whichever transport won the cascade
//!
//! Usage:
//!   cargo run --example connect
//!   cargo run --example connect -- --debug
//!   cargo run --example connect -- --diagnose
//!   cargo run --example connect -- --tunnel https://abc.tunnel.example

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use lifeops_link::{ConnectionManager, FileRelayStore, FileSettings, Result};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DATA_DIR: &str = "./lifeops_data";
const USER_ID: &str = "demo-user";

// ============================================================================
// Args
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    diagnose: bool,
    tunnel: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            diagnose: args.iter().any(|a| a == "--diagnose"),
            tunnel: args
                .iter()
                .position(|a| a == "--tunnel")
                .and_then(|i| args.get(i + 1).cloned()),
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "lifeops_link=debug"
    } else {
        "lifeops_link=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== LifeOps Link ===\n");

    // ========================================================================
    // Build Manager
    // ========================================================================

    println!("[1] Building manager...");

    let manager = ConnectionManager::builder()
        .relay_store(Arc::new(FileRelayStore::new(format!("{DATA_DIR}/relay.json"))))
        .settings(Arc::new(FileSettings::new(format!("{DATA_DIR}/settings.json"))))
        .build()?;

    if let Some(tunnel) = &args.tunnel {
        manager.set_tunnel_url(Some(tunnel))?;
        println!("    Tunnel: {tunnel}");
    }

    let _status = manager.on_status_change(|state| println!("    [state] {state}"));
    let _messages = manager.on_message(|message| println!("    [push] {message}"));

    println!("    ✓ Manager ready\n");

    // ========================================================================
    // Diagnose
    // ========================================================================

    if args.diagnose {
        println!("[2] Probing transports...");
        for outcome in manager.diagnose(USER_ID).await {
            let mark = if outcome.reachable { "✓" } else { "✗" };
            println!(
                "    {mark} {:<7} {:>5}ms {}",
                outcome.transport.to_string(),
                outcome.elapsed.as_millis(),
                outcome.detail.as_deref().unwrap_or("")
            );
        }
        println!();
    }

    // ========================================================================
    // Connect & Send
    // ========================================================================

    println!("[3] Connecting as {USER_ID}...");
    let state = manager.connect(USER_ID).await?;
    println!("    ✓ Connected via {}\n", state.transport());

    println!("[4] Sending portfolio request...");
    match manager.send("portfolio", json!({ "range": "1d" })).await {
        Ok(result) => println!("    ✓ {result}\n"),
        Err(e) => println!("    ✗ {e}\n"),
    }

    manager.disconnect();
    println!("=== Done ===");
    Ok(())
}
