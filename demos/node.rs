//! Minimal gateway node.
//!
//! Demonstrates:
//! - Building a client with a couple of commands
//! - Connecting and sending a request
//! - Printing events and status changes until Ctrl+C
//!
//! Usage:
//!   cargo run --example node
//!   cargo run --example node -- --debug
//!   cargo run --example node -- --port 18789 --token secret

// ============================================================================
// Imports
// ============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use gateway_channel::config::{DEFAULT_HOST, DEFAULT_PORT};
use gateway_channel::{CommandError, GatewayClient, GatewayConfig};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    host: String,
    port: u16,
    token: Option<String>,
}

impl Args {
    /// Parse command-line arguments.
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let value_of = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };

        let port = match value_of("--port") {
            Some(port) => port.parse().context("--port must be a number")?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            debug: args.iter().any(|a| a == "--debug"),
            host: value_of("--host").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            token: value_of("--token"),
        })
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("[ERROR] {e:#}");
            std::process::exit(2);
        }
    };
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Gateway Node ===\n");

    let mut config = GatewayConfig::new(&args.host, args.port);
    config.token = args.token;

    let client = GatewayClient::builder()
        .config(config)
        .client_id("demo-node")
        .display_name("Demo Node")
        .capability("system")
        .command("system.ping", |_params: Value| async move {
            Ok::<_, CommandError>(json!({ "pong": true }))
        })
        .command("system.time", |_params: Value| async move {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| CommandError::new(e.to_string()))?;
            Ok::<_, CommandError>(json!({ "unixMs": now.as_millis() as u64 }))
        })
        .build()?;

    println!("[1] Connecting to {}:{}...", args.host, args.port);
    client
        .ensure_connected()
        .await
        .context("gateway connection failed")?;
    println!("    ✓ Connected");
    if let Some(hello) = client.hello() {
        println!("    Hello: {hello}");
    }

    println!("\n[2] Requesting health...");
    match client.request("health", None).await {
        Ok(health) => println!("    ✓ {health}"),
        Err(e) => println!("    ✗ {e}"),
    }

    println!("\n[3] Listening (Ctrl+C to exit)...");
    let mut events = client.on_any_event();
    let mut status = client.watch_status();

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                println!("    event {}: {}", event.name, event.payload);
            }
            Ok(()) = status.changed() => {
                let current = status.borrow_and_update().clone();
                match current.last_error {
                    Some(error) => println!("    status {} ({error})", current.state),
                    None => println!("    status {}", current.state),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.close();
    println!("\n✓ Closed");
    Ok(())
}

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "gateway_channel=debug"
    } else {
        "gateway_channel=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
