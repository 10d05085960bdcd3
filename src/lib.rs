//! Gateway Channel - client engine for the Gateway remote-control protocol.
//!
//! This library keeps one persistent WebSocket connection to a Gateway and
//! speaks its JSON frame protocol: a capability-negotiated handshake,
//! correlated requests, inbound command invocations and out-of-band
//! events, with transparent recovery from disconnection.
//!
//! # Architecture
//!
//! The engine follows a node model:
//!
//! - **Gateway**: routes commands and events between nodes
//! - **Node (Rust)**: connects, declares its commands, answers invocations
//!
//! Key design principles:
//!
//! - One [`GatewayClient`] per process owns the connection; no global state
//! - Three frame kinds (`req`, `res`, `event`) validated at the boundary
//! - One dispatch loop per socket demultiplexes inbound frames
//! - Connection loss fails every pending request at once
//! - Fixed-delay reconnect with at most one timer pending
//!
//! # Quick Start
//!
//! ```no_run
//! use gateway_channel::{CommandError, GatewayClient, GatewayConfig, Result};
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = GatewayClient::builder()
//!         .config(GatewayConfig::new("127.0.0.1", 18789))
//!         .client_id("studio-mac")
//!         .command("system.ping", |_params: Value| async move {
//!             Ok::<_, CommandError>(json!({ "pong": true }))
//!         })
//!         .build()?;
//!
//!     client.ensure_connected().await?;
//!
//!     let health = client.request("health", None).await?;
//!     println!("Gateway health: {health}");
//!
//!     let mut presence = client.on_event("presence");
//!     while let Some(event) = presence.recv().await {
//!         println!("{}: {}", event.name, event.payload);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`GatewayClient`] and its builder |
//! | [`commands`] | Command handlers and registry |
//! | [`config`] | [`GatewayConfig`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Event subscriptions |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire frame types |
//! | [`transport`] | WebSocket transport layer (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Gateway client: connection manager and builder.
///
/// Use [`GatewayClient::builder()`] to create a configured client.
pub mod client;

/// Command registration and invocation.
pub mod commands;

/// Gateway connection settings.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Out-of-band event delivery.
pub mod events;

/// Type-safe identifiers.
pub mod identifiers;

/// WebSocket protocol message types.
pub mod protocol;

/// WebSocket transport layer.
///
/// Internal module handling the socket and request correlation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ConnectionState, ConnectionStatus, GatewayClient, GatewayClientBuilder};

// Command types
pub use commands::{CommandHandler, CommandRegistry};

// Configuration
pub use config::GatewayConfig;

// Error types
pub use error::{CommandError, Error, Result};

// Event types
pub use events::{Event, EventSubscription};

// Identifier types
pub use identifiers::RequestId;

// Protocol types
pub use protocol::{ClientInfo, ErrorShape, EventFrame, Frame, RequestFrame, ResponseFrame};
