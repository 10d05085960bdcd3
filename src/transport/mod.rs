//! WebSocket transport layer.
//!
//! This module owns the socket to the gateway and the correlation of
//! requests with responses on that socket.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                              ┌─────────────────┐
//! │  GatewayClient   │                              │  Gateway        │
//! │                  │         WebSocket            │                 │
//! │  Connection      │─────────────────────────────►│  WebSocket      │
//! │  (one per epoch) │      ws://host:PORT          │  Server         │
//! │                  │◄─────────────────────────────│                 │
//! └──────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::open` - Open the socket, spawn the socket loop
//! 2. `Connection::handshake` - `connect` exchange; ready on success
//! 3. `Connection::send` / `Connection::request` - Steady state
//! 4. `Inbound::Closed` - Socket gone; the epoch is over
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and socket loop |
//! | `correlator` | Pending request tracking |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and socket loop.
pub mod connection;

/// Request/response correlation.
pub mod correlator;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{CloseReason, Connection, Inbound, InboundReceiver};
pub use correlator::Correlator;
