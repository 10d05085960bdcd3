//! Gateway client.
//!
//! This module ties the transport, command and event layers together
//! behind one handle.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`GatewayClient`] | Connection manager: connect, request, close |
//! | [`GatewayClientBuilder`] | Identity, commands and tunables |
//! | [`ConnectionState`] | `Closed`, `Connecting`, `Handshaking`, `Ready` |
//! | [`ConnectionStatus`] | State plus the last connection error |
//!
//! Internally, each socket epoch runs a dispatch loop that routes inbound
//! frames, and a reconnect scheduler retries after unexpected losses.

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for client configuration.
pub mod builder;

/// Connection manager.
pub mod core;

mod dispatch;
mod reconnect;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_PENDING, DEFAULT_RECONNECT_DELAY,
    DEFAULT_REQUEST_TIMEOUT, GatewayClientBuilder,
};
pub use self::core::{ConnectionState, ConnectionStatus, GatewayClient};
