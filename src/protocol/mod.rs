//! WebSocket protocol message types.
//!
//! This module defines the message format exchanged between this client
//! and the gateway.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `req` | Both | Request expecting one correlated `res` |
//! | `res` | Both | Response to a `req` with the same `id` |
//! | `event` | Gateway → Client | Fire-and-forget notification |
//!
//! # Well-known Methods
//!
//! - `connect` - handshake, always the first request on a socket
//! - `invoke` - gateway asks this client to run a registered command
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame sum type and its variants |
//! | `handshake` | `connect` params and client descriptor |
//! | `invoke` | Invocation params and error codes |

// ============================================================================
// Submodules
// ============================================================================

/// Frame sum type and its variants.
pub mod frame;

/// Handshake message types.
pub mod handshake;

/// Invocation message types.
pub mod invoke;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{ErrorShape, EventFrame, Frame, RequestFrame, ResponseFrame};
pub use handshake::{
    AuthBlock, ClientInfo, ConnectParams, DEFAULT_ROLE, METHOD_CONNECT, PROTOCOL_VERSION,
};
pub use invoke::{INVOKE_FAILED, InvokeParams, METHOD_INVOKE, UNSUPPORTED_METHOD};
