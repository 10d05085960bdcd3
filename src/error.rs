//! Error types for the gateway channel.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use gateway_channel::{GatewayClient, Result};
//!
//! async fn example(client: &GatewayClient) -> Result<()> {
//!     client.ensure_connected().await?;
//!     let health = client.request("health", None).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::Disabled`] |
//! | Connection | [`Error::TransportUnavailable`], [`Error::HandshakeRejected`], [`Error::HandshakeTimeout`], [`Error::ConnectionClosed`], [`Error::NotConnected`] |
//! | Request | [`Error::RequestTimeout`], [`Error::RequestRejected`], [`Error::TooManyPending`] |
//! | Invocation | [`Error::UnknownCommand`], [`Error::HandlerFailure`] |
//! | Protocol | [`Error::Protocol`] |
//! | External | [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the gateway endpoint cannot be built from configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// The gateway connection is disabled by configuration.
    #[error("Gateway connection is disabled")]
    Disabled,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The transport socket could not be opened.
    #[error("Gateway unavailable: {message}")]
    TransportUnavailable {
        /// Description of the transport failure.
        message: String,
    },

    /// The gateway answered the `connect` request with `ok: false`.
    #[error("Handshake rejected ({code}): {message}")]
    HandshakeRejected {
        /// Error code reported by the gateway.
        code: String,
        /// Error message reported by the gateway.
        message: String,
    },

    /// The gateway did not answer the `connect` request in time.
    #[error("Handshake timeout after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The connection closed while the operation was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No open connection; call `ensure_connected()` first.
    #[error("Not connected to gateway")]
    NotConnected,

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No response arrived within the request timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The gateway answered a request with `ok: false`.
    #[error("Request rejected ({code}): {message}")]
    RequestRejected {
        /// Error code reported by the gateway.
        code: String,
        /// Error message reported by the gateway.
        message: String,
    },

    /// Too many requests are awaiting a response.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPending {
        /// Requests currently pending.
        pending: usize,
        /// Configured limit.
        max: usize,
    },

    // ========================================================================
    // Invocation Errors
    // ========================================================================
    /// No handler registered for an invoked command.
    #[error("Unknown command: {command}")]
    UnknownCommand {
        /// The unrecognized command name.
        command: String,
    },

    /// A command handler failed.
    #[error("{message}")]
    HandlerFailure {
        /// Failure description reported by the handler.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or malformed frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// CommandError
// ============================================================================

/// Failure reported by a command handler.
///
/// The message is sent back to the gateway verbatim as the
/// `invoke_failed` error message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CommandError {
    /// Human-readable failure description.
    pub message: String,
}

impl CommandError {
    /// Creates a command error with the given message.
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for CommandError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<Error> for CommandError {
    fn from(err: Error) -> Self {
        Self::new(err.to_string())
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport-unavailable error.
    #[inline]
    pub fn transport_unavailable(message: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            message: message.into(),
        }
    }

    /// Creates a handshake-rejected error.
    #[inline]
    pub fn handshake_rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::HandshakeTimeout { timeout_ms }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a request-rejected error.
    #[inline]
    pub fn request_rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RequestRejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown command error.
    #[inline]
    pub fn unknown_command(command: impl Into<String>) -> Self {
        Self::UnknownCommand {
            command: command.into(),
        }
    }

    /// Creates a handler failure error.
    #[inline]
    pub fn handler_failure(message: impl Into<String>) -> Self {
        Self::HandlerFailure {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Copies an error so one connect outcome can be handed to every
    /// caller waiting on the same attempt.
    ///
    /// External errors carry non-cloneable sources and are flattened to
    /// [`Error::TransportUnavailable`] with the same text.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::Config { message } => Self::config(message.clone()),
            Self::Disabled => Self::Disabled,
            Self::TransportUnavailable { message } => Self::transport_unavailable(message.clone()),
            Self::HandshakeRejected { code, message } => {
                Self::handshake_rejected(code.clone(), message.clone())
            }
            Self::HandshakeTimeout { timeout_ms } => Self::handshake_timeout(*timeout_ms),
            Self::ConnectionClosed => Self::ConnectionClosed,
            Self::NotConnected => Self::NotConnected,
            Self::RequestTimeout {
                request_id,
                timeout_ms,
            } => Self::request_timeout(request_id.clone(), *timeout_ms),
            Self::RequestRejected { code, message } => {
                Self::request_rejected(code.clone(), message.clone())
            }
            Self::TooManyPending { pending, max } => Self::TooManyPending {
                pending: *pending,
                max: *max,
            },
            Self::UnknownCommand { command } => Self::unknown_command(command.clone()),
            Self::HandlerFailure { message } => Self::handler_failure(message.clone()),
            Self::Protocol { message } => Self::protocol(message.clone()),
            Self::Json(_) | Self::WebSocket(_) => Self::transport_unavailable(self.to_string()),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection-level error.
    ///
    /// Connection-level errors feed the reconnect scheduler; per-request
    /// errors never do.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable { .. }
                | Self::HandshakeRejected { .. }
                | Self::HandshakeTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry once the connection is
    /// re-established.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable { .. }
                | Self::HandshakeTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::RequestTimeout { .. }
                | Self::TooManyPending { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
