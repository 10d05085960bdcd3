//! Command registration and invocation.
//!
//! The gateway runs commands on this client by sending `invoke` requests.
//! Handlers are registered by name before the client is built; the
//! registry is immutable afterwards.
//!
//! Every invocation produces exactly one response frame carrying the
//! request's `id`: the handler's result on success, otherwise
//! `error.code = "invoke_failed"`. Handler failures and panics never
//! reach the connection.
//!
//! # Example
//!
//! ```ignore
//! use gateway_channel::{CommandError, GatewayClient};
//! use serde_json::{Value, json};
//!
//! let client = GatewayClient::builder()
//!     .command("system.ping", |_params: Value| async move {
//!         Ok::<_, CommandError>(json!({ "pong": true }))
//!     })
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{CommandError, Error, Result};
use crate::protocol::{INVOKE_FAILED, InvokeParams, RequestFrame, ResponseFrame};

// ============================================================================
// CommandHandler
// ============================================================================

/// Asynchronous handler for one named command.
///
/// Closures of the shape `Fn(Value) -> impl Future<Output =
/// Result<Value, CommandError>>` implement this trait.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// Runs the command with its `params` sub-object.
    async fn call(&self, params: Value) -> std::result::Result<Value, CommandError>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, CommandError>> + Send + 'static,
{
    async fn call(&self, params: Value) -> std::result::Result<Value, CommandError> {
        (self)(params).await
    }
}

// ============================================================================
// CommandRegistry
// ============================================================================

/// Name → handler map.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: FxHashMap<String, Arc<dyn CommandHandler>>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the name is empty or already taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl CommandHandler,
    ) -> Result<()> {
        let name = name.into();

        if name.is_empty() {
            return Err(Error::config("Command name must not be empty"));
        }
        if self.handlers.contains_key(&name) {
            return Err(Error::config(format!("Command registered twice: {name}")));
        }

        self.handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Returns the registered command names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Returns `true` if `name` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the number of registered commands.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no command is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs a command by exact name.
    ///
    /// The handler runs on its own task so a panic is reported as a
    /// failure instead of unwinding into the caller.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownCommand`] if nothing is registered under `command`
    /// - [`Error::HandlerFailure`] if the handler fails or panics
    pub async fn execute(&self, command: &str, params: Value) -> Result<Value> {
        let handler = self
            .handlers
            .get(command)
            .cloned()
            .ok_or_else(|| Error::unknown_command(command))?;

        match tokio::spawn(async move { handler.call(params).await }).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(Error::handler_failure(e.message)),
            Err(join_error) => {
                error!(command, error = %join_error, "Command handler panicked");
                Err(Error::handler_failure(format!(
                    "Command handler panicked: {command}"
                )))
            }
        }
    }

    /// Answers an `invoke` request.
    ///
    /// Always returns a response with the request's `id`.
    pub async fn handle_invoke(&self, request: RequestFrame) -> ResponseFrame {
        let invoke = match InvokeParams::from_request_params(request.params.as_ref()) {
            Ok(invoke) => invoke,
            Err(e) => {
                warn!(id = %request.id, error = %e, "Invalid invoke params");
                let detail = match e {
                    Error::Protocol { message } => message,
                    other => other.to_string(),
                };
                return ResponseFrame::failure(
                    request.id,
                    INVOKE_FAILED,
                    format!("Invalid invoke params: {detail}"),
                );
            }
        };

        debug!(id = %request.id, command = %invoke.command, "Invoking command");

        match self.execute(&invoke.command, invoke.params).await {
            Ok(payload) => ResponseFrame::success(request.id, payload),
            Err(e) => {
                debug!(id = %request.id, command = %invoke.command, error = %e, "Command failed");
                ResponseFrame::failure(request.id, INVOKE_FAILED, e.to_string())
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
