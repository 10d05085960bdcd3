//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`GatewayClient`]
//! instances. Identity, capabilities and commands are fixed once the
//! client is built; only the [`GatewayConfig`] can change afterwards.
//!
//! # Example
//!
//! ```
//! use gateway_channel::{CommandError, GatewayClient, GatewayConfig};
//! use serde_json::{Value, json};
//!
//! # fn example() -> gateway_channel::Result<()> {
//! let client = GatewayClient::builder()
//!     .config(GatewayConfig::new("127.0.0.1", 18789).with_token("secret"))
//!     .client_id("studio-mac")
//!     .display_name("Studio Mac")
//!     .capability("canvas")
//!     .command("system.ping", |_params: Value| async move {
//!         Ok::<_, CommandError>(json!({ "pong": true }))
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::commands::{CommandHandler, CommandRegistry};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::protocol::{ClientInfo, DEFAULT_ROLE};

use super::core::{ClientSettings, GatewayClient};

// ============================================================================
// Constants
// ============================================================================

/// Default bound on the `connect` exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a regular request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay before a reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default limit on concurrently pending requests.
pub const DEFAULT_MAX_PENDING: usize = 100;

// ============================================================================
// GatewayClientBuilder
// ============================================================================

/// Builder for configuring a [`GatewayClient`] instance.
///
/// Use [`GatewayClient::builder()`] to create a new builder.
#[derive(Debug)]
pub struct GatewayClientBuilder {
    /// Endpoint and enablement.
    config: GatewayConfig,
    /// Descriptor sent in the handshake.
    client: ClientInfo,
    /// Declared capability tags.
    caps: Vec<String>,
    /// Role requested in the handshake.
    role: String,
    /// Requested scopes.
    scopes: Vec<String>,
    /// Command handlers.
    commands: CommandRegistry,
    handshake_timeout: Duration,
    request_timeout: Duration,
    reconnect_delay: Duration,
    max_pending: usize,
    /// First registration failure, reported by `build`.
    registration_error: Option<Error>,
}

impl Default for GatewayClientBuilder {
    fn default() -> Self {
        Self {
            config: GatewayConfig::default(),
            client: ClientInfo::default(),
            caps: Vec::new(),
            role: DEFAULT_ROLE.to_string(),
            scopes: Vec::new(),
            commands: CommandRegistry::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_pending: DEFAULT_MAX_PENDING,
            registration_error: None,
        }
    }
}

// ============================================================================
// GatewayClientBuilder Implementation
// ============================================================================

impl GatewayClientBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gateway configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the whole client descriptor.
    #[inline]
    #[must_use]
    pub fn client_info(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    /// Sets the stable client identifier.
    #[inline]
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client.id = id.into();
        self
    }

    /// Sets the human-readable client name.
    #[inline]
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.client.display_name = name.into();
        self
    }

    /// Declares a capability tag.
    #[inline]
    #[must_use]
    pub fn capability(mut self, cap: impl Into<String>) -> Self {
        self.caps.push(cap.into());
        self
    }

    /// Sets the role requested in the handshake.
    ///
    /// Defaults to `node`.
    #[inline]
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Requests a scope.
    #[inline]
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Registers a command handler.
    ///
    /// Invalid or duplicate names are reported by [`build`](Self::build).
    #[must_use]
    pub fn command(mut self, name: impl Into<String>, handler: impl CommandHandler) -> Self {
        if let Err(e) = self.commands.register(name, handler)
            && self.registration_error.is_none()
        {
            self.registration_error = Some(e);
        }
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the default request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the fixed delay between a loss and the reconnect attempt.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the limit on concurrently pending requests.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }

    /// Builds the client with validation.
    ///
    /// Building does not connect; call
    /// [`GatewayClient::ensure_connected`] for that.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a command name was empty or registered twice
    /// - [`Error::Config`] if the client id is empty
    /// - [`Error::Config`] if a timeout or the pending limit is zero
    pub fn build(self) -> Result<GatewayClient> {
        if let Some(e) = self.registration_error {
            return Err(e);
        }
        self.validate()?;

        let settings = ClientSettings {
            client: self.client,
            caps: self.caps,
            role: self.role,
            scopes: self.scopes,
            handshake_timeout: self.handshake_timeout,
            request_timeout: self.request_timeout,
            reconnect_delay: self.reconnect_delay,
            max_pending: self.max_pending,
        };

        Ok(GatewayClient::from_parts(self.config, settings, self.commands))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl GatewayClientBuilder {
    /// Validates identity and tunables.
    fn validate(&self) -> Result<()> {
        if self.client.id.trim().is_empty() {
            return Err(Error::config(
                "Client id is required. Use .client_id() to set it.",
            ));
        }

        if self.handshake_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(Error::config("Timeouts must be greater than zero"));
        }

        if self.max_pending == 0 {
            return Err(Error::config("max_pending must be at least 1"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
