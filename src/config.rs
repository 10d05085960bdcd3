//! Gateway connection settings.
//!
//! The configuration is owned by the embedding application and handed to
//! the client; changing it at runtime goes through
//! [`GatewayClient::apply_config`](crate::GatewayClient::apply_config).
//!
//! # Example
//!
//! ```
//! use gateway_channel::GatewayConfig;
//!
//! let config = GatewayConfig::new("127.0.0.1", 18789).with_token("secret");
//! assert_eq!(config.ws_url().unwrap().as_str(), "ws://127.0.0.1:18789/");
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default gateway host (local loopback).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default gateway port.
pub const DEFAULT_PORT: u16 = 18789;

// ============================================================================
// GatewayConfig
// ============================================================================

/// Where and whether to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Gateway host name or IP address.
    pub host: String,

    /// Gateway port.
    pub port: u16,

    /// Optional bearer token sent in the handshake.
    pub token: Option<String>,

    /// Whether the client connects at all.
    pub enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            token: None,
            enabled: true,
        }
    }
}

impl GatewayConfig {
    /// Creates an enabled configuration for `host:port`.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets the bearer token.
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Enables or disables the connection.
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the token, treating blank tokens as absent.
    #[inline]
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Builds the WebSocket endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host is empty or does not form a
    /// valid URL.
    pub fn ws_url(&self) -> Result<Url> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(Error::config("Gateway host is empty"));
        }

        // Bare IPv6 literals need brackets inside a URL authority.
        let authority = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{}", self.port)
        } else {
            format!("{host}:{}", self.port)
        };

        Url::parse(&format!("ws://{authority}"))
            .map_err(|e| Error::config(format!("Invalid gateway address {authority}: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
