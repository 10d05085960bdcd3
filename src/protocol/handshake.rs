//! Handshake (`connect`) message types.
//!
//! The first frame on every socket is a `connect` request describing this
//! client. The gateway answers with a `res` frame; `ok: true` opens the
//! session, anything else ends the epoch.
//!
//! # Format
//!
//! ```json
//! {
//!   "minProtocol": 3,
//!   "maxProtocol": 3,
//!   "client": {
//!     "id": "node-host",
//!     "instanceId": "uuid",
//!     "displayName": "Workstation",
//!     "version": "0.1.0",
//!     "platform": "linux",
//!     "deviceFamily": "desktop",
//!     "mode": "node"
//!   },
//!   "caps": ["canvas"],
//!   "commands": ["canvas.present"],
//!   "role": "node",
//!   "scopes": [],
//!   "auth": { "token": "…" }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 3;

/// Handshake method name.
pub const METHOD_CONNECT: &str = "connect";

/// Default client role.
pub const DEFAULT_ROLE: &str = "node";

// ============================================================================
// ClientInfo
// ============================================================================

/// Descriptor identifying this client to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Stable client identifier.
    pub id: String,

    /// Per-process instance identifier.
    pub instance_id: String,

    /// Human-readable name.
    pub display_name: String,

    /// Semantic version of the client.
    pub version: String,

    /// Platform tag (e.g. `macos`, `linux`).
    pub platform: String,

    /// Device family (e.g. `desktop`, `browser`).
    pub device_family: String,

    /// Client mode.
    pub mode: String,
}

impl ClientInfo {
    /// Creates a descriptor with a fresh instance ID and host defaults.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instance_id: Uuid::new_v4().to_string(),
            display_name: display_name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            device_family: "desktop".to_string(),
            mode: DEFAULT_ROLE.to_string(),
        }
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::new("gateway-channel", "Gateway Channel")
    }
}

// ============================================================================
// AuthBlock
// ============================================================================

/// Credentials presented during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBlock {
    /// Bearer token.
    pub token: String,
}

// ============================================================================
// ConnectParams
// ============================================================================

/// Params of the `connect` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest protocol version accepted.
    pub min_protocol: u32,

    /// Highest protocol version accepted.
    pub max_protocol: u32,

    /// Client descriptor.
    pub client: ClientInfo,

    /// Declared capability tags.
    pub caps: Vec<String>,

    /// Declared command names.
    pub commands: Vec<String>,

    /// Client role.
    pub role: String,

    /// Requested scopes.
    pub scopes: Vec<String>,

    /// Credentials, present only when a token is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthBlock>,
}

impl ConnectParams {
    /// Creates params pinned to [`PROTOCOL_VERSION`].
    #[must_use]
    pub fn new(client: ClientInfo) -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client,
            caps: Vec::new(),
            commands: Vec::new(),
            role: DEFAULT_ROLE.to_string(),
            scopes: Vec::new(),
            auth: None,
        }
    }

    /// Attaches a bearer token when one is configured.
    #[must_use]
    pub fn with_token(mut self, token: Option<&str>) -> Self {
        self.auth = token.map(|token| AuthBlock {
            token: token.to_string(),
        });
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
