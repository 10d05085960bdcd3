//! Invocation message types.
//!
//! The gateway asks this client to run a command by sending a `req` frame
//! with method `invoke`:
//!
//! ```json
//! {
//!   "type": "req",
//!   "id": "gateway-chosen-id",
//!   "method": "invoke",
//!   "params": { "command": "canvas.present", "params": { … } }
//! }
//! ```
//!
//! Failures are answered with `error.code = "invoke_failed"`.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Invocation method name.
pub const METHOD_INVOKE: &str = "invoke";

/// Error code for every failed invocation.
pub const INVOKE_FAILED: &str = "invoke_failed";

/// Error code for inbound requests with a method other than `invoke`.
pub const UNSUPPORTED_METHOD: &str = "unsupported_method";

// ============================================================================
// InvokeParams
// ============================================================================

/// Params of an `invoke` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeParams {
    /// Command name.
    pub command: String,

    /// Command-specific params.
    #[serde(default)]
    pub params: Value,
}

impl InvokeParams {
    /// Extracts invocation params from a request's `params` field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `params` is absent or has no
    /// string `command`.
    pub fn from_request_params(params: Option<&Value>) -> Result<Self> {
        let params = params.ok_or_else(|| Error::protocol("missing params"))?;
        let parsed: Self = serde_json::from_value(params.clone())
            .map_err(|e| Error::protocol(e.to_string()))?;

        if parsed.command.is_empty() {
            return Err(Error::protocol("empty command"));
        }

        Ok(parsed)
    }
}

// ============================================================================
// Tests
// ============================================================================
