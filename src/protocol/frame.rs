//! Wire frames.
//!
//! Every message on the socket is a single JSON object carrying a `type`
//! discriminator:
//!
//! ```json
//! { "type": "req",   "id": "…", "method": "…", "params": { … } }
//! { "type": "res",   "id": "…", "ok": true, "payload": … }
//! { "type": "res",   "id": "…", "ok": false, "error": { "code": "…", "message": "…" } }
//! { "type": "event", "event": "…", "payload": … }
//! ```
//!
//! Frames are validated once, at the boundary, by [`Frame::parse`].

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Error code used when a rejection carries no error block.
const UNKNOWN_ERROR_CODE: &str = "unknown";

// ============================================================================
// Frame
// ============================================================================

/// One message exchanged with the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Request expecting exactly one correlated response.
    #[serde(rename = "req")]
    Request(RequestFrame),

    /// Response to a previously sent request.
    #[serde(rename = "res")]
    Response(ResponseFrame),

    /// Uncorrelated notification.
    #[serde(rename = "event")]
    Event(EventFrame),
}

impl Frame {
    /// Parses and validates a text message.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not a recognized frame shape
    /// - [`Error::Protocol`] if a required identifier or name is empty
    pub fn parse(text: &str) -> Result<Self> {
        let frame: Self = serde_json::from_str(text)?;
        frame.validate()?;
        Ok(frame)
    }

    /// Serializes the frame to a single-line JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a payload fails to serialize.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the frame kind as it appears on the wire.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "req",
            Self::Response(_) => "res",
            Self::Event(_) => "event",
        }
    }

    /// Checks field-level invariants serde cannot express.
    fn validate(&self) -> Result<()> {
        match self {
            Self::Request(req) => {
                if req.id.is_empty() {
                    return Err(Error::protocol("request frame with empty id"));
                }
                if req.method.is_empty() {
                    return Err(Error::protocol("request frame with empty method"));
                }
            }
            Self::Response(res) => {
                if res.id.is_empty() {
                    return Err(Error::protocol("response frame with empty id"));
                }
            }
            Self::Event(event) => {
                if event.event.is_empty() {
                    return Err(Error::protocol("event frame with empty name"));
                }
            }
        }
        Ok(())
    }
}

impl From<RequestFrame> for Frame {
    fn from(value: RequestFrame) -> Self {
        Self::Request(value)
    }
}

impl From<ResponseFrame> for Frame {
    fn from(value: ResponseFrame) -> Self {
        Self::Response(value)
    }
}

impl From<EventFrame> for Frame {
    fn from(value: EventFrame) -> Self {
        Self::Event(value)
    }
}

// ============================================================================
// RequestFrame
// ============================================================================

/// A `req` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation ID.
    pub id: RequestId,

    /// Method name.
    pub method: String,

    /// Method parameters, opaque to the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestFrame {
    /// Creates a request with a freshly generated ID.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::with_id(RequestId::generate(), method, params)
    }

    /// Creates a request with a specific ID.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// ResponseFrame
// ============================================================================

/// A `res` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// ID of the request being answered.
    pub id: RequestId,

    /// Success flag.
    pub ok: bool,

    /// Result data (if `ok`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Failure details (if not `ok`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: RequestId, payload: Value) -> Self {
        Self {
            id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Creates a failure response.
    #[inline]
    #[must_use]
    pub fn failure(id: RequestId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            payload: None,
            error: Some(ErrorShape::new(code, message)),
        }
    }

    /// Extracts the payload, turning `ok: false` into a rejection.
    ///
    /// A successful response without payload yields `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestRejected`] if the response was a failure.
    pub fn into_result(self) -> Result<Value> {
        if self.ok {
            return Ok(self.payload.unwrap_or(Value::Null));
        }

        let shape = self
            .error
            .unwrap_or_else(|| ErrorShape::new(UNKNOWN_ERROR_CODE, "request failed"));
        Err(Error::request_rejected(shape.code, shape.message))
    }
}

// ============================================================================
// ErrorShape
// ============================================================================

/// Structured error carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Machine-readable error code.
    pub code: String,

    /// Human-readable message.
    pub message: String,
}

impl ErrorShape {
    /// Creates an error shape.
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// EventFrame
// ============================================================================

/// An `event` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name.
    pub event: String,

    /// Event data, opaque to the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl EventFrame {
    /// Creates an event frame.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
