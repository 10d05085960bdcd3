//! Request/response correlation.
//!
//! Every outgoing `req` frame registers a pending entry keyed by its ID.
//! The entry is removed exactly once: by a matching `res` frame, by its
//! timeout, or by [`Correlator::fail_all`] when the socket goes away.
//! Whichever happens first wins; the others become no-ops.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::ResponseFrame;

// ============================================================================
// Types
// ============================================================================

/// Receiving half of a pending request's outcome.
pub type PendingOutcome = oneshot::Receiver<Result<Value>>;

/// In-flight request record.
struct PendingRequest {
    /// Method name, for logging.
    method: String,
    /// When the request was registered.
    submitted_at: Instant,
    /// Outcome channel.
    tx: oneshot::Sender<Result<Value>>,
}

/// Map of request IDs to pending records.
type PendingMap = FxHashMap<RequestId, PendingRequest>;

// ============================================================================
// Correlator
// ============================================================================

/// Tracks in-flight requests for one connection epoch.
///
/// Cloning is cheap; clones share the same pending map.
#[derive(Clone, Default)]
pub struct Correlator {
    pending: Arc<Mutex<PendingMap>>,
}

impl Correlator {
    /// Creates an empty correlator.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending request.
    ///
    /// # Errors
    ///
    /// - [`Error::TooManyPending`] if `max_pending` requests are already waiting
    /// - [`Error::Protocol`] if the ID is already pending
    pub fn register(
        &self,
        id: RequestId,
        method: &str,
        max_pending: usize,
    ) -> Result<PendingOutcome> {
        let mut pending = self.pending.lock();

        if pending.len() >= max_pending {
            warn!(
                pending = pending.len(),
                max = max_pending,
                "Too many pending requests"
            );
            return Err(Error::TooManyPending {
                pending: pending.len(),
                max: max_pending,
            });
        }

        if pending.contains_key(&id) {
            return Err(Error::protocol(format!("Duplicate request id: {id}")));
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                submitted_at: Instant::now(),
                tx,
            },
        );

        Ok(rx)
    }

    /// Delivers a response to its pending request.
    ///
    /// Returns `false` if no request with that ID is pending (unknown,
    /// already resolved, or timed out); the response is then discarded.
    pub fn resolve(&self, response: ResponseFrame) -> bool {
        let entry = self.pending.lock().remove(&response.id);

        let Some(entry) = entry else {
            debug!(id = %response.id, "Discarding response for unknown request");
            return false;
        };

        trace!(
            id = %response.id,
            method = %entry.method,
            elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64,
            ok = response.ok,
            "Response correlated"
        );

        // The waiter may have given up already; that is not an error here.
        let _ = entry.tx.send(response.into_result());
        true
    }

    /// Removes a pending request without delivering an outcome.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Fails every pending request with [`Error::ConnectionClosed`].
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();

        for (_, entry) in drained {
            let _ = entry.tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on connection loss");
        }

        count
    }

    /// Waits for a registered request's outcome, bounded by `limit`.
    ///
    /// On timeout the pending entry is removed so a late response is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if no response arrives within `limit`
    /// - [`Error::ConnectionClosed`] if the connection dropped first
    /// - [`Error::RequestRejected`] if the peer answered `ok: false`
    pub async fn wait(&self, id: RequestId, rx: PendingOutcome, limit: Duration) -> Result<Value> {
        match timeout(limit, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.remove(&id);
                debug!(id = %id, timeout_ms = limit.as_millis() as u64, "Request timed out");
                Err(Error::request_timeout(id, limit.as_millis() as u64))
            }
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Returns `true` if a request with this ID is pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.lock().contains_key(id)
    }
}

// ============================================================================
// Tests
// ============================================================================
