//! WebSocket connection and socket loop.
//!
//! One [`Connection`] is one epoch: a single socket from open to close.
//! It owns the correlator for requests sent on that socket and forwards
//! every other inbound frame, followed by exactly one closure notice, to
//! the channel returned by [`Connection::open`].
//!
//! # Socket Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming text messages from the gateway (parsed into [`Frame`]s)
//! - Outgoing frames queued by [`Connection::send`]
//! - Shutdown requested by [`Connection::shutdown`]

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Frame, METHOD_CONNECT, RequestFrame, ResponseFrame};

use super::correlator::Correlator;

// ============================================================================
// Types
// ============================================================================

/// Client-side WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receiver of inbound traffic for one epoch.
pub type InboundReceiver = mpsc::UnboundedReceiver<Inbound>;

/// Inbound traffic delivered to the dispatch loop, in arrival order.
#[derive(Debug)]
pub enum Inbound {
    /// A validated frame.
    Frame(Frame),
    /// The socket is gone. Always the last item of an epoch.
    Closed(CloseReason),
}

/// Why a socket loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Connection::shutdown`] was called.
    Local,
    /// The gateway closed the socket.
    Remote,
    /// The socket failed.
    Error(String),
}

impl CloseReason {
    /// Returns `true` if the closure was requested locally.
    #[inline]
    #[must_use]
    pub fn is_intentional(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("closed by client"),
            Self::Remote => f.write_str("closed by gateway"),
            Self::Error(message) => write!(f, "socket error: {message}"),
        }
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the socket loop.
enum ConnectionCommand {
    /// Write a serialized frame.
    Send(String),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to one open gateway socket.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; clones share the
/// socket loop, correlator and flags.
#[derive(Clone)]
pub struct Connection {
    /// Epoch number assigned by the owner.
    epoch: u64,
    /// Channel for sending commands to the socket loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Pending requests sent on this socket.
    correlator: Correlator,
    /// Cleared when the socket loop exits.
    open: Arc<AtomicBool>,
    /// Set once the handshake succeeded.
    ready: Arc<AtomicBool>,
    /// ID of the `connect` request on this socket.
    handshake_id: Arc<Mutex<Option<RequestId>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("epoch", &self.epoch)
            .field("open", &self.is_open())
            .field("ready", &self.is_ready())
            .field("pending", &self.correlator.len())
            .finish()
    }
}

impl Connection {
    /// Opens a WebSocket to `url` and spawns its socket loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnavailable`] if the socket cannot be opened.
    pub async fn open(url: &Url, epoch: u64) -> Result<(Self, InboundReceiver)> {
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::transport_unavailable(format!("{url}: {e}")))?;

        info!(%url, epoch, "Gateway socket open");

        Ok(Self::from_stream(ws_stream, epoch))
    }

    /// Wraps an established stream and spawns the socket loop.
    fn from_stream(ws_stream: WsStream, epoch: u64) -> (Self, InboundReceiver) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::run_socket_loop(
            ws_stream,
            epoch,
            command_rx,
            inbound_tx,
            Arc::clone(&open),
        ));

        let connection = Self {
            epoch,
            command_tx,
            correlator: Correlator::new(),
            open,
            ready: Arc::new(AtomicBool::new(false)),
            handshake_id: Arc::new(Mutex::new(None)),
        };

        (connection, inbound_rx)
    }

    /// Sends a frame.
    ///
    /// Fails immediately when the socket is not open; nothing is queued
    /// for a later connection.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the socket is closed
    /// - [`Error::Json`] if the frame fails to serialize
    pub fn send(&self, frame: &Frame) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }

        let text = frame.to_text()?;
        self.command_tx
            .send(ConnectionCommand::Send(text))
            .map_err(|_| Error::NotConnected)?;

        trace!(epoch = self.epoch, kind = frame.kind(), "Frame queued");
        Ok(())
    }

    /// Sends a request and waits for its correlated response.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the socket is closed
    /// - [`Error::TooManyPending`] if `max_pending` requests are waiting
    /// - [`Error::RequestTimeout`] if no response arrives within `limit`
    /// - [`Error::RequestRejected`] if the gateway answers `ok: false`
    /// - [`Error::ConnectionClosed`] if the socket drops before a response
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        limit: Duration,
        max_pending: usize,
    ) -> Result<Value> {
        self.send_request(RequestFrame::new(method, params), limit, max_pending)
            .await
    }

    /// Sends the `connect` request.
    ///
    /// The connection becomes ready as soon as the successful response
    /// is correlated, before any frame that follows it is dispatched.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::request`].
    pub async fn handshake(&self, params: Value, limit: Duration) -> Result<Value> {
        let frame = RequestFrame::new(METHOD_CONNECT, Some(params));
        *self.handshake_id.lock() = Some(frame.id.clone());
        self.send_request(frame, limit, usize::MAX).await
    }

    /// Delivers a response to the correlator.
    ///
    /// Returns `false` if the response was discarded.
    pub(crate) fn accept_response(&self, response: ResponseFrame) -> bool {
        if response.ok
            && !self.is_ready()
            && self.correlator.contains(&response.id)
            && self.handshake_id.lock().as_ref() == Some(&response.id)
        {
            self.mark_ready();
        }

        self.correlator.resolve(response)
    }

    async fn send_request(
        &self,
        frame: RequestFrame,
        limit: Duration,
        max_pending: usize,
    ) -> Result<Value> {
        let id = frame.id.clone();

        // Register before the frame can hit the wire.
        let rx = self
            .correlator
            .register(id.clone(), &frame.method, max_pending)?;
        let method = frame.method.clone();

        if let Err(e) = self.send(&Frame::Request(frame)) {
            self.correlator.remove(&id);
            return Err(e);
        }

        debug!(epoch = self.epoch, id = %id, method = %method, "Request sent");

        self.correlator.wait(id, rx, limit).await
    }

    /// Closes the socket.
    ///
    /// The socket loop reports [`CloseReason::Local`].
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Marks the handshake as complete.
    #[inline]
    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Returns the epoch number.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns `true` while the socket loop is running.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Returns `true` once the handshake succeeded.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Returns the correlator of this epoch.
    #[inline]
    #[must_use]
    pub(crate) fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlator.len()
    }

    /// Socket loop that handles WebSocket I/O.
    async fn run_socket_loop(
        ws_stream: WsStream,
        epoch: u64,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        inbound_tx: mpsc::UnboundedSender<Inbound>,
        open: Arc<AtomicBool>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let reason = loop {
            tokio::select! {
                // Incoming messages from the gateway
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, epoch, &inbound_tx);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(epoch, "WebSocket closed by gateway");
                            break CloseReason::Remote;
                        }

                        Some(Err(e)) => {
                            error!(epoch, error = %e, "WebSocket error");
                            break CloseReason::Error(e.to_string());
                        }

                        None => {
                            debug!(epoch, "WebSocket stream ended");
                            break CloseReason::Remote;
                        }

                        // Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the client
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(epoch, error = %e, "Failed to write frame");
                                break CloseReason::Error(e.to_string());
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!(epoch, "Shutdown command received");
                            let _ = ws_write.close().await;
                            break CloseReason::Local;
                        }

                        None => {
                            debug!(epoch, "All connection handles dropped");
                            let _ = ws_write.close().await;
                            break CloseReason::Local;
                        }
                    }
                }
            }
        };

        open.store(false, Ordering::Release);
        drop(command_rx);

        info!(epoch, %reason, "Gateway socket closed");
        let _ = inbound_tx.send(Inbound::Closed(reason));
    }

    /// Parses an incoming text message and forwards it.
    ///
    /// Unparseable frames are dropped with a warning.
    fn handle_incoming_message(
        text: &str,
        epoch: u64,
        inbound_tx: &mpsc::UnboundedSender<Inbound>,
    ) {
        match Frame::parse(text) {
            Ok(frame) => {
                trace!(epoch, kind = frame.kind(), "Frame received");
                let _ = inbound_tx.send(Inbound::Frame(frame));
            }
            Err(e) => {
                warn!(epoch, error = %e, text = %text, "Dropping invalid frame");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
