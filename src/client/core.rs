//! Gateway connection manager.
//!
//! [`GatewayClient`] owns the connection lifecycle of one client process:
//!
//! ```text
//! Closed ──▶ Connecting ──▶ Handshaking ──▶ Ready
//!   ▲            │               │            │
//!   └────────────┴───────────────┴────────────┘
//!           failure, loss or close
//! ```
//!
//! Only one connect attempt runs at a time. Callers arriving while an
//! attempt is in flight wait for that attempt and receive its outcome.
//! Each socket is one epoch; notices from an older epoch are ignored.
//!
//! # Example
//!
//! ```no_run
//! use gateway_channel::{GatewayClient, GatewayConfig};
//!
//! # async fn example() -> gateway_channel::Result<()> {
//! let client = GatewayClient::builder()
//!     .config(GatewayConfig::new("127.0.0.1", 18789))
//!     .build()?;
//!
//! client.ensure_connected().await?;
//! let health = client.request("health", None).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::commands::CommandRegistry;
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::events::{EventSink, EventSubscription};
use crate::protocol::{ClientInfo, ConnectParams, Frame};
use crate::transport::{CloseReason, Connection};

use super::builder::GatewayClientBuilder;
use super::dispatch;
use super::reconnect::ReconnectScheduler;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Closed,
    /// Opening the socket.
    Connecting,
    /// Socket open, waiting for the `connect` response.
    Handshaking,
    /// Handshake accepted.
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Snapshot of the connection for status displays.
///
/// `last_error` survives failed attempts and clears once an attempt
/// reaches [`ConnectionState::Ready`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Text of the most recent connection failure.
    pub last_error: Option<String>,
}

// ============================================================================
// Internal State
// ============================================================================

/// Tunables fixed at build time.
#[derive(Debug, Clone)]
pub(crate) struct ClientSettings {
    pub client: ClientInfo,
    pub caps: Vec<String>,
    pub role: String,
    pub scopes: Vec<String>,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_pending: usize,
}

impl ClientSettings {
    /// Builds the `connect` params for one attempt.
    fn connect_params(&self, commands: &CommandRegistry, token: Option<&str>) -> ConnectParams {
        let mut params = ConnectParams::new(self.client.clone());
        params.caps = self.caps.clone();
        params.commands = commands.names();
        params.role = self.role.clone();
        params.scopes = self.scopes.clone();
        params.with_token(token)
    }
}

/// Mutable connection state, guarded by one lock.
#[derive(Default)]
struct Session {
    state: ConnectionState,
    /// Epoch of the current or most recent attempt.
    epoch: u64,
    /// Socket of the current epoch, once open.
    connection: Option<Connection>,
    /// Callers waiting on the in-flight attempt.
    waiters: Vec<oneshot::Sender<Result<()>>>,
    last_error: Option<String>,
    /// Payload of the accepted `connect` response.
    hello: Option<Value>,
}

/// Shared state behind every [`GatewayClient`] clone.
pub(crate) struct ClientInner {
    config: RwLock<GatewayConfig>,
    settings: ClientSettings,
    commands: Arc<CommandRegistry>,
    events: Arc<EventSink>,
    reconnect: Arc<ReconnectScheduler>,
    session: Mutex<Session>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ClientInner {
    /// Publishes the session state to status watchers.
    fn publish_status(&self, session: &Session) {
        self.status_tx.send_replace(ConnectionStatus {
            state: session.state,
            last_error: session.last_error.clone(),
        });
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.reconnect.cancel();
        if let Some(connection) = self.session.get_mut().connection.take() {
            connection.shutdown();
        }
    }
}

// ============================================================================
// GatewayClient
// ============================================================================

/// Handle to the gateway connection.
///
/// Cheap to clone; clones share one connection, one command registry and
/// one set of event subscriptions.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("config", &*self.inner.config.read())
            .field("status", &self.status())
            .field("commands", &self.inner.commands)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// GatewayClient - Public API
// ============================================================================

impl GatewayClient {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> GatewayClientBuilder {
        GatewayClientBuilder::new()
    }

    /// Connects if not already connected.
    ///
    /// Returns immediately when ready. While an attempt is in flight the
    /// caller waits for that attempt instead of opening another socket.
    ///
    /// A failed attempt schedules a reconnect.
    ///
    /// # Errors
    ///
    /// - [`Error::Disabled`] if the configuration disables the connection
    /// - [`Error::Config`] if the endpoint is invalid
    /// - [`Error::TransportUnavailable`] if the socket cannot be opened
    /// - [`Error::HandshakeRejected`] if the gateway refuses the handshake
    /// - [`Error::HandshakeTimeout`] if the gateway does not answer in time
    /// - [`Error::ConnectionClosed`] if the attempt was superseded by
    ///   [`close`](Self::close)
    pub async fn ensure_connected(&self) -> Result<()> {
        if !self.inner.config.read().enabled {
            return Err(Error::Disabled);
        }

        let outcome = {
            let mut session = self.inner.session.lock();
            match session.state {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Handshaking => {
                    debug!(epoch = session.epoch, "Joining in-flight connect attempt");
                }
                ConnectionState::Closed => {
                    session.epoch += 1;
                    session.state = ConnectionState::Connecting;
                    session.hello = None;
                    self.inner.publish_status(&session);

                    debug!(epoch = session.epoch, "Starting connect attempt");
                    tokio::spawn(run_attempt(Arc::clone(&self.inner), session.epoch));
                }
            }

            let (tx, rx) = oneshot::channel();
            session.waiters.push(tx);
            rx
        };

        outcome.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Sends a frame on the ready connection.
    ///
    /// Nothing is queued: callers must reconnect and retry themselves.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the connection is not ready
    /// - [`Error::Json`] if the frame fails to serialize
    pub fn send(&self, frame: &Frame) -> Result<()> {
        self.ready_connection()?.send(frame)
    }

    /// Sends a request using the default request timeout.
    ///
    /// # Errors
    ///
    /// See [`request_with_timeout`](Self::request_with_timeout).
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(method, params, self.inner.settings.request_timeout)
            .await
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the connection is not ready
    /// - [`Error::TooManyPending`] if the pending limit is reached
    /// - [`Error::RequestTimeout`] if no response arrives within `limit`
    /// - [`Error::RequestRejected`] if the gateway answers `ok: false`
    /// - [`Error::ConnectionClosed`] if the connection drops first
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        limit: Duration,
    ) -> Result<Value> {
        let connection = self.ready_connection()?;
        connection
            .request(method, params, limit, self.inner.settings.max_pending)
            .await
    }

    /// Closes the connection without scheduling a reconnect.
    ///
    /// Pending requests fail with [`Error::ConnectionClosed`], as does an
    /// in-flight connect attempt.
    pub fn close(&self) {
        self.inner.reconnect.cancel();

        let (connection, waiters) = {
            let mut session = self.inner.session.lock();
            session.epoch += 1;
            session.state = ConnectionState::Closed;
            session.hello = None;
            self.inner.publish_status(&session);
            (session.connection.take(), mem::take(&mut session.waiters))
        };

        if let Some(connection) = connection {
            info!(epoch = connection.epoch(), "Closing gateway connection");
            connection.shutdown();
        }

        for waiter in waiters {
            let _ = waiter.send(Err(Error::ConnectionClosed));
        }
    }

    /// Replaces the configuration.
    ///
    /// An unchanged configuration is a no-op. Otherwise the current
    /// connection is closed and, if the new configuration is enabled,
    /// a new one is established.
    ///
    /// # Errors
    ///
    /// Same as [`ensure_connected`](Self::ensure_connected), except that a
    /// disabled configuration returns `Ok(())`.
    pub async fn apply_config(&self, config: GatewayConfig) -> Result<()> {
        let enabled = config.enabled;
        {
            let mut current = self.inner.config.write();
            if *current == config {
                debug!("Gateway configuration unchanged");
                return Ok(());
            }
            info!(host = %config.host, port = config.port, enabled, "Gateway configuration changed");
            *current = config;
        }

        self.close();

        if enabled {
            self.ensure_connected().await
        } else {
            Ok(())
        }
    }

    /// Subscribes to events named `name`.
    #[must_use]
    pub fn on_event(&self, name: impl Into<String>) -> EventSubscription {
        self.inner.events.subscribe(name)
    }

    /// Subscribes to every event.
    #[must_use]
    pub fn on_any_event(&self) -> EventSubscription {
        self.inner.events.subscribe_all()
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Returns a receiver notified on every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    /// Returns `true` if the handshake succeeded and the socket is open.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Returns the payload of the accepted `connect` response.
    #[must_use]
    pub fn hello(&self) -> Option<Value> {
        self.inner.session.lock().hello.clone()
    }

    /// Returns a copy of the configuration.
    #[must_use]
    pub fn config(&self) -> GatewayConfig {
        self.inner.config.read().clone()
    }

    /// Returns the number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner
            .session
            .lock()
            .connection
            .as_ref()
            .map_or(0, Connection::pending_count)
    }

    /// Returns `true` while a reconnect timer is pending.
    #[inline]
    #[must_use]
    pub fn is_reconnect_scheduled(&self) -> bool {
        self.inner.reconnect.is_scheduled()
    }

    /// Returns the epoch of the current or most recent attempt.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.session.lock().epoch
    }

    /// Returns the registered command names, sorted.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.inner.commands.names()
    }
}

// ============================================================================
// GatewayClient - Internal API
// ============================================================================

impl GatewayClient {
    /// Creates a client from validated builder output.
    pub(crate) fn from_parts(
        config: GatewayConfig,
        settings: ClientSettings,
        commands: CommandRegistry,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        let reconnect = Arc::new(ReconnectScheduler::new(settings.reconnect_delay));

        let inner = Arc::new(ClientInner {
            config: RwLock::new(config),
            settings,
            commands: Arc::new(commands),
            events: Arc::new(EventSink::new()),
            reconnect,
            session: Mutex::new(Session::default()),
            status_tx,
        });

        Self { inner }
    }

    /// Returns the connection if the session is ready.
    fn ready_connection(&self) -> Result<Connection> {
        let session = self.inner.session.lock();
        match (&session.state, &session.connection) {
            (ConnectionState::Ready, Some(connection)) => Ok(connection.clone()),
            _ => Err(Error::NotConnected),
        }
    }
}

// ============================================================================
// Connect Attempt
// ============================================================================

/// Runs one attempt to completion and settles its waiters.
async fn run_attempt(inner: Arc<ClientInner>, epoch: u64) {
    let mut result = connect_epoch(&inner, epoch).await;

    let waiters = {
        let mut session = inner.session.lock();

        if session.epoch != epoch {
            debug!(epoch, current = session.epoch, "Discarding superseded connect attempt");
            if let Ok((connection, _)) = &result {
                connection.shutdown();
            }
            return;
        }

        // A loss seen after this check is reported under the same lock.
        if matches!(&result, Ok((connection, _)) if !connection.is_open()) {
            result = Err(Error::ConnectionClosed);
        }

        match &result {
            Ok((connection, hello)) => {
                info!(epoch, "Gateway connection ready");
                session.state = ConnectionState::Ready;
                session.connection = Some(connection.clone());
                session.hello = Some(hello.clone());
                session.last_error = None;
            }
            Err(e) => {
                warn!(epoch, error = %e, "Gateway connect attempt failed");
                session.state = ConnectionState::Closed;
                session.connection = None;
                session.last_error = Some(e.to_string());
            }
        }

        inner.publish_status(&session);
        mem::take(&mut session.waiters)
    };

    if let Err(e) = &result
        && e.is_connection_error()
    {
        schedule_reconnect(&inner);
    }

    for waiter in waiters {
        let outcome = match &result {
            Ok(_) => Ok(()),
            Err(e) => Err(e.replicate()),
        };
        let _ = waiter.send(outcome);
    }
}

/// Opens the socket, starts dispatch and performs the handshake.
async fn connect_epoch(inner: &Arc<ClientInner>, epoch: u64) -> Result<(Connection, Value)> {
    let config = inner.config.read().clone();
    let url = config.ws_url()?;

    let (connection, inbound) = Connection::open(&url, epoch).await?;

    {
        let mut session = inner.session.lock();
        if session.epoch != epoch {
            connection.shutdown();
            return Err(Error::ConnectionClosed);
        }
        session.connection = Some(connection.clone());
        session.state = ConnectionState::Handshaking;
        inner.publish_status(&session);
    }

    let weak = Arc::downgrade(inner);
    tokio::spawn({
        let connection = connection.clone();
        let commands = Arc::clone(&inner.commands);
        let events = Arc::clone(&inner.events);
        async move {
            let reason = dispatch::run(connection, inbound, commands, events).await;
            handle_connection_lost(&weak, epoch, &reason);
        }
    });

    let params = inner
        .settings
        .connect_params(&inner.commands, config.token());
    let params = serde_json::to_value(&params)?;

    match connection
        .handshake(params, inner.settings.handshake_timeout)
        .await
    {
        Ok(hello) => Ok((connection, hello)),
        Err(e) => {
            connection.shutdown();
            Err(match e {
                Error::RequestTimeout { timeout_ms, .. } => Error::handshake_timeout(timeout_ms),
                Error::RequestRejected { code, message } => Error::handshake_rejected(code, message),
                other => other,
            })
        }
    }
}

// ============================================================================
// Connection Loss & Reconnect
// ============================================================================

/// Reacts to the end of an epoch's dispatch loop.
///
/// Only a ready connection of the current epoch counts as lost; losses
/// during the handshake surface through the attempt itself.
fn handle_connection_lost(weak: &Weak<ClientInner>, epoch: u64, reason: &CloseReason) {
    let Some(inner) = weak.upgrade() else {
        return;
    };

    {
        let mut session = inner.session.lock();
        if session.epoch != epoch || session.state != ConnectionState::Ready {
            debug!(epoch, %reason, "Ignoring closure outside the ready epoch");
            return;
        }

        session.state = ConnectionState::Closed;
        session.connection = None;
        session.hello = None;
        if !reason.is_intentional() {
            session.last_error = Some(format!("Connection lost: {reason}"));
        }
        inner.publish_status(&session);
    }

    if reason.is_intentional() {
        info!(epoch, "Gateway connection closed");
        return;
    }

    warn!(epoch, %reason, "Gateway connection lost");
    schedule_reconnect(&inner);
}

/// Schedules a reconnect unless the configuration is disabled.
fn schedule_reconnect(inner: &Arc<ClientInner>) {
    if !inner.config.read().enabled {
        return;
    }

    let weak = Arc::downgrade(inner);
    inner.reconnect.schedule(move || async move {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        // Failures schedule the next attempt from inside the attempt.
        if let Err(e) = (GatewayClient { inner }).ensure_connected().await {
            debug!(error = %e, "Reconnect attempt failed");
        }
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use futures_util::future::join_all;
    use serde_json::json;
    use tokio::time::{sleep, timeout};

    use crate::error::CommandError;
    use crate::transport::mock::{
        DROP_SOCKET, MockGateway, eventually, reply_err, reply_ok, unused_port,
    };

    fn client_for(gateway: &MockGateway) -> GatewayClient {
        GatewayClient::builder()
            .config(gateway.config())
            .build()
            .expect("build")
    }

    /// Answers `connect` and replies to `ping` twice with the same id.
    async fn ping_gateway() -> MockGateway {
        MockGateway::start(|frame| match frame["method"].as_str() {
            Some("connect") => vec![reply_ok(frame, json!({"type": "hello-ok", "protocol": 3}))],
            Some("ping") => vec![
                reply_ok(frame, json!({"pong": true})),
                reply_ok(frame, json!({"pong": "again"})),
            ],
            _ => Vec::new(),
        })
        .await
    }

    #[tokio::test]
    async fn test_handshake_reaches_ready() {
        let gateway = MockGateway::accepting().await;
        let client = GatewayClient::builder()
            .config(gateway.config().with_token("secret"))
            .client_id("node-host")
            .capability("canvas")
            .command("canvas.present", |_params: Value| async move {
                Ok::<_, CommandError>(Value::Null)
            })
            .build()
            .expect("build");

        client.ensure_connected().await.expect("connect");
        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(client.status().last_error, None);

        let connect = gateway.next_request("connect").await;
        let params = &connect["params"];
        assert_eq!(params["minProtocol"], 3);
        assert_eq!(params["maxProtocol"], 3);
        assert_eq!(params["client"]["id"], "node-host");
        assert_eq!(params["caps"], json!(["canvas"]));
        assert_eq!(params["commands"], json!(["canvas.present"]));
        assert_eq!(params["role"], "node");
        assert_eq!(params["auth"]["token"], "secret");
    }

    #[tokio::test]
    async fn test_hello_payload_is_kept() {
        let gateway = MockGateway::accepting().await;
        let client = client_for(&gateway);
        assert!(client.hello().is_none());

        client.ensure_connected().await.expect("connect");
        assert_eq!(
            client.hello(),
            Some(json!({"type": "hello-ok", "protocol": 3}))
        );

        client.close();
        assert!(client.hello().is_none());
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let gateway = MockGateway::start(|frame| {
            vec![reply_err(frame, "denied", "rejected")]
        })
        .await;
        let client = client_for(&gateway);

        let err = client.ensure_connected().await.expect_err("rejected");
        match err {
            Error::HandshakeRejected { code, message } => {
                assert_eq!(code, "denied");
                assert_eq!(message, "rejected");
            }
            other => panic!("unexpected error: {other}"),
        }

        let status = client.status();
        assert_eq!(status.state, ConnectionState::Closed);
        assert!(status.last_error.expect("last error").contains("rejected"));
        assert!(client.is_reconnect_scheduled());
        client.close();
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let gateway = MockGateway::silent().await;
        let client = GatewayClient::builder()
            .config(gateway.config())
            .handshake_timeout(Duration::from_millis(100))
            .build()
            .expect("build");

        let err = client.ensure_connected().await.expect_err("timeout");
        assert!(matches!(err, Error::HandshakeTimeout { timeout_ms: 100 }));
        assert_eq!(client.state(), ConnectionState::Closed);
        client.close();
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_socket() {
        let gateway = MockGateway::accepting().await;
        let client = client_for(&gateway);

        let results = join_all((0..8).map(|_| client.ensure_connected())).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(gateway.accepted(), 1);
        assert_eq!(client.epoch(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_failure() {
        let gateway = MockGateway::silent().await;
        let client = GatewayClient::builder()
            .config(gateway.config())
            .handshake_timeout(Duration::from_millis(100))
            .build()
            .expect("build");

        let results = join_all((0..4).map(|_| client.ensure_connected())).await;

        assert!(
            results
                .iter()
                .all(|r| matches!(r, Err(Error::HandshakeTimeout { .. })))
        );
        assert_eq!(gateway.accepted(), 1);
        client.close();
    }

    #[tokio::test]
    async fn test_request_roundtrip_ignores_duplicate_response() {
        let gateway = ping_gateway().await;
        let client = client_for(&gateway);
        client.ensure_connected().await.expect("connect");

        let payload = client.request("ping", None).await.expect("ping");
        assert_eq!(payload, json!({"pong": true}));

        // The duplicate was discarded and the connection is intact.
        let payload = client.request("ping", None).await.expect("second ping");
        assert_eq!(payload, json!({"pong": true}));
        assert_eq!(client.pending_count(), 0);
        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn test_request_timeout_discards_late_response() {
        let gateway = MockGateway::accepting().await;
        let client = client_for(&gateway);
        client.ensure_connected().await.expect("connect");

        let started = Instant::now();
        let err = client
            .request_with_timeout("slow", None, Duration::from_millis(100))
            .await
            .expect_err("timeout");
        assert!(matches!(err, Error::RequestTimeout { timeout_ms: 100, .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));

        let sent = gateway.next_request("slow").await;
        gateway.push(reply_ok(&sent, json!({"late": true})));
        sleep(Duration::from_millis(50)).await;

        assert_eq!(client.pending_count(), 0);
        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn test_rejected_request_keeps_connection() {
        let gateway = MockGateway::start(|frame| match frame["method"].as_str() {
            Some("connect") => vec![reply_ok(frame, json!({}))],
            Some(_) => vec![reply_err(frame, "not_found", "no such node")],
            None => Vec::new(),
        })
        .await;
        let client = client_for(&gateway);
        client.ensure_connected().await.expect("connect");

        let err = client
            .request("node.describe", Some(json!({"id": "x"})))
            .await
            .expect_err("rejected");
        assert!(matches!(err, Error::RequestRejected { ref code, .. } if code == "not_found"));
        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn test_connection_loss_fails_every_pending_request() {
        let gateway = MockGateway::accepting().await;
        let client = client_for(&gateway);
        client.ensure_connected().await.expect("connect");

        let requests: Vec<_> = (0..5)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.request("wait", Some(json!({"n": i}))).await })
            })
            .collect();
        eventually(|| client.pending_count() == 5).await;

        gateway.drop_peers();

        for request in requests {
            let result = timeout(Duration::from_secs(1), request)
                .await
                .expect("not left pending")
                .expect("join");
            assert!(matches!(result, Err(Error::ConnectionClosed)));
        }

        eventually(|| client.state() == ConnectionState::Closed).await;
        assert!(client.status().last_error.is_some());
        assert!(client.is_reconnect_scheduled());
        client.close();
    }

    #[tokio::test]
    async fn test_reconnects_after_unexpected_loss() {
        let gateway = MockGateway::accepting().await;
        let client = GatewayClient::builder()
            .config(gateway.config())
            .reconnect_delay(Duration::from_millis(50))
            .build()
            .expect("build");
        client.ensure_connected().await.expect("connect");

        gateway.drop_peers();
        gateway.wait_for_peers(2).await;
        eventually(|| client.is_ready() && client.epoch() == 2).await;

        assert_eq!(client.status().last_error, None);
    }

    #[tokio::test]
    async fn test_socket_dropped_after_hello_reconnects() {
        let connects = Arc::new(AtomicUsize::new(0));
        let gateway = MockGateway::start({
            let connects = Arc::clone(&connects);
            move |frame| {
                if frame["method"] != "connect" {
                    return Vec::new();
                }
                let hello = reply_ok(frame, json!({"type": "hello-ok", "protocol": 3}));
                if connects.fetch_add(1, Ordering::SeqCst) == 0 {
                    vec![hello, DROP_SOCKET]
                } else {
                    vec![hello]
                }
            }
        })
        .await;
        let client = GatewayClient::builder()
            .config(gateway.config())
            .reconnect_delay(Duration::from_millis(50))
            .build()
            .expect("build");

        // Whichever side of the readiness check the loss lands on, the
        // first epoch must not stay ready on the dead socket.
        if let Err(e) = client.ensure_connected().await {
            assert!(matches!(e, Error::ConnectionClosed), "unexpected error: {e}");
        }

        gateway.wait_for_peers(2).await;
        eventually(|| client.is_ready() && client.epoch() == 2).await;
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_does_not_reconnect() {
        let gateway = MockGateway::accepting().await;
        let client = GatewayClient::builder()
            .config(gateway.config())
            .reconnect_delay(Duration::from_millis(50))
            .build()
            .expect("build");
        client.ensure_connected().await.expect("connect");

        client.close();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(gateway.accepted(), 1);
        let status = client.status();
        assert_eq!(status.state, ConnectionState::Closed);
        assert_eq!(status.last_error, None);
        assert!(!client.is_reconnect_scheduled());
    }

    #[tokio::test]
    async fn test_close_fails_in_flight_attempt() {
        let gateway = MockGateway::silent().await;
        let client = client_for(&gateway);

        let attempt = tokio::spawn({
            let client = client.clone();
            async move { client.ensure_connected().await }
        });
        gateway.wait_for_peers(1).await;
        client.close();

        let result = attempt.await.expect("join");
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_invoke_dispatch() {
        let gateway = MockGateway::accepting().await;
        let client = GatewayClient::builder()
            .config(gateway.config())
            .command("echo", |params: Value| async move {
                Ok::<_, CommandError>(params)
            })
            .build()
            .expect("build");
        client.ensure_connected().await.expect("connect");

        gateway.push(json!({
            "type": "req", "id": "inv-1", "method": "invoke",
            "params": {"command": "canvas.bogus", "params": {}},
        }));
        let response = gateway.next_response("inv-1").await;
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["code"], "invoke_failed");
        assert_eq!(response["error"]["message"], "Unknown command: canvas.bogus");

        gateway.push(json!({
            "type": "req", "id": "inv-2", "method": "invoke",
            "params": {"command": "echo", "params": {"text": "hi"}},
        }));
        let response = gateway.next_response("inv-2").await;
        assert_eq!(response["ok"], true);
        assert_eq!(response["payload"], json!({"text": "hi"}));

        gateway.push(json!({"type": "req", "id": "inv-3", "method": "status"}));
        let response = gateway.next_response("inv-3").await;
        assert_eq!(response["error"]["code"], "unsupported_method");

        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn test_events_are_delivered_and_challenge_ignored() {
        let gateway = MockGateway::accepting().await;
        let client = client_for(&gateway);
        let mut presence = client.on_event("presence");
        let mut all = client.on_any_event();
        client.ensure_connected().await.expect("connect");

        gateway.push(json!({"type": "event", "event": "connect.challenge", "payload": {"nonce": "n"}}));
        gateway.push(json!({"type": "event", "event": "tick"}));
        gateway.push(json!({"type": "event", "event": "presence", "payload": {"online": 2}}));

        let first = timeout(Duration::from_secs(5), all.recv())
            .await
            .expect("event")
            .expect("open");
        assert_eq!(first.name, "tick");

        let event = timeout(Duration::from_secs(5), presence.recv())
            .await
            .expect("event")
            .expect("open");
        assert_eq!(event.payload, json!({"online": 2}));
    }

    #[tokio::test]
    async fn test_not_connected_before_connect() {
        let gateway = MockGateway::accepting().await;
        let client = client_for(&gateway);

        let err = client.request("ping", None).await.expect_err("not connected");
        assert!(matches!(err, Error::NotConnected));

        let frame = Frame::Event(crate::protocol::EventFrame::new("tick", None));
        assert!(matches!(client.send(&frame), Err(Error::NotConnected)));
        assert_eq!(gateway.accepted(), 0);
    }

    #[tokio::test]
    async fn test_disabled_config_never_connects() {
        let gateway = MockGateway::accepting().await;
        let client = GatewayClient::builder()
            .config(gateway.config().with_enabled(false))
            .build()
            .expect("build");

        assert!(matches!(
            client.ensure_connected().await,
            Err(Error::Disabled)
        ));
        assert_eq!(gateway.accepted(), 0);
        assert!(!client.is_reconnect_scheduled());
    }

    #[tokio::test]
    async fn test_unavailable_gateway_schedules_reconnect() {
        let port = unused_port().await;
        let client = GatewayClient::builder()
            .config(GatewayConfig::new("127.0.0.1", port))
            .build()
            .expect("build");

        let err = client.ensure_connected().await.expect_err("unavailable");
        assert!(matches!(err, Error::TransportUnavailable { .. }));

        let status = client.status();
        assert_eq!(status.state, ConnectionState::Closed);
        assert!(status.last_error.is_some());
        assert!(client.is_reconnect_scheduled());
        client.close();
    }

    #[tokio::test]
    async fn test_apply_config_switches_gateway() {
        let first = MockGateway::accepting().await;
        let second = MockGateway::accepting().await;
        let client = client_for(&first);
        client.ensure_connected().await.expect("connect");

        client
            .apply_config(second.config())
            .await
            .expect("reconnect");
        assert!(client.is_ready());
        assert_eq!(second.accepted(), 1);
        assert_eq!(client.config().port, second.port());

        // Same configuration again: nothing happens.
        client.apply_config(second.config()).await.expect("noop");
        assert_eq!(second.accepted(), 1);

        client
            .apply_config(second.config().with_enabled(false))
            .await
            .expect("disable");
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(!client.is_reconnect_scheduled());
    }

    #[tokio::test]
    async fn test_watch_status_follows_transitions() {
        let gateway = MockGateway::accepting().await;
        let client = client_for(&gateway);
        let status = client.watch_status();
        assert_eq!(status.borrow().state, ConnectionState::Closed);

        client.ensure_connected().await.expect("connect");
        assert_eq!(status.borrow().state, ConnectionState::Ready);

        client.close();
        assert_eq!(status.borrow().state, ConnectionState::Closed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Handshaking.to_string(), "handshaking");
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
    }
}
