//! Scriptable in-process gateway for socket-level tests.
//!
//! Binds `127.0.0.1:0`, upgrades every accepted TCP stream to a
//! WebSocket, records each frame the client sends and answers it with
//! whatever the responder returns. A [`DROP_SOCKET`] entry in the
//! responder's output ends the socket at that point.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::GatewayConfig;

// ============================================================================
// Types
// ============================================================================

/// Maps one received frame to the frames sent back.
pub(crate) type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// Commands for one peer task.
enum PeerCommand {
    /// Write a frame.
    Send(Value),
    /// Drop the socket without a close handshake.
    Drop,
}

/// How long test helpers wait before failing.
const WAIT: Duration = Duration::from_secs(5);

/// Responder output that drops the socket instead of writing a frame.
pub(crate) const DROP_SOCKET: Value = Value::Null;

// ============================================================================
// Frame Helpers
// ============================================================================

/// Builds an `ok: true` response to `request`.
pub(crate) fn reply_ok(request: &Value, payload: Value) -> Value {
    json!({"type": "res", "id": request["id"], "ok": true, "payload": payload})
}

/// Builds an `ok: false` response to `request`.
pub(crate) fn reply_err(request: &Value, code: &str, message: &str) -> Value {
    json!({
        "type": "res",
        "id": request["id"],
        "ok": false,
        "error": {"code": code, "message": message},
    })
}

/// Returns a port with nothing listening on it.
pub(crate) async fn unused_port() -> u16 {
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .expect("bind");
    listener.local_addr().expect("addr").port()
}

// ============================================================================
// MockGateway
// ============================================================================

/// In-process gateway.
pub(crate) struct MockGateway {
    port: u16,
    accepted: Arc<AtomicUsize>,
    peers: Arc<Mutex<Vec<mpsc::UnboundedSender<PeerCommand>>>>,
    received: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    accept_task: JoinHandle<()>,
}

impl MockGateway {
    /// Starts a gateway answering frames with `responder`.
    pub(crate) async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> Vec<Value> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let responder: Responder = Arc::new(responder);
        let accepted = Arc::new(AtomicUsize::new(0));
        let peers = Arc::new(Mutex::new(Vec::new()));
        let (received_tx, received_rx) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn({
            let accepted = Arc::clone(&accepted);
            let peers = Arc::clone(&peers);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
                    peers.lock().push(peer_tx);
                    tokio::spawn(serve_peer(
                        stream,
                        Arc::clone(&responder),
                        received_tx.clone(),
                        peer_rx,
                    ));
                }
            }
        });

        Self {
            port,
            accepted,
            peers,
            received: tokio::sync::Mutex::new(received_rx),
            accept_task,
        }
    }

    /// Gateway that accepts every handshake and ignores other requests.
    pub(crate) async fn accepting() -> Self {
        Self::start(|frame| {
            if frame["method"] == "connect" {
                vec![reply_ok(frame, json!({"type": "hello-ok", "protocol": 3}))]
            } else {
                Vec::new()
            }
        })
        .await
    }

    /// Gateway that never answers anything.
    pub(crate) async fn silent() -> Self {
        Self::start(|_| Vec::new()).await
    }

    /// Returns the bound port.
    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Returns a client configuration pointing at this gateway.
    pub(crate) fn config(&self) -> GatewayConfig {
        GatewayConfig::new("127.0.0.1", self.port)
    }

    /// Returns the number of sockets accepted so far.
    pub(crate) fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` sockets were accepted.
    pub(crate) async fn wait_for_peers(&self, count: usize) {
        eventually(|| self.accepted() >= count).await;
    }

    /// Sends a frame to every live peer.
    pub(crate) fn push(&self, frame: Value) {
        for peer in self.peers.lock().iter() {
            let _ = peer.send(PeerCommand::Send(frame.clone()));
        }
    }

    /// Drops every live socket without a close handshake.
    pub(crate) fn drop_peers(&self) {
        for peer in self.peers.lock().drain(..) {
            let _ = peer.send(PeerCommand::Drop);
        }
    }

    /// Returns the next frame received from any client.
    pub(crate) async fn next_frame(&self) -> Value {
        let mut received = self.received.lock().await;
        timeout(WAIT, received.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("gateway stopped")
    }

    /// Returns the next `req` frame with the given method, skipping others.
    pub(crate) async fn next_request(&self, method: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["type"] == "req" && frame["method"] == method {
                return frame;
            }
        }
    }

    /// Returns the next `res` frame answering `id`, skipping others.
    pub(crate) async fn next_response(&self, id: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["type"] == "res" && frame["id"] == id {
                return frame;
            }
        }
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_peers();
    }
}

/// Polls `condition` until it holds, panicking after [`WAIT`].
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Serves one accepted socket.
async fn serve_peer(
    stream: TcpStream,
    responder: Responder,
    received_tx: mpsc::UnboundedSender<Value>,
    mut commands: mpsc::UnboundedReceiver<PeerCommand>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        let replies = responder(&frame);
                        let _ = received_tx.send(frame);
                        for reply in replies {
                            if reply.is_null() {
                                return;
                            }
                            if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    _ => {}
                }
            }

            command = commands.recv() => {
                match command {
                    Some(PeerCommand::Send(frame)) => {
                        if write.send(Message::Text(frame.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    Some(PeerCommand::Drop) | None => return,
                }
            }
        }
    }
}
