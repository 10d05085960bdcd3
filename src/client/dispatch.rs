//! Inbound dispatch loop.
//!
//! One loop runs per connection epoch. It consumes the epoch's inbound
//! channel in arrival order and routes each frame:
//!
//! | Frame | Destination |
//! |-------|-------------|
//! | `res` | Correlator of the epoch |
//! | `req` with method `invoke` | Command registry, on its own task |
//! | other `req` | Answered with `unsupported_method` |
//! | `event` | Event sink |
//!
//! When the closure notice arrives every pending request is failed and
//! the loop returns the close reason to its owner.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, warn};

use crate::commands::CommandRegistry;
use crate::events::{EVENT_CONNECT_CHALLENGE, EventSink};
use crate::protocol::{
    EventFrame, Frame, INVOKE_FAILED, METHOD_INVOKE, RequestFrame, ResponseFrame,
    UNSUPPORTED_METHOD,
};
use crate::transport::{CloseReason, Connection, Inbound, InboundReceiver};

// ============================================================================
// Dispatch Loop
// ============================================================================

/// Runs until the epoch's socket is gone.
pub(crate) async fn run(
    connection: Connection,
    mut inbound: InboundReceiver,
    commands: Arc<CommandRegistry>,
    events: Arc<EventSink>,
) -> CloseReason {
    let epoch = connection.epoch();

    let reason = loop {
        match inbound.recv().await {
            Some(Inbound::Frame(Frame::Response(response))) => {
                connection.accept_response(response);
            }
            Some(Inbound::Frame(Frame::Request(request))) => {
                handle_request(&connection, &commands, request);
            }
            Some(Inbound::Frame(Frame::Event(event))) => {
                handle_event(&connection, &events, event);
            }
            Some(Inbound::Closed(reason)) => break reason,
            None => break CloseReason::Error("inbound channel closed".to_string()),
        }
    };

    let failed = connection.correlator().fail_all();
    debug!(epoch, failed, %reason, "Dispatch loop finished");

    reason
}

/// Routes an inbound request.
fn handle_request(connection: &Connection, commands: &Arc<CommandRegistry>, request: RequestFrame) {
    if request.method != METHOD_INVOKE {
        warn!(id = %request.id, method = %request.method, "Unsupported inbound method");
        let message = format!("Unsupported method: {}", request.method);
        reply(
            connection,
            ResponseFrame::failure(request.id, UNSUPPORTED_METHOD, message),
        );
        return;
    }

    if !connection.is_ready() {
        warn!(id = %request.id, "Invoke received before handshake completed");
        reply(
            connection,
            ResponseFrame::failure(request.id, INVOKE_FAILED, "Connection not ready"),
        );
        return;
    }

    // Handlers may take a while; keep reading frames meanwhile.
    let connection = connection.clone();
    let commands = Arc::clone(commands);
    tokio::spawn(async move {
        let response = commands.handle_invoke(request).await;
        reply(&connection, response);
    });
}

/// Routes an inbound event.
///
/// The challenge is handed to the sink in every state; the sink
/// recognizes and swallows it.
fn handle_event(connection: &Connection, events: &EventSink, event: EventFrame) {
    if connection.is_ready() || event.event == EVENT_CONNECT_CHALLENGE {
        events.publish(event);
    } else {
        debug!(event = %event.event, "Dropping event received before handshake completed");
    }
}

/// Sends a response, logging if the socket is already gone.
fn reply(connection: &Connection, response: ResponseFrame) {
    let id = response.id.clone();
    if let Err(e) = connection.send(&Frame::Response(response)) {
        warn!(id = %id, error = %e, "Failed to send response");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::time::timeout;

    use crate::client::GatewayClient;
    use crate::error::{CommandError, Error};
    use crate::transport::mock::{MockGateway, eventually, reply_ok};

    fn echo(params: Value) -> impl Future<Output = std::result::Result<Value, CommandError>> {
        async move { Ok(params) }
    }

    /// Sends an invoke, an event and a challenge ahead of the hello.
    async fn eager_gateway() -> MockGateway {
        MockGateway::start(|frame| {
            if frame["method"] != "connect" {
                return Vec::new();
            }
            vec![
                json!({
                    "type": "req",
                    "id": "early-1",
                    "method": "invoke",
                    "params": {"command": "echo", "params": {"x": 1}},
                }),
                json!({"type": "event", "event": "tick", "payload": {"n": 0}}),
                json!({"type": "event", "event": "connect.challenge", "payload": {"nonce": "abc"}}),
                reply_ok(frame, json!({"type": "hello-ok", "protocol": 3})),
            ]
        })
        .await
    }

    #[tokio::test]
    async fn test_invoke_before_hello_is_refused() {
        let gateway = eager_gateway().await;
        let client = GatewayClient::builder()
            .config(gateway.config())
            .command("echo", echo)
            .build()
            .expect("build");

        client.ensure_connected().await.expect("connect");

        let response = gateway.next_response("early-1").await;
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["code"], "invoke_failed");
        assert_eq!(response["error"]["message"], "Connection not ready");
    }

    #[tokio::test]
    async fn test_events_before_hello_are_dropped() {
        let gateway = eager_gateway().await;
        let client = GatewayClient::builder()
            .config(gateway.config())
            .build()
            .expect("build");
        let mut events = client.on_any_event();

        client.ensure_connected().await.expect("connect");
        gateway.push(json!({"type": "event", "event": "connect.challenge"}));
        gateway.push(json!({"type": "event", "event": "after", "payload": {"n": 1}}));

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event")
            .expect("open");
        assert_eq!(event.name, "after");
        assert_eq!(event.payload, json!({"n": 1}));
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_method_is_answered() {
        let gateway = MockGateway::accepting().await;
        let client = GatewayClient::builder()
            .config(gateway.config())
            .build()
            .expect("build");
        client.ensure_connected().await.expect("connect");

        gateway.push(json!({"type": "req", "id": "u-1", "method": "node.describe"}));

        let response = gateway.next_response("u-1").await;
        assert_eq!(response["error"]["code"], "unsupported_method");
        assert_eq!(response["error"]["message"], "Unsupported method: node.describe");
    }

    #[tokio::test]
    async fn test_loop_fails_pending_and_returns_reason() {
        let gateway = MockGateway::silent().await;
        let url = gateway.config().ws_url().expect("url");
        let (connection, inbound) = Connection::open(&url, 1).await.expect("open");

        let events = Arc::new(EventSink::new());
        let mut observer = events.subscribe_all();
        let dispatch = tokio::spawn(run(
            connection.clone(),
            inbound,
            Arc::new(CommandRegistry::new()),
            Arc::clone(&events),
        ));

        let pending = tokio::spawn({
            let connection = connection.clone();
            async move {
                connection
                    .request("slow", None, Duration::from_secs(5), 10)
                    .await
            }
        });
        eventually(|| connection.pending_count() == 1).await;

        // Never ready: neither of these reaches an observer.
        gateway.push(json!({"type": "event", "event": "tick"}));
        gateway.push(json!({"type": "event", "event": "connect.challenge"}));
        gateway.drop_peers();

        let reason = timeout(Duration::from_secs(5), dispatch)
            .await
            .expect("loop ended")
            .expect("join");
        assert!(!reason.is_intentional());

        let outcome = pending.await.expect("join");
        assert!(matches!(outcome, Err(Error::ConnectionClosed)));
        assert_eq!(connection.pending_count(), 0);
        assert!(observer.try_recv().is_none());
    }
}
