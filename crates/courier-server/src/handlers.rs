//! Connection handlers for the Courier server.
//!
//! This module handles the connection lifecycle: handshake authentication,
//! presence registration, the per-connection event loop, and race-safe
//! disconnect cleanup. Each connection runs on its own task; the presence
//! registry is the only state shared between them.

use crate::auth;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::pg_store::PgStore;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use courier_core::{
    ConnectionHandle, MemoryStore, MessageRelay, PresenceRegistry, StatusTracker, Store,
    TypingNotifier, User,
};
use courier_protocol::{codec, ClientEvent, SendAck, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared server state.
pub struct AppState {
    /// Who is reachable right now.
    pub registry: Arc<PresenceRegistry>,
    /// Durable user and message records.
    pub store: Arc<dyn Store>,
    /// Message persistence and best-effort delivery.
    pub relay: MessageRelay,
    /// Read transitions and receipts.
    pub tracker: StatusTracker,
    /// Typing indicator pass-through.
    pub notifier: TypingNotifier,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Wire the components over a shared registry and store.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let registry = Arc::new(PresenceRegistry::new());

        Self {
            relay: MessageRelay::new(store.clone(), registry.clone()),
            tracker: StatusTracker::new(store.clone(), registry.clone()),
            notifier: TypingNotifier::new(registry.clone()),
            registry,
            store,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the store or listener cannot be set up.
pub async fn run_server(config: Config) -> Result<()> {
    let store: Arc<dyn Store> = match &config.database.url {
        Some(url) => Arc::new(PgStore::connect(url, config.database.max_connections).await?),
        None => {
            warn!("No database configured, falling back to the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let state = Arc::new(AppState::new(config.clone(), store));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Courier server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// Authentication runs before the upgrade: a connection that fails the
/// handshake never enters the authenticated pool and no partial
/// registration occurs.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id =
        match auth::authenticate(&headers, params.token.as_deref(), &state.config.auth) {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!(error = %e, "Connection refused");
                metrics::record_auth_failure();
                return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
            }
        };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

/// Handle an authenticated WebSocket connection.
async fn handle_socket(socket: WebSocket, user_id: Uuid, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (mut sender, mut receiver) = socket.split();

    // The handle's channel is the connection's outbound queue; the loop
    // below drains it so pushes from other connections' tasks are written
    // in order relative to this connection's own replies.
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(tx);
    let connection_id = handle.id();

    debug!(user = %user_id, connection = connection_id, "WebSocket connected");

    // Register presence: overwrite any previous connection for this user,
    // flip the stored online flag, announce to everyone else, and hand the
    // new connection the reachable-users snapshot (itself included).
    state.registry.insert(user_id, handle.clone());
    // The presence write needs a user row even when the account
    // collaborator has not provisioned one yet (fresh in-memory runs);
    // an existing record is left untouched.
    if let Err(e) = state
        .store
        .ensure_user(User::new(user_id, user_id.to_string(), ""))
        .await
    {
        warn!(user = %user_id, error = %e, "Failed to provision user record");
    }
    if let Err(e) = state.store.set_presence(user_id, true, Utc::now()).await {
        warn!(user = %user_id, error = %e, "Failed to persist online flag");
    }
    state
        .registry
        .broadcast_except(&ServerEvent::UserOnline { user_id }, user_id);
    handle.push(ServerEvent::OnlineUsers(state.registry.online_users()));

    let max_frame = state.config.limits.max_message_size;
    let timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut heartbeat =
        tokio::time::interval(Duration::from_millis(state.config.heartbeat.interval_ms));
    let mut last_inbound = Instant::now();

    // Event loop
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if last_inbound.elapsed() > timeout {
                    warn!(user = %user_id, "Heartbeat timed out, disconnecting");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            Some(event) = outbound.recv() => {
                match codec::encode_server(&event) {
                    Ok(frame) => {
                        if sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(user = %user_id, error = %e, "Failed to encode outbound event");
                        metrics::record_error("encode");
                    }
                }
            }

            msg = receiver.next() => {
                last_inbound = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > max_frame {
                            warn!(user = %user_id, size = text.len(), "Dropping oversized frame");
                            metrics::record_error("oversized_frame");
                            continue;
                        }
                        let start = Instant::now();
                        dispatch_event(&text, user_id, &handle, &state).await;
                        metrics::record_event_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Nothing to do; arrival already refreshed the
                        // heartbeat deadline.
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(user = %user_id, "Ignoring binary frame");
                        metrics::record_error("binary_frame");
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(user = %user_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(user = %user_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(user = %user_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Compare-and-delete: if this user already reconnected, the entry
    // belongs to the newer connection and this cleanup must neither evict
    // it nor broadcast a spurious offline event.
    if state.registry.remove_if_current(user_id, connection_id) {
        if let Err(e) = state.store.set_presence(user_id, false, Utc::now()).await {
            warn!(user = %user_id, error = %e, "Failed to persist offline flag");
        }
        state
            .registry
            .broadcast(&ServerEvent::UserOffline { user_id });
    }

    debug!(user = %user_id, connection = connection_id, "WebSocket disconnected");
}

/// Decode and dispatch one inbound event.
///
/// Faults are contained here: a malformed frame or a failing handler is
/// logged (and acknowledged as a failure where an ack channel exists)
/// without terminating the connection.
async fn dispatch_event(frame: &str, user_id: Uuid, handle: &ConnectionHandle, state: &AppState) {
    let event = match codec::decode_client(frame) {
        Ok(event) => event,
        Err(e) => {
            warn!(user = %user_id, error = %e, "Dropping malformed event");
            metrics::record_error("malformed_event");
            return;
        }
    };

    match event {
        ClientEvent::SendMessage {
            receiver_id,
            content,
        } => {
            let ack = match state.relay.send(user_id, receiver_id, &content).await {
                Ok(message) => {
                    metrics::record_relayed_message(message.status.as_str());
                    SendAck::ok(message)
                }
                Err(e) => {
                    warn!(user = %user_id, error = %e, "send_message failed");
                    metrics::record_error("send_message");
                    SendAck::err(e.to_string())
                }
            };
            // Point-to-point reply to the sender only, never broadcast.
            handle.push(ServerEvent::SendAck(ack));
        }

        ClientEvent::MarkRead { sender_id } => {
            // Fire-and-forget: no acknowledgment either way.
            match state.tracker.mark_read(user_id, sender_id).await {
                Ok(count) => metrics::record_read_receipts(count),
                Err(e) => {
                    warn!(user = %user_id, error = %e, "mark_read failed");
                    metrics::record_error("mark_read");
                }
            }
        }

        ClientEvent::Typing { receiver_id } => {
            state.notifier.typing(user_id, receiver_id);
            metrics::record_typing_event();
        }

        ClientEvent::StopTyping { receiver_id } => {
            state.notifier.stop_typing(user_id, receiver_id);
            metrics::record_typing_event();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::User;
    use courier_protocol::DeliveryStatus;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_state() -> (Arc<AppState>, Arc<MemoryStore>, Uuid, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.insert_user(User::new(alice, "alice", ""));
        store.insert_user(User::new(bob, "bob", ""));

        let state = Arc::new(AppState::new(
            Config::default(),
            store.clone() as Arc<dyn Store>,
        ));
        (state, store, alice, bob)
    }

    fn connect(state: &AppState, user_id: Uuid) -> (ConnectionHandle, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);
        state.registry.insert(user_id, handle.clone());
        (handle, rx)
    }

    #[tokio::test]
    async fn test_dispatch_send_message_acks_sender_only() {
        let (state, _store, alice, bob) = test_state();
        let (alice_handle, mut alice_rx) = connect(&state, alice);
        let (_bob_handle, mut bob_rx) = connect(&state, bob);

        let frame = format!(
            r#"{{"event":"send_message","data":{{"receiverId":"{bob}","content":"hi"}}}}"#
        );
        dispatch_event(&frame, alice, &alice_handle, &state).await;

        match bob_rx.try_recv().unwrap() {
            ServerEvent::ReceiveMessage(message) => assert_eq!(message.content, "hi"),
            other => panic!("unexpected event: {other:?}"),
        }

        match alice_rx.try_recv().unwrap() {
            ServerEvent::SendAck(ack) => {
                assert!(ack.success);
                assert_eq!(ack.message.unwrap().status, DeliveryStatus::Delivered);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_validation_failure_acks_with_error() {
        let (state, store, alice, bob) = test_state();
        let (alice_handle, mut alice_rx) = connect(&state, alice);

        let frame = format!(
            r#"{{"event":"send_message","data":{{"receiverId":"{bob}","content":""}}}}"#
        );
        dispatch_event(&frame, alice, &alice_handle, &state).await;

        match alice_rx.try_recv().unwrap() {
            ServerEvent::SendAck(ack) => {
                assert!(!ack.success);
                assert_eq!(ack.error.as_deref(), Some("Content is empty"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let history = store.messages_between(alice, bob).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_malformed_frame_is_contained() {
        let (state, _store, alice, _bob) = test_state();
        let (alice_handle, mut alice_rx) = connect(&state, alice);

        dispatch_event("{not json", alice, &alice_handle, &state).await;
        dispatch_event(r#"{"event":"shrug","data":{}}"#, alice, &alice_handle, &state).await;

        // No reply, no panic; the connection stays usable.
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_typing_round_trip() {
        let (state, _store, alice, bob) = test_state();
        let (alice_handle, mut alice_rx) = connect(&state, alice);
        let (_bob_handle, mut bob_rx) = connect(&state, bob);

        let frame = format!(r#"{{"event":"typing","data":{{"receiverId":"{bob}"}}}}"#);
        dispatch_event(&frame, alice, &alice_handle, &state).await;

        assert_eq!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::UserTyping { user_id: alice }
        );
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_mark_read_sends_receipt() {
        let (state, _store, alice, bob) = test_state();
        let (alice_handle, mut alice_rx) = connect(&state, alice);
        let (bob_handle, mut _bob_rx) = connect(&state, bob);

        let frame = format!(
            r#"{{"event":"send_message","data":{{"receiverId":"{bob}","content":"hi"}}}}"#
        );
        dispatch_event(&frame, alice, &alice_handle, &state).await;
        alice_rx.try_recv().unwrap();

        let frame = format!(r#"{{"event":"mark_read","data":{{"senderId":"{alice}"}}}}"#);
        dispatch_event(&frame, bob, &bob_handle, &state).await;

        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::MessagesRead {
                read_by: bob,
                count: 1
            }
        );
    }
}
