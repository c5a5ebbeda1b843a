//! WebSocket upgrade, per-connection handler and the [`Transport`] behind them.
//!
//! Every connection owns a bounded outbound queue drained by its own writer
//! task. Sends from the fan-out only `try_send` into that queue, so a slow
//! client loses events instead of stalling everyone else.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::fanout::{Interest, Transport};
use crate::logs::process::validate_instance;
use crate::state::AppState;
use crate::types::{OutboundEvent, SubscriberId};

struct ClientSlot {
    tx: mpsc::Sender<String>,
    groups: HashSet<String>,
}

/// Connected websocket clients keyed by subscriber id.
#[derive(Default)]
pub struct WsTransport {
    clients: DashMap<SubscriberId, ClientSlot>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the receiving end of the client's outbound queue.
    pub fn register(&self, subscriber: &str, queue: usize) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(queue.max(1));
        self.clients.insert(
            subscriber.to_string(),
            ClientSlot {
                tx,
                groups: HashSet::new(),
            },
        );
        rx
    }

    /// Dropping the slot closes the queue, which ends the writer task.
    pub fn unregister(&self, subscriber: &str) -> bool {
        self.clients.remove(subscriber).is_some()
    }

    pub fn connected(&self) -> usize {
        self.clients.len()
    }

    pub fn groups_of(&self, subscriber: &str) -> Vec<String> {
        let mut groups: Vec<String> = self
            .clients
            .get(subscriber)
            .map(|c| c.groups.iter().cloned().collect())
            .unwrap_or_default();
        groups.sort();
        groups
    }
}

impl Transport for WsTransport {
    fn send(&self, subscriber: &str, event: &OutboundEvent) -> Result<(), TransportError> {
        let tx = self
            .clients
            .get(subscriber)
            .map(|c| c.tx.clone())
            .ok_or_else(|| TransportError::UnknownSubscriber(subscriber.to_string()))?;
        let text =
            serde_json::to_string(event).map_err(|e| TransportError::Encode(e.to_string()))?;
        tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull(subscriber.to_string()),
            TrySendError::Closed(_) => TransportError::Closed(subscriber.to_string()),
        })
    }

    fn join(&self, subscriber: &str, group: &str) {
        if let Some(mut c) = self.clients.get_mut(subscriber) {
            c.groups.insert(group.to_string());
        }
    }

    fn leave(&self, subscriber: &str, group: &str) {
        if let Some(mut c) = self.clients.get_mut(subscriber) {
            c.groups.remove(group);
        }
    }
}

/// Requests a client may send as JSON text frames.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ClientCommand {
    Subscribe { interest: String },
    Unsubscribe { interest: String },
    SubscribeLogs { instance: String },
    UnsubscribeLogs { instance: String },
    GetLogs { instance: String },
    StreamStatus,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if let Some(expected) = state.auth_token.as_ref() {
        match q.get("token") {
            Some(t) if t == expected => {}
            _ => return StatusCode::UNAUTHORIZED.into_response(),
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// Undo every registration of a connection, however it ends.
struct ClientGuard {
    state: AppState,
    id: SubscriberId,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let left = self.state.fanout.leave_all(&self.id);
        let logs = self.state.logs.unsubscribe_all(&self.id);
        self.state.transport.unregister(&self.id);
        self.state.client_count.fetch_sub(1, Ordering::Relaxed);
        debug!(
            subscriber = %self.id,
            groups = left.len(),
            log_streams = logs.len(),
            "client disconnected"
        );
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = state.next_subscriber_id();
    let mut rx = state.transport.register(&id, state.client_queue);
    state.client_count.fetch_add(1, Ordering::Relaxed);
    info!(subscriber = %id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let guard = ClientGuard {
        state: state.clone(),
        id: id.clone(),
    };

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_text(&state, &id, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    drop(guard);
    let _ = writer.await;
}

fn reply(state: &AppState, id: &str, event: OutboundEvent) {
    if let Err(e) = state.transport.send(id, &event) {
        debug!(subscriber = id, label = e.as_label(), "reply dropped: {e}");
    }
}

fn error_reply(state: &AppState, id: &str, message: String) {
    reply(state, id, OutboundEvent::Error { message });
}

async fn handle_text(state: &AppState, id: &str, text: &str) {
    // plain-text request kept for older clients
    if text.trim() == "get_metrics" {
        let latest = state.cache.get_latest();
        reply(state, id, OutboundEvent::Metrics((*latest).clone()));
        return;
    }

    let cmd = match serde_json::from_str::<ClientCommand>(text) {
        Ok(cmd) => cmd,
        Err(e) => return error_reply(state, id, format!("invalid command: {e}")),
    };
    debug!(subscriber = id, ?cmd, "client command");

    match cmd {
        ClientCommand::Subscribe { interest } => match interest.parse::<Interest>() {
            Ok(Interest::Logs(instance)) => subscribe_logs(state, id, instance),
            Ok(interest) => {
                let snapshot = interest.snapshot_event(&state.cache.get_latest());
                state.fanout.join(id, interest);
                if let Some(event) = snapshot {
                    reply(state, id, event);
                }
            }
            Err(e) => error_reply(state, id, e),
        },
        ClientCommand::Unsubscribe { interest } => match interest.parse::<Interest>() {
            Ok(Interest::Logs(instance)) => unsubscribe_logs(state, id, &instance),
            Ok(interest) => {
                state.fanout.leave(id, &interest);
            }
            Err(e) => error_reply(state, id, e),
        },
        ClientCommand::SubscribeLogs { instance } => subscribe_logs(state, id, instance),
        ClientCommand::UnsubscribeLogs { instance } => unsubscribe_logs(state, id, &instance),
        ClientCommand::GetLogs { instance } => {
            if let Err(e) = validate_instance(&instance) {
                return error_reply(state, id, e);
            }
            let text = state.logs.get_buffered_lines(&instance).await;
            reply(
                state,
                id,
                OutboundEvent::LogDump {
                    instance_name: instance,
                    text,
                },
            );
        }
        ClientCommand::StreamStatus => {
            let status = state.logs.get_all_stream_status();
            reply(state, id, OutboundEvent::StreamStatus(status));
        }
    }
}

fn subscribe_logs(state: &AppState, id: &str, instance: String) {
    if let Err(e) = validate_instance(&instance) {
        return error_reply(state, id, e);
    }
    let handshake = state.logs.subscribe(&instance, id);
    state.fanout.join(id, Interest::Logs(instance.clone()));
    reply(
        state,
        id,
        OutboundEvent::LogHistory {
            instance_name: instance,
            handshake,
        },
    );
}

fn unsubscribe_logs(state: &AppState, id: &str, instance: &str) {
    state.logs.unsubscribe(instance, id);
    state.fanout.leave(id, &Interest::Logs(instance.to_string()));
}
