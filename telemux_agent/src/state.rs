//! Shared agent state handed to every websocket connection.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cache::MetricsCache;
use crate::fanout::Broadcaster;
use crate::logs::LogMultiplexer;
use crate::ws::WsTransport;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<MetricsCache>,
    pub logs: Arc<LogMultiplexer>,
    pub fanout: Arc<Broadcaster>,
    pub transport: Arc<WsTransport>,

    pub client_count: Arc<AtomicUsize>,
    next_client_id: Arc<AtomicU64>,
    pub auth_token: Option<String>,
    /// Per-connection outbound queue depth.
    pub client_queue: usize,
}

impl AppState {
    pub fn new(
        cache: Arc<MetricsCache>,
        logs: Arc<LogMultiplexer>,
        fanout: Arc<Broadcaster>,
        transport: Arc<WsTransport>,
        auth_token: Option<String>,
        client_queue: usize,
    ) -> Self {
        Self {
            cache,
            logs,
            fanout,
            transport,
            client_count: Arc::new(AtomicUsize::new(0)),
            next_client_id: Arc::new(AtomicU64::new(1)),
            auth_token,
            client_queue: client_queue.max(1),
        }
    }

    pub fn next_subscriber_id(&self) -> String {
        format!("ws-{}", self.next_client_id.fetch_add(1, Ordering::Relaxed))
    }
}
