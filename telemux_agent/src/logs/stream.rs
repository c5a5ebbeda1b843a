//! One instance's multiplexing unit: upstream subscription, bounded buffer,
//! subscriber set. All of it sits behind this stream's own mutex.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::parse::parse_line;
use super::source::{LogHandler, UpstreamStatus, UpstreamSubscription};
use crate::fanout::EventSink;
use crate::history::RollingWindow;
use crate::types::{OutboundEvent, StreamHandshake, StreamStatus, SubscriberId};

pub(crate) struct StreamState {
    pub(crate) subscribers: HashSet<SubscriberId>,
    pub(crate) buffer: RollingWindow<String>,
    pub(crate) upstream: Option<Box<dyn UpstreamSubscription>>,
    /// Set once the stream has been removed from the map; nothing may attach to it after.
    pub(crate) closed: bool,
    /// Bumped on every follow attempt; a handler only speaks for its own attempt.
    pub(crate) generation: u64,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
}

impl StreamState {
    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    pub(crate) fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.subscribers.iter().cloned().collect()
    }

    pub(crate) fn handshake(&self) -> StreamHandshake {
        StreamHandshake {
            buffered_lines: self.buffer.to_vec(),
            is_active: self.upstream.is_some(),
        }
    }
}

pub struct LogStream {
    instance: String,
    state: Mutex<StreamState>,
}

impl LogStream {
    pub(crate) fn new(instance: &str, buffer_capacity: usize) -> Self {
        Self {
            instance: instance.to_string(),
            state: Mutex::new(StreamState {
                subscribers: HashSet::new(),
                buffer: RollingWindow::new(buffer_capacity),
                upstream: None,
                closed: false,
                generation: 0,
                last_activity: Instant::now(),
                last_activity_at: Utc::now(),
            }),
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamState> {
        // state stays consistent across a panicking holder; keep serving it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> StreamStatus {
        let st = self.lock();
        let mut subscriber_ids = st.subscriber_ids();
        subscriber_ids.sort();
        StreamStatus {
            is_active: st.upstream.is_some() && !st.closed,
            buffer_size: st.buffer.len(),
            subscriber_count: st.subscribers.len(),
            last_activity: st
                .last_activity_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            subscriber_ids,
        }
    }

    /// Closes the stream if nobody has been subscribed for longer than `threshold`.
    /// The upstream subscription is released before returning true.
    pub(crate) fn close_if_idle(&self, now: Instant, threshold: Duration) -> bool {
        let upstream = {
            let mut st = self.lock();
            let idle_for = now.saturating_duration_since(st.last_activity);
            if st.closed || !st.subscribers.is_empty() || idle_for <= threshold {
                return false;
            }
            st.closed = true;
            st.buffer.clear();
            st.upstream.take()
        };
        if let Some(up) = upstream {
            up.release();
        }
        true
    }

    /// Unconditional close for shutdown.
    pub(crate) fn close(&self) {
        let upstream = {
            let mut st = self.lock();
            st.closed = true;
            st.buffer.clear();
            st.subscribers.clear();
            st.upstream.take()
        };
        if let Some(up) = upstream {
            up.release();
        }
    }
}

/// Receives upstream callbacks on behalf of one stream.
///
/// Holds the stream weakly: the stream owns the subscription that owns this handler.
pub(crate) struct StreamHandler {
    pub(crate) stream: Weak<LogStream>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) generation: u64,
}

impl StreamHandler {
    /// Instance name and a copy of the subscriber set, or `None` once the stream is gone.
    fn recipients(&self) -> Option<(String, Vec<SubscriberId>)> {
        let stream = self.stream.upgrade()?;
        let st = stream.lock();
        if st.closed {
            return None;
        }
        Some((stream.instance.clone(), st.subscriber_ids()))
    }

    /// Drops the finished upstream so the stream reads inactive and the next
    /// subscribe starts a new one.
    fn detach_upstream(&self) {
        let Some(stream) = self.stream.upgrade() else {
            return;
        };
        let upstream = {
            let mut st = stream.lock();
            if st.closed || st.generation != self.generation {
                return;
            }
            st.upstream.take()
        };
        if let Some(up) = upstream {
            up.release();
        }
    }
}

impl LogHandler for StreamHandler {
    fn on_line(&self, raw: String) {
        let Some(stream) = self.stream.upgrade() else {
            return;
        };
        let record = parse_line(&stream.instance, &raw, Utc::now());
        let recipients = {
            let mut st = stream.lock();
            if st.closed {
                return;
            }
            st.buffer.push(raw);
            st.touch();
            st.subscriber_ids()
        };
        if !recipients.is_empty() {
            self.sink.deliver(&recipients, OutboundEvent::LogLine(record));
        }
    }

    fn on_error(&self, message: String) {
        let Some((instance, recipients)) = self.recipients() else {
            return;
        };
        warn!(instance = %instance, "log source error: {message}");
        self.sink.deliver(
            &recipients,
            OutboundEvent::LogError {
                instance_name: instance,
                message,
            },
        );
    }

    fn on_status(&self, status: UpstreamStatus) {
        let connected = matches!(status, UpstreamStatus::Connected);
        let Some((instance, recipients)) = self.recipients() else {
            return;
        };
        let message = match status {
            UpstreamStatus::Connected => "log stream connected".to_string(),
            UpstreamStatus::Disconnected { reason } => {
                self.detach_upstream();
                reason
            }
        };
        debug!(instance = %instance, connected, "log source status: {message}");
        self.sink.deliver(
            &recipients,
            OutboundEvent::LogStatus {
                instance_name: instance,
                connected,
                message,
            },
        );
    }
}
