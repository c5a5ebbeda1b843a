//! Per-instance log multiplexer.
//!
//! ## Rules
//! - One [`LogStream`] per instance, created by an atomic get-or-create on the map.
//! - One upstream subscription per stream, started by the first subscriber.
//! - Streams lock only themselves; work on different instances never contends.
//! - A stream is marked closed and its upstream released while it is being
//!   removed, so a racing subscribe retries against a fresh stream instead of
//!   attaching to a dead one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::source::LogSource;
use super::stream::{LogStream, StreamHandler};
use crate::error::SourceError;
use crate::fanout::EventSink;
use crate::task::{spawn_periodic, TaskHandle};
use crate::types::{StreamHandshake, StreamStatus};

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub buffer_capacity: usize,
    pub idle_threshold: Duration,
    pub reap_interval: Duration,
    /// Upper bound for the one-shot dump used when the buffer is empty.
    pub dump_timeout: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            idle_threshold: Duration::from_secs(5 * 60),
            reap_interval: Duration::from_secs(30),
            dump_timeout: Duration::from_secs(5),
        }
    }
}

pub struct LogMultiplexer {
    streams: DashMap<String, Arc<LogStream>>,
    source: Arc<dyn LogSource>,
    sink: Arc<dyn EventSink>,
    config: LogConfig,
    shut_down: AtomicBool,
}

impl LogMultiplexer {
    pub fn new(source: Arc<dyn LogSource>, sink: Arc<dyn EventSink>, config: LogConfig) -> Self {
        Self {
            streams: DashMap::new(),
            source,
            sink,
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    fn get(&self, instance: &str) -> Option<Arc<LogStream>> {
        self.streams.get(instance).map(|e| Arc::clone(e.value()))
    }

    /// Adds `subscriber` to `instance`'s stream, creating the stream and its
    /// upstream subscription on first use. Returns the current buffer as catch-up.
    pub fn subscribe(&self, instance: &str, subscriber: &str) -> StreamHandshake {
        if self.shut_down.load(Ordering::Acquire) {
            return StreamHandshake::default();
        }
        loop {
            let stream = Arc::clone(
                self.streams
                    .entry(instance.to_string())
                    .or_insert_with(|| {
                        debug!(instance, "creating log stream");
                        Arc::new(LogStream::new(instance, self.config.buffer_capacity))
                    })
                    .value(),
            );

            let mut st = stream.lock();
            if st.closed {
                // reaped between lookup and lock
                continue;
            }
            if self.shut_down.load(Ordering::Acquire) {
                // shutdown took its snapshot before this stream was inserted
                st.closed = true;
                let upstream = st.upstream.take();
                drop(st);
                if let Some(up) = upstream {
                    up.release();
                }
                self.streams.remove_if(instance, |_, s| Arc::ptr_eq(s, &stream));
                return StreamHandshake::default();
            }
            if st.subscribers.insert(subscriber.to_string()) {
                st.touch();
            }
            if st.upstream.is_none() {
                st.generation += 1;
                let handler = Arc::new(StreamHandler {
                    stream: Arc::downgrade(&stream),
                    sink: Arc::clone(&self.sink),
                    generation: st.generation,
                });
                match self.source.follow(instance, handler) {
                    Ok(sub) => {
                        info!(instance, "log upstream started");
                        st.upstream = Some(sub);
                    }
                    Err(e) => {
                        // retried by the next subscribe
                        warn!(instance, label = e.as_label(), "log upstream failed to start: {e}");
                    }
                }
            }
            return st.handshake();
        }
    }

    /// Removes `subscriber`; the stream itself is left for the reaper.
    pub fn unsubscribe(&self, instance: &str, subscriber: &str) -> bool {
        let Some(stream) = self.get(instance) else {
            return false;
        };
        let mut st = stream.lock();
        let removed = st.subscribers.remove(subscriber);
        if removed {
            st.touch();
        }
        removed
    }

    /// Removes `subscriber` from every stream; returns the instances it left.
    pub fn unsubscribe_all(&self, subscriber: &str) -> Vec<String> {
        let streams: Vec<Arc<LogStream>> =
            self.streams.iter().map(|e| Arc::clone(e.value())).collect();
        streams
            .into_iter()
            .filter(|s| {
                let mut st = s.lock();
                let removed = st.subscribers.remove(subscriber);
                if removed {
                    st.touch();
                }
                removed
            })
            .map(|s| s.instance_name().to_string())
            .collect()
    }

    /// Buffered lines joined by newlines. With an empty buffer, asks the source
    /// once (bounded by `dump_timeout`); failures come back as a placeholder text.
    pub async fn get_buffered_lines(&self, instance: &str) -> String {
        if let Some(stream) = self.get(instance) {
            let joined = {
                let st = stream.lock();
                st.buffer.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
            };
            if !joined.is_empty() {
                return joined;
            }
        }

        let timeout = self.config.dump_timeout;
        let result = match tokio::time::timeout(timeout, self.source.dump(instance)).await {
            Ok(r) => r,
            Err(_) => Err(SourceError::Timeout {
                instance: instance.to_string(),
                timeout,
            }),
        };
        match result {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => format!("No logs available for {instance}"),
            Err(e) => {
                warn!(instance, label = e.as_label(), "log dump failed: {e}");
                format!("Unable to retrieve logs for {instance}: {e}")
            }
        }
    }

    pub fn get_all_stream_status(&self) -> HashMap<String, StreamStatus> {
        let streams: Vec<Arc<LogStream>> =
            self.streams.iter().map(|e| Arc::clone(e.value())).collect();
        streams
            .into_iter()
            .map(|s| (s.instance_name().to_string(), s.status()))
            .collect()
    }

    pub fn reap_idle(&self) -> Vec<String> {
        self.reap_idle_at(Instant::now())
    }

    /// Removes every stream with no subscribers whose last activity is older
    /// than the idle threshold, releasing its upstream.
    pub fn reap_idle_at(&self, now: Instant) -> Vec<String> {
        let threshold = self.config.idle_threshold;
        let names: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        let reaped: Vec<String> = names
            .into_iter()
            .filter_map(|name| {
                self.streams
                    .remove_if(&name, |_, s| s.close_if_idle(now, threshold))
                    .map(|(name, _)| name)
            })
            .collect();
        if !reaped.is_empty() {
            info!(count = reaped.len(), instances = ?reaped, "reaped idle log streams");
        }
        reaped
    }

    /// Periodic [`Self::reap_idle`]; holds the multiplexer weakly.
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> TaskHandle {
        let weak = Arc::downgrade(self);
        spawn_periodic("log-reaper", every, move || {
            if let Some(mux) = weak.upgrade() {
                mux.reap_idle();
            }
        })
    }

    /// Releases every upstream and clears every buffer. Idempotent; later
    /// subscribes are refused.
    pub fn shutdown(&self) -> usize {
        self.shut_down.store(true, Ordering::Release);
        let names: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        let closed = names
            .into_iter()
            .filter(|name| {
                self.streams
                    .remove_if(name, |_, s| {
                        s.close();
                        true
                    })
                    .is_some()
            })
            .count();
        if closed > 0 {
            info!(count = closed, "log multiplexer shut down");
        }
        closed
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
