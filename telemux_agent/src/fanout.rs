//! # Broadcast fan-out
//!
//! [`Broadcaster`] turns sampler ticks and log stream events into per-subscriber
//! deliveries on a [`Transport`].
//!
//! ```text
//!   MetricsCache ──(tick)──► forwarder ──► publish_metrics ─┐
//!                                                          ├─► Transport::send(id, event)
//!   LogStream ──(line/error/status)──► EventSink::deliver ─┘
//! ```
//!
//! ## Rules
//! - Delivery never waits on a subscriber: the transport must accept or
//!   reject each send immediately.
//! - A failed send is logged and skipped; remaining recipients still get the event.
//! - Group membership is copied out before sending, never held during delivery.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace};

use crate::cache::MetricsCache;
use crate::error::TransportError;
use crate::task::{spawn_cancellable, TaskHandle};
use crate::types::{MetricsSnapshot, OutboundEvent, SubscriberId};

/// Push side of the transport layer (e.g. a websocket hub).
pub trait Transport: Send + Sync {
    /// Must not block; a full or closed connection is an error for that subscriber only.
    fn send(&self, subscriber: &str, event: &OutboundEvent) -> Result<(), TransportError>;

    fn join(&self, _subscriber: &str, _group: &str) {}

    fn leave(&self, _subscriber: &str, _group: &str) {}
}

/// Where log streams hand their events.
pub trait EventSink: Send + Sync {
    fn deliver(&self, recipients: &[SubscriberId], event: OutboundEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Interest {
    Metrics,
    Cpu,
    Memory,
    Disk,
    Network,
    Logs(String),
}

impl Interest {
    pub const METRIC_GROUPS: [Interest; 5] = [
        Interest::Metrics,
        Interest::Cpu,
        Interest::Memory,
        Interest::Disk,
        Interest::Network,
    ];

    pub fn group_name(&self) -> String {
        self.to_string()
    }

    /// The slice of `snapshot` this interest receives; `None` for log interests.
    pub fn snapshot_event(&self, snapshot: &MetricsSnapshot) -> Option<OutboundEvent> {
        Some(match self {
            Interest::Metrics => OutboundEvent::Metrics(snapshot.clone()),
            Interest::Cpu => OutboundEvent::Cpu(snapshot.cpu.clone()),
            Interest::Memory => OutboundEvent::Memory(snapshot.memory.clone()),
            Interest::Disk => OutboundEvent::Disk(snapshot.disk.clone()),
            Interest::Network => OutboundEvent::Network(snapshot.network.clone()),
            Interest::Logs(_) => return None,
        })
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interest::Metrics => f.write_str("metrics"),
            Interest::Cpu => f.write_str("cpu"),
            Interest::Memory => f.write_str("memory"),
            Interest::Disk => f.write_str("disk"),
            Interest::Network => f.write_str("network"),
            Interest::Logs(instance) => write!(f, "logs:{instance}"),
        }
    }
}

impl FromStr for Interest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metrics" | "all" => Ok(Interest::Metrics),
            "cpu" => Ok(Interest::Cpu),
            "memory" | "mem" => Ok(Interest::Memory),
            "disk" => Ok(Interest::Disk),
            "network" | "net" => Ok(Interest::Network),
            other => match other.strip_prefix("logs:") {
                // keep the instance name's original case
                Some(_) if s.trim().len() > "logs:".len() => {
                    Ok(Interest::Logs(s.trim()["logs:".len()..].to_string()))
                }
                _ => Err(format!("unknown interest '{s}'")),
            },
        }
    }
}

pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    groups: DashMap<Interest, HashSet<SubscriberId>>,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            groups: DashMap::new(),
        }
    }

    /// Returns false if the subscriber was already a member.
    pub fn join(&self, subscriber: &str, interest: Interest) -> bool {
        let group = interest.group_name();
        let added = self
            .groups
            .entry(interest)
            .or_default()
            .insert(subscriber.to_string());
        if added {
            self.transport.join(subscriber, &group);
            trace!(subscriber, group = %group, "joined group");
        }
        added
    }

    pub fn leave(&self, subscriber: &str, interest: &Interest) -> bool {
        let removed = self
            .groups
            .get_mut(interest)
            .map(|mut members| members.remove(subscriber))
            .unwrap_or(false);
        self.groups.remove_if(interest, |_, members| members.is_empty());
        if removed {
            self.transport.leave(subscriber, &interest.group_name());
        }
        removed
    }

    /// Drops every membership of a disconnected subscriber.
    pub fn leave_all(&self, subscriber: &str) -> Vec<Interest> {
        let joined: Vec<Interest> = self
            .groups
            .iter()
            .filter(|e| e.value().contains(subscriber))
            .map(|e| e.key().clone())
            .collect();
        joined
            .into_iter()
            .filter(|interest| self.leave(subscriber, interest))
            .collect()
    }

    pub fn members(&self, interest: &Interest) -> Vec<SubscriberId> {
        self.groups
            .get(interest)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sends the full snapshot to `metrics` and each section to its own group.
    pub fn publish_metrics(&self, snapshot: &MetricsSnapshot) {
        for interest in &Interest::METRIC_GROUPS {
            let recipients = self.members(interest);
            if recipients.is_empty() {
                continue;
            }
            if let Some(event) = interest.snapshot_event(snapshot) {
                self.deliver(&recipients, event);
            }
        }
    }

    /// Drains the cache's change notification into [`Self::publish_metrics`].
    pub fn spawn_metrics_forwarder(self: &Arc<Self>, cache: &MetricsCache) -> TaskHandle {
        let mut rx = cache.subscribe();
        let me = Arc::clone(self);
        spawn_cancellable("metrics-forwarder", move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    res = rx.recv() => match res {
                        Ok(snapshot) => me.publish_metrics(&snapshot),
                        // only the latest snapshot matters
                        Err(RecvError::Lagged(n)) => debug!(skipped = n, "metrics forwarder lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

impl EventSink for Broadcaster {
    fn deliver(&self, recipients: &[SubscriberId], event: OutboundEvent) {
        for id in recipients {
            if let Err(e) = self.transport.send(id, &event) {
                debug!(
                    subscriber = %id,
                    event = event.name(),
                    label = e.as_label(),
                    "dropped event: {e}"
                );
            }
        }
    }
}
