use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use telemux_agent::cache::MetricsCache;
use telemux_agent::error::TransportError;
use telemux_agent::fanout::{Broadcaster, EventSink, Interest, Transport};
use telemux_agent::types::{MetricsSnapshot, OutboundEvent};

/// Records sends per subscriber; ids in `broken` always fail.
#[derive(Default)]
struct FakeTransport {
    sent: Mutex<HashMap<String, Vec<&'static str>>>,
    groups: Mutex<Vec<(String, String, bool)>>,
    broken: Vec<String>,
}

impl Transport for FakeTransport {
    fn send(&self, subscriber: &str, event: &OutboundEvent) -> Result<(), TransportError> {
        if self.broken.iter().any(|b| b == subscriber) {
            return Err(TransportError::Closed(subscriber.to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .entry(subscriber.to_string())
            .or_default()
            .push(event.name());
        Ok(())
    }

    fn join(&self, subscriber: &str, group: &str) {
        self.groups
            .lock()
            .unwrap()
            .push((subscriber.into(), group.into(), true));
    }

    fn leave(&self, subscriber: &str, group: &str) {
        self.groups
            .lock()
            .unwrap()
            .push((subscriber.into(), group.into(), false));
    }
}

impl FakeTransport {
    fn events_for(&self, subscriber: &str) -> Vec<&'static str> {
        self.sent
            .lock()
            .unwrap()
            .get(subscriber)
            .cloned()
            .unwrap_or_default()
    }
}

#[test]
fn broken_subscriber_does_not_starve_the_rest() {
    let transport = Arc::new(FakeTransport {
        broken: vec!["b".into()],
        ..Default::default()
    });
    let fanout = Broadcaster::new(transport.clone());
    let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

    fanout.deliver(
        &ids,
        OutboundEvent::Error {
            message: "boom".into(),
        },
    );

    assert_eq!(transport.events_for("a"), vec!["error"]);
    assert!(transport.events_for("b").is_empty());
    assert_eq!(transport.events_for("c"), vec!["error"]);
}

#[test]
fn metrics_are_routed_by_interest() {
    let transport = Arc::new(FakeTransport::default());
    let fanout = Broadcaster::new(transport.clone());
    fanout.join("all", Interest::Metrics);
    fanout.join("cpu-only", Interest::Cpu);
    fanout.join("mixed", Interest::Memory);
    fanout.join("mixed", Interest::Network);
    fanout.join("logs", Interest::Logs("srv1".into()));

    fanout.publish_metrics(&MetricsSnapshot::default());

    assert_eq!(transport.events_for("all"), vec!["metrics"]);
    assert_eq!(transport.events_for("cpu-only"), vec!["cpu"]);
    let mut mixed = transport.events_for("mixed");
    mixed.sort();
    assert_eq!(mixed, vec!["memory", "network"]);
    assert!(transport.events_for("logs").is_empty());
}

#[test]
fn membership_is_mirrored_to_the_transport() {
    let transport = Arc::new(FakeTransport::default());
    let fanout = Broadcaster::new(transport.clone());

    assert!(fanout.join("a", Interest::Disk));
    assert!(!fanout.join("a", Interest::Disk));
    fanout.join("a", Interest::Logs("srv1".into()));
    assert_eq!(fanout.members(&Interest::Disk), vec!["a".to_string()]);

    let mut left = fanout.leave_all("a");
    left.sort_by_key(|i| i.group_name());
    assert_eq!(left, vec![Interest::Disk, Interest::Logs("srv1".into())]);
    assert!(fanout.members(&Interest::Disk).is_empty());

    let groups = transport.groups.lock().unwrap().clone();
    assert_eq!(groups.iter().filter(|(_, _, joined)| *joined).count(), 2);
    assert!(groups.contains(&("a".into(), "logs:srv1".into(), false)));
}

#[tokio::test]
async fn forwarder_pushes_each_published_snapshot() {
    let transport = Arc::new(FakeTransport::default());
    let fanout = Arc::new(Broadcaster::new(transport.clone()));
    fanout.join("a", Interest::Cpu);
    let cache = MetricsCache::new();
    let forwarder = fanout.spawn_metrics_forwarder(&cache);

    cache.publish(MetricsSnapshot::default());
    cache.publish(MetricsSnapshot::default());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while transport.events_for("a").len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    forwarder.stop().await;
    assert_eq!(transport.events_for("a"), vec!["cpu", "cpu"]);
}
