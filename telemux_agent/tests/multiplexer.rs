//! Log multiplexer behaviour against an in-memory source and sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use telemux_agent::error::SourceError;
use telemux_agent::fanout::EventSink;
use telemux_agent::logs::{
    LogConfig, LogHandler, LogMultiplexer, LogSource, UpstreamStatus, UpstreamSubscription,
};
use telemux_agent::types::{OutboundEvent, SubscriberId};
use tokio::time::Instant;

#[derive(Default)]
struct FakeSource {
    created: AtomicUsize,
    released: Arc<AtomicUsize>,
    handlers: Mutex<HashMap<String, Arc<dyn LogHandler>>>,
    dump: Mutex<Option<Result<String, String>>>,
    dump_delay: Mutex<Option<Duration>>,
    fail_follow: Mutex<bool>,
}

struct FakeSub(Arc<AtomicUsize>);

impl UpstreamSubscription for FakeSub {
    fn release(self: Box<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeSource {
    fn handler(&self, instance: &str) -> Arc<dyn LogHandler> {
        self.handlers.lock().unwrap()[instance].clone()
    }

    fn emit(&self, instance: &str, line: &str) {
        self.handler(instance).on_line(line.to_string());
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for FakeSource {
    fn follow(
        &self,
        instance: &str,
        handler: Arc<dyn LogHandler>,
    ) -> Result<Box<dyn UpstreamSubscription>, SourceError> {
        if *self.fail_follow.lock().unwrap() {
            return Err(SourceError::Spawn {
                instance: instance.into(),
                reason: "no such unit".into(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .lock()
            .unwrap()
            .insert(instance.to_string(), handler);
        Ok(Box::new(FakeSub(self.released.clone())))
    }

    async fn dump(&self, instance: &str) -> Result<String, SourceError> {
        let delay = *self.dump_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let scripted = self.dump.lock().unwrap().clone();
        match scripted {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(SourceError::Query {
                instance: instance.into(),
                reason,
            }),
            None => Ok(String::new()),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(Vec<SubscriberId>, OutboundEvent)>>,
}

impl EventSink for RecordingSink {
    fn deliver(&self, recipients: &[SubscriberId], event: OutboundEvent) {
        let mut r = recipients.to_vec();
        r.sort();
        self.events.lock().unwrap().push((r, event));
    }
}

impl RecordingSink {
    fn lines_for(&self, subscriber: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to.iter().any(|s| s == subscriber))
            .filter_map(|(_, ev)| match ev {
                OutboundEvent::LogLine(l) => Some(l.raw_line.clone()),
                _ => None,
            })
            .collect()
    }
}

fn setup(config: LogConfig) -> (Arc<FakeSource>, Arc<RecordingSink>, Arc<LogMultiplexer>) {
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(RecordingSink::default());
    let mux = Arc::new(LogMultiplexer::new(source.clone(), sink.clone(), config));
    (source, sink, mux)
}

#[tokio::test]
async fn subscribe_is_idempotent_per_pair() {
    let (source, _sink, mux) = setup(LogConfig::default());
    let first = mux.subscribe("srv1", "A");
    let again = mux.subscribe("srv1", "A");
    assert!(first.is_active && again.is_active);

    let status = mux.get_all_stream_status();
    assert_eq!(status["srv1"].subscriber_count, 1);
    assert_eq!(status["srv1"].subscriber_ids, vec!["A".to_string()]);
    assert_eq!(source.created(), 1);
}

#[tokio::test]
async fn buffer_keeps_the_most_recent_lines_in_order() {
    let (source, _sink, mux) = setup(LogConfig::default());
    mux.subscribe("srv1", "A");
    for i in 0..1500 {
        source.emit("srv1", &format!("line {i}"));
    }

    let text = mux.get_buffered_lines("srv1").await;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1000);
    assert_eq!(lines.first(), Some(&"line 500"));
    assert_eq!(lines.last(), Some(&"line 1499"));

    let late = mux.subscribe("srv1", "B");
    assert_eq!(late.buffered_lines.len(), 1000);
    assert_eq!(late.buffered_lines[0], "line 500");
    assert_eq!(mux.get_all_stream_status()["srv1"].buffer_size, 1000);
}

#[tokio::test]
async fn srv1_two_subscriber_walkthrough() {
    let (source, sink, mux) = setup(LogConfig::default());

    let a = mux.subscribe("srv1", "A");
    assert!(a.buffered_lines.is_empty());

    source.emit("srv1", "hello");
    assert_eq!(mux.get_buffered_lines("srv1").await, "hello");
    assert_eq!(sink.lines_for("A"), vec!["hello"]);

    let b = mux.subscribe("srv1", "B");
    assert_eq!(b.buffered_lines, vec!["hello".to_string()]);

    assert!(mux.unsubscribe("srv1", "A"));
    source.emit("srv1", "world");
    assert_eq!(sink.lines_for("A"), vec!["hello"]);
    assert_eq!(sink.lines_for("B"), vec!["world"]);

    assert!(mux.unsubscribe("srv1", "B"));
    assert!(!mux.unsubscribe("srv1", "B"));

    let later = Instant::now() + Duration::from_secs(5 * 60 + 1);
    assert_eq!(mux.reap_idle_at(later), vec!["srv1".to_string()]);
    assert!(!mux.get_all_stream_status().contains_key("srv1"));
    assert_eq!(source.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn reaping_respects_threshold_and_subscribers() {
    let (source, _sink, mux) = setup(LogConfig::default());
    mux.subscribe("idle", "A");
    mux.unsubscribe("idle", "A");
    mux.subscribe("busy", "B");

    let now = Instant::now();
    assert!(mux.reap_idle_at(now + Duration::from_secs(299)).is_empty());
    assert!(mux.reap_idle_at(now + Duration::from_secs(300)).is_empty());
    assert_eq!(source.released(), 0);

    let reaped = mux.reap_idle_at(now + Duration::from_secs(301));
    assert_eq!(reaped, vec!["idle".to_string()]);
    assert_eq!(source.released(), 1);

    // a subscribed stream survives any amount of silence
    assert!(mux.reap_idle_at(now + Duration::from_secs(3600)).is_empty());
    assert_eq!(mux.len(), 1);
    assert_eq!(source.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn background_reaper_removes_idle_stream_once() {
    let (source, _sink, mux) = setup(LogConfig::default());
    mux.subscribe("srv1", "A");
    mux.unsubscribe("srv1", "A");
    let reaper = mux.spawn_reaper(Duration::from_secs(30));

    tokio::time::sleep(Duration::from_secs(4 * 60)).await;
    assert_eq!(mux.len(), 1);

    tokio::time::sleep(Duration::from_secs(2 * 60)).await;
    assert!(mux.is_empty());
    assert_eq!(source.released(), 1);

    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    assert_eq!(source.released(), 1);
    reaper.stop().await;
}

#[tokio::test]
async fn resubscribe_after_reap_creates_a_fresh_upstream() {
    let (source, _sink, mux) = setup(LogConfig::default());
    mux.subscribe("srv1", "A");
    source.emit("srv1", "old");
    mux.unsubscribe("srv1", "A");
    mux.reap_idle_at(Instant::now() + Duration::from_secs(301));

    let h = mux.subscribe("srv1", "A");
    assert!(h.buffered_lines.is_empty());
    assert_eq!(source.created(), 2);
    assert_eq!(source.released(), 1);
}

#[test]
fn concurrent_first_subscribers_create_one_upstream() {
    const N: usize = 16;
    let (source, _sink, mux) = setup(LogConfig::default());
    let barrier = Barrier::new(N);

    std::thread::scope(|s| {
        for i in 0..N {
            let mux = &mux;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                mux.subscribe("fresh", &format!("sub-{i}"));
            });
        }
    });

    assert_eq!(source.created(), 1);
    assert_eq!(mux.get_all_stream_status()["fresh"].subscriber_count, N);
}

#[tokio::test]
async fn errors_and_status_reach_subscribers_and_keep_stream_open() {
    let (source, sink, mux) = setup(LogConfig::default());
    mux.subscribe("srv1", "A");
    let h = source.handler("srv1");
    h.on_status(UpstreamStatus::Connected);
    h.on_error("permission denied".into());
    h.on_status(UpstreamStatus::Disconnected {
        reason: "exited".into(),
    });

    let names: Vec<&'static str> = sink
        .events
        .lock()
        .unwrap()
        .iter()
        .map(|(_, e)| e.name())
        .collect();
    assert_eq!(names, vec!["logStatus", "logError", "logStatus"]);

    // the stream stays, but without a live upstream
    let status = &mux.get_all_stream_status()["srv1"];
    assert!(!status.is_active);
    assert_eq!(status.subscriber_count, 1);
    assert_eq!(source.released(), 1);

    let hs = mux.subscribe("srv1", "B");
    assert!(hs.is_active);
    assert_eq!(source.created(), 2);

    // a late disconnect from the old upstream leaves the new one alone
    h.on_status(UpstreamStatus::Disconnected {
        reason: "exited".into(),
    });
    assert!(mux.get_all_stream_status()["srv1"].is_active);
    assert_eq!(source.released(), 1);

    source.emit("srv1", "still here");
    assert_eq!(sink.lines_for("A"), vec!["still here"]);
    assert_eq!(sink.lines_for("B"), vec!["still here"]);
}

#[tokio::test]
async fn failed_follow_is_retried_by_next_subscribe() {
    let (source, _sink, mux) = setup(LogConfig::default());
    *source.fail_follow.lock().unwrap() = true;
    let h = mux.subscribe("srv1", "A");
    assert!(!h.is_active);
    assert!(!mux.get_all_stream_status()["srv1"].is_active);

    *source.fail_follow.lock().unwrap() = false;
    let h = mux.subscribe("srv1", "B");
    assert!(h.is_active);
    assert_eq!(source.created(), 1);
}

#[tokio::test]
async fn empty_buffer_falls_back_to_dump() {
    let (source, _sink, mux) = setup(LogConfig::default());

    *source.dump.lock().unwrap() = Some(Ok("a\nb\n".into()));
    assert_eq!(mux.get_buffered_lines("srv1").await, "a\nb\n");

    *source.dump.lock().unwrap() = None;
    assert_eq!(
        mux.get_buffered_lines("srv1").await,
        "No logs available for srv1"
    );

    *source.dump.lock().unwrap() = Some(Err("unit not found".into()));
    let text = mux.get_buffered_lines("srv1").await;
    assert!(text.starts_with("Unable to retrieve logs for srv1"), "{text}");
    assert!(text.contains("unit not found"));
}

#[tokio::test(start_paused = true)]
async fn slow_dump_times_out_with_placeholder() {
    let cfg = LogConfig {
        dump_timeout: Duration::from_secs(5),
        ..LogConfig::default()
    };
    let (source, _sink, mux) = setup(cfg);
    *source.dump.lock().unwrap() = Some(Ok("too late".into()));
    *source.dump_delay.lock().unwrap() = Some(Duration::from_secs(60));

    let text = mux.get_buffered_lines("srv1").await;
    assert!(text.starts_with("Unable to retrieve logs for srv1"), "{text}");
    assert!(text.contains("timed out"));
}

#[tokio::test]
async fn unsubscribe_all_leaves_every_stream() {
    let (_source, _sink, mux) = setup(LogConfig::default());
    mux.subscribe("a", "X");
    mux.subscribe("b", "X");
    mux.subscribe("b", "Y");

    let mut left = mux.unsubscribe_all("X");
    left.sort();
    assert_eq!(left, vec!["a".to_string(), "b".to_string()]);
    let status = mux.get_all_stream_status();
    assert_eq!(status["a"].subscriber_count, 0);
    assert_eq!(status["b"].subscriber_ids, vec!["Y".to_string()]);
}

#[tokio::test]
async fn shutdown_releases_everything_once() {
    let (source, sink, mux) = setup(LogConfig::default());
    mux.subscribe("a", "X");
    mux.subscribe("b", "Y");
    let stale = source.handler("a");

    assert_eq!(mux.shutdown(), 2);
    assert_eq!(mux.shutdown(), 0);
    assert_eq!(source.released(), 2);
    assert!(mux.is_shut_down());
    assert!(mux.get_all_stream_status().is_empty());

    // late callbacks from a released upstream go nowhere
    let before = sink.events.lock().unwrap().len();
    stale.on_line("ghost".into());
    assert_eq!(sink.events.lock().unwrap().len(), before);

    let h = mux.subscribe("a", "X");
    assert!(!h.is_active);
    assert!(mux.is_empty());
    assert_eq!(source.created(), 2);
}

#[test]
fn subscribes_racing_shutdown_leave_nothing_behind() {
    for _ in 0..20 {
        let (source, _sink, mux) = setup(LogConfig::default());
        let start = Arc::new(Barrier::new(9));
        let workers: Vec<_> = (0..8)
            .map(|t| {
                let mux = mux.clone();
                let start = start.clone();
                std::thread::spawn(move || {
                    start.wait();
                    for i in 0..50 {
                        mux.subscribe(&format!("t{t}-{i}"), "A");
                    }
                })
            })
            .collect();
        start.wait();
        mux.shutdown();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(source.created(), source.released());
        assert!(mux.is_empty());
    }
}

#[tokio::test]
async fn shutdown_during_reap_releases_each_upstream_once() {
    let (source, _sink, mux) = setup(LogConfig::default());
    for i in 0..50 {
        let name = format!("i{i}");
        mux.subscribe(&name, "A");
        mux.unsubscribe(&name, "A");
    }
    let later = Instant::now() + Duration::from_secs(301);

    let reaper = {
        let mux = mux.clone();
        std::thread::spawn(move || mux.reap_idle_at(later).len())
    };
    let closed = mux.shutdown();
    let reaped = reaper.join().unwrap();

    assert_eq!(closed + reaped, 50);
    assert_eq!(source.released(), 50);
    assert!(mux.is_empty());
}
