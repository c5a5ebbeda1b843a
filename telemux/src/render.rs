//! Plain-text rendering of agent events, one line per event.

use std::collections::HashMap;

use chrono::{DateTime, Local, Utc};

use crate::types::{Cpu, Disk, LogLine, Memory, Metrics, Network, StreamStatus};

fn clock(ts_ms: i64) -> String {
    if ts_ms <= 0 {
        return "--:--:--".into();
    }
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".into())
}

pub fn cpu(c: &Cpu) -> String {
    format!("cpu {:5.1}% ({} cores)", c.current_percent, c.per_core.len())
}

pub fn memory(m: &Memory) -> String {
    format!(
        "mem {:5.1}% ({:.0}/{:.0} MB)",
        m.percent, m.used_mb, m.total_mb
    )
}

pub fn disk(d: &Disk) -> String {
    format!(
        "disk {:5.1}% ({:.1}/{:.1} GB)",
        d.used_percent, d.used_gb, d.total_gb
    )
}

pub fn network(n: &Network) -> String {
    format!(
        "net rx {:.1} KB/s tx {:.1} KB/s",
        n.totals.rx_speed_kbs, n.totals.tx_speed_kbs
    )
}

pub fn metrics(m: &Metrics) -> String {
    let host = if m.system_info.hostname.is_empty() {
        "?"
    } else {
        m.system_info.hostname.as_str()
    };
    format!(
        "{} {host} | {} | {} | {} | {}",
        clock(m.timestamp),
        cpu(&m.cpu),
        memory(&m.memory),
        disk(&m.disk),
        network(&m.network)
    )
}

pub fn log_line(l: &LogLine) -> String {
    match l.source.as_deref() {
        Some(src) => format!("{} {:<5} [{src}] {}", l.timestamp, l.level, l.message),
        None => format!("{} {:<5} {}", l.timestamp, l.level, l.message),
    }
}

pub fn stream_status(all: &HashMap<String, StreamStatus>) -> String {
    if all.is_empty() {
        return "no active log streams".into();
    }
    let mut names: Vec<&String> = all.keys().collect();
    names.sort();
    let width = names.iter().map(|n| n.len()).max().unwrap_or(0).max(8);
    let mut out = format!(
        "{:<width$}  {:<6}  {:>4}  {:>6}  LAST ACTIVITY",
        "INSTANCE", "ACTIVE", "SUBS", "BUFFER"
    );
    for name in names {
        let s = &all[name];
        out.push_str(&format!(
            "\n{:<width$}  {:<6}  {:>4}  {:>6}  {}",
            name,
            if s.is_active { "yes" } else { "no" },
            s.subscriber_count,
            s.buffer_size,
            s.last_activity
        ));
    }
    out
}
