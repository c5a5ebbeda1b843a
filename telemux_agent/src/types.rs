//! Data types sent to clients over WebSocket.
//! Changing a field name here changes the wire format.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type SubscriberId = String;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuHistoryPoint {
    pub timestamp: i64, // unix ms
    pub per_core: Vec<f64>,
    pub average: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    pub current_percent: f64,
    pub per_core: Vec<f64>,
    pub history: Vec<CpuHistoryPoint>,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    pub percent: f64,
    #[serde(rename = "totalMB")]
    pub total_mb: f64,
    #[serde(rename = "usedMB")]
    pub used_mb: f64,
    #[serde(rename = "freeMB")]
    pub free_mb: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskMetrics {
    pub used_percent: f64,
    pub free_percent: f64,
    #[serde(rename = "totalGB")]
    pub total_gb: f64,
    #[serde(rename = "usedGB")]
    pub used_gb: f64,
    #[serde(rename = "freeGB")]
    pub free_gb: f64,
}

impl Default for DiskMetrics {
    fn default() -> Self {
        Self {
            used_percent: 0.0,
            free_percent: 100.0,
            total_gb: 0.0,
            used_gb: 0.0,
            free_gb: 0.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NetPoint {
    pub timestamp: i64, // unix ms
    pub kbs: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct NetworkTotals {
    #[serde(rename = "rxMB")]
    pub rx_mb: f64,
    #[serde(rename = "txMB")]
    pub tx_mb: f64,
    #[serde(rename = "rxSpeedKBs")]
    pub rx_speed_kbs: f64,
    #[serde(rename = "txSpeedKBs")]
    pub tx_speed_kbs: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    pub rx_history: Vec<NetPoint>,
    pub tx_history: Vec<NetPoint>,
    pub totals: NetworkTotals,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    #[serde(rename = "totalMemoryMB")]
    pub total_memory_mb: f64,
    #[serde(rename = "totalDiskGB")]
    pub total_disk_gb: f64,
    pub core_count: usize,
    pub cpu_model: String,
    pub hostname: String,
}

/// One complete set of metric values; shared as `Arc` once published.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub timestamp: i64, // unix ms, 0 before the first tick
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub disk: DiskMetrics,
    pub network: NetworkMetrics,
    pub system_info: SystemInfo,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub instance_name: String,
    pub timestamp: String,
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thread_id: Option<String>,
    pub raw_line: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub is_active: bool,
    pub buffer_size: usize,
    pub subscriber_count: usize,
    pub last_activity: String, // RFC 3339
    pub subscriber_ids: Vec<SubscriberId>,
}

/// One-time catch-up payload returned by a log subscribe.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamHandshake {
    pub buffered_lines: Vec<String>,
    pub is_active: bool,
}

/// Everything the agent pushes to a subscriber. Serialized as
/// `{"event": "<name>", "payload": {...}}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum OutboundEvent {
    Metrics(MetricsSnapshot),
    Cpu(CpuMetrics),
    Memory(MemoryMetrics),
    Disk(DiskMetrics),
    Network(NetworkMetrics),
    LogLine(LogLine),
    #[serde(rename_all = "camelCase")]
    LogError {
        instance_name: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    LogStatus {
        instance_name: String,
        connected: bool,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    LogHistory {
        instance_name: String,
        handshake: StreamHandshake,
    },
    #[serde(rename_all = "camelCase")]
    LogDump {
        instance_name: String,
        text: String,
    },
    StreamStatus(HashMap<String, StreamStatus>),
    Error {
        message: String,
    },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Metrics(_) => "metrics",
            OutboundEvent::Cpu(_) => "cpu",
            OutboundEvent::Memory(_) => "memory",
            OutboundEvent::Disk(_) => "disk",
            OutboundEvent::Network(_) => "network",
            OutboundEvent::LogLine(_) => "logLine",
            OutboundEvent::LogError { .. } => "logError",
            OutboundEvent::LogStatus { .. } => "logStatus",
            OutboundEvent::LogHistory { .. } => "logHistory",
            OutboundEvent::LogDump { .. } => "logDump",
            OutboundEvent::StreamStatus(_) => "streamStatus",
            OutboundEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tag_matches_name() {
        let ev = OutboundEvent::LogError {
            instance_name: "srv1".into(),
            message: "boom".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], ev.name());
        assert_eq!(v["payload"]["instanceName"], "srv1");

        let ev = OutboundEvent::Memory(MemoryMetrics::default());
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "memory");
        assert!(v["payload"].get("totalMB").is_some());
    }

    #[test]
    fn optional_log_fields_are_omitted() {
        let line = LogLine {
            instance_name: "srv1".into(),
            timestamp: "12:00:00".into(),
            level: "INFO".into(),
            message: "hi".into(),
            source: None,
            thread_id: None,
            raw_line: "hi".into(),
        };
        let v = serde_json::to_value(&line).unwrap();
        assert!(v.get("source").is_none());
        assert!(v.get("threadId").is_none());
        assert_eq!(v["rawLine"], "hi");
    }
}
