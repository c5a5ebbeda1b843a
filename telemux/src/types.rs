//! Types that mirror the agent's JSON schema.
//!
//! Only the fields the client prints are modelled; unknown fields are ignored.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Cpu {
    pub current_percent: f64,
    pub per_core: Vec<f64>,
    pub model: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Memory {
    pub percent: f64,
    #[serde(rename = "totalMB")]
    pub total_mb: f64,
    #[serde(rename = "usedMB")]
    pub used_mb: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Disk {
    pub used_percent: f64,
    #[serde(rename = "usedGB")]
    pub used_gb: f64,
    #[serde(rename = "totalGB")]
    pub total_gb: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NetTotals {
    #[serde(rename = "rxSpeedKBs")]
    pub rx_speed_kbs: f64,
    #[serde(rename = "txSpeedKBs")]
    pub tx_speed_kbs: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Network {
    pub totals: NetTotals,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemInfo {
    pub hostname: String,
    pub core_count: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Metrics {
    pub timestamp: i64,
    pub cpu: Cpu,
    pub memory: Memory,
    pub disk: Disk,
    pub network: Network,
    pub system_info: SystemInfo,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub instance_name: String,
    pub timestamp: String,
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Handshake {
    pub buffered_lines: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub is_active: bool,
    pub buffer_size: usize,
    pub subscriber_count: usize,
    pub last_activity: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    Metrics(Metrics),
    Cpu(Cpu),
    Memory(Memory),
    Disk(Disk),
    Network(Network),
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
        handshake: Handshake,
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
