//! Background sampler: periodically reads host counters, smooths them and
//! publishes a fresh snapshot into the cache, so readers never touch the OS.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::debug;

use crate::cache::MetricsCache;
use crate::history::RollingWindow;
use crate::host::{HostCounters, HostInfo, NetworkReading};
use crate::task::{spawn_periodic_blocking, TaskHandle};
use crate::types::{
    CpuHistoryPoint, CpuMetrics, DiskMetrics, MemoryMetrics, MetricsSnapshot, NetPoint,
    NetworkMetrics, NetworkTotals, SystemInfo,
};

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

// Rough load estimate used before a CPU baseline exists.
const PERCENT_PER_PROCESS: f64 = 0.05;
const HEURISTIC_RANGE: (f64, f64) = (1.0, 50.0);

// Deltas over a shorter wall window are mostly noise.
const MIN_CPU_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub cpu_smoothing: usize,
    pub cpu_history: usize,
    pub net_history: usize,
    /// Max distance of a synthesized core value from the mean.
    pub core_jitter: f64,
    /// Memory capacity is re-read every this many ticks.
    pub memory_total_refresh_ticks: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            cpu_smoothing: 10,
            cpu_history: 60,
            net_history: 60,
            core_jitter: 5.0,
            memory_total_refresh_ticks: 60,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CpuBaseline {
    cpu_ms: u64,
    at: Instant,
}

pub struct Sampler {
    counters: Box<dyn HostCounters>,
    config: SamplerConfig,
    info: HostInfo,
    ticks: u64,

    cpu_prev: Option<CpuBaseline>,
    cpu_window: RollingWindow<f64>,
    cpu_history: RollingWindow<CpuHistoryPoint>,

    mem_total_bytes: Option<u64>,
    last_memory: Option<MemoryMetrics>,
    last_disk: Option<DiskMetrics>,

    net_prev: Option<(NetworkReading, Instant)>,
    rx_history: RollingWindow<NetPoint>,
    tx_history: RollingWindow<NetPoint>,
    last_net_totals: NetworkTotals,

    rng: StdRng,
}

impl Sampler {
    pub fn new(counters: Box<dyn HostCounters>, config: SamplerConfig) -> Self {
        let info = counters.host_info();
        Self {
            counters,
            info,
            ticks: 0,
            cpu_prev: None,
            cpu_window: RollingWindow::new(config.cpu_smoothing),
            cpu_history: RollingWindow::new(config.cpu_history),
            mem_total_bytes: None,
            last_memory: None,
            last_disk: None,
            net_prev: None,
            rx_history: RollingWindow::new(config.net_history),
            tx_history: RollingWindow::new(config.net_history),
            last_net_totals: NetworkTotals::default(),
            rng: StdRng::from_entropy(),
            config,
        }
    }

    /// Records CPU and network baselines so the next tick can compute deltas.
    pub fn prime(&mut self, now: Instant) {
        if let Ok(r) = self.counters.cpu_time() {
            self.cpu_prev = Some(CpuBaseline {
                cpu_ms: r.total_cpu_ms,
                at: now,
            });
        }
        if let Ok(r) = self.counters.network() {
            self.net_prev = Some((r, now));
        }
    }

    /// Runs one tick. Per-metric failures fall back to stale values.
    pub fn sample(&mut self, now: Instant) -> MetricsSnapshot {
        let ts = chrono::Utc::now().timestamp_millis();

        let cpu = self.sample_cpu(now, ts);
        let memory = self.sample_memory();
        let disk = self.sample_disk();
        let network = self.sample_network(now, ts);
        self.ticks = self.ticks.wrapping_add(1);

        let system_info = SystemInfo {
            total_memory_mb: memory.total_mb,
            total_disk_gb: disk.total_gb,
            core_count: self.cores(),
            cpu_model: self.info.cpu_model.clone(),
            hostname: self.info.hostname.clone(),
        };

        MetricsSnapshot {
            timestamp: ts,
            cpu,
            memory,
            disk,
            network,
            system_info,
        }
    }

    /// Spawns the periodic loop; stop it with [`TaskHandle::stop`].
    ///
    /// Host refreshes walk the whole process table, so ticks run on the blocking pool.
    pub fn start(mut self, cache: Arc<MetricsCache>, period: Duration) -> TaskHandle {
        debug!(period_ms = period.as_millis() as u64, "starting metrics sampler");
        spawn_periodic_blocking("metrics-sampler", period, move || {
            let snapshot = self.sample(Instant::now());
            cache.publish(snapshot);
        })
    }

    fn cores(&self) -> usize {
        self.info.core_count.max(1)
    }

    fn raw_cpu_percent(&mut self, now: Instant) -> Option<f64> {
        let reading = match self.counters.cpu_time() {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, label = e.as_label(), "cpu sample failed");
                return None;
            }
        };

        let Some(prev) = self.cpu_prev else {
            self.cpu_prev = Some(CpuBaseline {
                cpu_ms: reading.total_cpu_ms,
                at: now,
            });
            let est = reading.process_count as f64 * PERCENT_PER_PROCESS;
            return Some(est.clamp(HEURISTIC_RANGE.0, HEURISTIC_RANGE.1));
        };

        let wall = now.saturating_duration_since(prev.at);
        if wall < MIN_CPU_WINDOW {
            return None;
        }
        self.cpu_prev = Some(CpuBaseline {
            cpu_ms: reading.total_cpu_ms,
            at: now,
        });
        // exited processes take their accumulated time with them; that reads as 0
        let busy_ms = reading.total_cpu_ms.saturating_sub(prev.cpu_ms) as f64;
        let capacity_ms = wall.as_secs_f64() * 1000.0 * self.cores() as f64;
        Some((busy_ms / capacity_ms * 100.0).clamp(0.0, 100.0))
    }

    fn sample_cpu(&mut self, now: Instant, ts: i64) -> CpuMetrics {
        if let Some(raw) = self.raw_cpu_percent(now) {
            self.cpu_window.push(raw);
        }
        let current = round2(self.cpu_window.mean().unwrap_or(0.0).clamp(0.0, 100.0));
        let per_core = self.per_core(current);

        self.cpu_history.push(CpuHistoryPoint {
            timestamp: ts,
            per_core: per_core.clone(),
            average: current,
        });

        CpuMetrics {
            current_percent: current,
            per_core,
            history: self.cpu_history.to_vec(),
            model: self.info.cpu_model.clone(),
        }
    }

    /// Host per-core counters when they match the core count, otherwise a
    /// synthesized spread around `mean`.
    fn per_core(&mut self, mean: f64) -> Vec<f64> {
        let cores = self.cores();
        if let Some(real) = self.counters.per_core_usage() {
            if real.len() == cores {
                return real.into_iter().map(|v| round2(v.clamp(0.0, 100.0))).collect();
            }
        }
        let jitter = self.config.core_jitter.abs();
        (0..cores)
            .map(|_| {
                let offset = if jitter > 0.0 {
                    self.rng.gen_range(-jitter..=jitter)
                } else {
                    0.0
                };
                round2((mean + offset).clamp(0.0, 100.0))
            })
            .collect()
    }

    fn sample_memory(&mut self) -> MemoryMetrics {
        match self.counters.memory() {
            Ok(r) => {
                let refresh_every = self.config.memory_total_refresh_ticks.max(1);
                if self.mem_total_bytes.is_none() || self.ticks % refresh_every == 0 {
                    self.mem_total_bytes = Some(r.total_bytes);
                }
                let total = self.mem_total_bytes.unwrap_or(r.total_bytes);
                let m = memory_metrics(total, r.used_bytes.min(total));
                self.last_memory = Some(m.clone());
                m
            }
            Err(e) => {
                debug!(error = %e, "memory sample failed; reusing last value");
                self.last_memory.clone().unwrap_or_default()
            }
        }
    }

    fn sample_disk(&mut self) -> DiskMetrics {
        match self.counters.primary_disk() {
            Ok(r) if r.total_bytes > 0 => {
                let d = disk_metrics(r.total_bytes, r.available_bytes.min(r.total_bytes));
                self.last_disk = Some(d.clone());
                d
            }
            Ok(_) => {
                debug!("primary volume reported zero capacity; reusing last value");
                self.last_disk.clone().unwrap_or_default()
            }
            Err(e) => {
                debug!(error = %e, "disk sample failed; reusing last value");
                self.last_disk.clone().unwrap_or_default()
            }
        }
    }

    fn sample_network(&mut self, now: Instant, ts: i64) -> NetworkMetrics {
        match self.counters.network() {
            Ok(r) => {
                let (rx_kbs, tx_kbs) = match self.net_prev {
                    Some((prev, at)) => {
                        let secs = now.saturating_duration_since(at).as_secs_f64();
                        (
                            rate_kbs(prev.rx_bytes, r.rx_bytes, secs),
                            rate_kbs(prev.tx_bytes, r.tx_bytes, secs),
                        )
                    }
                    None => (0.0, 0.0),
                };
                self.net_prev = Some((r, now));
                self.rx_history.push(NetPoint {
                    timestamp: ts,
                    kbs: rx_kbs,
                });
                self.tx_history.push(NetPoint {
                    timestamp: ts,
                    kbs: tx_kbs,
                });
                self.last_net_totals = NetworkTotals {
                    rx_mb: round2(r.rx_bytes as f64 / MB),
                    tx_mb: round2(r.tx_bytes as f64 / MB),
                    rx_speed_kbs: rx_kbs,
                    tx_speed_kbs: tx_kbs,
                };
            }
            Err(e) => {
                debug!(error = %e, "network sample failed; reusing last totals");
            }
        }
        NetworkMetrics {
            rx_history: self.rx_history.to_vec(),
            tx_history: self.tx_history.to_vec(),
            totals: self.last_net_totals.clone(),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn rate_kbs(prev: u64, cur: u64, secs: f64) -> f64 {
    if secs <= 0.0 {
        return 0.0;
    }
    // counter resets read as zero, never negative
    round2((cur.saturating_sub(prev) as f64 / secs / 1024.0).max(0.0))
}

fn memory_metrics(total_bytes: u64, used_bytes: u64) -> MemoryMetrics {
    let total_mb = round2(total_bytes as f64 / MB);
    let used_mb = round2(used_bytes as f64 / MB);
    let percent = if total_bytes > 0 {
        round2(used_bytes as f64 / total_bytes as f64 * 100.0)
    } else {
        0.0
    };
    MemoryMetrics {
        percent,
        total_mb,
        used_mb,
        free_mb: round2(total_mb - used_mb),
    }
}

fn disk_metrics(total_bytes: u64, available_bytes: u64) -> DiskMetrics {
    let used_bytes = total_bytes.saturating_sub(available_bytes);
    let used_percent = round2(used_bytes as f64 / total_bytes as f64 * 100.0);
    let total_gb = round2(total_bytes as f64 / GB);
    let used_gb = round2(used_bytes as f64 / GB);
    DiskMetrics {
        used_percent,
        free_percent: round2(100.0 - used_percent),
        total_gb,
        used_gb,
        free_gb: round2(total_gb - used_gb),
    }
}
