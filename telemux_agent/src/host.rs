//! Host OS counters: point-in-time reads the sampler turns into a snapshot.
//!
//! [`HostCounters`] is the seam between the sampler and the operating system;
//! [`SysinfoCounters`] is the real implementation, tests plug in fakes.

use std::path::{Path, PathBuf};

use sysinfo::{
    CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind, ProcessesToUpdate,
    RefreshKind, System,
};
use tracing::debug;

use crate::error::SampleError;

/// Accumulated CPU time of every live process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimeReading {
    pub total_cpu_ms: u64,
    pub process_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskReading {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Cumulative interface byte counters, summed over all non-loopback interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkReading {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostInfo {
    pub core_count: usize,
    pub cpu_model: String,
    pub hostname: String,
}

pub trait HostCounters: Send {
    fn cpu_time(&mut self) -> Result<CpuTimeReading, SampleError>;

    /// Real per-core usage, if the host exposes it.
    fn per_core_usage(&mut self) -> Option<Vec<f64>>;

    fn memory(&mut self) -> Result<MemoryReading, SampleError>;

    fn primary_disk(&mut self) -> Result<DiskReading, SampleError>;

    fn network(&mut self) -> Result<NetworkReading, SampleError>;

    fn host_info(&self) -> HostInfo;
}

pub struct SysinfoCounters {
    sys: System,
    disks: Disks,
    networks: Networks,
    primary_mount: Option<PathBuf>,
    info: HostInfo,
}

impl SysinfoCounters {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        let mut sys = System::new_with_specifics(refresh_kind);
        sys.refresh_cpu_usage();

        let info = HostInfo {
            core_count: sys.cpus().len().max(1),
            cpu_model: sys
                .cpus()
                .first()
                .map(|c| c.brand().trim().to_string())
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| "Unknown CPU".into()),
            hostname: System::host_name().unwrap_or_else(|| "unknown".into()),
        };

        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            primary_mount: None,
            info,
        }
    }

    fn select_primary(&mut self) -> Option<PathBuf> {
        self.disks.refresh(true);
        let list = self.disks.list();
        let root = list
            .iter()
            .find(|d| is_root_mount(d.mount_point()) && d.total_space() > 0);
        let chosen = root.or_else(|| {
            list.iter()
                .filter(|d| !d.is_removable() && d.total_space() > 0)
                .max_by_key(|d| d.total_space())
        });
        let mount = chosen.map(|d| d.mount_point().to_path_buf());
        debug!(mount = ?mount, "selected primary volume");
        mount
    }
}

impl Default for SysinfoCounters {
    fn default() -> Self {
        Self::new()
    }
}

fn is_root_mount(p: &Path) -> bool {
    #[cfg(windows)]
    {
        p.to_string_lossy().eq_ignore_ascii_case("C:\\")
    }
    #[cfg(not(windows))]
    {
        p == Path::new("/")
    }
}

impl HostCounters for SysinfoCounters {
    fn cpu_time(&mut self) -> Result<CpuTimeReading, SampleError> {
        let kind = ProcessRefreshKind::nothing().with_cpu().with_memory();
        self.sys
            .refresh_processes_specifics(ProcessesToUpdate::All, true, kind);
        let procs = self.sys.processes();
        if procs.is_empty() {
            return Err(SampleError::unavailable("cpu", "no processes visible"));
        }
        let total_cpu_ms = procs
            .values()
            .fold(0u64, |acc, p| acc.saturating_add(p.accumulated_cpu_time()));
        Ok(CpuTimeReading {
            total_cpu_ms,
            process_count: procs.len(),
        })
    }

    fn per_core_usage(&mut self) -> Option<Vec<f64>> {
        self.sys.refresh_cpu_usage();
        let cores: Vec<f64> = self
            .sys
            .cpus()
            .iter()
            .map(|c| c.cpu_usage() as f64)
            .collect();
        if cores.is_empty() {
            None
        } else {
            Some(cores)
        }
    }

    fn memory(&mut self) -> Result<MemoryReading, SampleError> {
        self.sys.refresh_memory();
        let total_bytes = self.sys.total_memory();
        if total_bytes == 0 {
            return Err(SampleError::Invalid { metric: "memory" });
        }
        Ok(MemoryReading {
            total_bytes,
            used_bytes: total_bytes.saturating_sub(self.sys.available_memory()),
        })
    }

    fn primary_disk(&mut self) -> Result<DiskReading, SampleError> {
        // don't drop missing disks; a vanished primary is re-selected below
        self.disks.refresh(false);
        let cached = self.primary_mount.as_ref().and_then(|m| {
            self.disks
                .list()
                .iter()
                .find(|d| d.mount_point() == m.as_path() && d.total_space() > 0)
                .map(|d| DiskReading {
                    total_bytes: d.total_space(),
                    available_bytes: d.available_space(),
                })
        });
        if let Some(r) = cached {
            return Ok(r);
        }

        self.primary_mount = self.select_primary();
        let mount = self
            .primary_mount
            .clone()
            .ok_or_else(|| SampleError::unavailable("disk", "no fixed volume found"))?;
        self.disks
            .list()
            .iter()
            .find(|d| d.mount_point() == mount.as_path())
            .map(|d| DiskReading {
                total_bytes: d.total_space(),
                available_bytes: d.available_space(),
            })
            .ok_or_else(|| {
                SampleError::unavailable("disk", format!("{} vanished", mount.display()))
            })
    }

    fn network(&mut self) -> Result<NetworkReading, SampleError> {
        self.networks.refresh(true);
        let mut seen = false;
        let mut rx_bytes = 0u64;
        let mut tx_bytes = 0u64;
        for (name, data) in self.networks.iter() {
            if name == "lo" || name.starts_with("Loopback") {
                continue;
            }
            seen = true;
            rx_bytes = rx_bytes.saturating_add(data.total_received());
            tx_bytes = tx_bytes.saturating_add(data.total_transmitted());
        }
        if !seen {
            return Err(SampleError::unavailable("network", "no interfaces"));
        }
        Ok(NetworkReading { rx_bytes, tx_bytes })
    }

    fn host_info(&self) -> HostInfo {
        self.info.clone()
    }
}
