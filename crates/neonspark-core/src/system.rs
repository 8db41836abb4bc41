//! Process memory reporting for health checks.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Memory figures for the running server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemorySnapshot {
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    /// Virtual memory size in bytes.
    pub virtual_bytes: u64,
    /// Total system RAM in bytes.
    pub system_total_bytes: u64,
    /// Share of system RAM held by this process, in percent.
    pub percent: f64,
}

struct Cached {
    system: System,
    refreshed_at: Option<Instant>,
}

/// Samples this process's memory, caching the reading for `cache_ttl`.
pub struct ProcessMonitor {
    pid: Option<Pid>,
    cache_ttl: Duration,
    state: Mutex<Cached>,
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl ProcessMonitor {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            cache_ttl,
            state: Mutex::new(Cached {
                system: System::new(),
                refreshed_at: None,
            }),
        }
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        let Some(pid) = self.pid else {
            return MemorySnapshot::default();
        };

        let mut cached = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let stale = cached
            .refreshed_at
            .map(|t| t.elapsed() >= self.cache_ttl)
            .unwrap_or(true);
        if stale {
            cached.system.refresh_memory();
            cached.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::new().with_memory(),
            );
            cached.refreshed_at = Some(Instant::now());
        }

        let system_total_bytes = cached.system.total_memory();
        let Some(process) = cached.system.process(pid) else {
            return MemorySnapshot {
                system_total_bytes,
                ..MemorySnapshot::default()
            };
        };

        let rss_bytes = process.memory();
        let percent = if system_total_bytes == 0 {
            0.0
        } else {
            let raw = rss_bytes as f64 / system_total_bytes as f64 * 100.0;
            (raw * 100.0).round() / 100.0
        };

        MemorySnapshot {
            rss_bytes,
            virtual_bytes: process.virtual_memory(),
            system_total_bytes,
            percent,
        }
    }
}
