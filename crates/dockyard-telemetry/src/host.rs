//! Whole-host sampling via sysinfo: CPU load, memory, network rates and
//! disk usage.

use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};

use crate::SAMPLE_INTERVAL_SECS;

/// Static host capacity, read once at startup to bound allocations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HostProbe {
    pub cores: usize,
    pub memory_mb: u64,
}

pub fn probe_host() -> HostProbe {
    let mut sys = System::new();
    sys.refresh_cpu();
    sys.refresh_memory();
    HostProbe {
        cores: sys.cpus().len().max(1),
        memory_mb: sys.total_memory() / (1024 * 1024),
    }
}

/// One-shot host summary for the dashboard, capacity plus identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostOverview {
    pub hostname: Option<String>,
    pub kernel: Option<String>,
    pub os: Option<String>,
    pub cores: usize,
    pub memory_mb: u64,
    pub disk_total_bytes: u64,
    pub disk_used_bytes: u64,
}

pub fn host_overview() -> HostOverview {
    let probe = probe_host();
    let disks = Disks::new_with_refreshed_list();
    let (total, avail) = disks.iter().fold((0u64, 0u64), |(total, avail), disk| {
        (total + disk.total_space(), avail + disk.available_space())
    });
    HostOverview {
        hostname: System::host_name(),
        kernel: System::kernel_version(),
        os: System::long_os_version(),
        cores: probe.cores,
        memory_mb: probe.memory_mb,
        disk_total_bytes: total,
        disk_used_bytes: total.saturating_sub(avail),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSample {
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    /// Bytes per second, summed over interfaces.
    pub net_down_bytes_per_sec: u64,
    pub net_up_bytes_per_sec: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
}

struct HostSampler {
    sys: System,
    networks: Networks,
    disks: Disks,
}

impl HostSampler {
    fn new() -> Self {
        Self {
            sys: System::new(),
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
        }
    }

    fn sample(&mut self, elapsed: Duration) -> HostSample {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();
        // refresh() reports per-interface byte counts since the previous
        // refresh, so dividing by the elapsed interval gives a rate.
        self.networks.refresh();
        self.disks.refresh();

        let secs = elapsed.as_secs_f64().max(0.001);
        let (down, up) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(down, up), (_, data)| {
                (down + data.received(), up + data.transmitted())
            });

        let (disk_total, disk_avail) = self
            .disks
            .iter()
            .fold((0u64, 0u64), |(total, avail), disk| {
                (total + disk.total_space(), avail + disk.available_space())
            });

        HostSample {
            cpu_percent: self.sys.global_cpu_info().cpu_usage(),
            memory_used_bytes: self.sys.used_memory(),
            memory_total_bytes: self.sys.total_memory(),
            net_down_bytes_per_sec: (down as f64 / secs) as u64,
            net_up_bytes_per_sec: (up as f64 / secs) as u64,
            disk_used_bytes: disk_total.saturating_sub(disk_avail),
            disk_total_bytes: disk_total,
        }
    }
}

/// Endless stream of host samples, one per interval.
pub fn host_stream() -> impl Stream<Item = HostSample> {
    async_stream::stream! {
        let mut sampler = HostSampler::new();
        let period = Duration::from_secs(SAMPLE_INTERVAL_SECS);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = tokio::time::Instant::now();

        // First tick fires immediately; CPU load needs two refreshes to be
        // meaningful, so prime the counters before yielding anything.
        interval.tick().await;
        sampler.sample(period);

        loop {
            let now = interval.tick().await;
            yield sampler.sample(now.duration_since(last));
            last = now;
        }
    }
}
