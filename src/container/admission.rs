//! Host load admission
//!
//! New containers are only created while host CPU and memory utilisation are
//! both below the configured thresholds. Busy hosts are re-sampled after a
//! fixed delay, up to `max_attempts` times.

use crate::config::AdmissionConfig;
use crate::error::{EvalError, EvalResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One utilisation sample, both values in percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostLoad {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

#[async_trait]
pub trait HostLoadProbe: Send + Sync {
    async fn sample(&self) -> EvalResult<HostLoad>;
}

/// Admission policy plus the probe it samples
#[derive(Clone)]
pub struct Admission {
    pub config: AdmissionConfig,
    pub probe: Arc<dyn HostLoadProbe>,
}

impl Admission {
    pub fn new(config: AdmissionConfig, probe: Arc<dyn HostLoadProbe>) -> Self {
        Self { config, probe }
    }

    pub async fn wait(&self) -> EvalResult<()> {
        wait_for_admission(self.probe.as_ref(), &self.config).await
    }
}

/// Block until the host is below both thresholds.
pub async fn wait_for_admission(
    probe: &dyn HostLoadProbe,
    config: &AdmissionConfig,
) -> EvalResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let mut attempts: u32 = 0;
    loop {
        let load = probe
            .sample()
            .await
            .map_err(|e| EvalError::Admission(format!("host load unavailable: {}", e)))?;
        info!(
            "CPU usage={:.1}%, Mem usage={:.1}%",
            load.cpu_percent, load.mem_percent
        );

        if load.cpu_percent < config.cpu_threshold && load.mem_percent < config.mem_threshold {
            return Ok(());
        }

        attempts += 1;
        if let Some(max) = config.max_attempts {
            if attempts >= max {
                return Err(EvalError::Admission(format!(
                    "host still busy after {} samples (cpu {:.1}%, mem {:.1}%)",
                    attempts, load.cpu_percent, load.mem_percent
                )));
            }
        }

        warn!(
            "System busy (CPU>{}% or Mem>{}%), waiting {}s...",
            config.cpu_threshold, config.mem_threshold, config.retry_delay_secs
        );
        tokio::time::sleep(Duration::from_secs(config.retry_delay_secs)).await;
    }
}

/// Samples `/proc/stat` and `/proc/meminfo`
pub struct ProcLoadProbe {
    proc_root: PathBuf,
    interval: Duration,
}

impl Default for ProcLoadProbe {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            interval: Duration::from_secs(1),
        }
    }
}

impl ProcLoadProbe {
    pub fn with_root(proc_root: PathBuf, interval: Duration) -> Self {
        Self {
            proc_root,
            interval,
        }
    }

    async fn read_cpu_times(&self) -> EvalResult<CpuTimes> {
        let content = tokio::fs::read_to_string(self.proc_root.join("stat")).await?;
        parse_cpu_times(&content)
            .ok_or_else(|| EvalError::Internal("unreadable /proc/stat".to_string()))
    }
}

#[async_trait]
impl HostLoadProbe for ProcLoadProbe {
    async fn sample(&self) -> EvalResult<HostLoad> {
        let before = self.read_cpu_times().await?;
        tokio::time::sleep(self.interval).await;
        let after = self.read_cpu_times().await?;

        let meminfo = tokio::fs::read_to_string(self.proc_root.join("meminfo")).await?;
        let mem_percent = parse_mem_percent(&meminfo)
            .ok_or_else(|| EvalError::Internal("unreadable /proc/meminfo".to_string()))?;

        let load = HostLoad {
            cpu_percent: before.usage_until(&after),
            mem_percent,
        };
        debug!("Host load sample: {:?}", load);
        Ok(load)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

impl CpuTimes {
    fn usage_until(&self, later: &CpuTimes) -> f64 {
        let total = later.total.saturating_sub(self.total);
        if total == 0 {
            return 0.0;
        }
        let idle = later.idle.saturating_sub(self.idle);
        (total.saturating_sub(idle)) as f64 / total as f64 * 100.0
    }
}

/// Aggregate `cpu` line: user nice system idle iowait irq softirq steal ...
fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    // guest time is already counted in user/nice
    let total: u64 = values.iter().take(8).sum();
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes { idle, total })
}

fn parse_mem_percent(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some((total - available) / total * 100.0)
}
