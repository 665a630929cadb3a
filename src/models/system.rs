// CPU, memory and host identity models

use serde::{Deserialize, Serialize};

/// One logical CPU as reported by the OS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuInfoStat {
    pub cpu: u32,
    pub vendor_id: String,
    pub model_name: String,
    pub mhz: u64,
}

/// Cumulative per-CPU times in seconds (from /proc/stat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuTimesStat {
    pub cpu: String,
    pub user: f64,
    pub system: f64,
    pub idle: f64,
    pub nice: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
    pub guest: f64,
    pub guest_nice: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMemoryStat {
    pub total_memory: u64,
    pub available_memory: u64,
    pub used_memory: u64,
    pub free_memory: u64,
    pub used_memory_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapMemoryStat {
    pub total_swap: u64,
    pub used_swap: u64,
    pub free_swap: u64,
    pub used_swap_percent: f64,
}

/// Host identity; fields are flattened into the /metrics/system response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfoStat {
    pub system: String,
    pub hostname: String,
    pub platform: String,
    pub version: String,
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStat {
    pub user: String,
}

pub(crate) fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}
