// Disk partition models

use serde::{Deserialize, Serialize};

/// A mounted partition as enumerated before per-partition probing. Carries no
/// space figures; those are read when the partition itself is probed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionTarget {
    pub device: String,
    pub mountpoint: String,
    pub filesystem: String,
}

/// Usage and I/O counters of one partition. I/O counters are `None` when the block
/// device exposes none (network or pseudo filesystems).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionUsage {
    pub device: String,
    pub mountpoint: String,
    pub filesystem: String,
    pub total_space: u64,
    pub used_space: u64,
    pub free_space: u64,
    pub used_percent: f64,
    pub io_read_count: Option<u64>,
    pub io_write_count: Option<u64>,
    pub io_read_bytes: Option<u64>,
    pub io_write_bytes: Option<u64>,
    pub label: String,
    pub serial_number: String,
}

/// Counters from /sys/class/block/<dev>/stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockIoCounters {
    pub read_count: u64,
    pub write_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}
