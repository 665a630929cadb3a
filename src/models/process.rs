// Process models

use serde::{Deserialize, Serialize};

use super::ConnectionStat;

/// What enumeration learns about a process before its details are probed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTarget {
    pub pid: u32,
    pub ppid: Option<u32>,
    pub name: String,
    pub exe: Option<String>,
    pub cmdline: String,
    pub rss: u64,
    pub vms: u64,
    pub cpu_percent: f64,
    pub create_time: u64,
    pub status: String,
    pub children: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfoStat {
    pub rss: u64,
    pub vms: u64,
}

/// Details of one running process. Fields the kernel refused to reveal are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: Option<u32>,
    pub name: String,
    pub exe: Option<String>,
    pub cmdline: String,
    pub memory_info: MemoryInfoStat,
    pub cpu_percent: f64,
    /// Milliseconds since the epoch.
    pub create_time: u64,
    pub num_threads: Option<u32>,
    pub status: String,
    pub nice: Option<i32>,
    /// Thread ids, the main thread included.
    pub threads: Option<Vec<u32>>,
    pub open_files: Option<Vec<OpenFileStat>>,
    pub connections: Option<Vec<ConnectionStat>>,
    pub children: Vec<u32>,
}

/// A regular file held open by a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileStat {
    pub fd: u32,
    pub path: String,
}
