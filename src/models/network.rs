// Network interface, connection and counter models

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceStat {
    pub name: String,
    pub mtu: u64,
    pub hardware_addr: String,
    pub addrs: Vec<String>,
    /// Link speed in bits per second, when the driver reports one.
    pub speed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addr {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStat {
    /// `tcp`, `tcp6`, `udp` or `udp6`.
    pub kind: String,
    pub laddr: Addr,
    pub raddr: Addr,
    pub status: String,
    pub uid: Option<u32>,
    pub inode: u64,
}

/// Counters summed over all interfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoCountersStat {
    pub name: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
}

/// One CPU row of /proc/net/stat/nf_conntrack. Columns missing on this kernel are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConntrackStat {
    pub entries: Option<u64>,
    pub searched: Option<u64>,
    pub found: Option<u64>,
    pub new: Option<u64>,
    pub invalid: Option<u64>,
    pub ignore: Option<u64>,
    pub delete: Option<u64>,
    pub delete_list: Option<u64>,
    pub insert: Option<u64>,
    pub insert_failed: Option<u64>,
    pub drop: Option<u64>,
    pub early_drop: Option<u64>,
    pub icmp_error: Option<u64>,
    pub expect_new: Option<u64>,
    pub expect_create: Option<u64>,
    pub expect_delete: Option<u64>,
    pub search_restart: Option<u64>,
}
