// Linux-specific readers: /proc, /sys, machine-id. Parsers are kept separate from I/O.

use crate::error::ProbeError;
use crate::models::{
    Addr, BlockIoCounters, ConnectionStat, ConntrackStat, CpuTimesStat, OpenFileStat,
};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

/// Kernel clock ticks per second used by /proc/stat (USER_HZ).
const CLOCK_TICKS: f64 = 100.0;
/// /sys/class/block/*/stat counts 512-byte sectors regardless of the device.
const SECTOR_SIZE: u64 = 512;

#[cfg(not(target_os = "linux"))]
fn unsupported<T>(what: &str) -> Result<T, ProbeError> {
    Err(ProbeError::Unavailable(format!(
        "{} requires Linux procfs",
        what
    )))
}

/// Read first "model name" from /proc/cpuinfo. Preferred over sysinfo when it returns "cpu0" etc.
pub(super) fn read_cpu_model_linux() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/proc/cpuinfo").ok()?;
        for line in content.lines() {
            if line.starts_with("model name") {
                let name = line
                    .find(": ")
                    .map(|i| line[i + 2..].trim())
                    .filter(|s| !s.is_empty() && *s != "cpu0")?;
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Link speed from /sys/class/net/<interface>/speed, in bits per second.
pub(super) fn get_interface_speed(interface_name: &str) -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/sys/class/net/{}/speed", interface_name);
        if let Ok(content) = std::fs::read_to_string(&path)
            && let Ok(mbps) = content.trim().parse::<i64>()
            && mbps > 0
        {
            return Some((mbps as u64) * 1_000_000);
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = interface_name;
    None
}

pub(super) fn read_cpu_times() -> Result<Vec<CpuTimesStat>, ProbeError> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/proc/stat")?;
        parse_proc_stat(&content)
    }
    #[cfg(not(target_os = "linux"))]
    unsupported("cpu times")
}

/// Per-CPU rows of /proc/stat ("cpuN ..."); the aggregate "cpu" row is skipped.
pub(super) fn parse_proc_stat(content: &str) -> Result<Vec<CpuTimesStat>, ProbeError> {
    let mut out = Vec::new();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };
        let is_core = label
            .strip_prefix("cpu")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if !is_core {
            continue;
        }
        let ticks: Vec<f64> = fields
            .map(|f| f.parse::<u64>().map(|v| v as f64 / CLOCK_TICKS))
            .collect::<Result<_, _>>()
            .map_err(|e| ProbeError::Malformed(format!("/proc/stat {}: {}", label, e)))?;
        if ticks.len() < 4 {
            return Err(ProbeError::Malformed(format!(
                "/proc/stat {}: expected at least 4 columns, got {}",
                label,
                ticks.len()
            )));
        }
        let at = |i: usize| ticks.get(i).copied().unwrap_or(0.0);
        out.push(CpuTimesStat {
            cpu: label.to_string(),
            user: at(0),
            nice: at(1),
            system: at(2),
            idle: at(3),
            iowait: at(4),
            irq: at(5),
            softirq: at(6),
            steal: at(7),
            guest: at(8),
            guest_nice: at(9),
        });
    }
    if out.is_empty() {
        return Err(ProbeError::Malformed("/proc/stat has no per-cpu rows".into()));
    }
    Ok(out)
}

/// Every PID currently listed under /proc.
pub(super) fn list_pids() -> Result<Vec<i32>, ProbeError> {
    #[cfg(target_os = "linux")]
    {
        let mut pids: Vec<i32> = std::fs::read_dir("/proc")?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }
    #[cfg(not(target_os = "linux"))]
    unsupported("pid listing")
}

/// Open inet sockets (tcp, tcp6, udp, udp6). Tables missing on this kernel are skipped.
pub(super) fn read_connections() -> Result<Vec<ConnectionStat>, ProbeError> {
    #[cfg(target_os = "linux")]
    {
        let mut out = Vec::new();
        let mut read_any = false;
        for kind in ["tcp", "tcp6", "udp", "udp6"] {
            match std::fs::read_to_string(format!("/proc/net/{}", kind)) {
                Ok(content) => {
                    read_any = true;
                    out.extend(parse_proc_net(kind, &content)?);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if !read_any {
            return Err(ProbeError::Unavailable("no /proc/net socket tables".into()));
        }
        Ok(out)
    }
    #[cfg(not(target_os = "linux"))]
    unsupported("connection listing")
}

pub(super) fn parse_proc_net(kind: &str, content: &str) -> Result<Vec<ConnectionStat>, ProbeError> {
    let is_tcp = kind.starts_with("tcp");
    let malformed = |what: &str| ProbeError::Malformed(format!("/proc/net/{}: {}", kind, what));
    let mut out = Vec::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let laddr = parse_socket_addr(fields[1]).ok_or_else(|| malformed(fields[1]))?;
        let raddr = parse_socket_addr(fields[2]).ok_or_else(|| malformed(fields[2]))?;
        let state = u8::from_str_radix(fields[3], 16).map_err(|_| malformed(fields[3]))?;
        out.push(ConnectionStat {
            kind: kind.to_string(),
            laddr,
            raddr,
            status: if is_tcp {
                tcp_state_name(state).to_string()
            } else {
                "NONE".to_string()
            },
            uid: fields[7].parse().ok(),
            inode: fields[9].parse().map_err(|_| malformed(fields[9]))?,
        });
    }
    Ok(out)
}

/// "0100007F:0050" -> 127.0.0.1:80. Addresses are stored as native-endian 32-bit words.
fn parse_socket_addr(s: &str) -> Option<Addr> {
    let (ip_hex, port_hex) = s.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let ip = match ip_hex.len() {
        8 => Ipv4Addr::from(u32::from_str_radix(ip_hex, 16).ok()?.to_ne_bytes()).to_string(),
        32 => {
            let mut bytes = [0u8; 16];
            for (i, chunk) in bytes.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(ip_hex.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            Ipv6Addr::from(bytes).to_string()
        }
        _ => return None,
    };
    Some(Addr { ip, port })
}

fn tcp_state_name(state: u8) -> &'static str {
    match state {
        0x01 => "ESTABLISHED",
        0x02 => "SYN_SENT",
        0x03 => "SYN_RECV",
        0x04 => "FIN_WAIT1",
        0x05 => "FIN_WAIT2",
        0x06 => "TIME_WAIT",
        0x07 => "CLOSE",
        0x08 => "CLOSE_WAIT",
        0x09 => "LAST_ACK",
        0x0A => "LISTEN",
        0x0B => "CLOSING",
        _ => "UNKNOWN",
    }
}

/// Per-CPU rows of /proc/net/stat/nf_conntrack.
pub(super) fn read_conntrack_stats() -> Result<Vec<ConntrackStat>, ProbeError> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/proc/net/stat/nf_conntrack")?;
        parse_nf_conntrack(&content)
    }
    #[cfg(not(target_os = "linux"))]
    unsupported("conntrack stats")
}

pub(super) fn parse_nf_conntrack(content: &str) -> Result<Vec<ConntrackStat>, ProbeError> {
    let mut lines = content.lines();
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| ProbeError::Malformed("nf_conntrack: empty".into()))?
        .split_whitespace()
        .collect();
    let mut out = Vec::new();
    for line in lines {
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.is_empty() {
            continue;
        }
        if values.len() != header.len() {
            return Err(ProbeError::Malformed(format!(
                "nf_conntrack: {} columns in header, {} in row",
                header.len(),
                values.len()
            )));
        }
        let mut row = ConntrackStat::default();
        for (name, raw) in header.iter().zip(values) {
            let v = u64::from_str_radix(raw, 16)
                .map_err(|e| ProbeError::Malformed(format!("nf_conntrack {}: {}", name, e)))?;
            let slot = match *name {
                "entries" => &mut row.entries,
                "searched" => &mut row.searched,
                "found" => &mut row.found,
                "new" => &mut row.new,
                "invalid" => &mut row.invalid,
                "ignore" => &mut row.ignore,
                "delete" => &mut row.delete,
                "delete_list" => &mut row.delete_list,
                "insert" => &mut row.insert,
                "insert_failed" => &mut row.insert_failed,
                "drop" => &mut row.drop,
                "early_drop" => &mut row.early_drop,
                "icmp_error" => &mut row.icmp_error,
                "expect_new" => &mut row.expect_new,
                "expect_create" => &mut row.expect_create,
                "expect_delete" => &mut row.expect_delete,
                "search_restart" => &mut row.search_restart,
                _ => continue,
            };
            *slot = Some(v);
        }
        out.push(row);
    }
    Ok(out)
}

/// I/O counters of the block device behind `device`. Symlinked nodes such as
/// /dev/mapper/<name> are resolved first, so "/dev/mapper/vg-root" reads dm-N.
pub(super) fn read_block_io(device: &str) -> Option<BlockIoCounters> {
    #[cfg(target_os = "linux")]
    {
        let name = block_device_name(Path::new(device))?;
        let content = std::fs::read_to_string(format!("/sys/class/block/{}/stat", name)).ok()?;
        parse_block_stat(&content)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = device;
        None
    }
}

/// Kernel name of a device node: "/dev/sda1" -> "sda1", "/dev/mapper/x" -> "dm-0".
pub(super) fn block_device_name(device: &Path) -> Option<String> {
    let resolved = std::fs::canonicalize(device).unwrap_or_else(|_| device.to_path_buf());
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}

pub(super) fn parse_block_stat(content: &str) -> Option<BlockIoCounters> {
    let fields: Vec<u64> = content
        .split_whitespace()
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    if fields.len() < 7 {
        return None;
    }
    Some(BlockIoCounters {
        read_count: fields[0],
        read_bytes: fields[2] * SECTOR_SIZE,
        write_count: fields[4],
        write_bytes: fields[6] * SECTOR_SIZE,
    })
}

/// Per-process fields sysinfo does not expose.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(super) struct ProcessExtras {
    pub nice: Option<i32>,
    pub num_threads: Option<u32>,
    pub threads: Option<Vec<u32>>,
    pub open_files: Option<Vec<OpenFileStat>>,
    /// Inodes of the sockets behind the process's descriptors.
    pub socket_inodes: Option<Vec<u64>>,
}

/// What a /proc/<pid>/fd link points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum FdLink {
    File(String),
    Socket(u64),
    /// Pipes, anon inodes, deleted files.
    Other,
}

pub(super) fn classify_fd_link(link: &str) -> FdLink {
    if let Some(inode) = link
        .strip_prefix("socket:[")
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|n| n.parse().ok())
    {
        return FdLink::Socket(inode);
    }
    if link.starts_with('/') && !link.ends_with(" (deleted)") {
        return FdLink::File(link.to_string());
    }
    FdLink::Other
}

/// Fails with `Unavailable` when the process has exited since enumeration. Descriptor and
/// thread lists are `None` when the kernel denies access to them.
pub(super) fn read_process_extras(pid: u32) -> Result<ProcessExtras, ProbeError> {
    #[cfg(target_os = "linux")]
    {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid))?;
        let mut extras = parse_pid_stat(&stat)
            .ok_or_else(|| ProbeError::Malformed(format!("/proc/{}/stat", pid)))?;
        extras.threads = read_thread_ids(pid);
        if let Some((files, sockets)) = read_fd_links(pid) {
            extras.open_files = Some(files);
            extras.socket_inodes = Some(sockets);
        }
        Ok(extras)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        Ok(ProcessExtras::default())
    }
}

#[cfg(target_os = "linux")]
fn read_thread_ids(pid: u32) -> Option<Vec<u32>> {
    let mut tids: Vec<u32> = std::fs::read_dir(format!("/proc/{}/task", pid))
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
        .collect();
    tids.sort_unstable();
    Some(tids)
}

/// Descriptors that close while being walked are skipped.
#[cfg(target_os = "linux")]
fn read_fd_links(pid: u32) -> Option<(Vec<OpenFileStat>, Vec<u64>)> {
    let mut files = Vec::new();
    let mut sockets = Vec::new();
    for entry in std::fs::read_dir(format!("/proc/{}/fd", pid)).ok()?.flatten() {
        let Some(fd) = entry.file_name().to_str().and_then(|s| s.parse().ok()) else {
            continue;
        };
        let Ok(target) = std::fs::read_link(entry.path()) else {
            continue;
        };
        match classify_fd_link(&target.to_string_lossy()) {
            FdLink::File(path) => files.push(OpenFileStat { fd, path }),
            FdLink::Socket(inode) => sockets.push(inode),
            FdLink::Other => {}
        }
    }
    files.sort_by_key(|f| f.fd);
    sockets.sort_unstable();
    Some((files, sockets))
}

/// Fields after the parenthesised comm, which may itself contain spaces or ')'.
pub(super) fn parse_pid_stat(content: &str) -> Option<ProcessExtras> {
    let rest = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // rest[0] is field 3 (state); nice is field 19, num_threads field 20.
    Some(ProcessExtras {
        nice: fields.get(16)?.parse().ok(),
        num_threads: fields.get(17)?.parse().ok(),
        ..ProcessExtras::default()
    })
}

/// Machine hardware name as the running kernel reports it (`uname -m`).
pub(super) fn read_kernel_arch() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let v = std::fs::read_to_string("/proc/sys/kernel/arch").ok()?;
        let v = v.trim();
        if v.is_empty() {
            return None;
        }
        Some(v.to_string())
    }
    #[cfg(not(target_os = "linux"))]
    None
}

pub(super) fn read_machine_id() -> Result<String, ProbeError> {
    #[cfg(target_os = "linux")]
    {
        for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(v) = std::fs::read_to_string(path) {
                let v = v.trim();
                if !v.is_empty() {
                    return Ok(v.to_string());
                }
            }
        }
        Err(ProbeError::Unavailable("no machine-id".into()))
    }
    #[cfg(not(target_os = "linux"))]
    unsupported("host id")
}
