// Host measurements via sysinfo and procfs. Methods are blocking; the probe layer moves
// them onto the blocking pool.

mod linux;

use crate::error::ProbeError;
use crate::models::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use sysinfo::{Components, DiskRefreshKind, Disks, Networks, ProcessesToUpdate, System, Users};
use tracing::instrument;

/// Inet sockets by inode.
pub type SocketTable = HashMap<u64, ConnectionStat>;

pub struct SysinfoRepo {
    sys: Mutex<System>,
    /// Separate handle so per-core usage deltas are not disturbed by other refreshes.
    cpu_usage: Mutex<(System, Option<Instant>)>,
    processes: Mutex<System>,
    networks: Mutex<Networks>,
}

impl Default for SysinfoRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, ProbeError> {
    m.lock()
        .map_err(|e| ProbeError::Failed(format!("sysinfo {} lock poisoned: {}", what, e)))
}

impl SysinfoRepo {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_memory();
        Self {
            sys: Mutex::new(sys),
            cpu_usage: Mutex::new((System::new(), None)),
            processes: Mutex::new(System::new()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
        }
    }

    // --- cpu ---

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "cpu_info"))]
    pub fn cpu_info(&self) -> Result<Vec<CpuInfoStat>, ProbeError> {
        let mut sys = lock(&self.sys, "system")?;
        sys.refresh_cpu_frequency();
        let fallback_model = linux::read_cpu_model_linux();
        let cpus: Vec<CpuInfoStat> = sys
            .cpus()
            .iter()
            .enumerate()
            .map(|(i, c)| CpuInfoStat {
                cpu: i as u32,
                vendor_id: c.vendor_id().to_string(),
                model_name: Some(c.brand())
                    .filter(|b| !b.is_empty())
                    .map(str::to_string)
                    .or_else(|| fallback_model.clone())
                    .unwrap_or_else(|| "Unknown".into()),
                mhz: c.frequency(),
            })
            .collect();
        if cpus.is_empty() {
            return Err(ProbeError::Unavailable("no CPUs reported".into()));
        }
        Ok(cpus)
    }

    /// Per-core usage since the previous call. The first call (or one made sooner than
    /// sysinfo's minimum interval) waits out the interval to get a meaningful delta.
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "cpu_percent_per_core"))]
    pub fn cpu_percent_per_core(&self) -> Result<Vec<f64>, ProbeError> {
        let mut guard = lock(&self.cpu_usage, "cpu usage")?;
        let (sys, last) = &mut *guard;
        match *last {
            None => {
                sys.refresh_cpu_usage();
                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            }
            Some(prev) => {
                let since = prev.elapsed();
                if since < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL {
                    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL - since);
                }
            }
        }
        sys.refresh_cpu_usage();
        *last = Some(Instant::now());
        Ok(sys
            .cpus()
            .iter()
            .map(|c| (c.cpu_usage() as f64).clamp(0.0, 100.0))
            .collect())
    }

    pub fn cpu_times(&self) -> Result<Vec<CpuTimesStat>, ProbeError> {
        linux::read_cpu_times()
    }

    pub fn cpu_count_logical(&self) -> Result<u32, ProbeError> {
        let sys = lock(&self.sys, "system")?;
        match sys.cpus().len() {
            0 => Err(ProbeError::Unavailable("no CPUs reported".into())),
            n => Ok(n as u32),
        }
    }

    pub fn cpu_count_physical(&self) -> Result<u32, ProbeError> {
        System::physical_core_count()
            .map(|n| n as u32)
            .ok_or_else(|| ProbeError::Unavailable("physical core count".into()))
    }

    // --- memory ---

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "virtual_memory"))]
    pub fn virtual_memory(&self) -> Result<VirtualMemoryStat, ProbeError> {
        let mut sys = lock(&self.sys, "system")?;
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(ProbeError::Unavailable("total memory reported as 0".into()));
        }
        let used = sys.used_memory();
        Ok(VirtualMemoryStat {
            total_memory: total,
            available_memory: sys.available_memory(),
            used_memory: used,
            free_memory: sys.free_memory(),
            used_memory_percent: percent(used, total),
        })
    }

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "swap_memory"))]
    pub fn swap_memory(&self) -> Result<SwapMemoryStat, ProbeError> {
        let mut sys = lock(&self.sys, "system")?;
        sys.refresh_memory();
        let total = sys.total_swap();
        let used = sys.used_swap();
        Ok(SwapMemoryStat {
            total_swap: total,
            used_swap: used,
            free_swap: sys.free_swap(),
            used_swap_percent: percent(used, total),
        })
    }

    // --- disk ---

    /// Mount table only; space is not read here so one hung mount cannot stall the list.
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "partitions"))]
    pub fn partitions(&self) -> Result<Vec<PartitionTarget>, ProbeError> {
        let disks = Disks::new_with_refreshed_list_specifics(DiskRefreshKind::nothing());
        Ok(disks
            .list()
            .iter()
            .map(|d| PartitionTarget {
                device: d.name().to_string_lossy().into_owned(),
                mountpoint: d.mount_point().to_string_lossy().into_owned(),
                filesystem: d.file_system().to_string_lossy().into_owned(),
            })
            .collect())
    }

    /// Reads the partition's space now. Fails when it is no longer mounted or its
    /// filesystem cannot be queried.
    #[instrument(skip(self, target), fields(repo = "sysinfo", operation = "partition_usage", mountpoint = %target.mountpoint))]
    pub fn partition_usage(&self, target: PartitionTarget) -> Result<PartitionUsage, ProbeError> {
        let mut disks = Disks::new_with_refreshed_list_specifics(DiskRefreshKind::nothing());
        let disk = disks
            .list_mut()
            .iter_mut()
            .find(|d| d.mount_point() == Path::new(&target.mountpoint))
            .ok_or_else(|| {
                ProbeError::Unavailable(format!("{} is no longer mounted", target.mountpoint))
            })?;
        if !disk.refresh_specifics(DiskRefreshKind::nothing().with_storage()) {
            return Err(ProbeError::Failed(format!(
                "cannot read space of {}",
                target.mountpoint
            )));
        }
        let total = disk.total_space();
        let free = disk.available_space();
        let used = total.saturating_sub(free);
        let io = linux::read_block_io(&target.device);
        Ok(PartitionUsage {
            used_space: used,
            free_space: free,
            used_percent: percent(used, total),
            total_space: total,
            io_read_count: io.map(|c| c.read_count),
            io_write_count: io.map(|c| c.write_count),
            io_read_bytes: io.map(|c| c.read_bytes),
            io_write_bytes: io.map(|c| c.write_bytes),
            label: target.filesystem.clone(),
            serial_number: target.device.clone(),
            device: target.device,
            mountpoint: target.mountpoint,
            filesystem: target.filesystem,
        })
    }

    // --- network ---

    pub fn pids(&self) -> Result<Vec<i32>, ProbeError> {
        linux::list_pids()
    }

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "interfaces"))]
    pub fn interfaces(&self) -> Result<Vec<InterfaceStat>, ProbeError> {
        let mut networks = lock(&self.networks, "networks")?;
        networks.refresh(true);
        let mut out: Vec<InterfaceStat> = networks
            .list()
            .iter()
            .map(|(name, data)| InterfaceStat {
                name: name.clone(),
                mtu: data.mtu(),
                hardware_addr: data.mac_address().to_string(),
                addrs: data
                    .ip_networks()
                    .iter()
                    .map(|n| format!("{}/{}", n.addr, n.prefix))
                    .collect(),
                speed: linux::get_interface_speed(name),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    pub fn connections(&self) -> Result<Vec<ConnectionStat>, ProbeError> {
        linux::read_connections()
    }

    /// Open inet sockets keyed by inode, for attributing sockets to processes.
    pub fn socket_table(&self) -> Result<SocketTable, ProbeError> {
        Ok(linux::read_connections()?
            .into_iter()
            .map(|c| (c.inode, c))
            .collect())
    }

    /// Totals across all interfaces (a single "all" row).
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "io_counters"))]
    pub fn io_counters(&self) -> Result<Vec<IoCountersStat>, ProbeError> {
        let mut networks = lock(&self.networks, "networks")?;
        networks.refresh(true);
        let mut all = IoCountersStat {
            name: "all".into(),
            bytes_sent: 0,
            bytes_recv: 0,
            packets_sent: 0,
            packets_recv: 0,
            errin: 0,
            errout: 0,
        };
        for data in networks.list().values() {
            all.bytes_sent += data.total_transmitted();
            all.bytes_recv += data.total_received();
            all.packets_sent += data.total_packets_transmitted();
            all.packets_recv += data.total_packets_received();
            all.errin += data.total_errors_on_received();
            all.errout += data.total_errors_on_transmitted();
        }
        Ok(vec![all])
    }

    pub fn conntrack_stats(&self) -> Result<Vec<ConntrackStat>, ProbeError> {
        linux::read_conntrack_stats()
    }

    // --- process ---

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "processes"))]
    pub fn processes(&self) -> Result<Vec<ProcessTarget>, ProbeError> {
        let mut sys = lock(&self.processes, "processes")?;
        sys.refresh_processes(ProcessesToUpdate::All, true);
        let procs: Vec<_> = sys
            .processes()
            .values()
            .filter(|p| p.thread_kind().is_none())
            .collect();
        if procs.is_empty() {
            return Err(ProbeError::Unavailable("process table is empty".into()));
        }

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for p in &procs {
            if let Some(parent) = p.parent() {
                children
                    .entry(parent.as_u32())
                    .or_default()
                    .push(p.pid().as_u32());
            }
        }

        let mut out: Vec<ProcessTarget> = procs
            .iter()
            .map(|p| {
                let pid = p.pid().as_u32();
                let mut kids = children.remove(&pid).unwrap_or_default();
                kids.sort_unstable();
                ProcessTarget {
                    pid,
                    ppid: p.parent().map(|pp| pp.as_u32()),
                    name: p.name().to_string_lossy().into_owned(),
                    exe: p.exe().map(|e| e.to_string_lossy().into_owned()),
                    cmdline: p
                        .cmd()
                        .iter()
                        .map(|a| a.to_string_lossy())
                        .collect::<Vec<_>>()
                        .join(" "),
                    rss: p.memory(),
                    vms: p.virtual_memory(),
                    cpu_percent: p.cpu_usage() as f64,
                    create_time: p.start_time() * 1000,
                    status: p.status().to_string(),
                    children: kids,
                }
            })
            .collect();
        out.sort_by_key(|p| p.pid);
        Ok(out)
    }

    /// Fails when the process exited after enumeration. `connections` is `None` without
    /// a socket table or when the process's descriptors are hidden.
    pub fn process_details(
        &self,
        target: ProcessTarget,
        sockets: Option<&SocketTable>,
    ) -> Result<ProcessInfo, ProbeError> {
        let extras = linux::read_process_extras(target.pid)?;
        let connections = match (extras.socket_inodes, sockets) {
            (Some(inodes), Some(table)) => Some(
                inodes
                    .iter()
                    .filter_map(|inode| table.get(inode).cloned())
                    .collect(),
            ),
            _ => None,
        };
        Ok(ProcessInfo {
            pid: target.pid,
            ppid: target.ppid,
            name: target.name,
            exe: target.exe,
            cmdline: target.cmdline,
            memory_info: MemoryInfoStat {
                rss: target.rss,
                vms: target.vms,
            },
            cpu_percent: target.cpu_percent,
            create_time: target.create_time,
            num_threads: extras.num_threads,
            status: target.status,
            nice: extras.nice,
            threads: extras.threads,
            open_files: extras.open_files,
            connections,
            children: target.children,
        })
    }

    // --- sensors ---

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "temperatures"))]
    pub fn temperatures(&self) -> Result<Vec<TemperatureStat>, ProbeError> {
        let components = Components::new_with_refreshed_list();
        Ok(components
            .list()
            .iter()
            .map(|c| TemperatureStat {
                sensor_key: c.label().to_string(),
                temperature: c.temperature().map(f64::from),
                sensor_high: c.max().map(f64::from),
                sensor_critical: c.critical().map(f64::from),
            })
            .collect())
    }

    // --- host ---

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "host_info"))]
    pub fn host_info(&self) -> Result<HostInfoStat, ProbeError> {
        let system = System::name()
            .ok_or_else(|| ProbeError::Unavailable("operating system name".into()))?;
        Ok(HostInfoStat {
            system,
            hostname: System::host_name().unwrap_or_default(),
            platform: System::distribution_id(),
            version: System::os_version().unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
        })
    }

    pub fn boot_time(&self) -> Result<u64, ProbeError> {
        Ok(System::boot_time())
    }

    pub fn uptime(&self) -> Result<u64, ProbeError> {
        Ok(System::uptime())
    }

    pub fn users(&self) -> Result<Vec<UserStat>, ProbeError> {
        let users = Users::new_with_refreshed_list();
        Ok(users
            .list()
            .iter()
            .map(|u| UserStat {
                user: u.name().to_string(),
            })
            .collect())
    }

    pub fn kernel_version(&self) -> Result<String, ProbeError> {
        System::kernel_version().ok_or_else(|| ProbeError::Unavailable("kernel version".into()))
    }

    pub fn kernel_arch(&self) -> Result<String, ProbeError> {
        Ok(linux::read_kernel_arch().unwrap_or_else(|| std::env::consts::ARCH.to_string()))
    }

    pub fn host_id(&self) -> Result<String, ProbeError> {
        linux::read_machine_id()
    }
}
