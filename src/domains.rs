// Metric domains: which probes run together, under which deadlines

use serde::Serialize;
use std::sync::Arc;
use tokio::time::Duration;

use crate::aggregator::AggregationSpec;
use crate::config::ProbesConfig;
use crate::error::{AggregateError, ProbeError};
use crate::fan_out::FanOut;
use crate::gpu_repo::GpuRepo;
use crate::models::{PartitionTarget, PartitionUsage, ProcessInfo, ProcessTarget};
use crate::probe::{self, ProbeEntry};
use crate::sysinfo_repo::{SocketTable, SysinfoRepo};

/// Every domain's aggregation spec, built once at startup and shared read-only.
pub struct Domains {
    pub host: Arc<AggregationSpec>,
    pub cpu: Arc<AggregationSpec>,
    pub memory: Arc<AggregationSpec>,
    pub network: Arc<AggregationSpec>,
    pub network_pids: Arc<AggregationSpec>,
    pub network_interfaces: Arc<AggregationSpec>,
    pub network_connections: Arc<AggregationSpec>,
    pub network_io_counters: Arc<AggregationSpec>,
    pub network_conntrack_stats: Arc<AggregationSpec>,
    pub sensors: Arc<AggregationSpec>,
    pub gpu: Arc<AggregationSpec>,
    sysinfo_repo: Arc<SysinfoRepo>,
    fan_out: FanOut,
}

fn sysinfo_probe<T, F>(repo: &Arc<SysinfoRepo>, name: &str, f: F) -> ProbeEntry
where
    F: Fn(&SysinfoRepo) -> Result<T, ProbeError> + Send + Sync + 'static,
    T: Serialize + Send + 'static,
{
    let repo = repo.clone();
    ProbeEntry::new(probe::blocking(name, move || f(repo.as_ref())))
}

async fn on_blocking_pool<T, F>(repo: Arc<SysinfoRepo>, f: F) -> Result<T, ProbeError>
where
    F: FnOnce(&SysinfoRepo) -> Result<T, ProbeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(repo.as_ref()))
        .await
        .map_err(|e| ProbeError::Failed(format!("sysinfo task join: {}", e)))?
}

fn single(
    domain: &str,
    deadline: Duration,
    entry: ProbeEntry,
) -> Result<Arc<AggregationSpec>, AggregateError> {
    Ok(Arc::new(
        AggregationSpec::builder(domain, deadline)
            .probe(entry)
            .build()?,
    ))
}

impl Domains {
    pub fn new(
        sysinfo_repo: Arc<SysinfoRepo>,
        gpu_repo: Arc<GpuRepo>,
        config: &ProbesConfig,
    ) -> Result<Self, AggregateError> {
        let repo = &sysinfo_repo;
        let deadline = Duration::from_millis(config.deadline_ms);

        let host = AggregationSpec::builder("system", deadline)
            .probe(sysinfo_probe(repo, "host_info", |r| r.host_info()).flattened())
            .probe(sysinfo_probe(repo, "boot_time", |r| r.boot_time()))
            .probe(sysinfo_probe(repo, "uptime", |r| r.uptime()))
            .probe(sysinfo_probe(repo, "users", |r| r.users()))
            .probe(sysinfo_probe(repo, "kernel_arch", |r| r.kernel_arch()))
            .probe(sysinfo_probe(repo, "kernel_version", |r| r.kernel_version()))
            .probe(sysinfo_probe(repo, "host_id", |r| r.host_id()))
            .required("host_info")
            .build()?;

        let cpu = AggregationSpec::builder("cpu", deadline)
            .probe(sysinfo_probe(repo, "cpu_info", |r| r.cpu_info()))
            .probe(sysinfo_probe(repo, "cpu_count_physical", |r| {
                r.cpu_count_physical()
            }))
            .probe(sysinfo_probe(repo, "cpu_count_logical", |r| {
                r.cpu_count_logical()
            }))
            .probe(sysinfo_probe(repo, "cpu_percent_per_core", |r| {
                r.cpu_percent_per_core()
            }))
            .probe(sysinfo_probe(repo, "cpu_times", |r| r.cpu_times()))
            .required("cpu_info")
            .build()?;

        let memory = AggregationSpec::builder("memory", deadline)
            .probe(sysinfo_probe(repo, "virtual_memory", |r| r.virtual_memory()).flattened())
            .probe(sysinfo_probe(repo, "swap_memory", |r| r.swap_memory()).flattened())
            .build()?;

        let pids = || sysinfo_probe(repo, "pids", |r| r.pids());
        let interfaces = || sysinfo_probe(repo, "interfaces", |r| r.interfaces());
        let connections = || sysinfo_probe(repo, "connections", |r| r.connections());
        let io_counters = || sysinfo_probe(repo, "io_counters", |r| r.io_counters());
        let conntrack = || sysinfo_probe(repo, "conntrack_stats", |r| r.conntrack_stats());

        let network = AggregationSpec::builder("network", deadline)
            .probe(pids())
            .probe(interfaces())
            .probe(connections())
            .probe(io_counters())
            .probe(conntrack())
            .build()?;

        let sensors = AggregationSpec::builder(
            "sensors",
            Duration::from_millis(config.sensor_deadline_ms),
        )
        .probe(sysinfo_probe(repo, "sensor_temperatures", |r| {
            r.temperatures()
        }))
        .probe(sysinfo_probe(repo, "temperature_stat", |r| r.temperatures()))
        .fail_on_timeout()
        .build()?;

        let gpu_probe = probe::from_async("nvidia_memory", move |_ctx| {
            let gpu = gpu_repo.clone();
            async move { gpu.nvidia_memory().await }
        });

        Ok(Self {
            host: Arc::new(host),
            cpu: Arc::new(cpu),
            memory: Arc::new(memory),
            network: Arc::new(network),
            network_pids: single("network/pids", deadline, pids())?,
            network_interfaces: single("network/interfaces", deadline, interfaces())?,
            network_connections: single("network/connections", deadline, connections())?,
            network_io_counters: single("network/iocounters", deadline, io_counters())?,
            network_conntrack_stats: single("network/conntrackstats", deadline, conntrack())?,
            sensors: Arc::new(sensors),
            gpu: single("gpu", deadline, ProbeEntry::new(gpu_probe))?,
            fan_out: FanOut::new(
                config.fan_out_concurrency,
                Duration::from_millis(config.target_timeout_ms),
            )
            .with_enumeration_timeout(deadline),
            sysinfo_repo,
        })
    }

    /// Mounted partitions with usage; partitions that vanish, hang or deny access are
    /// left out.
    pub async fn disk(&self) -> Result<Vec<PartitionUsage>, AggregateError> {
        let repo = self.sysinfo_repo.clone();
        self.fan_out
            .collect_blocking(
                "disk",
                on_blocking_pool(repo.clone(), |r| r.partitions()),
                move |target: PartitionTarget| repo.partition_usage(target),
            )
            .await
    }

    /// Running processes; processes that exit mid-scan are left out. The socket table
    /// is read once per scan and shared by every process.
    pub async fn processes(&self) -> Result<Vec<ProcessInfo>, AggregateError> {
        let repo = self.sysinfo_repo.clone();
        let enumerate = on_blocking_pool(repo.clone(), |r| {
            let targets = r.processes()?;
            let sockets = match r.socket_table() {
                Ok(table) => Some(Arc::new(table)),
                Err(e) => {
                    tracing::debug!(error = %e, "socket table unavailable, omitting connections");
                    None
                }
            };
            Ok(targets
                .into_iter()
                .map(|t| (t, sockets.clone()))
                .collect::<Vec<_>>())
        });
        self.fan_out
            .collect_blocking(
                "process",
                enumerate,
                move |(target, sockets): (ProcessTarget, Option<Arc<SocketTable>>)| {
                    repo.process_details(target, sockets.as_deref())
                },
            )
            .await
    }
}
