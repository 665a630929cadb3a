// Domain models and the snapshot wire format

mod network;
mod process;
mod sensor;
mod snapshot;
mod storage;
mod system;

pub use network::{Addr, ConnectionStat, ConntrackStat, InterfaceStat, IoCountersStat};
pub use process::{MemoryInfoStat, OpenFileStat, ProcessInfo, ProcessTarget};
pub use sensor::{NvResult, TemperatureStat};
pub use snapshot::{Completeness, ProbeResult, Snapshot, SnapshotEntry};
pub use storage::{BlockIoCounters, PartitionTarget, PartitionUsage};
pub use system::{
    CpuInfoStat, CpuTimesStat, HostInfoStat, SwapMemoryStat, UserStat, VirtualMemoryStat,
};

pub(crate) use system::percent;
