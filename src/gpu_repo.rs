// GPU memory via the vendor CLI (nvidia-smi)

use tokio::process::Command;
use tracing::instrument;

use crate::error::ProbeError;
use crate::models::NvResult;

const QUERY_ARGS: [&str; 2] = [
    "--query-gpu=memory.free,memory.used,memory.total",
    "--format=csv,noheader,nounits",
];

pub struct GpuRepo {
    command: String,
}

impl GpuRepo {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Memory of every GPU, in nvidia-smi's device order. Dropping the future kills the
    /// child; the runtime reaps it.
    #[instrument(skip(self), fields(repo = "gpu", operation = "nvidia_devices"))]
    pub async fn nvidia_devices(&self) -> Result<Vec<NvResult>, ProbeError> {
        let output = Command::new(&self.command)
            .args(QUERY_ARGS)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProbeError::Unavailable(format!("{} not found", self.command))
                }
                _ => ProbeError::from(e),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }
        parse_nvidia_smi_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// First GPU only.
    pub async fn nvidia_memory(&self) -> Result<NvResult, ProbeError> {
        self.nvidia_devices()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProbeError::Unavailable("no NVIDIA GPU reported".into()))
    }
}

/// Parses `free, used, total` rows (MiB, no units, no header).
pub fn parse_nvidia_smi_output(output: &str) -> Result<Vec<NvResult>, ProbeError> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let [free, used, total] = fields.as_slice() else {
                return Err(ProbeError::Malformed(format!(
                    "expected 3 columns, got {:?}",
                    line
                )));
            };
            let num = |s: &str| {
                s.parse::<u64>()
                    .map_err(|e| ProbeError::Malformed(format!("{:?}: {}", s, e)))
            };
            Ok(NvResult {
                free: num(*free)?,
                used: num(*used)?,
                total: num(*total)?,
            })
        })
        .collect()
}
