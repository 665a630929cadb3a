use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub probes: ProbesConfig,
    pub streaming: StreamingConfig,
    pub gpu: GpuConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    33551
}

fn default_host() -> String {
    "0.0.0.0".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbesConfig {
    /// Overall deadline of one aggregation.
    pub deadline_ms: u64,
    /// Sensors use a stricter deadline and answer 504 when nothing arrives in time.
    pub sensor_deadline_ms: u64,
    /// Limit for one per-process / per-partition probe.
    pub target_timeout_ms: u64,
    /// Max per-target probes in flight.
    pub fan_out_concurrency: usize,
    #[serde(default = "default_gpu_command")]
    pub gpu_command: String,
}

fn default_gpu_command() -> String {
    "nvidia-smi".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    /// Delay between pushes on /ws/*; 0 pushes back-to-back.
    pub cadence_ms: u64,
    /// Close streams after this many frames (unbounded when absent).
    #[serde(default)]
    pub max_samples: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpuConfig {
    /// Samples gathered by one GET /metrics/gpu.
    pub sample_cap: usize,
    pub sample_interval_ms: u64,
    /// Upper bound on how long GET /metrics/gpu keeps sampling.
    pub window_secs: u64,
}

impl AppConfig {
    /// Reads `CONFIG_FILE` (default `config.toml`); `PORT` overrides `server.port`.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let mut config = Self::load_from_path(&path)?;
        config.apply_port_override(std::env::var("PORT").ok().as_deref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_port_override(&mut self, port: Option<&str>) -> anyhow::Result<()> {
        if let Some(p) = port.filter(|p| !p.is_empty()) {
            self.server.port = p
                .parse()
                .map_err(|e| anyhow::anyhow!("PORT must be a port number, got {:?}: {}", p, e))?;
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(!self.server.host.is_empty(), "server.host must be non-empty");
        anyhow::ensure!(
            self.probes.deadline_ms > 0,
            "probes.deadline_ms must be > 0, got {}",
            self.probes.deadline_ms
        );
        anyhow::ensure!(
            self.probes.sensor_deadline_ms > 0,
            "probes.sensor_deadline_ms must be > 0, got {}",
            self.probes.sensor_deadline_ms
        );
        anyhow::ensure!(
            self.probes.target_timeout_ms > 0,
            "probes.target_timeout_ms must be > 0, got {}",
            self.probes.target_timeout_ms
        );
        anyhow::ensure!(
            self.probes.fan_out_concurrency > 0,
            "probes.fan_out_concurrency must be > 0, got {}",
            self.probes.fan_out_concurrency
        );
        anyhow::ensure!(
            !self.probes.gpu_command.is_empty(),
            "probes.gpu_command must be non-empty"
        );
        if let Some(max) = self.streaming.max_samples {
            anyhow::ensure!(max > 0, "streaming.max_samples must be > 0, got {}", max);
        }
        anyhow::ensure!(
            self.gpu.sample_cap > 0,
            "gpu.sample_cap must be > 0, got {}",
            self.gpu.sample_cap
        );
        anyhow::ensure!(
            self.gpu.sample_interval_ms > 0,
            "gpu.sample_interval_ms must be > 0, got {}",
            self.gpu.sample_interval_ms
        );
        anyhow::ensure!(
            self.gpu.window_secs > 0,
            "gpu.window_secs must be > 0, got {}",
            self.gpu.window_secs
        );
        Ok(())
    }
}
