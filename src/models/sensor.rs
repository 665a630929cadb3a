// Sensor and GPU models

use serde::{Deserialize, Serialize};

/// One temperature sensor, in degrees Celsius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureStat {
    pub sensor_key: String,
    pub temperature: Option<f64>,
    pub sensor_high: Option<f64>,
    pub sensor_critical: Option<f64>,
}

/// GPU memory in MiB as reported by nvidia-smi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvResult {
    pub free: u64,
    pub used: u64,
    pub total: u64,
}
