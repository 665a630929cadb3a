// Config loading and validation tests

use hostwatch::config::AppConfig;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[probes]
deadline_ms = 2000
sensor_deadline_ms = 1000
target_timeout_ms = 500
fan_out_concurrency = 16
gpu_command = "/usr/bin/nvidia-smi"

[streaming]
cadence_ms = 1000
max_samples = 600

[gpu]
sample_cap = 5
sample_interval_ms = 1000
window_secs = 5
"#;

fn rejects(from: &str, to: &str, field: &str) {
    let bad = VALID_CONFIG.replace(from, to);
    assert_ne!(bad, VALID_CONFIG, "replacement {:?} did not apply", from);
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(
        err.to_string().contains(field),
        "expected {:?} in {:?}",
        field,
        err.to_string()
    );
}

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.probes.deadline_ms, 2000);
    assert_eq!(config.probes.fan_out_concurrency, 16);
    assert_eq!(config.probes.gpu_command, "/usr/bin/nvidia-smi");
    assert_eq!(config.streaming.max_samples, Some(600));
    assert_eq!(config.gpu.sample_cap, 5);
}

#[test]
fn test_config_defaults_when_omitted() {
    let minimal = VALID_CONFIG
        .replace("port = 8081\n", "")
        .replace("host = \"0.0.0.0\"\n", "")
        .replace("gpu_command = \"/usr/bin/nvidia-smi\"\n", "")
        .replace("max_samples = 600\n", "");
    let config = AppConfig::load_from_str(&minimal).expect("defaults");
    assert_eq!(config.server.port, 33551);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.probes.gpu_command, "nvidia-smi");
    assert_eq!(config.streaming.max_samples, None);
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    rejects("port = 8081", "port = 0", "server.port");
}

#[test]
fn test_config_validation_rejects_zero_deadlines() {
    rejects("deadline_ms = 2000", "deadline_ms = 0", "probes.deadline_ms");
    rejects(
        "sensor_deadline_ms = 1000",
        "sensor_deadline_ms = 0",
        "sensor_deadline_ms",
    );
    rejects(
        "target_timeout_ms = 500",
        "target_timeout_ms = 0",
        "target_timeout_ms",
    );
}

#[test]
fn test_config_validation_rejects_zero_concurrency() {
    rejects(
        "fan_out_concurrency = 16",
        "fan_out_concurrency = 0",
        "fan_out_concurrency",
    );
}

#[test]
fn test_config_validation_rejects_empty_gpu_command() {
    rejects(
        "gpu_command = \"/usr/bin/nvidia-smi\"",
        "gpu_command = \"\"",
        "gpu_command",
    );
}

#[test]
fn test_config_validation_rejects_zero_max_samples() {
    rejects("max_samples = 600", "max_samples = 0", "streaming.max_samples");
}

#[test]
fn test_config_validation_rejects_gpu_zeros() {
    rejects("sample_cap = 5", "sample_cap = 0", "gpu.sample_cap");
    rejects(
        "sample_interval_ms = 1000",
        "sample_interval_ms = 0",
        "gpu.sample_interval_ms",
    );
    rejects("window_secs = 5", "window_secs = 0", "gpu.window_secs");
}

#[test]
fn test_zero_cadence_is_allowed() {
    let back_to_back = VALID_CONFIG.replace("cadence_ms = 1000", "cadence_ms = 0");
    let config = AppConfig::load_from_str(&back_to_back).expect("zero cadence");
    assert_eq!(config.streaming.cadence_ms, 0);
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_port_override() {
    let mut config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    config.apply_port_override(Some("9000")).unwrap();
    assert_eq!(config.server.port, 9000);
    config.apply_port_override(None).unwrap();
    config.apply_port_override(Some("")).unwrap();
    assert_eq!(config.server.port, 9000);
    let err = config.apply_port_override(Some("http")).unwrap_err();
    assert!(err.to_string().contains("PORT"));
}

#[test]
fn test_config_load_from_path() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    let config = AppConfig::load_from_path(&path).expect("load from file");
    assert_eq!(config.server.port, 8081);
}

#[test]
fn test_config_load_from_missing_path() {
    let dir = tempfile::TempDir::new().unwrap();
    let err = AppConfig::load_from_path(dir.path().join("nope.toml")).unwrap_err();
    assert!(err.to_string().contains("nope.toml"));
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.probes.sensor_deadline_ms, 1000);
}

#[test]
fn test_repo_config_file_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml");
    AppConfig::load_from_path(path).expect("shipped config.toml");
}
