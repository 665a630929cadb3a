// Shared test helpers

#![allow(dead_code)]

use hostwatch::aggregator::AggregationSpec;
use hostwatch::error::ProbeError;
use hostwatch::probe::{self, ProbeEntry};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Duration;

pub const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "127.0.0.1"

[probes]
deadline_ms = 3000
sensor_deadline_ms = 2000
target_timeout_ms = 1000
fan_out_concurrency = 4
gpu_command = "hostwatch-test-no-such-gpu-tool"

[streaming]
cadence_ms = 50

[gpu]
sample_cap = 2
sample_interval_ms = 10
window_secs = 2
"#;

/// Probe that sleeps `delay`, then returns `outcome`; counts its invocations.
pub struct MockProbe {
    pub calls: Arc<AtomicUsize>,
    pub entry: ProbeEntry,
}

impl MockProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn mock(name: &str, delay_ms: u64, outcome: Result<Value, ProbeError>) -> MockProbe {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let entry = ProbeEntry::new(probe::from_async(name, move |_ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        let outcome = outcome.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            outcome
        }
    }));
    MockProbe { calls, entry }
}

pub fn ok(name: &str, delay_ms: u64, value: Value) -> ProbeEntry {
    mock(name, delay_ms, Ok(value)).entry
}

pub fn failing(name: &str, delay_ms: u64, err: ProbeError) -> ProbeEntry {
    mock(name, delay_ms, Err(err)).entry
}

pub fn spec_of(domain: &str, deadline_ms: u64, entries: Vec<ProbeEntry>) -> AggregationSpec {
    entries
        .into_iter()
        .fold(
            AggregationSpec::builder(domain, Duration::from_millis(deadline_ms)),
            |b, e| b.probe(e),
        )
        .build()
        .unwrap()
}
