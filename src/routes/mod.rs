// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{Router, routing::get};
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::domains::Domains;
use crate::pump::PumpPolicy;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) domains: Arc<Domains>,
    pub(crate) config: AppConfig,
}

impl AppState {
    /// Policy of every /ws/* stream.
    pub(crate) fn stream_policy(&self) -> PumpPolicy {
        PumpPolicy {
            cadence: Duration::from_millis(self.config.streaming.cadence_ms),
            max_samples: self.config.streaming.max_samples,
            ..Default::default()
        }
    }

    /// Streams whose data is useless once the probe breaks close instead of pushing errors.
    pub(crate) fn strict_stream_policy(&self) -> PumpPolicy {
        PumpPolicy {
            stop_on_error: true,
            ..self.stream_policy()
        }
    }

    /// GET /metrics/gpu: a short, capped burst of samples.
    pub(crate) fn gpu_summary_policy(&self) -> PumpPolicy {
        PumpPolicy {
            cadence: Duration::from_millis(self.config.gpu.sample_interval_ms),
            max_samples: Some(self.config.gpu.sample_cap),
            stream_deadline: Some(Duration::from_secs(self.config.gpu.window_secs)),
            stop_on_error: false,
        }
    }
}

pub fn app(domains: Arc<Domains>, config: AppConfig) -> Router {
    let state = AppState { domains, config };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/metrics/system", get(http::system)) // GET /metrics/system
        .route("/metrics/cpu", get(http::cpu)) // GET /metrics/cpu
        .route("/metrics/memory", get(http::memory)) // GET /metrics/memory
        .route("/metrics/disk", get(http::disk)) // GET /metrics/disk
        .route("/metrics/network", get(http::network)) // GET /metrics/network
        .route("/metrics/process", get(http::process)) // GET /metrics/process
        .route("/metrics/sensors", get(http::sensors)) // GET /metrics/sensors
        .route("/metrics/gpu", get(http::gpu)) // GET /metrics/gpu
        .route("/ws/cpu", get(ws::ws_cpu)) // WS /ws/cpu
        .route("/ws/memory", get(ws::ws_memory)) // WS /ws/memory
        .route("/ws/disk", get(ws::ws_disk)) // WS /ws/disk
        .route("/ws/network", get(ws::ws_network)) // WS /ws/network
        .route("/ws/network/pids", get(ws::ws_network_pids))
        .route("/ws/network/interfaces", get(ws::ws_network_interfaces))
        .route("/ws/network/connections", get(ws::ws_network_connections))
        .route("/ws/network/iocounters", get(ws::ws_network_io_counters))
        .route(
            "/ws/network/conntracksstats",
            get(ws::ws_network_conntrack_stats),
        )
        .route("/ws/process", get(ws::ws_process)) // WS /ws/process
        .route("/ws/sensors", get(ws::ws_sensors)) // WS /ws/sensors
        .route("/ws/gpu", get(ws::ws_gpu)) // WS /ws/gpu
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
