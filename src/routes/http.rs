// GET handlers: version and one-shot metrics

use axum::{Json, extract::State, response::IntoResponse};

use super::AppState;
use crate::aggregator;
use crate::error::AggregateError;
use crate::models::{PartitionUsage, ProcessInfo, Snapshot};
use crate::pump::{CollectSink, Frame, StreamSession};
use crate::version::{NAME, VERSION};

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

pub(super) async fn system(
    State(state): State<AppState>,
) -> Result<Json<Snapshot>, AggregateError> {
    Ok(Json(aggregator::collect(&state.domains.host).await?))
}

pub(super) async fn cpu(State(state): State<AppState>) -> Result<Json<Snapshot>, AggregateError> {
    Ok(Json(aggregator::collect(&state.domains.cpu).await?))
}

pub(super) async fn memory(
    State(state): State<AppState>,
) -> Result<Json<Snapshot>, AggregateError> {
    Ok(Json(aggregator::collect(&state.domains.memory).await?))
}

pub(super) async fn network(
    State(state): State<AppState>,
) -> Result<Json<Snapshot>, AggregateError> {
    Ok(Json(aggregator::collect(&state.domains.network).await?))
}

/// Answers 504 when no temperature arrives within the sensor deadline.
pub(super) async fn sensors(
    State(state): State<AppState>,
) -> Result<Json<Snapshot>, AggregateError> {
    Ok(Json(aggregator::collect(&state.domains.sensors).await?))
}

pub(super) async fn disk(
    State(state): State<AppState>,
) -> Result<Json<Vec<PartitionUsage>>, AggregateError> {
    Ok(Json(state.domains.disk().await?))
}

pub(super) async fn process(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProcessInfo>>, AggregateError> {
    Ok(Json(state.domains.processes().await?))
}

/// GET /metrics/gpu: up to `gpu.sample_cap` samples, one per `gpu.sample_interval_ms`.
pub(super) async fn gpu(State(state): State<AppState>) -> Json<Vec<Frame<Snapshot>>> {
    let spec = &state.domains.gpu;
    let mut session = StreamSession::new(state.gpu_summary_policy());
    let mut sink = CollectSink::default();
    let outcome = session.run(|| aggregator::collect(spec), &mut sink).await;
    tracing::debug!(samples = outcome.samples, reason = ?outcome.reason, "gpu summary done");
    Json(sink.frames)
}
