// WebSocket handlers: one stream pump per connection

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{Duration, Instant, timeout};
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::aggregator::{self, AggregationSpec};
use crate::error::AggregateError;
use crate::pump::{Frame, PumpPolicy, Sample, SampleSink, SinkError, StreamSession};

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Write half of a socket. Pings ride along with pushes once the ping interval has passed.
struct WsSink {
    sender: SplitSink<WebSocket, Message>,
    last_ping: Instant,
}

impl WsSink {
    fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sender,
            last_ping: Instant::now(),
        }
    }

    async fn send(&mut self, msg: Message) -> Result<(), SinkError> {
        match timeout(WS_SEND_TIMEOUT, self.sender.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SinkError(e.to_string())),
            Err(_) => Err(SinkError("send timed out".into())),
        }
    }
}

impl<T: serde::Serialize + Sync> SampleSink<T> for WsSink {
    fn push(&mut self, frame: &Frame<T>) -> impl Future<Output = Result<(), SinkError>> + Send {
        let json = serde_json::to_string(frame);
        async move {
            let json = json.map_err(|e| SinkError(format!("encoding frame: {}", e)))?;
            if self.last_ping.elapsed() >= WS_PING_INTERVAL {
                self.send(Message::Ping(Bytes::new())).await?;
                self.last_ping = Instant::now();
            }
            self.send(Message::Text(json.into())).await
        }
    }
}

/// Runs a pump against `socket` until the client leaves or the pump stops on its own.
async fn pump_to_socket<T, F, Fut>(
    socket: WebSocket,
    policy: PumpPolicy,
    label: &'static str,
    mut source: F,
)
where
    T: Sample + Sync + 'static,
    F: FnMut(CancellationToken) -> Fut + Send,
    Fut: Future<Output = Result<T, AggregateError>> + Send,
{
    let (sender, mut receiver) = socket.split();
    let mut session = StreamSession::new(policy);
    let cancel = session.cancel_token();

    // Client frames are ignored; a close or a read error ends the session.
    let reader = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            while let Some(msg) = receiver.next().await {
                if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                    break;
                }
            }
            cancel.cancel();
        }
    });

    tracing::info!("Client connected to {} stream", label);
    let mut sink = WsSink::new(sender);
    let outcome = session.run(|| source(cancel.clone()), &mut sink).await;
    reader.abort();
    let _ = timeout(WS_SEND_TIMEOUT, sink.sender.close()).await;
    tracing::info!(
        stream = label,
        samples = outcome.samples,
        reason = ?outcome.reason,
        "stream closed"
    );
}

fn stream_snapshots(
    ws: WebSocketUpgrade,
    spec: Arc<AggregationSpec>,
    policy: PumpPolicy,
    label: &'static str,
) -> Response {
    ws.on_upgrade(move |socket| {
        pump_to_socket(socket, policy, label, move |cancel| {
            let spec = spec.clone();
            async move { aggregator::collect_cancellable(&spec, &cancel).await }
        })
    })
}

pub(super) async fn ws_cpu(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    stream_snapshots(ws, state.domains.cpu.clone(), state.stream_policy(), "cpu")
}

pub(super) async fn ws_memory(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    stream_snapshots(ws, state.domains.memory.clone(), state.stream_policy(), "memory")
}

pub(super) async fn ws_network(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    stream_snapshots(ws, state.domains.network.clone(), state.stream_policy(), "network")
}

pub(super) async fn ws_network_pids(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let spec = state.domains.network_pids.clone();
    stream_snapshots(ws, spec, state.stream_policy(), "network/pids")
}

pub(super) async fn ws_network_interfaces(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let spec = state.domains.network_interfaces.clone();
    stream_snapshots(ws, spec, state.stream_policy(), "network/interfaces")
}

pub(super) async fn ws_network_connections(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let spec = state.domains.network_connections.clone();
    stream_snapshots(ws, spec, state.stream_policy(), "network/connections")
}

pub(super) async fn ws_network_io_counters(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let spec = state.domains.network_io_counters.clone();
    stream_snapshots(ws, spec, state.strict_stream_policy(), "network/iocounters")
}

pub(super) async fn ws_network_conntrack_stats(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let spec = state.domains.network_conntrack_stats.clone();
    stream_snapshots(ws, spec, state.strict_stream_policy(), "network/conntracksstats")
}

pub(super) async fn ws_sensors(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    stream_snapshots(ws, state.domains.sensors.clone(), state.stream_policy(), "sensors")
}

pub(super) async fn ws_gpu(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    stream_snapshots(ws, state.domains.gpu.clone(), state.stream_policy(), "gpu")
}

pub(super) async fn ws_disk(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let domains = state.domains.clone();
    let policy = state.stream_policy();
    ws.on_upgrade(move |socket| {
        pump_to_socket(socket, policy, "disk", move |_| {
            let domains = domains.clone();
            async move { domains.disk().await }
        })
    })
}

pub(super) async fn ws_process(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let domains = state.domains.clone();
    let policy = state.stream_policy();
    ws.on_upgrade(move |socket| {
        pump_to_socket(socket, policy, "process", move |_| {
            let domains = domains.clone();
            async move { domains.processes().await }
        })
    })
}
