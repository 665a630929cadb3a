// Stream pump: repeat a one-shot collection on a cadence and push each result downstream

use serde::Serialize;
use std::future::Future;
use tokio::time::{Duration, Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::AggregateError;
use crate::models::Snapshot;

/// Something the pump can push. Unusable samples stop pumps that run with `stop_on_error`.
pub trait Sample: Serialize + Clone + Send {
    fn is_usable(&self) -> bool {
        true
    }
}

impl Sample for Snapshot {
    fn is_usable(&self) -> bool {
        self.has_data()
    }
}

impl<T: Serialize + Clone + Send> Sample for Vec<T> {}

/// One pushed message: a sample, or the message of a non-terminal aggregate error.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Frame<T> {
    Sample(T),
    Error { error: String },
}

impl<T> Frame<T> {
    pub fn sample(&self) -> Option<&T> {
        match self {
            Frame::Sample(s) => Some(s),
            Frame::Error { .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("sink closed: {0}")]
pub struct SinkError(pub String);

/// Downstream consumer of pump frames (a WebSocket, or a buffer for capped summaries).
pub trait SampleSink<T> {
    fn push(&mut self, frame: &Frame<T>) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Collects frames in memory; used for capped one-shot summaries.
#[derive(Debug)]
pub struct CollectSink<T> {
    pub frames: Vec<Frame<T>>,
}

impl<T> Default for CollectSink<T> {
    fn default() -> Self {
        Self { frames: Vec::new() }
    }
}

impl<T: Clone + Send + Sync> SampleSink<T> for CollectSink<T> {
    fn push(&mut self, frame: &Frame<T>) -> impl Future<Output = Result<(), SinkError>> + Send {
        self.frames.push(frame.clone());
        std::future::ready(Ok(()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PumpPolicy {
    /// Delay between iterations; zero runs back-to-back, throttled only by probe latency.
    pub cadence: Duration,
    /// Stop after this many pushed frames.
    pub max_samples: Option<usize>,
    /// Stop launching iterations after this long; the in-flight one is still delivered.
    pub stream_deadline: Option<Duration>,
    /// Terminate on any aggregate error or unusable sample instead of pushing it.
    pub stop_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpState {
    Idle,
    Running,
    Draining,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The downstream write failed; the consumer is gone.
    SinkClosed(String),
    /// The source failed in a way no later iteration can recover from.
    SourceFailed(String),
    SampleCap,
    Deadline,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpOutcome {
    pub samples: usize,
    pub reason: StopReason,
}

/// Per-connection pump state. Created when a stream starts, dropped on disconnect.
#[derive(Debug)]
pub struct StreamSession<T> {
    policy: PumpPolicy,
    cancel: CancellationToken,
    state: PumpState,
    last: Option<T>,
    samples: usize,
}

impl<T: Sample> StreamSession<T> {
    pub fn new(policy: PumpPolicy) -> Self {
        Self::with_cancel(policy, CancellationToken::new())
    }

    pub fn with_cancel(policy: PumpPolicy, cancel: CancellationToken) -> Self {
        Self {
            policy,
            cancel,
            state: PumpState::Idle,
            last: None,
            samples: 0,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    /// Last sample that carried data.
    pub fn last_sample(&self) -> Option<&T> {
        self.last.as_ref()
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn policy(&self) -> &PumpPolicy {
        &self.policy
    }

    fn stop(&mut self, reason: StopReason) -> PumpOutcome {
        self.state = PumpState::Terminated;
        PumpOutcome {
            samples: self.samples,
            reason,
        }
    }

    /// Drives `source` until the sink closes, the source fails terminally, the sample cap
    /// or stream deadline is reached, or the session is cancelled. Iterations never overlap.
    pub async fn run<F, Fut, S>(&mut self, mut source: F, sink: &mut S) -> PumpOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AggregateError>>,
        S: SampleSink<T>,
    {
        let cancel = self.cancel.clone();
        let deadline = self.policy.stream_deadline.map(|d| Instant::now() + d);
        self.state = PumpState::Running;

        loop {
            if cancel.is_cancelled() {
                return self.stop(StopReason::Cancelled);
            }
            if self.state == PumpState::Draining || deadline.is_some_and(|d| Instant::now() >= d)
            {
                self.state = PumpState::Draining;
                return self.stop(StopReason::Deadline);
            }

            let fut = source();
            tokio::pin!(fut);
            let produced = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return self.stop(StopReason::Cancelled),
                    r = &mut fut => break r,
                    _ = until(deadline), if self.state == PumpState::Running => {
                        self.state = PumpState::Draining;
                    }
                }
            };

            let frame = match produced {
                Ok(sample) => {
                    if sample.is_usable() {
                        self.last = Some(sample.clone());
                    } else if self.policy.stop_on_error {
                        return self.stop(StopReason::SourceFailed("no probe produced data".into()));
                    }
                    Frame::Sample(sample)
                }
                Err(e) if e.is_terminal() || self.policy.stop_on_error => {
                    return self.stop(StopReason::SourceFailed(e.to_string()));
                }
                Err(e) => Frame::Error {
                    error: e.to_string(),
                },
            };

            if let Err(e) = sink.push(&frame).await {
                return self.stop(StopReason::SinkClosed(e.0));
            }
            self.samples += 1;

            if self.policy.max_samples.is_some_and(|max| self.samples >= max) {
                return self.stop(StopReason::SampleCap);
            }
            if self.state == PumpState::Draining {
                return self.stop(StopReason::Deadline);
            }

            if self.policy.cadence.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => return self.stop(StopReason::Cancelled),
                _ = sleep(self.policy.cadence) => {}
                _ = until(deadline) => {
                    self.state = PumpState::Draining;
                    return self.stop(StopReason::Deadline);
                }
            }
        }
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}
