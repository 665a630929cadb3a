// Stream pump: cadence, sample cap, drain, cancellation, sink failure

mod common;

use common::{failing, mock, ok, spec_of};
use hostwatch::aggregator::{self, AggregationSpec};
use hostwatch::error::{AggregateError, ProbeError};
use hostwatch::models::Snapshot;
use hostwatch::pump::{
    CollectSink, Frame, PumpPolicy, PumpState, SampleSink, SinkError, StopReason, StreamSession,
};
use futures_util::future::BoxFuture;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, Instant};

/// Accepts `remaining` frames, then reports the consumer as gone.
struct FailAfter {
    remaining: usize,
    pushed: usize,
}

impl<T: Sync> SampleSink<T> for FailAfter {
    fn push(&mut self, _frame: &Frame<T>) -> impl Future<Output = Result<(), SinkError>> + Send {
        let result = if self.remaining == 0 {
            Err(SinkError("connection reset".into()))
        } else {
            self.remaining -= 1;
            self.pushed += 1;
            Ok(())
        };
        std::future::ready(result)
    }
}

fn counting_source(
    calls: &Arc<AtomicUsize>,
    delay_ms: u64,
) -> impl FnMut() -> BoxFuture<'static, Result<Vec<usize>, AggregateError>> {
    let calls = calls.clone();
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(vec![n])
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_stops_source_invocations() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut session = StreamSession::new(PumpPolicy {
        cadence: Duration::from_millis(100),
        ..Default::default()
    });
    let mut sink = FailAfter {
        remaining: 3,
        pushed: 0,
    };
    let outcome = session.run(counting_source(&calls, 5), &mut sink).await;
    assert!(matches!(outcome.reason, StopReason::SinkClosed(_)));
    assert_eq!(outcome.samples, 3);
    assert_eq!(sink.pushed, 3);
    // The fourth sample was produced but could not be delivered; nothing after it.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(session.state(), PumpState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_sample_cap_and_cadence() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut session = StreamSession::new(PumpPolicy {
        cadence: Duration::from_millis(100),
        max_samples: Some(3),
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    let start = Instant::now();
    let outcome = session.run(counting_source(&calls, 0), &mut sink).await;
    assert_eq!(outcome.reason, StopReason::SampleCap);
    assert_eq!(sink.frames.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Two cadence waits between three samples, none after the last.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(300));
    let values: Vec<usize> = sink
        .frames
        .iter()
        .filter_map(|f| f.sample())
        .map(|s| s[0])
        .collect();
    assert_eq!(values, vec![0, 1, 2]);
    assert_eq!(session.last_sample(), Some(&vec![2]));
}

#[tokio::test(start_paused = true)]
async fn test_zero_cadence_runs_back_to_back() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut session = StreamSession::new(PumpPolicy {
        max_samples: Some(5),
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    let start = Instant::now();
    session.run(counting_source(&calls, 20), &mut sink).await;
    // Throttled only by the source's own latency.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(110));
    assert_eq!(sink.frames.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_stream_deadline_delivers_in_flight_sample() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut session = StreamSession::new(PumpPolicy {
        stream_deadline: Some(Duration::from_millis(400)),
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    let start = Instant::now();
    let outcome = session.run(counting_source(&calls, 150), &mut sink).await;
    assert_eq!(outcome.reason, StopReason::Deadline);
    // Iterations start at 0, 150 and 300ms; the third is in flight at 400ms and still lands.
    assert_eq!(sink.frames.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(450));
    assert!(elapsed < Duration::from_millis(460));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_the_stream() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut session = StreamSession::new(PumpPolicy {
        cadence: Duration::from_millis(100),
        ..Default::default()
    });
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
    });
    let mut sink = CollectSink::default();
    let start = Instant::now();
    let outcome = session.run(counting_source(&calls, 0), &mut sink).await;
    assert_eq!(outcome.reason, StopReason::Cancelled);
    assert!(start.elapsed() < Duration::from_millis(260));
    assert_eq!(sink.frames.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_soft_error_is_pushed_as_error_frame() {
    let spec = AggregationSpec::builder("cpu", Duration::from_secs(1))
        .probe(failing("cpu_info", 5, ProbeError::Failed("no cpus".into())))
        .required("cpu_info")
        .build()
        .unwrap();
    let mut session = StreamSession::<Snapshot>::new(PumpPolicy {
        max_samples: Some(2),
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    let outcome = session.run(|| aggregator::collect(&spec), &mut sink).await;
    assert_eq!(outcome.reason, StopReason::SampleCap);
    assert_eq!(sink.frames.len(), 2);
    let rendered = serde_json::to_value(&sink.frames[0]).unwrap();
    assert!(rendered["error"].as_str().unwrap().contains("cpu_info"));
    assert!(session.last_sample().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stop_on_error_terminates_on_empty_snapshot() {
    let probe = mock("io_counters", 5, Err(ProbeError::Unavailable("gone".into())));
    let spec = spec_of("network/iocounters", 1000, vec![probe.entry.clone()]);
    let mut session = StreamSession::<Snapshot>::new(PumpPolicy {
        cadence: Duration::from_millis(10),
        stop_on_error: true,
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    let outcome = session.run(|| aggregator::collect(&spec), &mut sink).await;
    assert!(matches!(outcome.reason, StopReason::SourceFailed(_)));
    assert!(sink.frames.is_empty());
    assert_eq!(probe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_snapshots_are_still_pushed_by_default() {
    let spec = spec_of(
        "network",
        1000,
        vec![
            ok("pids", 5, json!([1])),
            failing("conntrack_stats", 5, ProbeError::Unavailable("n/a".into())),
        ],
    );
    let mut session = StreamSession::<Snapshot>::new(PumpPolicy {
        max_samples: Some(2),
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    session.run(|| aggregator::collect(&spec), &mut sink).await;
    assert_eq!(sink.frames.len(), 2);
    let rendered = serde_json::to_value(&sink.frames[1]).unwrap();
    assert_eq!(rendered["pids"], json!([1]));
    assert!(rendered["conntrack_stats"].is_null());
    assert_eq!(rendered["completeness"], "partial");
}

#[tokio::test(start_paused = true)]
async fn test_terminal_error_stops_without_push() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut session = StreamSession::<Vec<u32>>::new(PumpPolicy::default());
    let mut sink = CollectSink::default();
    let outcome = session
        .run(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(AggregateError::Enumeration {
                        domain: "process".into(),
                        source: ProbeError::PermissionDenied("/proc".into()),
                    })
                }
            },
            &mut sink,
        )
        .await;
    assert!(matches!(outcome.reason, StopReason::SourceFailed(_)));
    assert!(sink.frames.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_iterations_never_overlap() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut session = StreamSession::<Vec<u32>>::new(PumpPolicy {
        max_samples: Some(4),
        ..Default::default()
    });
    let mut sink = CollectSink::default();
    session
        .run(
            || {
                let (f, p) = (in_flight.clone(), peak.clone());
                async move {
                    let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    f.fetch_sub(1, Ordering::SeqCst);
                    Ok(vec![1])
                }
            },
            &mut sink,
        )
        .await;
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[test]
fn test_new_session_is_idle() {
    let session = StreamSession::<Vec<u32>>::new(PumpPolicy::default());
    assert_eq!(session.state(), PumpState::Idle);
    assert_eq!(session.samples(), 0);
    assert!(!session.policy().stop_on_error);
}
