// Per-target fan-out: bounded concurrency, lossy per-target failures

use hostwatch::error::{AggregateError, ProbeError};
use hostwatch::fan_out::FanOut;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Duration;

fn fan_out(concurrency: usize) -> FanOut {
    FanOut::new(concurrency, Duration::from_millis(500))
}

#[tokio::test(start_paused = true)]
async fn test_failed_targets_are_dropped() {
    let partitions = vec!["/", "/home", "/boot"];
    let result = fan_out(4)
        .collect(
            "disk",
            async { Ok(partitions) },
            |mount: &'static str| async move {
                if mount == "/home" {
                    Err(ProbeError::PermissionDenied(mount.into()))
                } else {
                    Ok(format!("usage of {}", mount))
                }
            },
        )
        .await
        .unwrap();
    assert_eq!(result, vec!["usage of /", "usage of /boot"]);
}

#[tokio::test(start_paused = true)]
async fn test_results_keep_enumeration_order() {
    let targets: Vec<u64> = (0..10).collect();
    let result = fan_out(3)
        .run(targets, |n| async move {
            // Later targets finish first.
            tokio::time::sleep(Duration::from_millis(100 - n * 10)).await;
            if n % 3 == 0 {
                Err(ProbeError::Unavailable(format!("{}", n)))
            } else {
                Ok(n)
            }
        })
        .await;
    assert_eq!(result, vec![1, 2, 4, 5, 7, 8]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_target_is_dropped_after_timeout() {
    let result = fan_out(2)
        .run(vec![10u64, 10_000, 20], |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, ProbeError>(ms)
        })
        .await;
    assert_eq!(result, vec![10, 20]);
}

#[tokio::test(start_paused = true)]
async fn test_enumeration_failure_is_hard_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let err = fan_out(4)
        .collect(
            "process",
            async { Err::<Vec<u32>, _>(ProbeError::PermissionDenied("/proc".into())) },
            move |pid| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, ProbeError>(pid) }
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AggregateError::Enumeration { .. }));
    assert!(err.is_terminal());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_capped() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (f, p) = (in_flight.clone(), peak.clone());
    let result = fan_out(3)
        .run((0..12).collect::<Vec<u32>>(), move |n| {
            let (f, p) = (f.clone(), p.clone());
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                f.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ProbeError>(n)
            }
        })
        .await;
    assert_eq!(result.len(), 12);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_no_targets_yields_empty_list() {
    let result = fan_out(1)
        .run(Vec::<u32>::new(), |n| async move { Ok::<_, ProbeError>(n) })
        .await;
    assert!(result.is_empty());
}

#[test]
fn test_concurrency_is_at_least_one() {
    assert_eq!(FanOut::new(0, Duration::from_secs(1)).concurrency(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_blocking_targets_keep_their_slot() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (f, p) = (in_flight.clone(), peak.clone());
    let result = FanOut::new(2, Duration::from_millis(20))
        .run_blocking((0..8).collect::<Vec<u32>>(), move |n| {
            let now = f.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(100));
            f.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, ProbeError>(n)
        })
        .await;
    assert!(result.is_empty());
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_blocking_targets_keep_enumeration_order() {
    let result = fan_out(4)
        .collect_blocking(
            "disk",
            async { Ok(vec!["/", "/srv", "/boot"]) },
            |mount: &'static str| {
                if mount == "/srv" {
                    Err(ProbeError::Unavailable(mount.into()))
                } else {
                    Ok(mount.len())
                }
            },
        )
        .await
        .unwrap();
    assert_eq!(result, vec![1, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_hung_enumeration_times_out() {
    let err = fan_out(4)
        .with_enumeration_timeout(Duration::from_millis(300))
        .collect(
            "disk",
            std::future::pending::<Result<Vec<u32>, ProbeError>>(),
            |n| async move { Ok::<_, ProbeError>(n) },
        )
        .await
        .unwrap_err();
    match err {
        AggregateError::Enumeration { domain, source } => {
            assert_eq!(domain, "disk");
            assert_eq!(source, ProbeError::Timeout);
        }
        other => panic!("expected enumeration error, got {:?}", other),
    }
}
