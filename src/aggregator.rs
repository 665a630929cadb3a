// Concurrent multi-probe aggregation: fan out one task per probe, fan in under a deadline

use futures_util::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::{AggregateError, ProbeError};
use crate::models::{ProbeResult, Snapshot, SnapshotEntry};
use crate::probe::{ProbeContext, ProbeEntry};

/// The probes one metric domain runs together. Built once at startup.
#[derive(Debug, Clone)]
pub struct AggregationSpec {
    domain: String,
    entries: Vec<ProbeEntry>,
    deadline: Duration,
    required: Option<usize>,
    fail_on_timeout: bool,
}

impl AggregationSpec {
    pub fn builder(domain: impl Into<String>, deadline: Duration) -> AggregationSpecBuilder {
        AggregationSpecBuilder {
            domain: domain.into(),
            entries: Vec::new(),
            deadline,
            required: None,
            fail_on_timeout: false,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn entries(&self) -> &[ProbeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn required(&self) -> Option<&str> {
        self.required.map(|i| self.entries[i].name())
    }

    pub fn fails_on_timeout(&self) -> bool {
        self.fail_on_timeout
    }
}

pub struct AggregationSpecBuilder {
    domain: String,
    entries: Vec<ProbeEntry>,
    deadline: Duration,
    required: Option<String>,
    fail_on_timeout: bool,
}

impl AggregationSpecBuilder {
    pub fn probe(mut self, entry: ProbeEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Failure of this probe aborts the whole aggregation.
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.required = Some(name.into());
        self
    }

    /// Report a snapshot that timed out with nothing collected as a hard error.
    pub fn fail_on_timeout(mut self) -> Self {
        self.fail_on_timeout = true;
        self
    }

    pub fn build(self) -> Result<AggregationSpec, AggregateError> {
        if self.entries.is_empty() {
            return Err(AggregateError::InvalidSpec(format!(
                "{}: at least one probe is required",
                self.domain
            )));
        }
        if self.deadline.is_zero() {
            return Err(AggregateError::InvalidSpec(format!(
                "{}: deadline must be > 0",
                self.domain
            )));
        }
        let mut seen = HashSet::new();
        for e in &self.entries {
            if !seen.insert(e.name()) {
                return Err(AggregateError::InvalidSpec(format!(
                    "{}: duplicate probe name {}",
                    self.domain,
                    e.name()
                )));
            }
        }
        let required = match self.required {
            Some(name) => Some(
                self.entries
                    .iter()
                    .position(|e| e.name() == name)
                    .ok_or_else(|| {
                        AggregateError::InvalidSpec(format!(
                            "{}: required probe {} is not declared",
                            self.domain, name
                        ))
                    })?,
            ),
            None => None,
        };
        Ok(AggregationSpec {
            domain: self.domain,
            entries: self.entries,
            deadline: self.deadline,
            required,
            fail_on_timeout: self.fail_on_timeout,
        })
    }
}

/// Runs every probe of `spec` concurrently and merges whatever arrives before the deadline.
pub async fn collect(spec: &AggregationSpec) -> Result<Snapshot, AggregateError> {
    collect_cancellable(spec, &CancellationToken::new()).await
}

/// Like [`collect`], but stops early (recording `Cancelled`) when `parent` is cancelled.
#[instrument(skip_all, fields(domain = %spec.domain, operation = "collect"))]
pub async fn collect_cancellable(
    spec: &AggregationSpec,
    parent: &CancellationToken,
) -> Result<Snapshot, AggregateError> {
    let started = Instant::now();
    let deadline = started + spec.deadline;
    let cancel = parent.child_token();

    let mut tasks = JoinSet::new();
    for (idx, entry) in spec.entries.iter().enumerate() {
        // Only a per-probe limit tighter than the overall deadline gets its own timer;
        // the overall deadline is enforced by the merge loop.
        let own_limit = entry
            .timeout
            .map(|t| started + t)
            .filter(|limit| *limit < deadline);
        let ctx = ProbeContext::new(own_limit.unwrap_or(deadline), cancel.child_token());
        let token = ctx.cancel.clone();
        let fut = entry.probe.run(ctx);
        tasks.spawn(async move {
            let out = tokio::select! {
                r = AssertUnwindSafe(fut).catch_unwind() => {
                    r.unwrap_or_else(|_| Err(ProbeError::Failed("probe panicked".into())))
                }
                _ = until(own_limit) => Err(ProbeError::Timeout),
                _ = token.cancelled() => Err(ProbeError::Cancelled),
            };
            (idx, out)
        });
    }

    // Single writer: only this loop touches `results`.
    let mut results: Vec<Option<ProbeResult>> = vec![None; spec.entries.len()];
    let mut arrived = 0usize;
    let mut deadline_hit = false;
    let overall = sleep_until(deadline);
    tokio::pin!(overall);

    let merged: Result<(), AggregateError> = loop {
        tokio::select! {
            biased;
            joined = tasks.join_next() => match joined {
                None => break Ok(()),
                Some(Ok((idx, out))) => {
                    arrived += 1;
                    if let Err(e) = &out {
                        tracing::debug!(probe = spec.entries[idx].name(), error = %e, "probe failed");
                        if spec.required == Some(idx) {
                            break Err(AggregateError::RequiredProbe {
                                domain: spec.domain.clone(),
                                probe: spec.entries[idx].name().to_string(),
                                source: e.clone(),
                            });
                        }
                    }
                    results[idx] = Some(out.into());
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, operation = "join_probe", "probe task aborted");
                }
            },
            _ = &mut overall => {
                deadline_hit = true;
                break Ok(());
            }
            _ = parent.cancelled() => break Ok(()),
        }
    };

    // Anything still running is abandoned: cancel it and join before returning.
    cancel.cancel();
    tasks.shutdown().await;
    merged?;

    let timed_out = deadline_hit && arrived == 0;
    if timed_out && spec.fail_on_timeout {
        return Err(AggregateError::Timeout {
            domain: spec.domain.clone(),
        });
    }
    let missing = if deadline_hit {
        ProbeError::Timeout
    } else {
        ProbeError::Cancelled
    };
    if let Some(idx) = spec.required
        && results[idx].is_none()
    {
        return Err(AggregateError::RequiredProbe {
            domain: spec.domain.clone(),
            probe: spec.entries[idx].name().to_string(),
            source: missing,
        });
    }

    let entries = spec
        .entries
        .iter()
        .zip(results)
        .map(|(entry, result)| SnapshotEntry {
            name: entry.name().to_string(),
            result: result.unwrap_or_else(|| {
                ProbeResult::from(Err::<serde_json::Value, _>(missing.clone()))
            }),
            flatten: entry.flatten,
        })
        .collect();
    let snapshot = Snapshot::new(spec.domain.clone(), entries, timed_out);
    tracing::debug!(
        completeness = ?snapshot.completeness(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "aggregation finished"
    );
    Ok(snapshot)
}

async fn until(limit: Option<Instant>) {
    match limit {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
