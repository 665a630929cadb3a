// Per-target fan-out: one bounded task per enumerated sub-target, failures dropped

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Duration, timeout};

use crate::error::{AggregateError, ProbeError};

/// Runs one probe per target with at most `concurrency` in flight. Targets whose
/// probe fails or exceeds `target_timeout` are omitted from the result.
#[derive(Debug, Clone)]
pub struct FanOut {
    concurrency: usize,
    target_timeout: Duration,
    enumeration_timeout: Option<Duration>,
}

impl FanOut {
    pub fn new(concurrency: usize, target_timeout: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            target_timeout,
            enumeration_timeout: None,
        }
    }

    /// Bounds target enumeration; exceeding it is an enumeration failure.
    pub fn with_enumeration_timeout(mut self, limit: Duration) -> Self {
        self.enumeration_timeout = Some(limit);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    async fn enumerate<T, E>(&self, domain: &str, enumerate: E) -> Result<Vec<T>, AggregateError>
    where
        E: Future<Output = Result<Vec<T>, ProbeError>>,
    {
        let listed = match self.enumeration_timeout {
            Some(limit) => timeout(limit, enumerate)
                .await
                .unwrap_or(Err(ProbeError::Timeout)),
            None => enumerate.await,
        };
        listed.map_err(|source| AggregateError::Enumeration {
            domain: domain.to_string(),
            source,
        })
    }

    /// Enumerates the targets of `domain`, then probes each. Enumeration failure is the
    /// only hard error; per-target failures just shrink the result.
    pub async fn collect<T, R, E, F, Fut>(
        &self,
        domain: &str,
        enumerate: E,
        probe: F,
    ) -> Result<Vec<R>, AggregateError>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Future<Output = Result<Vec<T>, ProbeError>>,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ProbeError>> + Send + 'static,
    {
        let targets = self.enumerate(domain, enumerate).await?;
        Ok(self.run(targets, probe).await)
    }

    /// Like [`collect`](Self::collect) for probes that block (procfs reads, statvfs).
    pub async fn collect_blocking<T, R, E, F>(
        &self,
        domain: &str,
        enumerate: E,
        probe: F,
    ) -> Result<Vec<R>, AggregateError>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Future<Output = Result<Vec<T>, ProbeError>>,
        F: Fn(T) -> Result<R, ProbeError> + Send + Sync + 'static,
    {
        let targets = self.enumerate(domain, enumerate).await?;
        Ok(self.run_blocking(targets, probe).await)
    }

    /// Async probes; a timed-out probe is dropped, which releases its slot.
    pub async fn run<T, R, F, Fut>(&self, targets: Vec<T>, probe: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ProbeError>> + Send + 'static,
    {
        self.bounded(targets, move |target, permit| {
            let fut = probe(target);
            async move {
                let _permit = permit;
                fut.await
            }
        })
        .await
    }

    /// Blocking probes on the blocking pool. A timed-out probe cannot be stopped, so it
    /// keeps its slot until it returns; only its result is discarded.
    pub async fn run_blocking<T, R, F>(&self, targets: Vec<T>, probe: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Result<R, ProbeError> + Send + Sync + 'static,
    {
        let probe = Arc::new(probe);
        self.bounded(targets, move |target, permit| {
            let probe = probe.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                probe(target)
            });
            async move {
                handle
                    .await
                    .map_err(|e| ProbeError::Failed(format!("target task join: {}", e)))?
            }
        })
        .await
    }

    /// Results come back in enumeration order. The timeout of a target starts once it
    /// holds a slot.
    async fn bounded<T, R, J, Fut>(&self, targets: Vec<T>, job: J) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        J: Fn(T, OwnedSemaphorePermit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ProbeError>> + Send + 'static,
    {
        let total = targets.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let job = Arc::new(job);
        let mut tasks = JoinSet::new();

        for (idx, target) in targets.into_iter().enumerate() {
            let sem = Arc::clone(&semaphore);
            let job = Arc::clone(&job);
            let limit = self.target_timeout;
            tasks.spawn(async move {
                let Ok(permit) = sem.acquire_owned().await else {
                    return (idx, Err(ProbeError::Cancelled));
                };
                let out = match timeout(limit, job(target, permit)).await {
                    Ok(r) => r,
                    Err(_) => Err(ProbeError::Timeout),
                };
                (idx, out)
            });
        }

        let mut collected: Vec<(usize, R)> = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok(r))) => collected.push((idx, r)),
                Ok((idx, Err(e))) => {
                    tracing::debug!(target_index = idx, error = %e, "target probe dropped");
                }
                Err(e) => {
                    tracing::warn!(error = %e, operation = "join_target", "target task failed");
                }
            }
        }
        collected.sort_unstable_by_key(|(idx, _)| *idx);
        tracing::debug!(targets = total, kept = collected.len(), "fan-out finished");
        collected.into_iter().map(|(_, r)| r).collect()
    }
}
