// Probe interface: one blocking measurement behind an async, cancellable boundary

use futures_util::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::ProbeError;

/// Value produced by a probe run. Payloads are opaque to the aggregator.
pub type ProbeOutput = Result<serde_json::Value, ProbeError>;

/// Deadline and cancellation handed to every probe invocation.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl ProbeContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// Context with no caller-imposed limit beyond `budget`.
    pub fn with_budget(budget: Duration) -> Self {
        Self::new(Instant::now() + budget, CancellationToken::new())
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A named measurement. `run` may block on a syscall or a child process; dropping the
/// returned future must release whatever it holds (subprocess probes use `kill_on_drop`).
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, ctx: ProbeContext) -> BoxFuture<'static, ProbeOutput>;
}

type ProbeFn = dyn Fn(ProbeContext) -> BoxFuture<'static, ProbeOutput> + Send + Sync;

/// Probe backed by a closure.
pub struct FnProbe {
    name: String,
    f: Box<ProbeFn>,
}

impl Probe for FnProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: ProbeContext) -> BoxFuture<'static, ProbeOutput> {
        (self.f)(ctx)
    }
}

/// Wraps an async measurement whose typed result is serialized into the payload.
pub fn from_async<F, Fut, T>(name: impl Into<String>, f: F) -> Arc<dyn Probe>
where
    F: Fn(ProbeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ProbeError>> + Send + 'static,
    T: Serialize,
{
    Arc::new(FnProbe {
        name: name.into(),
        f: Box::new(move |ctx| {
            let fut = f(ctx);
            Box::pin(async move {
                let value = fut.await?;
                Ok(serde_json::to_value(value)?)
            })
        }),
    })
}

/// Wraps a blocking measurement; it runs on the blocking pool. If the caller stops
/// waiting, the closure still runs to completion and its result is discarded.
pub fn blocking<F, T>(name: impl Into<String>, f: F) -> Arc<dyn Probe>
where
    F: Fn() -> Result<T, ProbeError> + Send + Sync + 'static,
    T: Serialize + Send + 'static,
{
    let f = Arc::new(f);
    from_async(name, move |_ctx| {
        let f = f.clone();
        async move {
            tokio::task::spawn_blocking(move || f())
                .await
                .map_err(|e| ProbeError::Failed(format!("probe task join: {}", e)))?
        }
    })
}

/// A probe as declared in an [`AggregationSpec`](crate::aggregator::AggregationSpec).
#[derive(Clone)]
pub struct ProbeEntry {
    pub(crate) probe: Arc<dyn Probe>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) flatten: bool,
}

impl ProbeEntry {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            timeout: None,
            flatten: false,
        }
    }

    /// Per-probe limit; the tighter of this and the overall deadline applies.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Render an object payload's fields at the top level of the snapshot JSON.
    pub fn flattened(mut self) -> Self {
        self.flatten = true;
        self
    }

    pub fn name(&self) -> &str {
        self.probe.name()
    }

    pub fn probe(&self) -> &Arc<dyn Probe> {
        &self.probe
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl std::fmt::Debug for ProbeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeEntry")
            .field("name", &self.name())
            .field("timeout", &self.timeout)
            .field("flatten", &self.flatten)
            .finish()
    }
}
