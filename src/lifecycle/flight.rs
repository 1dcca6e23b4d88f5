//! Single-flight gate
//!
//! Serializes attempts at one lifecycle step. Callers that queue up behind
//! an attempt take its outcome instead of starting their own, so N concurrent
//! callers produce one backend invocation and one shared result.

use crate::lifecycle::error::{LifecycleError, Phase};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub(crate) struct SingleFlight {
    phase: Phase,
    /// Outcome of the most recent settled attempt
    gate: Mutex<Option<Result<(), LifecycleError>>>,
    /// Bumped every time an attempt settles
    settled: AtomicU64,
}

impl SingleFlight {
    pub(crate) fn new(phase: Phase) -> Self {
        Self {
            phase,
            gate: Mutex::new(None),
            settled: AtomicU64::new(0),
        }
    }

    /// Run `step` unless an attempt settled while this caller was waiting,
    /// in which case that attempt's outcome is returned.
    ///
    /// Cancelled attempts do not settle: whoever was queued behind one runs
    /// the step itself.
    pub(crate) async fn run<F, Fut>(
        &self,
        cancel: &CancellationToken,
        step: F,
    ) -> Result<(), LifecycleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), LifecycleError>>,
    {
        let seen = self.settled.load(Ordering::Acquire);

        let mut last = tokio::select! {
            guard = self.gate.lock() => guard,
            _ = cancel.cancelled() => return Err(LifecycleError::Cancelled(self.phase)),
        };

        if self.settled.load(Ordering::Acquire) != seen {
            if let Some(outcome) = last.as_ref() {
                tracing::debug!("Joining settled {} attempt", self.phase);
                return outcome.clone();
            }
        }

        let outcome = step().await;
        if !matches!(outcome, Err(LifecycleError::Cancelled(_))) {
            *last = Some(outcome.clone());
            self.settled.fetch_add(1, Ordering::AcqRel);
        }
        outcome
    }
}
