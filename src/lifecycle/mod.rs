//! Inference lifecycle management
//!
//! Takes the on-device backend from "not present" to "answering prompts":
//! engine bring-up, model download and activation, then inference. Each
//! expensive step runs at most once per success, concurrent callers share
//! in-flight attempts, and progress is reported through a caller-supplied
//! observer.

mod bootstrap;
pub mod coordinator;
pub mod error;
mod flight;
pub mod notify;
mod provision;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;

use tokio_util::sync::CancellationToken;

pub use coordinator::{LifecycleCoordinator, SELF_TEST_PROMPT};
pub use error::{LifecycleError, Phase};
pub use notify::{ChannelObserver, NoopObserver, StatusObserver};
pub use state::{EngineState, LifecycleSnapshot, ModelState};

/// Race `fut` against `cancel`, preferring cancellation when both are ready
pub(crate) async fn until_cancelled<T, F>(
    cancel: &CancellationToken,
    phase: Phase,
    fut: F,
) -> Result<T, LifecycleError>
where
    F: Future<Output = Result<T, LifecycleError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LifecycleError::Cancelled(phase)),
        result = fut => result,
    }
}
