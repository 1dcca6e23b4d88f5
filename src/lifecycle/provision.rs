//! Model provisioner
//!
//! Makes sure the registered model's weights are on disk (downloading them
//! when the presence check says otherwise) and then activates them.
//! Every attempt starts with a presence check, so a retry after a failed
//! load goes straight to activation unless the file has gone missing.

use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::inference::InferenceBackend;
use crate::lifecycle::error::{LifecycleError, Phase};
use crate::lifecycle::flight::SingleFlight;
use crate::lifecycle::notify::Notifier;
use crate::lifecycle::state::{EngineState, ModelState, StateCell};
use crate::lifecycle::until_cancelled;
use crate::storage::huggingface::format_size;
use crate::types::ModelDescriptor;

pub(crate) struct Provisioner {
    state: StateCell<ModelState>,
    flight: SingleFlight,
}

impl Provisioner {
    pub(crate) fn new() -> Self {
        Self {
            state: StateCell::new(ModelState::NotFetched),
            flight: SingleFlight::new(Phase::Provisioning),
        }
    }

    pub(crate) fn state(&self) -> ModelState {
        self.state.get()
    }

    pub(crate) fn cell(&self) -> &StateCell<ModelState> {
        &self.state
    }

    pub(crate) async fn ensure_model_ready(
        &self,
        backend: &dyn InferenceBackend,
        engine: EngineState,
        descriptor: &ModelDescriptor,
        notify: Notifier<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        if self.state.get() == ModelState::Active {
            return Ok(());
        }

        let outcome = if engine != EngineState::Ready {
            Err(LifecycleError::EngineBringup(
                "inference engine is not ready".to_string(),
            ))
        } else {
            self.flight
                .run(cancel, || self.provision(backend, descriptor, notify, cancel))
                .await
        };

        match &outcome {
            Err(LifecycleError::Cancelled(phase)) => notify.status(format!("Cancelled: {}", phase)),
            Err(e) => notify.status(format!("Model failed: {}", e.message())),
            Ok(()) => {}
        }
        outcome
    }

    async fn provision(
        &self,
        backend: &dyn InferenceBackend,
        descriptor: &ModelDescriptor,
        notify: Notifier<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        if self.state.get() == ModelState::Active {
            return Ok(());
        }
        let id = descriptor.id.as_str();

        let present = until_cancelled(cancel, Phase::Provisioning, async {
            backend
                .is_model_present(id)
                .await
                .map_err(|e| LifecycleError::ModelDownload(e.message))
        })
        .await;
        let present = match present {
            Ok(present) => present,
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::error!("Presence check for {} failed: {}", id, e);
                    self.state.begin(ModelState::Failed, ModelState::Failed).finish(ModelState::Failed);
                }
                return Err(e);
            }
        };

        let mut transition = if present {
            tracing::info!("Model {} already on disk", id);
            notify.status("Model already downloaded");
            self.state.begin(ModelState::Fetched, ModelState::Fetched)
        } else {
            let mut transition = self.state.begin(ModelState::Fetching, ModelState::NotFetched);
            notify.status(format!(
                "Downloading model (~{})...",
                format_size(descriptor.memory_bytes)
            ));
            tracing::info!("Downloading model {}...", id);

            let tracker = DownloadTracker::new(notify);
            let on_progress = |ratio: f32| tracker.report(ratio);
            let downloaded = until_cancelled(cancel, Phase::Provisioning, async {
                backend
                    .download_model(id, &on_progress)
                    .await
                    .map_err(|e| LifecycleError::ModelDownload(e.message))
            })
            .await;

            match downloaded {
                Ok(()) => {
                    tracker.complete();
                    tracing::info!("Download complete.");
                    transition.advance(ModelState::Fetched, ModelState::Fetched);
                    transition
                }
                Err(e) if e.is_cancelled() => {
                    tracing::warn!("Download of {} cancelled", id);
                    transition.abandon();
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("Download of {} failed: {}", id, e);
                    transition.finish(ModelState::Failed);
                    return Err(e);
                }
            }
        };

        transition.advance(ModelState::Activating, ModelState::Fetched);
        notify.status("Loading model into memory...");
        tracing::info!("Loading model {}...", id);

        let loaded = until_cancelled(cancel, Phase::Provisioning, async {
            backend
                .load_model(id)
                .await
                .map_err(|e| LifecycleError::ModelLoad(e.message))
        })
        .await;

        match loaded {
            Ok(()) => {
                transition.finish(ModelState::Active);
                tracing::info!("Model loaded and ready.");
                notify.status("Model ready");
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                tracing::warn!("Loading {} cancelled", id);
                transition.abandon();
                Err(e)
            }
            Err(e) => {
                tracing::error!("Model preparation failed: {}", e);
                transition.finish(ModelState::Failed);
                Err(e)
            }
        }
    }
}

#[derive(Default)]
struct TrackerState {
    ratio: f32,
    logged_decile: u32,
}

/// Turns raw backend ratios into a non-decreasing percentage stream.
///
/// Every update reaches the observer; only decile crossings are logged.
struct DownloadTracker<'a> {
    notify: Notifier<'a>,
    state: Mutex<TrackerState>,
}

impl<'a> DownloadTracker<'a> {
    fn new(notify: Notifier<'a>) -> Self {
        Self {
            notify,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn report(&self, ratio: f32) {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        let (ratio, pct) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.ratio = state.ratio.max(ratio);
            let pct = (state.ratio * 100.0).round() as u32;
            if pct / 10 > state.logged_decile {
                state.logged_decile = pct / 10;
                tracing::info!("Download progress: {}%", pct);
            }
            (state.ratio, pct)
        };
        self.notify
            .progress(format!("Downloading model... {}%", pct), ratio);
    }

    /// Close the stream at 100% if the backend never said so
    fn complete(&self) {
        let done = self.state.lock().unwrap_or_else(PoisonError::into_inner).ratio >= 1.0;
        if !done {
            self.report(1.0);
        }
    }
}
