//! Engine bootstrapper
//!
//! Brings the backend online, registers the execution provider and the
//! model catalog entry. Runs at most once per success.

use tokio_util::sync::CancellationToken;

use crate::inference::{BackendError, InferenceBackend};
use crate::lifecycle::error::{LifecycleError, Phase};
use crate::lifecycle::flight::SingleFlight;
use crate::lifecycle::notify::Notifier;
use crate::lifecycle::state::{EngineState, StateCell};
use crate::lifecycle::until_cancelled;
use crate::types::ModelDescriptor;

pub(crate) struct Bootstrapper {
    state: StateCell<EngineState>,
    flight: SingleFlight,
}

impl Bootstrapper {
    pub(crate) fn new() -> Self {
        Self {
            state: StateCell::new(EngineState::Uninitialized),
            flight: SingleFlight::new(Phase::Bootstrap),
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        self.state.get()
    }

    pub(crate) fn cell(&self) -> &StateCell<EngineState> {
        &self.state
    }

    pub(crate) async fn ensure_engine_ready(
        &self,
        backend: &dyn InferenceBackend,
        descriptor: &ModelDescriptor,
        notify: Notifier<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        if self.state.get() == EngineState::Ready {
            return Ok(());
        }

        let outcome = self
            .flight
            .run(cancel, || self.bring_up(backend, descriptor, notify, cancel))
            .await;

        match &outcome {
            Err(LifecycleError::Cancelled(phase)) => notify.status(format!("Cancelled: {}", phase)),
            Err(e) => notify.status(format!("Init failed: {}", e.message())),
            Ok(()) => {}
        }
        outcome
    }

    async fn bring_up(
        &self,
        backend: &dyn InferenceBackend,
        descriptor: &ModelDescriptor,
        notify: Notifier<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        if self.state.get() == EngineState::Ready {
            return Ok(());
        }

        let transition = self
            .state
            .begin(EngineState::Initializing, EngineState::Uninitialized);
        notify.status("Initializing SDK...");
        tracing::info!("Initializing inference engine...");

        let steps = async {
            backend.initialize_environment().await?;
            notify.status("Registering execution provider...");
            backend.register_execution_provider().await?;
            notify.status("Registering model...");
            backend.register_model(descriptor).await?;
            Ok::<(), BackendError>(())
        };
        let result = until_cancelled(cancel, Phase::Bootstrap, async {
            steps
                .await
                .map_err(|e| LifecycleError::EngineBringup(e.message))
        })
        .await;

        match result {
            Ok(()) => {
                transition.finish(EngineState::Ready);
                tracing::info!("Inference engine ready, registered {}", descriptor.id);
                notify.status("SDK ready");
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                tracing::warn!("Engine bring-up cancelled");
                transition.abandon();
                Err(e)
            }
            Err(e) => {
                tracing::error!("Initialization failed: {}", e);
                transition.finish(EngineState::Failed);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::notify::NoopObserver;
    use crate::lifecycle::testing::{Call, ScriptedBackend};

    #[tokio::test]
    async fn test_bring_up_order() {
        let backend = ScriptedBackend::new();
        let bootstrapper = Bootstrapper::new();
        let descriptor = ModelDescriptor::default();

        bootstrapper
            .ensure_engine_ready(&backend, &descriptor, Notifier::new(&NoopObserver), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bootstrapper.state(), EngineState::Ready);
        assert_eq!(
            backend.calls(),
            vec![
                Call::InitializeEnvironment,
                Call::RegisterExecutionProvider,
                Call::RegisterModel(descriptor.id.clone()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_then_retry_from_scratch() {
        let backend = ScriptedBackend::new();
        backend.fail_next("register_model", "catalog locked");
        let bootstrapper = Bootstrapper::new();
        let descriptor = ModelDescriptor::default();
        let cancel = CancellationToken::new();

        let err = bootstrapper
            .ensure_engine_ready(&backend, &descriptor, Notifier::new(&NoopObserver), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, LifecycleError::EngineBringup("catalog locked".into()));
        assert_eq!(bootstrapper.state(), EngineState::Failed);

        bootstrapper
            .ensure_engine_ready(&backend, &descriptor, Notifier::new(&NoopObserver), &cancel)
            .await
            .unwrap();
        assert_eq!(bootstrapper.state(), EngineState::Ready);
        assert_eq!(backend.count("initialize_environment"), 2);
        assert_eq!(backend.count("register_model"), 2);
    }

    #[tokio::test]
    async fn test_cancelled_bring_up_rolls_back() {
        let backend = ScriptedBackend::new();
        backend.hang("register_execution_provider");
        let bootstrapper = Bootstrapper::new();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = bootstrapper
            .ensure_engine_ready(
                &backend,
                &ModelDescriptor::default(),
                Notifier::new(&NoopObserver),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err, LifecycleError::Cancelled(Phase::Bootstrap));
        assert_eq!(bootstrapper.state(), EngineState::Uninitialized);
        assert_eq!(backend.count("register_model"), 0);
    }
}
