//! Lifecycle coordinator
//!
//! The public face of the lifecycle manager. Composes the bootstrapper and
//! provisioner in strict order and forwards prompts once both are done.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::inference::InferenceBackend;
use crate::lifecycle::bootstrap::Bootstrapper;
use crate::lifecycle::error::{LifecycleError, Phase};
use crate::lifecycle::notify::{Notifier, StatusObserver};
use crate::lifecycle::provision::Provisioner;
use crate::lifecycle::state::{EngineState, LifecycleSnapshot, ModelState};
use crate::lifecycle::until_cancelled;
use crate::types::ModelDescriptor;

/// Prompt used by [`LifecycleCoordinator::self_test`]
pub const SELF_TEST_PROMPT: &str = "Say hello and confirm you are running locally on this device.";

/// Drives one backend serving one model.
///
/// Meant to be shared (e.g. behind an `Arc`) by every caller in the process.
pub struct LifecycleCoordinator {
    backend: Arc<dyn InferenceBackend>,
    descriptor: ModelDescriptor,
    bootstrapper: Bootstrapper,
    provisioner: Provisioner,
}

impl LifecycleCoordinator {
    pub fn new(backend: Arc<dyn InferenceBackend>, descriptor: ModelDescriptor) -> Self {
        Self {
            backend,
            descriptor,
            bootstrapper: Bootstrapper::new(),
            provisioner: Provisioner::new(),
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    /// Bring the engine up and the model online. A no-op once both are done.
    pub async fn ensure_ready(&self, observer: &dyn StatusObserver) -> Result<(), LifecycleError> {
        self.ensure_ready_with_cancel(observer, &CancellationToken::new())
            .await
    }

    pub async fn ensure_ready_with_cancel(
        &self,
        observer: &dyn StatusObserver,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        self.ready(Notifier::new(observer), cancel).await
    }

    /// Complete `prompt`, preparing the engine and model first if needed
    pub async fn generate(
        &self,
        prompt: &str,
        observer: &dyn StatusObserver,
    ) -> Result<String, LifecycleError> {
        self.generate_with_cancel(prompt, observer, &CancellationToken::new())
            .await
    }

    pub async fn generate_with_cancel(
        &self,
        prompt: &str,
        observer: &dyn StatusObserver,
        cancel: &CancellationToken,
    ) -> Result<String, LifecycleError> {
        let request_id = Uuid::new_v4();
        self.run_generate(prompt, Notifier::new(observer), cancel)
            .instrument(tracing::info_span!("generate", %request_id))
            .await
    }

    /// Ensure ready, then ask the model to confirm it runs locally
    pub async fn self_test(&self, observer: &dyn StatusObserver) -> Result<String, LifecycleError> {
        self.generate(SELF_TEST_PROMPT, observer).await
    }

    pub fn is_engine_ready(&self) -> bool {
        self.bootstrapper.state() == EngineState::Ready
    }

    pub fn is_model_ready(&self) -> bool {
        self.provisioner.state() == ModelState::Active
    }

    pub fn engine_state(&self) -> EngineState {
        self.bootstrapper.state()
    }

    pub fn model_state(&self) -> ModelState {
        self.provisioner.state()
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            engine: self.engine_state(),
            model: self.model_state(),
        }
    }

    /// Follow engine state changes
    pub fn subscribe_engine(&self) -> watch::Receiver<EngineState> {
        self.bootstrapper.cell().subscribe()
    }

    /// Follow model state changes
    pub fn subscribe_model(&self) -> watch::Receiver<ModelState> {
        self.provisioner.cell().subscribe()
    }

    async fn ready(&self, notify: Notifier<'_>, cancel: &CancellationToken) -> Result<(), LifecycleError> {
        let backend = &*self.backend;
        self.bootstrapper
            .ensure_engine_ready(backend, &self.descriptor, notify, cancel)
            .await?;
        self.provisioner
            .ensure_model_ready(
                backend,
                self.bootstrapper.state(),
                &self.descriptor,
                notify,
                cancel,
            )
            .await
    }

    async fn run_generate(
        &self,
        prompt: &str,
        notify: Notifier<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, LifecycleError> {
        if prompt.trim().is_empty() {
            notify.status("Chat failed: prompt is empty");
            return Err(LifecycleError::EmptyPrompt);
        }

        if let Err(e) = self.ready(notify, cancel).await {
            tracing::error!("Generation failed: {}", e);
            return Err(e);
        }

        notify.status("Thinking...");
        tracing::info!("Generating response ({} chars)", prompt.len());
        let result = until_cancelled(cancel, Phase::Inference, async {
            self.backend
                .infer(prompt)
                .await
                .map_err(|e| LifecycleError::Inference(e.message))
        })
        .await;

        match result {
            Ok(response) => {
                tracing::debug!("Generated: {}", response);
                notify.status("Response received");
                Ok(response)
            }
            Err(e) => {
                tracing::error!("Generation failed: {}", e);
                let status = if e.is_cancelled() {
                    format!("Cancelled: {}", Phase::Inference)
                } else {
                    format!("Chat failed: {}", e.message())
                };
                notify.status(status);
                Err(e)
            }
        }
    }
}
