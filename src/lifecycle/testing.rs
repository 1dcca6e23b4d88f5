//! Scripted backend for lifecycle tests. Records every call in order.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::inference::{BackendError, InferenceBackend, ProgressFn};
use crate::types::ModelDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    InitializeEnvironment,
    RegisterExecutionProvider,
    RegisterModel(String),
    IsModelPresent(String),
    DownloadModel(String),
    LoadModel(String),
    Infer(String),
}

impl Call {
    fn op(&self) -> &'static str {
        match self {
            Call::InitializeEnvironment => "initialize_environment",
            Call::RegisterExecutionProvider => "register_execution_provider",
            Call::RegisterModel(_) => "register_model",
            Call::IsModelPresent(_) => "is_model_present",
            Call::DownloadModel(_) => "download_model",
            Call::LoadModel(_) => "load_model",
            Call::Infer(_) => "infer",
        }
    }
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    calls: Mutex<Vec<Call>>,
    present: AtomicBool,
    fail_next: Mutex<HashMap<&'static str, String>>,
    hanging: Mutex<HashSet<&'static str>>,
    delay: Mutex<Option<Duration>>,
    progress: Mutex<Vec<f32>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        let backend = Self::default();
        backend.set_progress(vec![0.25, 0.5, 0.75, 1.0]);
        backend
    }

    pub(crate) fn with_model_present() -> Self {
        let backend = Self::new();
        backend.present.store(true, Ordering::SeqCst);
        backend
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.op() == op).count()
    }

    /// Make the next call to `op` fail with `message`
    pub(crate) fn fail_next(&self, op: &'static str, message: &str) {
        self.fail_next.lock().unwrap().insert(op, message.to_string());
    }

    /// Make calls to `op` never complete until released
    pub(crate) fn hang(&self, op: &'static str) {
        self.hanging.lock().unwrap().insert(op);
    }

    pub(crate) fn release(&self, op: &'static str) {
        self.hanging.lock().unwrap().remove(op);
    }

    /// Delay every call, widening race windows
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn set_progress(&self, ratios: Vec<f32>) {
        *self.progress.lock().unwrap() = ratios;
    }

    pub(crate) fn evict(&self) {
        self.present.store(false, Ordering::SeqCst);
    }

    async fn record(&self, call: Call) -> Result<(), BackendError> {
        let op = call.op();
        self.calls.lock().unwrap().push(call);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let hanging = self.hanging.lock().unwrap().contains(op);
        if hanging {
            std::future::pending::<()>().await;
        }
        match self.fail_next.lock().unwrap().remove(op) {
            Some(message) => Err(BackendError::new(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn initialize_environment(&self) -> Result<(), BackendError> {
        self.record(Call::InitializeEnvironment).await
    }

    async fn register_execution_provider(&self) -> Result<(), BackendError> {
        self.record(Call::RegisterExecutionProvider).await
    }

    async fn register_model(&self, descriptor: &ModelDescriptor) -> Result<(), BackendError> {
        self.record(Call::RegisterModel(descriptor.id.clone())).await
    }

    async fn is_model_present(&self, id: &str) -> Result<bool, BackendError> {
        self.record(Call::IsModelPresent(id.to_string())).await?;
        Ok(self.present.load(Ordering::SeqCst))
    }

    async fn download_model(&self, id: &str, on_progress: ProgressFn<'_>) -> Result<(), BackendError> {
        self.record(Call::DownloadModel(id.to_string())).await?;
        let ratios = self.progress.lock().unwrap().clone();
        for ratio in ratios {
            on_progress(ratio);
        }
        self.present.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn load_model(&self, id: &str) -> Result<(), BackendError> {
        self.record(Call::LoadModel(id.to_string())).await
    }

    async fn infer(&self, prompt: &str) -> Result<String, BackendError> {
        self.record(Call::Infer(prompt.to_string())).await?;
        Ok(format!("echo: {}", prompt))
    }
}
