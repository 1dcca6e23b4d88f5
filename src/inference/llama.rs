//! llama.cpp backend
//!
//! Runs GGUF models on device. Weights live in the configured models
//! directory and are fetched over HTTP when missing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;
use once_cell::sync::OnceCell;
use tokio::sync::RwLock;

use crate::inference::backend::{BackendError, InferenceBackend, ProgressFn};
use crate::inference::generation::{self, GenerationParams};
use crate::storage::huggingface::{self, ModelSource};
use crate::storage::settings::BackendSettings;
use crate::system::gpu::{self, GpuInfo};
use crate::types::ModelDescriptor;

/// Where model layers run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Gpu {
        name: String,
        layers: u32,
        vram_bytes: Option<u64>,
    },
}

impl ExecutionProvider {
    /// Offload to the GPU when one was found and offloading is enabled
    pub fn select(gpu: &GpuInfo, gpu_layers: u32) -> Self {
        if gpu.is_available && gpu_layers > 0 {
            ExecutionProvider::Gpu {
                name: gpu.name.clone(),
                layers: gpu_layers,
                vram_bytes: gpu.vram_bytes(),
            }
        } else {
            ExecutionProvider::Cpu
        }
    }

    pub fn gpu_layers(&self) -> u32 {
        match self {
            ExecutionProvider::Cpu => 0,
            ExecutionProvider::Gpu { layers, .. } => *layers,
        }
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    descriptor: ModelDescriptor,
    source: ModelSource,
    path: PathBuf,
}

struct LoadedModel {
    id: String,
    model: Arc<LlamaModel>,
}

/// On-device backend over llama.cpp
pub struct LlamaCppBackend {
    settings: BackendSettings,
    runtime: OnceCell<Arc<LlamaBackend>>,
    provider: OnceCell<ExecutionProvider>,
    catalog: DashMap<String, CatalogEntry>,
    loaded: RwLock<Option<LoadedModel>>,
}

impl LlamaCppBackend {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            settings,
            runtime: OnceCell::new(),
            provider: OnceCell::new(),
            catalog: DashMap::new(),
            loaded: RwLock::new(None),
        }
    }

    /// Execution provider chosen at registration, if any
    pub fn execution_provider(&self) -> Option<&ExecutionProvider> {
        self.provider.get()
    }

    /// Local path of a registered model
    pub fn model_path(&self, id: &str) -> Option<PathBuf> {
        self.catalog.get(id).map(|entry| entry.path.clone())
    }

    fn runtime(&self) -> Result<Arc<LlamaBackend>, BackendError> {
        self.runtime
            .get()
            .cloned()
            .ok_or_else(|| BackendError::new("engine environment is not initialized"))
    }

    fn entry(&self, id: &str) -> Result<CatalogEntry, BackendError> {
        self.catalog
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| BackendError::new(format!("model not registered: {}", id)))
    }

    fn generation_params(&self) -> GenerationParams {
        let threads = self
            .settings
            .threads
            .map(|t| t as usize)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(4);
        GenerationParams {
            context_size: self.settings.context_size,
            max_tokens: self.settings.max_tokens,
            threads: threads as i32,
            seed: self.settings.seed,
        }
    }
}

/// Raises the abort flag of a generation when the request that owns it goes
/// away, so the blocking worker stops decoding instead of running on alone.
struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn worker_failed(err: tokio::task::JoinError) -> BackendError {
    BackendError::new(format!("worker task failed: {}", err))
}

#[async_trait]
impl InferenceBackend for LlamaCppBackend {
    async fn initialize_environment(&self) -> Result<(), BackendError> {
        // llama.cpp refuses a second init in the same process.
        self.runtime
            .get_or_try_init(|| LlamaBackend::init().map(Arc::new))
            .map_err(|e| BackendError::new(format!("llama.cpp init failed: {}", e)))?;
        tracing::info!("llama.cpp backend initialized");
        Ok(())
    }

    async fn register_execution_provider(&self) -> Result<(), BackendError> {
        self.runtime()?;
        if let Some(provider) = self.provider.get() {
            tracing::debug!("Execution provider already registered: {:?}", provider);
            return Ok(());
        }

        let gpu = tokio::task::spawn_blocking(gpu::detect_gpu)
            .await
            .map_err(worker_failed)?;
        let provider = self
            .provider
            .get_or_init(|| ExecutionProvider::select(&gpu, self.settings.gpu_layers));
        tracing::info!("Execution provider: {:?}", provider);
        Ok(())
    }

    async fn register_model(&self, descriptor: &ModelDescriptor) -> Result<(), BackendError> {
        self.runtime()?;
        let source = ModelSource::parse(&descriptor.url)?;
        let path = self.settings.models_directory.join(&source.file_name);
        tracing::info!("Registered model {} at {:?}", descriptor.id, path);
        self.catalog.insert(
            descriptor.id.clone(),
            CatalogEntry {
                descriptor: descriptor.clone(),
                source,
                path,
            },
        );
        Ok(())
    }

    async fn is_model_present(&self, id: &str) -> Result<bool, BackendError> {
        let entry = self.entry(id)?;
        match tokio::fs::metadata(&entry.path).await {
            Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BackendError::new(format!(
                "could not inspect {:?}: {}",
                entry.path, e
            ))),
        }
    }

    async fn download_model(&self, id: &str, on_progress: ProgressFn<'_>) -> Result<(), BackendError> {
        let entry = self.entry(id)?;
        huggingface::download_to(&entry.source.download_url, &entry.path, |done, total| {
            let ratio = if total == 0 { 1.0 } else { done as f32 / total as f32 };
            on_progress(ratio);
        })
        .await?;
        Ok(())
    }

    async fn load_model(&self, id: &str) -> Result<(), BackendError> {
        let entry = self.entry(id)?;
        let runtime = self.runtime()?;
        let provider = self
            .provider
            .get()
            .cloned()
            .unwrap_or(ExecutionProvider::Cpu);

        if let Some(current) = self.loaded.read().await.as_ref() {
            if current.id == id {
                return Ok(());
            }
        }

        if let ExecutionProvider::Gpu {
            vram_bytes: Some(vram),
            ..
        } = &provider
        {
            if entry.descriptor.memory_bytes > *vram {
                tracing::warn!(
                    "{} needs ~{} but only {} of VRAM detected, expect partial offload",
                    entry.descriptor.name,
                    huggingface::format_size(entry.descriptor.memory_bytes),
                    huggingface::format_size(*vram)
                );
            }
        }

        let layers = provider.gpu_layers();
        let path = entry.path.clone();
        let model = tokio::task::spawn_blocking(move || {
            let params = LlamaModelParams::default().with_n_gpu_layers(layers);
            LlamaModel::load_from_file(&runtime, &path, &params)
        })
        .await
        .map_err(worker_failed)?
        .map_err(|e| BackendError::new(format!("failed to load {:?}: {}", entry.path, e)))?;

        tracing::info!("Loaded {} ({} GPU layers)", entry.descriptor.name, layers);
        *self.loaded.write().await = Some(LoadedModel {
            id: id.to_string(),
            model: Arc::new(model),
        });
        Ok(())
    }

    async fn infer(&self, prompt: &str) -> Result<String, BackendError> {
        let runtime = self.runtime()?;
        let model = self
            .loaded
            .read()
            .await
            .as_ref()
            .map(|loaded| Arc::clone(&loaded.model))
            .ok_or_else(|| BackendError::new("no model loaded"))?;

        let params = self.generation_params();
        let prompt = prompt.to_string();
        let abort = Arc::new(AtomicBool::new(false));
        let _guard = AbortOnDrop(Arc::clone(&abort));
        tokio::task::spawn_blocking(move || {
            generation::generate(&runtime, &model, &prompt, params, &abort)
        })
        .await
        .map_err(worker_failed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings(dir: &std::path::Path) -> BackendSettings {
        BackendSettings {
            models_directory: dir.to_path_buf(),
            ..BackendSettings::default()
        }
    }

    #[test]
    fn test_select_cpu_without_gpu() {
        let gpu = GpuInfo::default();
        assert_eq!(ExecutionProvider::select(&gpu, 99), ExecutionProvider::Cpu);
        assert_eq!(ExecutionProvider::Cpu.gpu_layers(), 0);
    }

    #[test]
    fn test_select_gpu_respects_layer_setting() {
        let gpu = GpuInfo {
            name: "Test GPU".to_string(),
            vram_total_mb: 8192,
            is_available: true,
        };
        assert_eq!(ExecutionProvider::select(&gpu, 0), ExecutionProvider::Cpu);

        let provider = ExecutionProvider::select(&gpu, 32);
        assert_eq!(provider.gpu_layers(), 32);
        assert!(matches!(
            provider,
            ExecutionProvider::Gpu { vram_bytes: Some(v), .. } if v == 8192 * 1024 * 1024
        ));
    }

    #[tokio::test]
    async fn test_registration_requires_environment() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LlamaCppBackend::new(test_settings(dir.path()));
        let err = backend
            .register_model(&ModelDescriptor::default())
            .await
            .unwrap_err();
        assert_eq!(err.message, "engine environment is not initialized");
    }

    #[tokio::test]
    async fn test_presence_of_unknown_model_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LlamaCppBackend::new(test_settings(dir.path()));
        let err = backend.is_model_present("missing").await.unwrap_err();
        assert_eq!(err.message, "model not registered: missing");
    }

    #[test]
    fn test_abort_flag_raised_when_request_dropped() {
        let abort = Arc::new(AtomicBool::new(false));
        let guard = AbortOnDrop(Arc::clone(&abort));
        assert!(!abort.load(Ordering::Relaxed));
        drop(guard);
        assert!(abort.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_abort_flag_raised_when_waiting_future_is_dropped() {
        let abort = Arc::new(AtomicBool::new(false));
        let worker_flag = Arc::clone(&abort);
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let request = {
            let abort = Arc::clone(&abort);
            async move {
                let _guard = AbortOnDrop(abort);
                let worker = tokio::task::spawn_blocking(move || {
                    let _ = started_tx.send(());
                    while !worker_flag.load(Ordering::Relaxed) {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                });
                let _ = worker.await;
            }
        };
        let request = tokio::spawn(request);
        started_rx.await.unwrap();
        request.abort();
        let _ = request.await;

        assert!(abort.load(Ordering::Relaxed));
    }

    #[test]
    fn test_fresh_backend_reports_nothing_registered() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LlamaCppBackend::new(test_settings(dir.path()));
        assert!(backend.model_path("missing").is_none());
        assert!(backend.execution_provider().is_none());
    }

    #[tokio::test]
    async fn test_infer_without_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LlamaCppBackend::new(test_settings(dir.path()));
        assert!(backend.infer("hello").await.is_err());
    }
}
