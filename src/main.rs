//! Memora console runner
//!
//! `memora [PROMPT]` prepares the local model and prints its answer. Without
//! a prompt it runs the self-test. Ctrl-C cancels whatever is in flight.

use std::process::ExitCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use memora::inference::LlamaCppBackend;
use memora::lifecycle::LifecycleCoordinator;
use memora::storage::settings::{load_settings, save_settings};
use memora::{ModelDescriptor, ProgressEvent};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Prints status lines, collapsing repeated download percentages
struct ConsoleObserver {
    last_percent: AtomicU32,
}

impl memora::StatusObserver for ConsoleObserver {
    fn on_status(&self, event: &ProgressEvent) {
        match event.percent() {
            Some(pct) => {
                if self.last_percent.swap(pct, Ordering::Relaxed) != pct {
                    eprintln!("[memora] {}", event.message);
                }
            }
            None => eprintln!("[memora] {}", event.message),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memora=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");

    let settings = load_settings();
    tracing::info!("Models directory: {:?}", settings.models_directory);
    // Leaves an editable settings file behind on first run.
    if let Err(e) = save_settings(&settings) {
        tracing::warn!("Failed to save settings: {}", e);
    }
    let backend = Arc::new(LlamaCppBackend::new(settings));
    let lifecycle = LifecycleCoordinator::new(backend.clone(), ModelDescriptor::default());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let observer = ConsoleObserver {
        last_percent: AtomicU32::new(u32::MAX),
    };
    let prompt = if prompt.trim().is_empty() {
        memora::lifecycle::SELF_TEST_PROMPT.to_string()
    } else {
        prompt
    };

    let outcome = lifecycle.generate_with_cancel(&prompt, &observer, &cancel).await;
    if let Some(provider) = backend.execution_provider() {
        tracing::info!("Execution provider: {:?}", provider);
    }
    if let Some(path) = backend.model_path(&lifecycle.descriptor().id) {
        tracing::info!("Model file: {:?}", path);
    }

    match outcome {
        Ok(response) => {
            println!("{}", response.trim());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
