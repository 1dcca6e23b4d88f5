//! Blocking token loop over llama.cpp. Always called from a blocking worker.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;

use crate::inference::backend::BackendError;

/// llama.cpp rejects decode batches larger than this ("Insufficient Space")
const PREFILL_BATCH_SIZE: usize = 512;

#[derive(Debug, Clone, Copy)]
pub(crate) struct GenerationParams {
    pub context_size: u32,
    pub max_tokens: u32,
    pub threads: i32,
    pub seed: u32,
}

fn failed(err: impl std::fmt::Display) -> BackendError {
    BackendError::new(format!("inference failed: {}", err))
}

/// Run one completion in a fresh context and return the generated text.
///
/// The loop stops at the next token once `abort` is set and returns what it
/// has so far.
pub(crate) fn generate(
    backend: &LlamaBackend,
    model: &LlamaModel,
    prompt: &str,
    params: GenerationParams,
    abort: &AtomicBool,
) -> Result<String, BackendError> {
    let tokens = model.str_to_token(prompt, AddBos::Always).map_err(failed)?;
    let n_prompt = tokens.len();
    if n_prompt == 0 {
        return Err(BackendError::new("prompt produced no tokens"));
    }
    if n_prompt as u32 >= params.context_size {
        return Err(BackendError::new(format!(
            "prompt is {} tokens, context holds {}",
            n_prompt, params.context_size
        )));
    }

    let needed = (n_prompt as u32).saturating_add(params.max_tokens);
    let n_ctx = NonZeroU32::new(needed.min(params.context_size))
        .ok_or_else(|| BackendError::new("invalid context size"))?;
    let max_new = n_ctx.get() as usize - n_prompt;

    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(Some(n_ctx))
        .with_n_threads(params.threads)
        .with_n_threads_batch(params.threads);
    let mut ctx = model.new_context(backend, ctx_params).map_err(failed)?;

    // Prefill in chunks, only the final prompt token needs logits.
    let mut batch = LlamaBatch::new(PREFILL_BATCH_SIZE, 1);
    let last_pos = n_prompt as i32 - 1;
    let mut pos = 0i32;
    for chunk in tokens.chunks(PREFILL_BATCH_SIZE) {
        if abort.load(Ordering::Relaxed) {
            tracing::debug!("Generation aborted during prefill");
            return Ok(String::new());
        }
        batch.clear();
        for &token in chunk {
            batch.add(token, pos, &[0], pos == last_pos).map_err(failed)?;
            pos += 1;
        }
        ctx.decode(&mut batch).map_err(failed)?;
    }

    let mut sampler =
        LlamaSampler::chain_simple([LlamaSampler::dist(params.seed), LlamaSampler::greedy()]);

    let mut output = String::new();
    let mut n_cur = n_prompt as i32;
    for _ in 0..max_new {
        if abort.load(Ordering::Relaxed) {
            tracing::debug!("Generation aborted by caller");
            break;
        }
        let token = sampler.sample(&ctx, batch.n_tokens() - 1);
        sampler.accept(token);

        if model.is_eog_token(token) {
            break;
        }

        let piece = model
            .token_to_str(token, Special::Tokenize)
            .unwrap_or_default();
        output.push_str(&piece);

        batch.clear();
        batch.add(token, n_cur, &[0], true).map_err(failed)?;
        n_cur += 1;
        ctx.decode(&mut batch).map_err(failed)?;
    }

    tracing::debug!("Generated {} tokens", n_cur as usize - n_prompt);
    Ok(output)
}
