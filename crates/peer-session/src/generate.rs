//! The generation pipeline: prefill, then a token-by-token decode loop.

use std::time::{SystemTime, UNIX_EPOCH};

use peer_engine::SamplerStage;
use peer_runtime::RunTimer;
use peer_stop::StopBuffer;
use tracing::{debug, error, warn};

use crate::request::{GenerationRequest, GenerationSummary, StopReason};
use crate::session::{Loaded, Session, SessionState};
use crate::sink::Output;
use crate::tokens;

/// Sampler chain for a request.
///
/// Temperature `<= 0` means greedy. Otherwise top-k (when `k > 0`) and top-p
/// (when `p` is in `(0, 1)`) restrict the candidates, temperature scales them,
/// and a clock-seeded distribution picks one.
pub(crate) fn sampler_chain(req: &GenerationRequest) -> Vec<SamplerStage> {
    if req.temperature <= 0.0 {
        return vec![SamplerStage::Greedy];
    }

    let mut stages = Vec::with_capacity(4);
    if req.top_k > 0 {
        stages.push(SamplerStage::TopK(req.top_k));
    }
    if req.top_p > 0.0 && req.top_p < 1.0 {
        stages.push(SamplerStage::TopP {
            p: req.top_p,
            min_keep: 1,
        });
    }
    stages.push(SamplerStage::Temperature(req.temperature));
    stages.push(SamplerStage::Distribution { seed: clock_seed() });
    stages
}

/// Low 32 bits of the wall clock in microseconds.
fn clock_seed() -> u32 {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_micros());
    (micros & 0xFFFF_FFFF) as u32
}

/// Run one generation against the locked session state.
///
/// Text goes to `output`; the summary is returned for the caller to commit.
pub(crate) fn run(
    session: &Session,
    state: &mut SessionState,
    req: &GenerationRequest,
    output: &mut Output<'_>,
) -> GenerationSummary {
    let span = tracing::debug_span!("generate", session = %session.id());
    let _enter = span.enter();

    let n_ctx = state.config.context_length;
    let n_threads = state.config.threads;
    let Some(Loaded { context, model }) = state.loaded.as_mut() else {
        warn!("generate called without a loaded model");
        return GenerationSummary::failed();
    };

    session.init();
    session.cancel.reset();
    context.set_abort_probe(session.cancel.clone());
    context.clear_memory(true);
    context.set_threads(n_threads, n_threads);

    let prompt = req.full_prompt();
    let prompt_tokens = match tokens::tokenize(&**model, &prompt) {
        Ok(tokens) => tokens,
        Err(err) => {
            error!(error = %err, "failed to tokenize prompt");
            return GenerationSummary::failed();
        }
    };

    let mut timer = RunTimer::start(session.telemetry.clone());
    if let Err(err) = context.decode(&prompt_tokens) {
        error!(error = %err, tokens = prompt_tokens.len(), "prefill decode failed");
        return GenerationSummary::failed();
    }
    timer.mark_prefill_complete(prompt_tokens.len());

    let mut sampler = match session.runtime.sampler(&sampler_chain(req)) {
        Ok(sampler) => sampler,
        Err(err) => {
            error!(error = %err, "failed to init sampler chain");
            return GenerationSummary::failed();
        }
    };
    debug!(
        prompt_tokens = prompt_tokens.len(),
        max_tokens = req.max_tokens,
        stops = req.stops.len(),
        "prefill complete"
    );

    let mut stops = StopBuffer::new(req.stops.iter().cloned());
    let mut reason = StopReason::None;
    let mut stop_sequence = String::new();
    let mut truncated = false;
    let mut cancelled = false;

    timer.mark_decode_start();
    for _ in 0..req.max_tokens {
        if session.cancel.is_cancelled() {
            debug!(tokens = timer.generated_tokens(), "generation aborted");
            reason = StopReason::Error;
            truncated = true;
            cancelled = true;
            break;
        }

        let token = sampler.sample(context.logits());
        sampler.accept(token);
        if model.is_end_of_generation(token) {
            reason = StopReason::Eos;
            break;
        }

        let piece = tokens::piece(&**model, token);
        let release = stops.push(&piece);
        if let Err(err) = output.emit(&release.text) {
            warn!(error = %err, "token sink failed");
            reason = StopReason::Error;
            break;
        }
        timer.mark_token();

        if let Err(err) = context.decode(&[token]) {
            cancelled = session.cancel.is_cancelled();
            if cancelled {
                debug!(error = %err, "decode interrupted by abort");
            } else {
                error!(error = %err, "decode failed during generation");
            }
            reason = StopReason::Error;
            truncated = true;
            break;
        }

        if let Some(hit) = release.hit {
            reason = StopReason::StopSequence;
            stop_sequence = hit;
            break;
        }
    }
    drop(sampler);

    if reason == StopReason::None && timer.generated_tokens() >= req.max_tokens {
        reason = StopReason::MaxTokens;
    }
    truncated |= reason == StopReason::MaxTokens;
    let metrics = timer.finish(n_ctx, truncated);

    if reason != StopReason::Error {
        let tail = stops.flush();
        if let Err(err) = output.emit(&tail).and_then(|()| output.finish()) {
            warn!(error = %err, "token sink failed on flush");
            reason = StopReason::Error;
        }
    }

    debug!(
        reason = %reason,
        tokens = metrics.generated_tokens,
        tps = metrics.tokens_per_sec,
        "generation finished"
    );
    GenerationSummary {
        metrics,
        success: reason != StopReason::Error,
        reason,
        stop_sequence,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_when_temperature_is_zero() {
        let req = GenerationRequest::new("x").with_temperature(0.0);
        assert_eq!(sampler_chain(&req), vec![SamplerStage::Greedy]);
        let req = GenerationRequest::new("x").with_temperature(-1.0);
        assert_eq!(sampler_chain(&req), vec![SamplerStage::Greedy]);
    }

    #[test]
    fn full_stochastic_chain_order() {
        let chain = sampler_chain(&GenerationRequest::new("x"));
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[0], SamplerStage::TopK(40));
        assert_eq!(chain[1], SamplerStage::TopP { p: 0.9, min_keep: 1 });
        assert_eq!(chain[2], SamplerStage::Temperature(0.8));
        assert!(matches!(chain[3], SamplerStage::Distribution { .. }));
    }

    #[test]
    fn disabled_filters_are_skipped() {
        let req = GenerationRequest::new("x")
            .with_top_k(0)
            .with_top_p(1.0)
            .with_temperature(0.5);
        let chain = sampler_chain(&req);
        assert_eq!(chain[0], SamplerStage::Temperature(0.5));
        assert!(matches!(chain[1], SamplerStage::Distribution { .. }));
        assert_eq!(chain.len(), 2);

        let chain = sampler_chain(&GenerationRequest::new("x").with_top_p(0.0));
        assert!(!chain
            .iter()
            .any(|s| matches!(s, SamplerStage::TopP { .. })));
    }
}
