//! Telemetry hooks for generation performance measurement.
//!
//! Provides:
//! - [`Metrics`]: per-run timing, throughput and context-usage snapshot
//! - [`RunTimings`]: raw counts and durations a run collects; [`Metrics::derive`] turns them into figures
//! - [`TelemetryHook`] trait: callback interface for real-time metric reporting
//! - [`RunTimer`]: records timestamps and computes metrics
//! - [`NoopTelemetry`] / [`LogTelemetry`]: built-in hook implementations

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;

/// Metrics snapshot of one generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    /// Run start to first generated token, in milliseconds.
    pub ttfs_ms: f64,
    pub prefill_ms: f64,
    pub decode_ms: f64,
    pub total_ms: f64,
    /// Decode throughput.
    pub tokens_per_sec: f64,
    /// Prefill throughput.
    pub prompt_tokens_per_sec: f64,
    pub context_used_pct: f64,
    pub truncated: bool,
}

/// Raw figures gathered during a run, before any derivation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunTimings {
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub ttfs_ms: f64,
    pub prefill_ms: f64,
    pub decode_ms: f64,
    pub total_ms: f64,
    /// Configured context window of the session.
    pub n_ctx: u32,
    pub truncated: bool,
}

impl Metrics {
    /// Throughputs are only computed over non-zero durations, context usage
    /// only over a non-zero window.
    pub fn derive(t: &RunTimings) -> Self {
        let prompt_tokens_per_sec = if t.prefill_ms > 0.0 {
            t.prompt_tokens as f64 * 1000.0 / t.prefill_ms
        } else {
            0.0
        };
        let tokens_per_sec = if t.decode_ms > 0.0 && t.generated_tokens > 0 {
            t.generated_tokens as f64 * 1000.0 / t.decode_ms
        } else {
            0.0
        };
        let context_used_pct = if t.n_ctx > 0 {
            (t.prompt_tokens + t.generated_tokens) as f64 * 100.0 / t.n_ctx as f64
        } else {
            0.0
        };

        Self {
            prompt_tokens: t.prompt_tokens,
            generated_tokens: t.generated_tokens,
            ttfs_ms: t.ttfs_ms,
            prefill_ms: t.prefill_ms,
            decode_ms: t.decode_ms,
            total_ms: t.total_ms,
            tokens_per_sec,
            prompt_tokens_per_sec,
            context_used_pct,
            truncated: t.truncated,
        }
    }
}

/// Callback trait for real-time generation telemetry.
///
/// All methods have default no-op implementations so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    /// Called after prefill completes.
    fn on_prefill_complete(&self, _prompt_tokens: usize, _prefill_ms: f64) {}

    /// Called after each generated token.
    fn on_token_generated(&self, _token_idx: usize, _elapsed_ms: f64) {}

    /// Called when a run finishes with the full metrics summary.
    fn on_generation_complete(&self, _metrics: &Metrics) {}
}

/// No-op telemetry hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Logging telemetry hook: logs each finished run and keeps the last one.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    last_report: Arc<Mutex<Option<Metrics>>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve the last completed run's metrics.
    pub fn last_metrics(&self) -> Option<Metrics> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_generation_complete(&self, metrics: &Metrics) {
        tracing::debug!(
            prompt_tokens = metrics.prompt_tokens,
            generated_tokens = metrics.generated_tokens,
            ttfs_ms = metrics.ttfs_ms,
            tps = metrics.tokens_per_sec,
            context_used_pct = metrics.context_used_pct,
            "generation complete"
        );
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(metrics.clone());
    }
}

fn ms_between(from: Instant, to: Instant) -> f64 {
    to.duration_since(from).as_secs_f64() * 1000.0
}

/// Records timestamps during a run to compute [`Metrics`].
///
/// Usage:
/// 1. [`RunTimer::start`] immediately before prefill
/// 2. [`RunTimer::mark_prefill_complete`] once the prompt is decoded
/// 3. [`RunTimer::mark_decode_start`] before the first sampling step
/// 4. [`RunTimer::mark_token`] for every generated token
/// 5. [`RunTimer::finish`] when the decode loop exits
pub struct RunTimer {
    start: Instant,
    prefill_end: Option<Instant>,
    decode_start: Option<Instant>,
    ttfs_ms: Option<f64>,
    prompt_tokens: usize,
    token_count: usize,
    hook: Arc<dyn TelemetryHook>,
}

impl RunTimer {
    pub fn start(hook: Arc<dyn TelemetryHook>) -> Self {
        Self {
            start: Instant::now(),
            prefill_end: None,
            decode_start: None,
            ttfs_ms: None,
            prompt_tokens: 0,
            token_count: 0,
            hook,
        }
    }

    pub fn mark_prefill_complete(&mut self, prompt_tokens: usize) {
        let now = Instant::now();
        self.prefill_end = Some(now);
        self.prompt_tokens = prompt_tokens;
        self.hook
            .on_prefill_complete(prompt_tokens, ms_between(self.start, now));
    }

    pub fn mark_decode_start(&mut self) {
        self.decode_start = Some(Instant::now());
    }

    /// Count a generated token; the first one fixes time-to-first-chunk.
    pub fn mark_token(&mut self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        if self.token_count == 0 {
            self.ttfs_ms = Some(elapsed_ms);
        }
        self.token_count += 1;
        self.hook.on_token_generated(self.token_count, elapsed_ms);
    }

    pub fn generated_tokens(&self) -> usize {
        self.token_count
    }

    /// Finalize and return metrics. Fires `on_generation_complete`.
    pub fn finish(self, n_ctx: u32, truncated: bool) -> Metrics {
        let end = Instant::now();
        let prefill_ms = self
            .prefill_end
            .map(|t| ms_between(self.start, t))
            .unwrap_or(0.0);
        let decode_ms = self
            .decode_start
            .map(|t| ms_between(t, end))
            .unwrap_or(0.0);

        let metrics = Metrics::derive(&RunTimings {
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.token_count,
            ttfs_ms: self.ttfs_ms.unwrap_or(0.0),
            prefill_ms,
            decode_ms,
            total_ms: ms_between(self.start, end),
            n_ctx,
            truncated,
        });

        self.hook.on_generation_complete(&metrics);
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_usage_formula() {
        let metrics = Metrics::derive(&RunTimings {
            prompt_tokens: 100,
            generated_tokens: 50,
            n_ctx: 4096,
            ..RunTimings::default()
        });
        assert!((metrics.context_used_pct - 3.662_109_375).abs() < 1e-9);
    }

    #[test]
    fn throughput_from_durations() {
        let metrics = Metrics::derive(&RunTimings {
            prompt_tokens: 20,
            generated_tokens: 10,
            prefill_ms: 40.0,
            decode_ms: 500.0,
            total_ms: 560.0,
            n_ctx: 2048,
            ..RunTimings::default()
        });
        assert_eq!(metrics.prompt_tokens_per_sec, 500.0);
        assert_eq!(metrics.tokens_per_sec, 20.0);
        assert_eq!(metrics.total_ms, 560.0);
    }

    #[test]
    fn zero_durations_leave_throughput_unset() {
        let metrics = Metrics::derive(&RunTimings {
            prompt_tokens: 5,
            generated_tokens: 3,
            ..RunTimings::default()
        });
        assert_eq!(metrics.prompt_tokens_per_sec, 0.0);
        assert_eq!(metrics.tokens_per_sec, 0.0);
        assert_eq!(metrics.context_used_pct, 0.0);
    }

    #[test]
    fn no_generated_tokens_means_no_decode_throughput() {
        let metrics = Metrics::derive(&RunTimings {
            decode_ms: 12.0,
            ..RunTimings::default()
        });
        assert_eq!(metrics.tokens_per_sec, 0.0);
    }

    #[test]
    fn log_telemetry_captures_metrics() {
        let hook = LogTelemetry::new();
        assert!(hook.last_metrics().is_none());

        let metrics = Metrics {
            ttfs_ms: 12.5,
            generated_tokens: 8,
            ..Metrics::default()
        };
        hook.on_generation_complete(&metrics);

        let captured = hook.last_metrics().unwrap();
        assert_eq!(captured.ttfs_ms, 12.5);
        assert_eq!(captured.generated_tokens, 8);
    }

    #[test]
    fn run_timer_basic_flow() {
        let mut timer = RunTimer::start(Arc::new(NoopTelemetry));
        timer.mark_prefill_complete(3);
        timer.mark_decode_start();
        timer.mark_token();
        timer.mark_token();
        assert_eq!(timer.generated_tokens(), 2);

        let metrics = timer.finish(512, false);
        assert_eq!(metrics.prompt_tokens, 3);
        assert_eq!(metrics.generated_tokens, 2);
        assert!(metrics.ttfs_ms >= metrics.prefill_ms);
        assert!(metrics.total_ms >= metrics.decode_ms);
        assert!((metrics.context_used_pct - 5.0 * 100.0 / 512.0).abs() < 1e-9);
    }

    #[test]
    fn run_timer_fires_hooks() {
        let log = LogTelemetry::new();
        let mut timer = RunTimer::start(Arc::new(log.clone()));
        timer.mark_prefill_complete(2);
        timer.mark_decode_start();
        timer.mark_token();
        let metrics = timer.finish(1024, true);

        assert!(metrics.truncated);
        let captured = log.last_metrics().unwrap();
        assert_eq!(captured.generated_tokens, 1);
        assert_eq!(captured.prompt_tokens, 2);
    }

    #[test]
    fn run_timer_without_marks() {
        let timer = RunTimer::start(Arc::new(NoopTelemetry));
        let metrics = timer.finish(4096, false);
        assert_eq!(metrics.ttfs_ms, 0.0);
        assert_eq!(metrics.prefill_ms, 0.0);
        assert_eq!(metrics.decode_ms, 0.0);
        assert_eq!(metrics.generated_tokens, 0);
    }
}
