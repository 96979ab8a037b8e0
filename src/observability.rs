//! Observability module for tracing, logging and metrics setup.
//!
//! This module provides:
//! - Structured logging with configurable levels and formats
//! - Span constructors for runs, generations and evaluations
//! - Metrics recording helpers built on the `metrics` facade
//!
//! No metrics exporter is installed here. Without a recorder the `metrics`
//! macros are no-ops; an embedding application can install one before
//! starting a run.

use anyhow::Result;
use tracing_subscriber::prelude::*;

use crate::observability_config::ObservabilityConfig;

/// Initialize structured logging with tracing and configuration
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid observability configuration: {}", e))?;

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("ocr_filter_tuner={}", config.log_level.to_lowercase()).parse()?);

    // Pretty for development, JSON for others
    if config.use_pretty_format() {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    tracing::info!(
        environment = %config.environment,
        log_level = %config.log_level,
        "Tracing initialized with structured logging"
    );
    Ok(())
}

/// Create the top-level span for an optimization run
pub fn run_span(population_size: usize, generations: u32, slots: usize) -> tracing::Span {
    tracing::info_span!(
        "optimization_run",
        population_size = population_size,
        generations = generations,
        slots = slots,
        component = "controller"
    )
}

/// Create a span for one generation
pub fn generation_span(generation: u32) -> tracing::Span {
    tracing::info_span!("generation", generation = generation, component = "optimizer")
}

/// Create a span for the evaluation of one genome
pub fn evaluation_span(genome_key: &str) -> tracing::Span {
    tracing::debug_span!("evaluation", genome = %genome_key, component = "fitness")
}

/// Record OCR operation metrics
pub fn record_ocr_metrics(success: bool, duration: std::time::Duration) {
    metrics::counter!("ocr_operations_total", "result" => if success { "success" } else { "failure" }).increment(1);
    if success {
        metrics::histogram!("ocr_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Record a completed genome evaluation
pub fn record_evaluation_metrics(cache_hit: bool, failed_slots: usize, duration: std::time::Duration) {
    metrics::counter!("evaluations_total", "cache" => if cache_hit { "hit" } else { "miss" }).increment(1);
    if failed_slots > 0 {
        metrics::counter!("evaluation_slot_failures_total").increment(failed_slots as u64);
    }
    if !cache_hit {
        metrics::histogram!("evaluation_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Record a slot failure by kind
pub fn record_slot_failure(kind: &'static str) {
    metrics::counter!("slot_failures_total", "kind" => kind).increment(1);
}

/// Record end-of-generation state
pub fn record_generation_metrics(generation: u32, front_size: usize, failure_rate: f64) {
    metrics::gauge!("optimizer_generation").set(f64::from(generation));
    metrics::gauge!("pareto_front_size").set(front_size as f64);
    metrics::gauge!("generation_failure_rate").set(failure_rate);
}

/// Record checkpoint persistence
pub fn record_checkpoint_metrics(success: bool, duration: std::time::Duration) {
    metrics::counter!("checkpoints_total", "result" => if success { "success" } else { "failure" }).increment(1);
    metrics::histogram!("checkpoint_duration_seconds").record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_can_be_entered() {
        let span = run_span(24, 30, 6);
        let _guard = span.enter();
        let generation = generation_span(3);
        let _inner = generation.enter();
        let _eval = evaluation_span("0123456789abcdef").entered();
    }

    #[test]
    fn test_metrics_helpers_without_recorder() {
        // No recorder installed: every call must be a silent no-op
        record_ocr_metrics(true, std::time::Duration::from_millis(5));
        record_ocr_metrics(false, std::time::Duration::ZERO);
        record_evaluation_metrics(false, 2, std::time::Duration::from_millis(40));
        record_slot_failure("timeout");
        record_generation_metrics(4, 7, 0.1);
        record_checkpoint_metrics(true, std::time::Duration::from_millis(2));
    }

    #[test]
    fn test_init_tracing_rejects_invalid_config() {
        let config = ObservabilityConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(init_tracing(&config).is_err());
    }
}
