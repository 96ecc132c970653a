//! Metrics and observability utilities
//!
//! Records engine metrics through the `metrics` facade. The library never
//! installs an exporter; the embedding process decides where they go.

use metrics::{counter, describe_counter, describe_histogram, gauge, describe_gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ShellForge metrics
pub const METRICS_PREFIX: &str = "shellforge";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Cache lookups that returned a value"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Cache lookups that found nothing or an expired entry"
    );

    describe_counter!(
        format!("{}_channel_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Provider calls per channel and outcome"
    );

    describe_histogram!(
        format!("{}_channel_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Provider call latency in seconds"
    );

    describe_gauge!(
        format!("{}_fused_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of results after rank fusion"
    );

    describe_counter!(
        format!("{}_compressions_total", METRICS_PREFIX),
        Unit::Count,
        "Context compressions, labelled by whether the fallback was used"
    );

    describe_histogram!(
        format!("{}_compression_ratio", METRICS_PREFIX),
        Unit::Count,
        "Output tokens divided by input tokens"
    );

    describe_counter!(
        format!("{}_generations_total", METRICS_PREFIX),
        Unit::Count,
        "Language model invocations per outcome"
    );

    describe_histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end prompt assembly latency"
    );
}

/// Times one pipeline stage
pub struct PipelineTimer {
    start: Instant,
    stage: &'static str,
}

impl PipelineTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Record the stage duration and return it in seconds
    pub fn finish(self) -> f64 {
        let duration = self.elapsed_secs();
        histogram!(
            format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
            "stage" => self.stage
        )
        .record(duration);
        duration
    }
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a provider call
pub fn record_channel(channel: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_channel_calls_total", METRICS_PREFIX),
        "channel" => channel.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_channel_duration_seconds", METRICS_PREFIX),
        "channel" => channel.to_string()
    )
    .record(duration_secs);
}

/// Helper to record fusion output size
pub fn record_fusion(query_type: &str, result_count: usize) {
    gauge!(
        format!("{}_fused_results_count", METRICS_PREFIX),
        "query_type" => query_type.to_string()
    )
    .set(result_count as f64);
}

/// Helper to record a compression pass
pub fn record_compression(tokens_before: usize, tokens_after: usize, fallback: bool) {
    counter!(
        format!("{}_compressions_total", METRICS_PREFIX),
        "fallback" => fallback.to_string()
    )
    .increment(1);

    if tokens_before > 0 {
        histogram!(format!("{}_compression_ratio", METRICS_PREFIX))
            .record(tokens_after as f64 / tokens_before as f64);
    }
}

/// Helper to record a language model call
pub fn record_generation(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_generations_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        "stage" => "generate"
    )
    .record(duration_secs);
}
