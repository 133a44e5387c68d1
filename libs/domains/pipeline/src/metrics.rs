//! Prometheus metrics for the pipeline stages.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! binary installs a recorder.

use std::time::Duration;

use messaging::ErrorCategory;
use metrics::{counter, gauge, histogram};

/// Metrics handle labelled with the stage that records them.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    stage: &'static str,
}

impl PipelineMetrics {
    pub fn new(stage: &'static str) -> Self {
        Self { stage }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Record points written to a collection.
    pub fn records_upserted(&self, collection: &str, count: usize) {
        counter!(
            "caelus_records_upserted_total",
            "stage" => self.stage,
            "collection" => collection.to_string()
        )
        .increment(count as u64);
    }

    /// Record messages published to a buffer.
    pub fn messages_published(&self, buffer: &str, count: usize) {
        counter!(
            "caelus_queue_messages_published_total",
            "stage" => self.stage,
            "buffer" => buffer.to_string()
        )
        .increment(count as u64);
    }

    /// Record an assembled prompt and how its candidates were split.
    pub fn prompt_assembled(&self, packed: usize, rejected: usize, duration: Duration) {
        counter!("caelus_prompts_assembled_total", "stage" => self.stage).increment(1);
        counter!(
            "caelus_candidates_total",
            "stage" => self.stage,
            "outcome" => "packed"
        )
        .increment(packed as u64);
        counter!(
            "caelus_candidates_total",
            "stage" => self.stage,
            "outcome" => "rejected"
        )
        .increment(rejected as u64);
        histogram!("caelus_prompt_assembly_duration_seconds", "stage" => self.stage)
            .record(duration.as_secs_f64());
    }

    /// Record a completion and the tokens it consumed.
    pub fn completion(&self, tokens: u64, duration: Duration) {
        counter!("caelus_completions_total", "stage" => self.stage).increment(1);
        counter!("caelus_tokens_used_total", "stage" => self.stage).increment(tokens);
        histogram!("caelus_completion_duration_seconds", "stage" => self.stage)
            .record(duration.as_secs_f64());
    }

    /// Update the budget gauge.
    pub fn budget_used(&self, used: u64) {
        gauge!("caelus_token_budget_used", "stage" => self.stage).set(used as f64);
    }

    /// Record a unit of work abandoned.
    pub fn work_failed(&self, category: ErrorCategory) {
        counter!(
            "caelus_work_failed_total",
            "stage" => self.stage,
            "category" => category.to_string()
        )
        .increment(1);
    }
}
