use std::sync::Arc;
use std::time::Instant;

use messaging::{Buffer, PollBackoff};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::ExhaustionPolicy;
use crate::budget::TokenBudget;
use crate::error::PipelineResult;
use crate::llm::CompletionClient;
use crate::metrics::PipelineMetrics;
use crate::shutdown::{is_shutdown, sleep_or_shutdown};
use crate::storage::BlobStorage;

/// Tunables shared by every dispatch worker.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub system_prompt: String,
    pub backoff: PollBackoff,
    pub policy: ExhaustionPolicy,
}

/// Result of one completed prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub prompt_id: String,
    pub tokens: u64,
    /// Budget usage after this completion was added
    pub used: u64,
}

/// Why a dispatcher loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    BudgetExhausted,
}

/// One dispatch loop bound to a response storage.
pub struct Dispatcher {
    pub(super) id: usize,
    pub(super) input: Arc<dyn Buffer>,
    pub(super) prompts: Arc<dyn BlobStorage>,
    pub(super) responses: Arc<dyn BlobStorage>,
    pub(super) client: Arc<dyn CompletionClient>,
    pub(super) budget: Arc<TokenBudget>,
    pub(super) settings: DispatchSettings,
    pub(super) stop_pool: watch::Sender<bool>,
    pub(super) metrics: PipelineMetrics,
}

impl Dispatcher {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> StopReason {
        info!(worker = self.id, "Starting dispatch worker");
        let mut backoff = self.settings.backoff.clone();

        let reason = loop {
            if is_shutdown(&shutdown) {
                break StopReason::Shutdown;
            }

            if self.budget.is_exhausted() {
                warn!(
                    worker = self.id,
                    used = self.budget.used(),
                    limit = self.budget.limit(),
                    policy = ?self.settings.policy,
                    "Token budget exhausted"
                );
                if self.settings.policy == ExhaustionPolicy::StopPool {
                    self.stop_pool.send_replace(true);
                }
                break StopReason::BudgetExhausted;
            }

            let message = match self.input.dequeue().await {
                Ok(message) => {
                    backoff.reset();
                    message
                }
                Err(e) => {
                    if !e.is_not_available() {
                        warn!(worker = self.id, error = %e, "Could not dequeue prompt id");
                    }
                    if sleep_or_shutdown(backoff.next_delay(), &mut shutdown).await {
                        break StopReason::Shutdown;
                    }
                    continue;
                }
            };

            if message.is_redelivery() {
                debug!(
                    worker = self.id,
                    sequence = message.sequence,
                    delivery_count = message.delivery_count,
                    "Dispatching redelivered prompt"
                );
            }

            match self.dispatch(message.payload()).await {
                Ok(_) => {
                    if let Err(e) = self.input.mark_consumed(&message).await {
                        warn!(worker = self.id, error = %e, "Could not acknowledge prompt id");
                    }
                }
                Err(e) => {
                    error!(
                        worker = self.id,
                        prompt_id = message.payload(),
                        error = %e,
                        category = %e.category(),
                        "Prompt dispatch failed"
                    );
                    self.metrics.work_failed(e.category());
                }
            }
        };

        info!(worker = self.id, ?reason, "Stopping dispatch worker");
        reason
    }

    /// Complete one stored prompt and store the response under the same id.
    pub async fn dispatch(&self, prompt_id: &str) -> PipelineResult<DispatchOutcome> {
        let prompt = self.prompts.download(prompt_id).await?;

        let started = Instant::now();
        let completion = self
            .client
            .complete(&self.settings.system_prompt, &prompt)
            .await?;
        let used = self.budget.add(completion.total_tokens);
        self.metrics
            .completion(completion.total_tokens, started.elapsed());
        self.metrics.budget_used(used);

        self.responses.upload(prompt_id, &completion.text).await?;

        info!(
            worker = self.id,
            prompt_id,
            tokens = completion.total_tokens,
            used,
            limit = self.budget.limit(),
            "Stored completion"
        );

        Ok(DispatchOutcome {
            prompt_id: prompt_id.to_string(),
            tokens: completion.total_tokens,
            used,
        })
    }
}
