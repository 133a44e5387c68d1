//! Dispatch pool.
//!
//! Each dispatcher takes a prompt id from the prompt buffer, downloads the
//! prompt, asks the completion client for a response, charges the tokens to
//! the shared [`TokenBudget`] and stores the response under the prompt id.
//! The budget is zeroed at local midnight by a task that lives as long as
//! the pool. Once every dispatcher has stopped on a spent budget the pool
//! waits for that reset and starts a fresh set of dispatchers.

mod worker;

pub use worker::{DispatchOutcome, DispatchSettings, Dispatcher, StopReason};

use std::sync::Arc;

use messaging::Buffer;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::budget::{TokenBudget, run_daily_reset};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::CompletionClient;
use crate::metrics::PipelineMetrics;
use crate::shutdown::is_shutdown;
use crate::storage::BlobStorage;

/// What a dispatcher does when it finds the daily budget spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// The worker that observes exhaustion exits; others finish their
    /// current call and exit on their next check.
    #[default]
    StopWorker,
    /// The first worker to observe exhaustion stops every other worker.
    StopPool,
}

pub struct DispatchPool {
    input: Arc<dyn Buffer>,
    prompts: Arc<dyn BlobStorage>,
    responses: Vec<Arc<dyn BlobStorage>>,
    client: Arc<dyn CompletionClient>,
    budget: Arc<TokenBudget>,
    settings: DispatchSettings,
    workers: usize,
}

impl DispatchPool {
    /// `workers` dispatchers run per response storage.
    pub fn new(
        input: Arc<dyn Buffer>,
        prompts: Arc<dyn BlobStorage>,
        responses: Vec<Arc<dyn BlobStorage>>,
        client: Arc<dyn CompletionClient>,
        budget: Arc<TokenBudget>,
        settings: DispatchSettings,
        workers: usize,
    ) -> PipelineResult<Self> {
        if responses.is_empty() {
            return Err(PipelineError::Config(
                "Dispatcher needs at least one responses storage".into(),
            ));
        }

        Ok(Self {
            input,
            prompts,
            responses,
            client,
            budget,
            settings,
            workers: workers.max(1),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers * self.responses.len()
    }

    pub fn budget(&self) -> Arc<TokenBudget> {
        self.budget.clone()
    }

    /// Run dispatchers until shutdown.
    ///
    /// Dispatchers stop when the budget runs out; the pool then sleeps until
    /// the daily reset and starts them again. Returns how many workers
    /// stopped because the budget ran out.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> usize {
        let metrics = PipelineMetrics::new("feeder");
        let (reset_tx, reset_rx) = watch::channel(false);
        let reset = tokio::spawn(run_daily_reset(
            self.budget.clone(),
            metrics.clone(),
            reset_rx,
        ));
        info!(
            workers = self.worker_count(),
            limit = self.budget.limit(),
            policy = ?self.settings.policy,
            "Dispatch pool started"
        );

        let mut exhausted = 0;
        loop {
            let stopped = self.run_workers(&mut shutdown, &metrics).await;
            exhausted += stopped;
            if stopped == 0 || is_shutdown(&shutdown) {
                break;
            }

            info!(
                used = self.budget.used(),
                limit = self.budget.limit(),
                "Dispatch workers stopped on the token budget, waiting for the daily reset"
            );
            if !self.budget.wait_for_reset(&mut shutdown).await {
                break;
            }
            info!("Token budget available again, restarting dispatch workers");
        }

        reset_tx.send_replace(true);
        if let Err(e) = reset.await {
            error!(error = %e, "Budget reset task panicked");
        }

        info!(
            exhausted,
            used = self.budget.used(),
            "Dispatch pool stopped"
        );
        exhausted
    }

    /// Spawn one set of dispatchers and wait for all of them to stop.
    ///
    /// Returns how many stopped on the budget.
    async fn run_workers(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        metrics: &PipelineMetrics,
    ) -> usize {
        // Workers listen on this channel; it follows the caller's shutdown
        // and can also be tripped by a StopPool worker.
        let (pool_tx, pool_rx) = watch::channel(*shutdown.borrow());

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            for responses in &self.responses {
                let dispatcher = Dispatcher {
                    id: workers.len(),
                    input: self.input.clone(),
                    prompts: self.prompts.clone(),
                    responses: responses.clone(),
                    client: self.client.clone(),
                    budget: self.budget.clone(),
                    settings: self.settings.clone(),
                    stop_pool: pool_tx.clone(),
                    metrics: metrics.clone(),
                };
                workers.spawn(dispatcher.run(pool_rx.clone()));
            }
        }

        let mut exhausted = 0;
        let mut forwarded = false;
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(Ok(StopReason::BudgetExhausted)) => exhausted += 1,
                    Some(Ok(StopReason::Shutdown)) => {}
                    Some(Err(e)) => error!(error = %e, "Dispatch worker panicked"),
                    None => break,
                },
                // Forward the caller's shutdown once, then keep draining.
                _ = shutdown.wait_for(|stop| *stop), if !forwarded => {
                    forwarded = true;
                    pool_tx.send_replace(true);
                }
            }
        }
        exhausted
    }
}
