//! Prompt assembler.
//!
//! ```text
//! record-id buffer ──▶ PromptAssembler ×(workers × sinks × prompt storages)
//!                        1. sink.fetch(record id, max_vector_fetch)
//!                        2. greedy pack under max_prompt_tokens
//!                        3. sink.mark_consumed(packed ids)
//!                        4. storage.upload(new uuid, prompt)
//!                        5. prompt buffer.enqueue(uuid)
//!                        6. ack the record id
//! ```
//!
//! A failure in steps 1-5 leaves the record id unacknowledged so the buffer
//! redelivers it. Two workers can fetch the same unconsumed candidate before
//! either marks it, so a record may appear in two prompts under load.

mod packer;
mod worker;

pub use packer::{CANDIDATE_SEPARATOR, PackedPrompt, PromptPacker};
pub use worker::{AssembledPrompt, ProcessorSettings, PromptAssembler};

use std::path::Path;
use std::sync::Arc;

use domain_vector::Sink;
use messaging::Buffer;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;
use crate::storage::BlobStorage;
use crate::tokenizer::TokenCounter;

/// Read the prompt template once at startup.
pub async fn load_template(path: &Path) -> PipelineResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        PipelineError::Config(format!(
            "Failed to read prompt template {}: {e}",
            path.display()
        ))
    })
}

pub struct ProcessorPool {
    input: Arc<dyn Buffer>,
    output: Arc<dyn Buffer>,
    sinks: Vec<Arc<dyn Sink>>,
    storages: Vec<Arc<dyn BlobStorage>>,
    counter: Arc<dyn TokenCounter>,
    template: Arc<str>,
    settings: ProcessorSettings,
    workers: usize,
}

impl ProcessorPool {
    /// `workers` assemblers run per (sink, prompt storage) pair.
    ///
    /// Fails when there is nothing to read from or write to, or when the
    /// template alone is over the token ceiling.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: Arc<dyn Buffer>,
        output: Arc<dyn Buffer>,
        sinks: Vec<Arc<dyn Sink>>,
        storages: Vec<Arc<dyn BlobStorage>>,
        counter: Arc<dyn TokenCounter>,
        template: String,
        settings: ProcessorSettings,
        workers: usize,
    ) -> PipelineResult<Self> {
        if sinks.is_empty() {
            return Err(PipelineError::Config("Processor needs at least one sink".into()));
        }
        if storages.is_empty() {
            return Err(PipelineError::Config(
                "Processor needs at least one prompts storage".into(),
            ));
        }
        if !PromptPacker::new(counter.as_ref(), settings.max_prompt_tokens).fits(&template) {
            return Err(PipelineError::Config(format!(
                "Prompt template alone exceeds max_prompt_tokens ({})",
                settings.max_prompt_tokens
            )));
        }

        Ok(Self {
            input,
            output,
            sinks,
            storages,
            counter,
            template: Arc::from(template),
            settings,
            workers: workers.max(1),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers * self.sinks.len() * self.storages.len()
    }

    fn assemblers(&self) -> Vec<PromptAssembler> {
        let metrics = PipelineMetrics::new("processor");
        let mut assemblers = Vec::with_capacity(self.worker_count());

        for _ in 0..self.workers {
            for sink in &self.sinks {
                for storage in &self.storages {
                    assemblers.push(PromptAssembler {
                        id: assemblers.len(),
                        input: self.input.clone(),
                        output: self.output.clone(),
                        sink: sink.clone(),
                        storage: storage.clone(),
                        template: self.template.clone(),
                        counter: self.counter.clone(),
                        settings: self.settings.clone(),
                        metrics: metrics.clone(),
                    });
                }
            }
        }
        assemblers
    }

    /// Run every assembler until shutdown and wait for them to stop.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut workers = JoinSet::new();
        for assembler in self.assemblers() {
            workers.spawn(assembler.run(shutdown.clone()));
        }
        info!(workers = workers.len(), "Processor pool started");

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Prompt assembly worker panicked");
            }
        }
        info!("Processor pool stopped");
    }
}
