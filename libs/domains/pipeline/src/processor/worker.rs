use std::sync::Arc;
use std::time::Instant;

use domain_vector::{FetchFilters, Sink};
use messaging::{Buffer, PollBackoff, QueueMessage};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::packer::PromptPacker;
use crate::error::PipelineResult;
use crate::metrics::PipelineMetrics;
use crate::shutdown::{is_shutdown, sleep_or_shutdown};
use crate::storage::BlobStorage;
use crate::tokenizer::TokenCounter;

/// What one processed queue message produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub prompt_id: Uuid,
    pub packed: Vec<Uuid>,
    pub rejected: Vec<Uuid>,
    pub tokens: usize,
}

/// Tunables shared by every processor worker.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub max_vector_fetch: u64,
    pub max_prompt_tokens: usize,
    pub backoff: PollBackoff,
}

/// One prompt-assembly loop bound to a sink and a prompt storage.
pub struct PromptAssembler {
    pub(super) id: usize,
    pub(super) input: Arc<dyn Buffer>,
    pub(super) output: Arc<dyn Buffer>,
    pub(super) sink: Arc<dyn Sink>,
    pub(super) storage: Arc<dyn BlobStorage>,
    pub(super) template: Arc<str>,
    pub(super) counter: Arc<dyn TokenCounter>,
    pub(super) settings: ProcessorSettings,
    pub(super) metrics: PipelineMetrics,
}

impl PromptAssembler {
    /// Consume record ids until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = self.id, collection = self.sink.collection(), "Starting prompt assembly worker");
        let mut backoff = self.settings.backoff.clone();

        loop {
            if is_shutdown(&shutdown) {
                break;
            }

            let message = match self.input.dequeue().await {
                Ok(message) => {
                    backoff.reset();
                    message
                }
                Err(e) => {
                    if !e.is_not_available() {
                        warn!(worker = self.id, error = %e, "Could not dequeue message");
                    }
                    if sleep_or_shutdown(backoff.next_delay(), &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if message.is_redelivery() {
                debug!(
                    worker = self.id,
                    sequence = message.sequence,
                    delivery_count = message.delivery_count,
                    "Processing redelivered message"
                );
            }

            match self.assemble(message.payload()).await {
                Ok(_) => self.acknowledge(&message).await,
                Err(e) if e.is_stale_reference() => {
                    info!(
                        worker = self.id,
                        record_id = message.payload(),
                        "Record already packed into another prompt, skipping"
                    );
                    self.acknowledge(&message).await;
                }
                Err(e) => {
                    // Left unacknowledged; the buffer redelivers it.
                    error!(
                        worker = self.id,
                        record_id = message.payload(),
                        error = %e,
                        category = %e.category(),
                        "Prompt assembly failed"
                    );
                    self.metrics.work_failed(e.category());
                }
            }
        }

        info!(worker = self.id, "Stopping prompt assembly worker");
    }

    async fn acknowledge(&self, message: &QueueMessage) {
        if let Err(e) = self.input.mark_consumed(message).await {
            warn!(worker = self.id, error = %e, "Could not acknowledge message");
        }
    }

    /// Build, store and publish the prompt for one record id.
    pub async fn assemble(&self, record_id: &str) -> PipelineResult<AssembledPrompt> {
        let started = Instant::now();

        let filters = FetchFilters::new(
            self.sink.collection(),
            record_id,
            self.settings.max_vector_fetch,
        );
        let candidates = self.sink.fetch(&filters).await?;

        let packer = PromptPacker::new(self.counter.as_ref(), self.settings.max_prompt_tokens);
        let prompt = packer.pack(&self.template, &candidates);

        self.sink.mark_consumed(&prompt.packed).await?;

        let prompt_id = Uuid::new_v4();
        let key = prompt_id.to_string();
        self.storage.upload(&key, &prompt.text).await?;
        self.output.enqueue(&key).await?;

        self.metrics
            .prompt_assembled(prompt.packed.len(), prompt.rejected.len(), started.elapsed());
        self.metrics.messages_published(self.output.name(), 1);
        info!(
            worker = self.id,
            record_id,
            prompt_id = %prompt_id,
            packed = prompt.packed.len(),
            rejected = prompt.rejected.len(),
            tokens = prompt.tokens,
            "Successfully published a new prompt"
        );

        Ok(AssembledPrompt {
            prompt_id,
            packed: prompt.packed,
            rejected: prompt.rejected,
            tokens: prompt.tokens,
        })
    }
}
