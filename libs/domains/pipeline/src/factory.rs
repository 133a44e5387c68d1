//! Builds live connectors and stage runners from a [`PipelineConfig`].
//!
//! Every connector is created at most once per [`Components`], so stages
//! started from the same instance share buffers, sinks and storages. This is
//! what lets the in-memory connectors carry work from one stage to the next
//! inside a single process.

use std::sync::Arc;

use domain_vector::{
    Embedder, InMemoryPointRepository, OllamaEmbedder, OpenAIEmbedder, QdrantRepository, Sink,
    VectorSink,
};
use messaging::nats::{JetStreamBuffer, JetStreamConfig};
use messaging::{Buffer, MemoryBuffer, MemoryBufferConfig};
use tokio::sync::OnceCell;
use tracing::info;

use crate::budget::TokenBudget;
use crate::config::{
    BufferConfig, EngineConfig, LlmConfig, NatsBufferConfig, PROMPTS_STREAM, PipelineConfig,
    SinkConfig, SourceConfig, StorageConfig, StorageKind,
};
use crate::error::{PipelineError, PipelineResult};
use crate::feeder::{DispatchPool, DispatchSettings};
use crate::ingestion::IngestionManager;
use crate::llm::{CompletionClient, OpenAIChatClient};
use crate::processor::{ProcessorPool, ProcessorSettings, load_template};
use crate::source::{GmailSource, Source};
use crate::storage::{BlobStorage, FilesystemStorage, MemoryStorage, S3Storage};
use crate::tokenizer::{TiktokenCounter, TokenCounter};

type Storages = Vec<(StorageKind, Arc<dyn BlobStorage>)>;

pub struct Components {
    config: PipelineConfig,
    record_buffer: OnceCell<Arc<dyn Buffer>>,
    prompt_buffer: OnceCell<Arc<dyn Buffer>>,
    embedder: OnceCell<Arc<dyn Embedder>>,
    sinks: OnceCell<Vec<Arc<dyn Sink>>>,
    storages: OnceCell<Storages>,
}

impl Components {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            record_buffer: OnceCell::new(),
            prompt_buffer: OnceCell::new(),
            embedder: OnceCell::new(),
            sinks: OnceCell::new(),
            storages: OnceCell::new(),
        }
    }

    /// Use `embedder` instead of the configured engine.
    pub fn with_embedder(config: PipelineConfig, embedder: Arc<dyn Embedder>) -> Self {
        let components = Self::new(config);
        // Freshly created, so the cell is empty.
        let _ = components.embedder.set(embedder);
        components
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Buffer carrying record ids from ingestion to the processor.
    pub async fn record_buffer(&self) -> PipelineResult<Arc<dyn Buffer>> {
        self.record_buffer
            .get_or_try_init(|| async {
                match &self.config.buffer {
                    BufferConfig::Nats(nats) => connect_nats(nats).await,
                    BufferConfig::Memory => Ok(memory_buffer("mails")),
                }
            })
            .await
            .cloned()
    }

    /// Buffer carrying prompt ids from the processor to the feeder.
    pub async fn prompt_buffer(&self) -> PipelineResult<Arc<dyn Buffer>> {
        self.prompt_buffer
            .get_or_try_init(|| async {
                match &self.config.buffer {
                    BufferConfig::Nats(nats) => connect_nats(&nats.with_stream(PROMPTS_STREAM)).await,
                    BufferConfig::Memory => Ok(memory_buffer(PROMPTS_STREAM)),
                }
            })
            .await
            .cloned()
    }

    pub async fn embedder(&self) -> PipelineResult<Arc<dyn Embedder>> {
        self.embedder
            .get_or_try_init(|| async {
                let embedder: Arc<dyn Embedder> = match &self.config.engine {
                    EngineConfig::Ollama(config) => Arc::new(OllamaEmbedder::new(config.clone())),
                    EngineConfig::OpenAi(config) => Arc::new(OpenAIEmbedder::new(config.clone())),
                };
                embedder.prepare().await?;
                Ok::<_, PipelineError>(embedder)
            })
            .await
            .cloned()
    }

    pub async fn sinks(&self) -> PipelineResult<Vec<Arc<dyn Sink>>> {
        self.sinks
            .get_or_try_init(|| async {
                let embedder = self.embedder().await?;
                let mut sinks: Vec<Arc<dyn Sink>> = Vec::with_capacity(self.config.sinks.len());

                for sink in &self.config.sinks {
                    let collection = sink.collection().to_string();
                    match sink {
                        SinkConfig::Qdrant(config) => {
                            let repository = QdrantRepository::new(config.clone())?;
                            sinks.push(Arc::new(VectorSink::new(
                                repository,
                                embedder.clone(),
                                collection,
                            )));
                        }
                        SinkConfig::Memory(_) => {
                            sinks.push(Arc::new(VectorSink::new(
                                InMemoryPointRepository::new(),
                                embedder.clone(),
                                collection,
                            )));
                        }
                    }
                }
                Ok::<_, PipelineError>(sinks)
            })
            .await
            .cloned()
    }

    /// Every configured storage playing `kind`, in document order.
    pub async fn storages(&self, kind: StorageKind) -> PipelineResult<Vec<Arc<dyn BlobStorage>>> {
        let storages = self
            .storages
            .get_or_try_init(|| async {
                let mut storages: Storages = Vec::with_capacity(self.config.storage.len());
                for entry in &self.config.storage {
                    let storage: Arc<dyn BlobStorage> = match &entry.backend {
                        StorageConfig::S3(config) => {
                            Arc::new(S3Storage::connect(config.clone()).await?)
                        }
                        StorageConfig::Filesystem(config) => {
                            Arc::new(FilesystemStorage::open(config.clone()).await?)
                        }
                        StorageConfig::Memory => Arc::new(MemoryStorage::new()),
                    };
                    storages.push((entry.kind, storage));
                }
                Ok::<_, PipelineError>(storages)
            })
            .await?;

        Ok(storages
            .iter()
            .filter(|(role, _)| *role == kind)
            .map(|(_, storage)| storage.clone())
            .collect())
    }

    pub fn sources(&self) -> Vec<Arc<dyn Source>> {
        self.config
            .sources
            .iter()
            .map(|entry| match &entry.source {
                SourceConfig::Gmail(config) => {
                    Arc::new(GmailSource::new(config.clone(), entry.collection.clone()))
                        as Arc<dyn Source>
                }
            })
            .collect()
    }

    pub fn completion_client(&self) -> PipelineResult<Arc<dyn CompletionClient>> {
        match &self.config.llm {
            Some(LlmConfig::OpenAi(config)) => Ok(Arc::new(OpenAIChatClient::new(config.clone()))),
            None => Err(PipelineError::Config(
                "An llm section is required to dispatch prompts".into(),
            )),
        }
    }

    pub fn token_counter(&self) -> PipelineResult<Arc<dyn TokenCounter>> {
        let counter = TiktokenCounter::for_model(&self.config.application.tokenizer_model)?;
        Ok(Arc::new(counter))
    }

    pub async fn ingestion_manager(&self) -> PipelineResult<IngestionManager> {
        let app = &self.config.application;
        Ok(IngestionManager::new(
            self.sources(),
            self.sinks().await?,
            self.record_buffer().await?,
            app.ingestion_routines,
            app.embedding_size,
        ))
    }

    pub async fn processor_pool(&self) -> PipelineResult<ProcessorPool> {
        let app = &self.config.application;
        let template = load_template(&app.prompt_template).await?;

        ProcessorPool::new(
            self.record_buffer().await?,
            self.prompt_buffer().await?,
            self.sinks().await?,
            self.storages(StorageKind::Prompts).await?,
            self.token_counter()?,
            template,
            ProcessorSettings {
                max_vector_fetch: app.max_vector_fetch,
                max_prompt_tokens: app.max_prompt_tokens,
                backoff: app.poll_backoff(),
            },
            app.processor_workers,
        )
    }

    /// The feeder reads prompts from the last configured prompts storage.
    pub async fn dispatch_pool(&self) -> PipelineResult<DispatchPool> {
        let app = &self.config.application;
        let prompts = self
            .storages(StorageKind::Prompts)
            .await?
            .pop()
            .ok_or_else(|| {
                PipelineError::Config("Dispatcher needs a prompts storage".into())
            })?;

        DispatchPool::new(
            self.prompt_buffer().await?,
            prompts,
            self.storages(StorageKind::Responses).await?,
            self.completion_client()?,
            Arc::new(TokenBudget::new(app.max_usage_tokens)),
            DispatchSettings {
                system_prompt: app.system_prompt.clone(),
                backoff: app.poll_backoff(),
                policy: app.exhaustion_policy,
            },
            app.dispatch_workers,
        )
    }
}

async fn connect_nats(config: &NatsBufferConfig) -> PipelineResult<Arc<dyn Buffer>> {
    let jetstream = JetStreamConfig::from_host_port(&config.host, config.port, config.name.clone())
        .with_ack_wait(config.ack_wait())
        .with_fetch_timeout(config.fetch_timeout())
        .with_max_deliver(config.max_deliver);
    let buffer = JetStreamBuffer::connect(jetstream).await?;
    Ok(Arc::new(buffer))
}

fn memory_buffer(name: &str) -> Arc<dyn Buffer> {
    info!(buffer = name, "Using in-memory buffer");
    Arc::new(MemoryBuffer::with_config(name, MemoryBufferConfig::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain_vector::VectorResult;

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> VectorResult<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn memory_config(template: &std::path::Path) -> PipelineConfig {
        let raw = format!(
            r#"
buffer:
  type: memory
sinks:
  - type: memory
    config:
      collection: lkml
storage:
  - kind: prompts
    type: memory
  - kind: responses
    type: memory
  - kind: responses
    type: memory
engine:
  type: ollama
  config:
    model: nomic-embed-text
    endpoint: "http://localhost:11434"
llm:
  type: openai
  config:
    apikey: test-key
    model: gpt-4o-mini
application:
  prompt_template: {}
  dispatch_workers: 2
"#,
            template.display()
        );
        PipelineConfig::from_yaml(&raw).unwrap()
    }

    fn components(dir: &tempfile::TempDir) -> Components {
        let template = dir.path().join("prompt");
        std::fs::write(&template, "Find kernel work:").unwrap();
        Components::with_embedder(memory_config(&template), Arc::new(UnitEmbedder))
    }

    #[tokio::test]
    async fn test_connectors_are_built_once() {
        let dir = tempfile::tempdir().unwrap();
        let components = components(&dir);

        let first = components.record_buffer().await.unwrap();
        let second = components.record_buffer().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let prompts = components.prompt_buffer().await.unwrap();
        assert_eq!(prompts.name(), PROMPTS_STREAM);
        assert!(!Arc::ptr_eq(&first, &prompts));

        let sinks = components.sinks().await.unwrap();
        assert!(Arc::ptr_eq(&sinks[0], &components.sinks().await.unwrap()[0]));
    }

    #[tokio::test]
    async fn test_storages_split_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let components = components(&dir);

        assert_eq!(components.storages(StorageKind::Prompts).await.unwrap().len(), 1);
        assert_eq!(components.storages(StorageKind::Responses).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_builds_stage_runners() {
        let dir = tempfile::tempdir().unwrap();
        let components = components(&dir);

        let processor = components.processor_pool().await.unwrap();
        assert_eq!(processor.worker_count(), 2);

        let dispatcher = components.dispatch_pool().await.unwrap();
        assert_eq!(dispatcher.worker_count(), 4);
        assert_eq!(dispatcher.budget().limit(), 100_000);

        assert!(components.sources().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_buffer_keeps_unacked_items() {
        let dir = tempfile::tempdir().unwrap();
        let components = components(&dir);
        let buffer = components.record_buffer().await.unwrap();
        buffer.enqueue("m-1").await.unwrap();

        for delivery in 1..=10 {
            let message = buffer.dequeue().await.unwrap();
            assert_eq!(message.payload(), "m-1");
            assert_eq!(message.delivery_count, delivery);
            tokio::time::advance(std::time::Duration::from_secs(31)).await;
        }
    }

    #[tokio::test]
    async fn test_dispatch_requires_llm() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("prompt");
        let mut config = memory_config(&template);
        config.llm = None;

        let components = Components::with_embedder(config, Arc::new(UnitEmbedder));
        assert!(matches!(
            components.dispatch_pool().await,
            Err(PipelineError::Config(_))
        ));
    }
}
