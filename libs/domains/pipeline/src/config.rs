//! Pipeline configuration document.
//!
//! One YAML file describes every connector the three stages use. Each role is
//! a closed enum selected by a `type` discriminant with its settings under
//! `config`, so an unknown connector fails when the file is loaded:
//!
//! ```yaml
//! sources:
//!   - type: gmail
//!     collection: lkml
//!     config:
//!       filters: linux-kernel.vger.kernel.org
//!       clientID: ${GMAIL_CLIENT_ID}
//!       clientSecret: ${GMAIL_CLIENT_SECRET}
//!       refreshToken: ${GMAIL_REFRESH_TOKEN}
//! buffer:
//!   type: nats
//!   config: { host: localhost, port: 4222, name: mails }
//! sinks:
//!   - type: qdrant
//!     config: { host: localhost, port: 6334, collection: lkml }
//! storage:
//!   - kind: prompts
//!     type: s3
//!     config:
//!       host: localhost
//!       port: 9000
//!       bucket: prompts
//!       accessKey: minio
//!       secretKey: ${MINIO_SECRET}
//! engine:
//!   type: ollama
//!   config: { model: nomic-embed-text, endpoint: "http://localhost:11434" }
//! llm:
//!   type: OpenAI
//!   config:
//!     apikey: ${OPENAI_API_KEY}
//!     model: gpt-4o-mini
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use core_config::expand_env;
use domain_vector::{OllamaConfig, OpenAIConfig, QdrantConfig};
use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};
use crate::feeder::ExhaustionPolicy;
use crate::llm::OpenAIChatConfig;
use crate::source::GmailConfig;
use crate::storage::{FilesystemConfig, S3Config};

/// Stream name of the second buffer, carrying prompt ids.
pub const PROMPTS_STREAM: &str = "prompts";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant helping me find work in Linux kernel by looking at linux mailing lists.";

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    pub buffer: BufferConfig,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    #[serde(default)]
    pub storage: Vec<StorageEntry>,
    pub engine: EngineConfig,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub application: ApplicationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    /// Collection name the source's records are grouped under
    pub collection: String,
    #[serde(flatten)]
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum SourceConfig {
    Gmail(GmailConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum BufferConfig {
    Nats(NatsBufferConfig),
    Memory,
}

impl BufferConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            BufferConfig::Nats(_) => "nats",
            BufferConfig::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsBufferConfig {
    pub host: String,
    #[serde(default = "default_nats_port")]
    pub port: u16,
    /// Stream name of the record-id buffer
    pub name: String,
    #[serde(default = "default_ack_wait_secs")]
    pub ack_wait_secs: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Deliveries before an unacknowledged message is dropped (-1 = never)
    #[serde(default = "default_max_deliver")]
    pub max_deliver: i64,
}

fn default_nats_port() -> u16 {
    4222
}

fn default_ack_wait_secs() -> u64 {
    30
}

fn default_fetch_timeout_ms() -> u64 {
    5000
}

fn default_max_deliver() -> i64 {
    -1
}

impl NatsBufferConfig {
    /// Same connection settings, different stream.
    pub fn with_stream(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum SinkConfig {
    Qdrant(QdrantConfig),
    Memory(MemorySinkConfig),
}

impl SinkConfig {
    pub fn collection(&self) -> &str {
        match self {
            SinkConfig::Qdrant(config) => &config.collection,
            SinkConfig::Memory(config) => &config.collection,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemorySinkConfig {
    pub collection: String,
}

/// Role a storage entry plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Prompts,
    Responses,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageEntry {
    pub kind: StorageKind,
    #[serde(flatten)]
    pub backend: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum StorageConfig {
    #[serde(alias = "minio")]
    S3(S3Config),
    Filesystem(FilesystemConfig),
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "config")]
pub enum EngineConfig {
    #[serde(rename = "ollama")]
    Ollama(OllamaConfig),
    #[serde(rename = "openai", alias = "OpenAI")]
    OpenAi(OpenAIConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "config")]
pub enum LlmConfig {
    #[serde(rename = "openai", alias = "OpenAI")]
    OpenAi(OpenAIChatConfig),
}

/// Process tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub ingestion_routines: usize,
    pub embedding_size: u64,
    pub max_prompt_tokens: usize,
    pub max_vector_fetch: u64,
    /// Daily ceiling on completion tokens
    pub max_usage_tokens: u64,
    pub processor_workers: usize,
    pub dispatch_workers: usize,
    pub prompt_template: PathBuf,
    pub tokenizer_model: String,
    pub system_prompt: String,
    pub exhaustion_policy: ExhaustionPolicy,
    pub poll_backoff_ms: u64,
    pub poll_backoff_max_ms: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            ingestion_routines: 4,
            embedding_size: 768,
            max_prompt_tokens: 8000,
            max_vector_fetch: 50,
            max_usage_tokens: 100_000,
            processor_workers: 2,
            dispatch_workers: 1,
            prompt_template: PathBuf::from("prompt"),
            tokenizer_model: "gpt-4o".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            exhaustion_policy: ExhaustionPolicy::default(),
            poll_backoff_ms: 100,
            poll_backoff_max_ms: 5000,
        }
    }
}

impl ApplicationConfig {
    pub fn poll_backoff(&self) -> messaging::PollBackoff {
        messaging::PollBackoff::new(
            Duration::from_millis(self.poll_backoff_ms),
            Duration::from_millis(self.poll_backoff_max_ms),
        )
    }

    fn validate(&self) -> PipelineResult<()> {
        let positive = [
            ("ingestion_routines", self.ingestion_routines as u64),
            ("embedding_size", self.embedding_size),
            ("max_prompt_tokens", self.max_prompt_tokens as u64),
            ("max_vector_fetch", self.max_vector_fetch),
            ("processor_workers", self.processor_workers as u64),
            ("dispatch_workers", self.dispatch_workers as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PipelineError::Config(format!(
                    "application.{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

impl PipelineConfig {
    /// Read, parse, expand `${VAR}` secrets and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> PipelineResult<Self> {
        let mut config: PipelineConfig = serde_yaml_ng::from_str(raw)?;
        config.expand_secrets()?;
        config.application.validate()?;
        Ok(config)
    }

    /// Storage entries of the given role, in document order.
    pub fn storages(&self, kind: StorageKind) -> impl Iterator<Item = &StorageConfig> {
        self.storage
            .iter()
            .filter(move |entry| entry.kind == kind)
            .map(|entry| &entry.backend)
    }

    fn expand_secrets(&mut self) -> PipelineResult<()> {
        for entry in &mut self.sources {
            match &mut entry.source {
                SourceConfig::Gmail(gmail) => {
                    expand_in_place(&mut gmail.client_id)?;
                    expand_in_place(&mut gmail.client_secret)?;
                    expand_in_place(&mut gmail.refresh_token)?;
                }
            }
        }
        for sink in &mut self.sinks {
            if let SinkConfig::Qdrant(qdrant) = sink
                && let Some(api_key) = qdrant.api_key.as_mut()
            {
                expand_in_place(api_key)?;
            }
        }
        for entry in &mut self.storage {
            if let StorageConfig::S3(s3) = &mut entry.backend {
                expand_in_place(&mut s3.access_key)?;
                expand_in_place(&mut s3.secret_key)?;
            }
        }
        if let EngineConfig::OpenAi(openai) = &mut self.engine {
            expand_in_place(&mut openai.api_key)?;
        }
        if let Some(LlmConfig::OpenAi(openai)) = &mut self.llm {
            expand_in_place(&mut openai.api_key)?;
        }
        Ok(())
    }
}

fn expand_in_place(value: &mut String) -> PipelineResult<()> {
    *value = expand_env(value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
sources:
  - type: gmail
    collection: lkml
    config:
      filters: linux-kernel.vger.kernel.org
      clientID: client
      clientSecret: ${CAELUS_TEST_SECRET}
      refreshToken: refresh
buffer:
  type: nats
  config:
    host: localhost
    port: 4222
    name: mails
sinks:
  - kind: mails
    type: qdrant
    config:
      host: localhost
      collection: lkml
storage:
  - kind: prompts
    type: minio
    config:
      host: localhost
      port: 9000
      accessKey: minio
      secretKey: minio123
      bucket: prompts
  - kind: responses
    type: filesystem
    config:
      root: /tmp/caelus/responses
engine:
  type: ollama
  config:
    model: nomic-embed-text
    endpoint: http://localhost:11434
llm:
  type: OpenAI
  config:
    apikey: sk-test
    model: gpt-4o-mini
application:
  ingestion_routines: 2
  max_prompt_tokens: 4000
  exhaustion_policy: stop_pool
"#;

    fn parse() -> PipelineConfig {
        temp_env::with_var("CAELUS_TEST_SECRET", Some("s3cret"), || {
            PipelineConfig::from_yaml(DOCUMENT).unwrap()
        })
    }

    #[test]
    fn test_full_document() {
        let config = parse();

        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].collection, "lkml");
        let SourceConfig::Gmail(gmail) = &config.sources[0].source;
        assert_eq!(gmail.client_secret, "s3cret");
        assert_eq!(gmail.query, "newer_than:1d");

        let BufferConfig::Nats(nats) = &config.buffer else {
            panic!("expected nats buffer");
        };
        assert_eq!(nats.name, "mails");
        assert_eq!(nats.with_stream(PROMPTS_STREAM).name, "prompts");
        assert_eq!(nats.with_stream(PROMPTS_STREAM).port, 4222);
        assert_eq!(nats.max_deliver, -1);
        assert_eq!(nats.ack_wait_secs, 30);

        assert_eq!(config.sinks[0].collection(), "lkml");
        assert!(matches!(config.engine, EngineConfig::Ollama(_)));
        assert!(matches!(config.llm, Some(LlmConfig::OpenAi(_))));
    }

    #[test]
    fn test_storage_roles() {
        let config = parse();
        let prompts: Vec<_> = config.storages(StorageKind::Prompts).collect();
        let responses: Vec<_> = config.storages(StorageKind::Responses).collect();
        assert_eq!(prompts.len(), 1);
        assert!(matches!(prompts[0], StorageConfig::S3(s3) if s3.bucket == "prompts"));
        assert!(matches!(responses[0], StorageConfig::Filesystem(_)));
    }

    #[test]
    fn test_application_defaults_and_overrides() {
        let app = parse().application;
        assert_eq!(app.ingestion_routines, 2);
        assert_eq!(app.max_prompt_tokens, 4000);
        assert_eq!(app.max_vector_fetch, 50);
        assert_eq!(app.tokenizer_model, "gpt-4o");
        assert_eq!(app.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(app.exhaustion_policy, ExhaustionPolicy::StopPool);
    }

    #[test]
    fn test_unknown_connector_type_fails() {
        let raw = r#"
buffer:
  type: kafka
  config: { host: localhost }
engine:
  type: ollama
  config: { model: m, endpoint: "http://localhost:11434" }
"#;
        assert!(matches!(
            PipelineConfig::from_yaml(raw),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_memory_connectors() {
        let raw = r#"
buffer:
  type: memory
sinks:
  - type: memory
    config: { collection: test }
storage:
  - kind: prompts
    type: memory
engine:
  type: ollama
  config: { model: m, endpoint: "http://localhost:11434" }
"#;
        let config = PipelineConfig::from_yaml(raw).unwrap();
        assert_eq!(config.buffer.type_name(), "memory");
        assert_eq!(config.sinks[0].collection(), "test");
        assert!(matches!(config.storage[0].backend, StorageConfig::Memory));
        assert!(config.llm.is_none());
    }

    #[test]
    fn test_missing_secret_variable_fails() {
        temp_env::with_var_unset("CAELUS_TEST_SECRET", || {
            assert!(matches!(
                PipelineConfig::from_yaml(DOCUMENT),
                Err(PipelineError::Env(_))
            ));
        });
    }

    #[test]
    fn test_zero_routines_rejected() {
        let raw = r#"
buffer:
  type: memory
engine:
  type: ollama
  config: { model: m, endpoint: "http://localhost:11434" }
application:
  ingestion_routines: 0
"#;
        let err = PipelineConfig::from_yaml(raw).unwrap_err();
        assert!(err.to_string().contains("ingestion_routines"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "buffer:\n  type: memory\nengine:\n  type: ollama\n  config: { model: m, endpoint: e }\n",
        )
        .unwrap();
        assert!(PipelineConfig::load(&path).is_ok());
        assert!(PipelineConfig::load(dir.path().join("missing.yaml")).is_err());
    }
}
