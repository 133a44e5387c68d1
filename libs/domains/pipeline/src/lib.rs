//! Pipeline Domain Library
//!
//! The three stages of caelus and the connectors they run on.
//!
//! ```text
//!            ┌──────────────┐   record ids   ┌───────────────┐   prompt ids   ┌──────────────┐
//!  Source ──▶│  ingestion   │──────────────▶│   processor   │──────────────▶│    feeder    │──▶ responses
//!            │ (upsert+enq) │   Buffer #1    │ (fetch+pack)  │   Buffer #2    │ (LLM+budget) │    storage
//!            └──────┬───────┘                └───────┬───────┘                └──────────────┘
//!                   ▼                                │ mark consumed
//!                 Sink  ◀────────────────────────────┘
//! ```
//!
//! [`factory::Components`] turns a [`config::PipelineConfig`] into the
//! stage runners: [`IngestionManager`], [`ProcessorPool`] and
//! [`DispatchPool`]. Long-running stages stop when the shutdown watch
//! channel flips to `true`; in-flight calls are allowed to finish.

pub mod budget;
pub mod config;
pub mod error;
pub mod factory;
pub mod feeder;
pub mod ingestion;
pub mod llm;
pub mod metrics;
pub mod processor;
pub mod shutdown;
pub mod source;
pub mod storage;
pub mod tokenizer;

pub use budget::TokenBudget;
pub use config::{PipelineConfig, StorageKind};
pub use error::{PipelineError, PipelineResult};
pub use factory::Components;
pub use feeder::{DispatchPool, DispatchSettings, Dispatcher, ExhaustionPolicy};
pub use ingestion::{IngestionManager, IngestionReport, partition};
pub use llm::{Completion, CompletionClient};
pub use processor::{PackedPrompt, ProcessorPool, ProcessorSettings, PromptAssembler, PromptPacker};
pub use source::{MemorySource, Source};
pub use storage::{BlobStorage, MemoryStorage};
pub use tokenizer::{TiktokenCounter, TokenCounter, WhitespaceCounter};
