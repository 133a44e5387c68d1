//! Vector Domain Library
//!
//! Records harvested by the pipeline are embedded and stored as points in a
//! vector collection. Each point carries a `consumed` flag; prompt assembly
//! only ever retrieves unconsumed points and flips the flag on what it uses.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   VectorSink    │  ← upsert / fetch / mark_consumed
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐     ┌─────────────────┐
//! │ PointRepository │     │    Embedder     │
//! │    (trait)      │     │    (trait)      │
//! └────────┬────────┘     └────────┬────────┘
//!          │                       │
//! ┌────────▼──────────────┐ ┌──────▼──────────┐
//! │ QdrantRepository      │ │ OllamaEmbedder  │
//! │ InMemoryPointRepository│ │ OpenAIEmbedder  │
//! └───────────────────────┘ └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_vector::{
//!     FetchFilters, OllamaConfig, OllamaEmbedder, QdrantConfig, QdrantRepository, Sink,
//!     VectorSink,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QdrantConfig::new("localhost", "lkml");
//! let repository = QdrantRepository::new(config)?;
//! let embedder = Arc::new(OllamaEmbedder::new(OllamaConfig::new(
//!     "nomic-embed-text",
//!     "http://localhost:11434",
//! )));
//!
//! let sink = VectorSink::new(repository, embedder, "lkml");
//! let candidates = sink.fetch(&FetchFilters::new("lkml", "18c2f", 50)).await?;
//! let ids: Vec<_> = candidates.iter().map(|c| c.point_id).collect();
//! sink.mark_consumed(&ids).await?;
//! # Ok(())
//! # }
//! ```

pub mod embedding;
pub mod error;
pub mod memory;
pub mod models;
pub mod qdrant;
pub mod repository;
pub mod sink;

// Re-export commonly used types
pub use embedding::{Embedder, OllamaConfig, OllamaEmbedder, OpenAIConfig, OpenAIEmbedder};
pub use error::{VectorError, VectorResult};
pub use memory::InMemoryPointRepository;
pub use models::{
    Candidate, FetchFilters, Metadata, Point, PointPayload, Record, ScoredPoint, StoredPoint,
};
pub use qdrant::{QdrantConfig, QdrantRepository};
pub use repository::PointRepository;
pub use sink::{Sink, VectorSink};
