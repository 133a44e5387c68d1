//! Document sources feeding the ingestion scheduler.

mod gmail;
mod memory;

pub use gmail::{GmailConfig, GmailSource};
pub use memory::MemorySource;

use async_trait::async_trait;
use domain_vector::{Metadata, Record};

use crate::error::PipelineResult;

/// A harvestable document source.
///
/// Listing is cheap and returns identifiers only; `fetch_records` resolves a
/// slice of them into full records and may drop items the source filters out.
#[async_trait]
pub trait Source: Send + Sync {
    /// Collection the source's records belong to.
    fn collection(&self) -> &str;

    async fn list_metadata(&self) -> PipelineResult<Vec<Metadata>>;

    async fn fetch_records(&self, metadata: &[Metadata]) -> PipelineResult<Vec<Record>>;
}
