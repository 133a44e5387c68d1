use async_trait::async_trait;
use domain_vector::{Metadata, Record};

use super::Source;
use crate::error::PipelineResult;

/// Source over a fixed set of records.
#[derive(Debug, Clone)]
pub struct MemorySource {
    collection: String,
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(collection: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            collection: collection.into(),
            records,
        }
    }
}

#[async_trait]
impl Source for MemorySource {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn list_metadata(&self) -> PipelineResult<Vec<Metadata>> {
        Ok(self.records.iter().map(|r| r.metadata.clone()).collect())
    }

    async fn fetch_records(&self, metadata: &[Metadata]) -> PipelineResult<Vec<Record>> {
        Ok(metadata
            .iter()
            .filter_map(|m| self.records.iter().find(|r| &r.metadata == m).cloned())
            .collect())
    }
}
