use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::BlobStorage;
use crate::error::{PipelineError, PipelineResult};

/// Blob storage held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).cloned()
    }
}

#[async_trait]
impl BlobStorage for MemoryStorage {
    async fn upload(&self, key: &str, data: &str) -> PipelineResult<()> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), data.to_string());
        Ok(())
    }

    async fn download(&self, key: &str) -> PipelineResult<String> {
        self.get(key)
            .await
            .ok_or_else(|| PipelineError::ObjectNotFound(key.to_string()))
    }
}
