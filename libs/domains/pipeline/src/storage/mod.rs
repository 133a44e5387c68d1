//! Blob storage for prompts and responses.
//!
//! Objects are plain text stored under opaque keys (prompt UUIDs). Prompt
//! storage is written by the processor and read by the feeder; response
//! storage is written by the feeder under the same key as the prompt.

mod filesystem;
mod memory;
mod s3;

pub use filesystem::{FilesystemConfig, FilesystemStorage};
pub use memory::MemoryStorage;
pub use s3::{S3Config, S3Storage};

use async_trait::async_trait;

use crate::error::PipelineResult;

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `data` under `key`, replacing any previous object.
    async fn upload(&self, key: &str, data: &str) -> PipelineResult<()>;

    /// Fetch the object stored under `key`.
    ///
    /// A missing object is `PipelineError::ObjectNotFound`.
    async fn download(&self, key: &str) -> PipelineResult<String>;
}
