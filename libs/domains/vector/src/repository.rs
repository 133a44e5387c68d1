use async_trait::async_trait;
use uuid::Uuid;

use crate::error::VectorResult;
use crate::models::{Point, ScoredPoint, StoredPoint};

/// Repository trait for point storage operations
///
/// This trait abstracts the underlying vector database. Collections use cosine
/// distance; every query here is restricted to points whose `consumed` flag
/// is false.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PointRepository: Send + Sync {
    // ===== Collection Management =====

    /// Whether the collection exists. Errors only on lookup failure.
    async fn collection_exists(&self, collection: &str) -> VectorResult<bool>;

    /// Create a collection of `dimension`-sized vectors with cosine distance
    async fn create_collection(&self, collection: &str, dimension: u64) -> VectorResult<()>;

    // ===== Point Operations =====

    /// Upsert points in one batch
    async fn upsert_points(&self, collection: &str, points: Vec<Point>) -> VectorResult<()>;

    /// Unconsumed points whose `mail_id` equals `mail_id`, with vectors
    async fn find_unconsumed(
        &self,
        collection: &str,
        mail_id: &str,
        limit: u32,
    ) -> VectorResult<Vec<StoredPoint>>;

    /// Nearest unconsumed points to `vector`, best first, with payload
    async fn search_unconsumed(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> VectorResult<Vec<ScoredPoint>>;

    /// Set `consumed = true` on exactly the given points
    async fn set_consumed(&self, collection: &str, ids: Vec<Uuid>) -> VectorResult<()>;
}
