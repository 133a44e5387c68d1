//! Vector retrieval protocol: upsert with a consumed flag, two-step neighbour
//! fetch, and tombstoning.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::{VectorError, VectorResult};
use crate::models::{Candidate, FetchFilters, Metadata, Point, PointPayload, Record};
use crate::repository::PointRepository;

/// A vector store the pipeline writes records to and assembles prompts from.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Collection this sink writes to.
    fn collection(&self) -> &str;

    /// Embed and store `records`. Returns the metadata of the records that
    /// were actually stored.
    async fn upsert(&self, records: &[Record], embedding_size: u64) -> VectorResult<Vec<Metadata>>;

    /// Unconsumed neighbours of the unconsumed point whose `mail_id` is
    /// `filters.id`, best first, at most `filters.count`. Point ids are unique.
    async fn fetch(&self, filters: &FetchFilters) -> VectorResult<Vec<Candidate>>;

    /// Set `consumed = true` on exactly `ids`. Idempotent; empty input is a no-op.
    async fn mark_consumed(&self, ids: &[Uuid]) -> VectorResult<()>;
}

/// Sink over any [`PointRepository`] with an [`Embedder`] for the write path.
pub struct VectorSink<R: PointRepository> {
    repository: R,
    embedder: Arc<dyn Embedder>,
    collection: String,
}

impl<R: PointRepository> VectorSink<R> {
    pub fn new(repository: R, embedder: Arc<dyn Embedder>, collection: impl Into<String>) -> Self {
        Self {
            repository,
            embedder,
            collection: collection.into(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    async fn ensure_collection(&self, embedding_size: u64) -> VectorResult<()> {
        if self.repository.collection_exists(&self.collection).await? {
            return Ok(());
        }

        info!(collection = %self.collection, embedding_size, "Collection missing, creating");
        if let Err(e) = self
            .repository
            .create_collection(&self.collection, embedding_size)
            .await
        {
            // Another worker may have created it between the two calls.
            if !self.repository.collection_exists(&self.collection).await? {
                return Err(e);
            }
            debug!(collection = %self.collection, error = %e, "Collection created concurrently");
        }
        Ok(())
    }
}

#[async_trait]
impl<R: PointRepository> Sink for VectorSink<R> {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn upsert(&self, records: &[Record], embedding_size: u64) -> VectorResult<Vec<Metadata>> {
        self.ensure_collection(embedding_size).await?;

        let mut points = Vec::with_capacity(records.len());
        let mut stored = Vec::with_capacity(records.len());

        for record in records {
            let vector = self.embedder.embed(record.text()).await?;
            if vector.is_empty() {
                warn!(mail_id = %record.metadata.id, "Empty embedding, skipping record");
                continue;
            }

            points.push(Point {
                id: Uuid::new_v4(),
                vector,
                payload: PointPayload::from_record(record),
            });
            stored.push(record.metadata.clone());
        }

        if points.is_empty() {
            return Ok(stored);
        }

        let count = points.len();
        self.repository
            .upsert_points(&self.collection, points)
            .await?;

        info!(collection = %self.collection, count, "Upserted records");
        Ok(stored)
    }

    async fn fetch(&self, filters: &FetchFilters) -> VectorResult<Vec<Candidate>> {
        let mut references = self
            .repository
            .find_unconsumed(&filters.collection, &filters.id, 2)
            .await?;

        let reference = match references.len() {
            0 => return Err(VectorError::ReferenceNotFound(filters.id.clone())),
            1 => references.remove(0),
            matches => {
                return Err(VectorError::AmbiguousReference {
                    id: filters.id.clone(),
                    matches,
                });
            }
        };

        let vector = match reference.vector {
            Some(vector) if !vector.is_empty() => vector,
            _ => return Err(VectorError::MissingVector(filters.id.clone())),
        };

        let hits = self
            .repository
            .search_unconsumed(&filters.collection, vector, filters.count)
            .await?;

        let mut seen = HashSet::with_capacity(hits.len());
        let candidates: Vec<Candidate> = hits
            .into_iter()
            .filter(|hit| seen.insert(hit.id))
            .map(|hit| Candidate {
                point_id: hit.id,
                score: hit.score,
                record: hit.payload.into_record(),
            })
            .collect();

        debug!(
            collection = %filters.collection,
            id = %filters.id,
            candidates = candidates.len(),
            "Fetched candidates"
        );
        Ok(candidates)
    }

    async fn mark_consumed(&self, ids: &[Uuid]) -> VectorResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.repository
            .set_consumed(&self.collection, ids.to_vec())
            .await
    }
}
