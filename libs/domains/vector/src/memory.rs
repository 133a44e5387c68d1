//! In-memory point repository with cosine similarity search.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{VectorError, VectorResult};
use crate::models::{Point, ScoredPoint, StoredPoint};
use crate::repository::PointRepository;

#[derive(Debug, Default)]
struct Collection {
    dimension: u64,
    // Insertion order keeps search ties deterministic.
    points: Vec<Point>,
}

/// PointRepository held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryPointRepository {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryPointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points in a collection (0 if absent).
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |c| c.points.len())
    }

    /// Snapshot of every point in a collection, in insertion order.
    pub async fn points(&self, collection: &str) -> Vec<Point> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.points.clone())
            .unwrap_or_default()
    }

    /// Consumed flag of a single point.
    pub async fn is_consumed(&self, collection: &str, id: Uuid) -> Option<bool> {
        self.collections
            .read()
            .await
            .get(collection)?
            .points
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.payload.consumed)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn not_found(collection: &str) -> VectorError {
    VectorError::CollectionNotFound(collection.to_string())
}

#[async_trait]
impl PointRepository for InMemoryPointRepository {
    async fn collection_exists(&self, collection: &str) -> VectorResult<bool> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn create_collection(&self, collection: &str, dimension: u64) -> VectorResult<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(collection) {
            return Err(VectorError::Validation(format!(
                "Collection {collection} already exists"
            )));
        }
        collections.insert(
            collection.to_string(),
            Collection {
                dimension,
                points: Vec::new(),
            },
        );
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: Vec<Point>) -> VectorResult<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;

        for point in points {
            if point.vector.len() as u64 != target.dimension {
                return Err(VectorError::Validation(format!(
                    "Vector dimension {} does not match collection dimension {}",
                    point.vector.len(),
                    target.dimension
                )));
            }
            match target.points.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point,
                None => target.points.push(point),
            }
        }
        Ok(())
    }

    async fn find_unconsumed(
        &self,
        collection: &str,
        mail_id: &str,
        limit: u32,
    ) -> VectorResult<Vec<StoredPoint>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| not_found(collection))?;

        Ok(target
            .points
            .iter()
            .filter(|p| !p.payload.consumed && p.payload.mail_id == mail_id)
            .take(limit as usize)
            .map(|p| StoredPoint {
                id: p.id,
                vector: Some(p.vector.clone()),
                payload: p.payload.clone(),
            })
            .collect())
    }

    async fn search_unconsumed(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> VectorResult<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| not_found(collection))?;

        let mut hits: Vec<ScoredPoint> = target
            .points
            .iter()
            .filter(|p| !p.payload.consumed)
            .map(|p| ScoredPoint {
                id: p.id,
                score: cosine_similarity(&vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn set_consumed(&self, collection: &str, ids: Vec<Uuid>) -> VectorResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;

        for point in target.points.iter_mut().filter(|p| ids.contains(&p.id)) {
            point.payload.consumed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PointPayload;

    fn point(mail_id: &str, vector: Vec<f32>) -> Point {
        Point {
            id: Uuid::new_v4(),
            vector,
            payload: PointPayload {
                mail_id: mail_id.into(),
                thread_id: "t".into(),
                sender: "s".into(),
                date: None,
                data: format!("body of {mail_id}"),
                consumed: false,
            },
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_create_collection_twice_fails() {
        let repo = InMemoryPointRepository::new();
        repo.create_collection("c", 2).await.unwrap();
        assert!(repo.collection_exists("c").await.unwrap());
        assert!(repo.create_collection("c", 2).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension() {
        let repo = InMemoryPointRepository::new();
        repo.create_collection("c", 3).await.unwrap();
        let err = repo
            .upsert_points("c", vec![point("m", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity_and_skips_consumed() {
        let repo = InMemoryPointRepository::new();
        repo.create_collection("c", 2).await.unwrap();

        let near = point("near", vec![1.0, 0.1]);
        let far = point("far", vec![0.0, 1.0]);
        let gone = point("gone", vec![1.0, 0.0]);
        let gone_id = gone.id;
        repo.upsert_points("c", vec![far.clone(), near.clone(), gone])
            .await
            .unwrap();
        repo.set_consumed("c", vec![gone_id]).await.unwrap();

        let hits = repo.search_unconsumed("c", vec![1.0, 0.0], 10).await.unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![near.id, far.id]);
        assert_eq!(repo.is_consumed("c", gone_id).await, Some(true));
    }

    #[tokio::test]
    async fn test_find_unconsumed_by_mail_id() {
        let repo = InMemoryPointRepository::new();
        repo.create_collection("c", 2).await.unwrap();
        let target = point("m-1", vec![1.0, 0.0]);
        repo.upsert_points("c", vec![target.clone(), point("m-2", vec![0.0, 1.0])])
            .await
            .unwrap();

        let found = repo.find_unconsumed("c", "m-1", 2).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, target.id);
        assert_eq!(found[0].vector.as_deref(), Some(&[1.0, 0.0][..]));

        repo.set_consumed("c", vec![target.id]).await.unwrap();
        assert!(repo.find_unconsumed("c", "m-1", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let repo = InMemoryPointRepository::new();
        assert!(!repo.collection_exists("nope").await.unwrap());
        assert!(matches!(
            repo.search_unconsumed("nope", vec![1.0], 1).await,
            Err(VectorError::CollectionNotFound(_))
        ));
    }
}
