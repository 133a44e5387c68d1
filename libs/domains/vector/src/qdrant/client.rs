use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    self, Condition, CreateCollectionBuilder, Distance, Filter, PointId, PointStruct,
    PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder, SetPayloadPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::{debug, info};
use uuid::Uuid;

use super::QdrantConfig;
use crate::error::{VectorError, VectorResult};
use crate::models::{fields, Point, PointPayload, ScoredPoint, StoredPoint};
use crate::repository::PointRepository;

/// Qdrant-backed implementation of PointRepository
pub struct QdrantRepository {
    client: Qdrant,
}

impl QdrantRepository {
    pub fn new(config: QdrantConfig) -> VectorResult<Self> {
        let mut builder = Qdrant::from_url(&config.url());

        if let Some(api_key) = config.api_key {
            builder = builder.api_key(api_key);
        }

        builder = builder.timeout(Duration::from_secs(config.timeout_secs));

        let client = builder
            .build()
            .map_err(|e| VectorError::Qdrant(format!("Failed to build client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn from_client(client: Qdrant) -> Self {
        Self { client }
    }

    fn uuid_to_point_id(id: Uuid) -> PointId {
        PointId::from(id.to_string())
    }

    fn point_id_to_uuid(point_id: Option<&PointId>) -> VectorResult<Uuid> {
        match point_id.and_then(|p| p.point_id_options.as_ref()) {
            Some(qdrant::point_id::PointIdOptions::Uuid(uuid_str)) => Uuid::parse_str(uuid_str)
                .map_err(|e| VectorError::Internal(format!("Invalid UUID: {}", e))),
            Some(qdrant::point_id::PointIdOptions::Num(num)) => Ok(Uuid::from_u128(*num as u128)),
            None => Err(VectorError::Internal("Missing point ID".to_string())),
        }
    }

    fn payload_to_qdrant(payload: &PointPayload) -> HashMap<String, QdrantValue> {
        let mut result = HashMap::new();

        if let serde_json::Value::Object(map) = payload.to_json() {
            for (key, val) in map {
                if let Some(qdrant_val) = json_to_qdrant_value(val) {
                    result.insert(key, qdrant_val);
                }
            }
        }

        result
    }

    fn qdrant_to_payload(payload: HashMap<String, QdrantValue>) -> VectorResult<PointPayload> {
        let mut map = serde_json::Map::new();
        for (key, val) in payload {
            if let Some(json_val) = qdrant_value_to_json(val) {
                map.insert(key, json_val);
            }
        }

        Ok(PointPayload::from_json(serde_json::Value::Object(map))?)
    }

    fn unconsumed() -> Condition {
        Condition::matches(fields::CONSUMED, false)
    }

    /// Extract vector values from VectorsOutput
    /// Note: Uses deprecated data field for now until migration to 1.18+
    #[allow(deprecated)]
    fn extract_vector_from_output(vectors: &Option<qdrant::VectorsOutput>) -> Option<Vec<f32>> {
        match vectors {
            Some(qdrant::VectorsOutput {
                vectors_options: Some(opts),
            }) => match opts {
                qdrant::vectors_output::VectorsOptions::Vector(v) => Some(v.data.clone()),
                qdrant::vectors_output::VectorsOptions::Vectors(map) => {
                    map.vectors.values().next().map(|v| v.data.clone())
                }
            },
            _ => None,
        }
    }
}

fn json_to_qdrant_value(val: serde_json::Value) -> Option<QdrantValue> {
    match val {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(QdrantValue::from(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(QdrantValue::from(i))
            } else {
                n.as_f64().map(QdrantValue::from)
            }
        }
        serde_json::Value::String(s) => Some(QdrantValue::from(s)),
        _ => Some(QdrantValue::from(val.to_string())),
    }
}

fn qdrant_value_to_json(val: QdrantValue) -> Option<serde_json::Value> {
    use qdrant::value::Kind;

    match val.kind {
        Some(Kind::NullValue(_)) => Some(serde_json::Value::Null),
        Some(Kind::BoolValue(b)) => Some(serde_json::Value::Bool(b)),
        Some(Kind::IntegerValue(i)) => Some(serde_json::Value::Number(i.into())),
        Some(Kind::DoubleValue(f)) => {
            serde_json::Number::from_f64(f).map(serde_json::Value::Number)
        }
        Some(Kind::StringValue(s)) => Some(serde_json::Value::String(s)),
        _ => None,
    }
}

#[async_trait]
impl PointRepository for QdrantRepository {
    async fn collection_exists(&self, collection: &str) -> VectorResult<bool> {
        Ok(self.client.collection_exists(collection).await?)
    }

    async fn create_collection(&self, collection: &str, dimension: u64) -> VectorResult<()> {
        info!(collection, dimension, "Creating collection");

        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine)),
            )
            .await?;
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: Vec<Point>) -> VectorResult<()> {
        let count = points.len();
        let points: Vec<PointStruct> = points
            .into_iter()
            .map(|p| {
                PointStruct::new(
                    Self::uuid_to_point_id(p.id),
                    p.vector,
                    Self::payload_to_qdrant(&p.payload),
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await?;

        debug!(collection, count, "Upserted points");
        Ok(())
    }

    async fn find_unconsumed(
        &self,
        collection: &str,
        mail_id: &str,
        limit: u32,
    ) -> VectorResult<Vec<StoredPoint>> {
        let filter = Filter::must([
            Condition::matches(fields::MAIL_ID, mail_id.to_string()),
            Self::unconsumed(),
        ]);

        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(collection)
                    .filter(filter)
                    .limit(limit)
                    .with_vectors(true)
                    .with_payload(true),
            )
            .await?;

        response
            .result
            .into_iter()
            .map(|point| {
                Ok(StoredPoint {
                    id: Self::point_id_to_uuid(point.id.as_ref())?,
                    vector: Self::extract_vector_from_output(&point.vectors),
                    payload: Self::qdrant_to_payload(point.payload)?,
                })
            })
            .collect()
    }

    async fn search_unconsumed(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> VectorResult<Vec<ScoredPoint>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, vector, limit)
                    .filter(Filter::must([Self::unconsumed()]))
                    .with_payload(true),
            )
            .await?;

        response
            .result
            .into_iter()
            .map(|point| {
                Ok(ScoredPoint {
                    id: Self::point_id_to_uuid(point.id.as_ref())?,
                    score: point.score,
                    payload: Self::qdrant_to_payload(point.payload)?,
                })
            })
            .collect()
    }

    async fn set_consumed(&self, collection: &str, ids: Vec<Uuid>) -> VectorResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut payload = HashMap::new();
        payload.insert(fields::CONSUMED.to_string(), QdrantValue::from(true));
        let count = ids.len();

        self.client
            .set_payload(
                SetPayloadPointsBuilder::new(collection, Payload::from(payload))
                    .points_selector(PointsIdsList {
                        ids: ids.into_iter().map(Self::uuid_to_point_id).collect(),
                    })
                    .wait(true),
            )
            .await?;

        debug!(collection, count, "Marked points consumed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, Record};

    #[test]
    fn test_payload_conversion_preserves_fields() {
        let record = Record {
            metadata: Metadata::new("m-1", "t-1"),
            sender: "a@b.org".into(),
            date: chrono::DateTime::from_timestamp(1_700_000_000, 0),
            body: "hello".into(),
        };
        let payload = PointPayload::from_record(&record);

        let qdrant_payload = QdrantRepository::payload_to_qdrant(&payload);
        assert_eq!(
            qdrant_payload.get(fields::CONSUMED),
            Some(&QdrantValue::from(false))
        );

        let back = QdrantRepository::qdrant_to_payload(qdrant_payload).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.into_record(), record);
    }

    #[test]
    fn test_point_id_roundtrip() {
        let id = Uuid::new_v4();
        let point_id = QdrantRepository::uuid_to_point_id(id);
        assert_eq!(
            QdrantRepository::point_id_to_uuid(Some(&point_id)).unwrap(),
            id
        );
        assert!(QdrantRepository::point_id_to_uuid(None).is_err());
    }
}
