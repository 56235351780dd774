//! Qdrant adapter for [`orchestrator_core::traits::VectorStore`].
//!
//! Every point payload carries `tenant_id` alongside the caller's
//! metadata so a tenant-scoped delete can be expressed as a Qdrant
//! filter rather than trusting the caller's id list to already be
//! tenant-pure.

use async_trait::async_trait;
use orchestrator_core::error::{OrchestratorError, Result};
use orchestrator_core::model::{SearchResult, VectorRecord};
use orchestrator_core::traits::VectorStore;
use qdrant_client::qdrant::{
    self, Condition, DeletePointsBuilder, Filter, PointStruct, QueryPointsBuilder,
    ScrollPointsBuilder, UpsertPointsBuilder, Value as QValue,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

const TENANT_ID_FIELD: &str = "tenant_id";

pub struct QdrantVectorStore {
    client: Qdrant,
}

impl QdrantVectorStore {
    pub fn connect(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| OrchestratorError::VectorStore(format!("failed to build qdrant client: {e}")))?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn from_client(client: Qdrant) -> Self {
        Self { client }
    }
}

fn json_to_qdrant_value(value: &JsonValue) -> QValue {
    match value {
        JsonValue::Null => QValue::from(Option::<bool>::None),
        JsonValue::Bool(b) => QValue::from(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                QValue::from(i)
            } else {
                QValue::from(n.as_f64().unwrap_or_default())
            }
        }
        JsonValue::String(s) => QValue::from(s.as_str()),
        JsonValue::Array(items) => {
            let converted: Vec<QValue> = items.iter().map(json_to_qdrant_value).collect();
            QValue::from(converted)
        }
        JsonValue::Object(map) => {
            let mut payload = Payload::new();
            for (k, v) in map {
                payload.insert(k, json_to_qdrant_value(v));
            }
            QValue::from(payload)
        }
    }
}

fn qdrant_value_to_json(value: &QValue) -> JsonValue {
    use qdrant::value::Kind;
    match &value.kind {
        Some(Kind::NullValue(_)) | None => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(*b),
        Some(Kind::IntegerValue(i)) => JsonValue::Number((*i).into()),
        Some(Kind::DoubleValue(f)) => serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
        Some(Kind::StringValue(s)) => JsonValue::String(s.clone()),
        Some(Kind::ListValue(list)) => JsonValue::Array(list.values.iter().map(qdrant_value_to_json).collect()),
        Some(Kind::StructValue(s)) => {
            let map = s.fields.iter().map(|(k, v)| (k.clone(), qdrant_value_to_json(v))).collect();
            JsonValue::Object(map)
        }
    }
}

fn build_payload(record: &VectorRecord) -> Payload {
    let mut payload = Payload::new();
    for (k, v) in &record.metadata {
        payload.insert(k, json_to_qdrant_value(v));
    }
    payload
}

fn payload_to_metadata(payload: &std::collections::HashMap<String, QValue>) -> BTreeMap<String, JsonValue> {
    payload
        .iter()
        .filter(|(k, _)| k.as_str() != TENANT_ID_FIELD)
        .map(|(k, v)| (k.clone(), qdrant_value_to_json(v)))
        .collect()
}

fn id_filter(ids: &[String], tenant_id: Option<&str>) -> Filter {
    let point_ids: Vec<qdrant::PointId> = ids.iter().map(|id| id.as_str().into()).collect();
    let mut must = vec![Condition::has_id(point_ids)];
    if let Some(tenant_id) = tenant_id {
        must.push(Condition::matches(TENANT_ID_FIELD, tenant_id.to_string()));
    }
    Filter { must, ..Default::default() }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let count = records.len();
        let points: Vec<PointStruct> = records
            .into_iter()
            .map(|record| {
                let payload = build_payload(&record);
                PointStruct::new(record.id, record.vector, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points))
            .await
            .map_err(|e| OrchestratorError::VectorStore(format!("upsert failed: {e}")))?;
        Ok(count)
    }

    async fn search(&self, collection: &str, query: Vec<f32>, limit: usize) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .query(
                QueryPointsBuilder::new(collection)
                    .query(query)
                    .limit(limit as u64)
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await
            .map_err(|e| OrchestratorError::VectorStore(format!("search failed: {e}")))?;

        let results = response
            .result
            .into_iter()
            .map(|scored| {
                let id = match scored.id.and_then(|p| p.point_id_options) {
                    Some(qdrant::point_id::PointIdOptions::Uuid(s)) => s,
                    Some(qdrant::point_id::PointIdOptions::Num(n)) => n.to_string(),
                    None => String::new(),
                };
                let payload: std::collections::HashMap<String, QValue> = scored.payload.into_iter().collect();
                SearchResult { id, score: scored.score, metadata: payload_to_metadata(&payload) }
            })
            .collect();
        Ok(results)
    }

    async fn delete(&self, collection: &str, ids: Vec<String>, tenant_id: Option<&str>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let filter = id_filter(&ids, tenant_id);

        let matched = self
            .client
            .scroll(
                ScrollPointsBuilder::new(collection)
                    .filter(filter.clone())
                    .limit(ids.len() as u32)
                    .with_payload(false)
                    .with_vectors(false),
            )
            .await
            .map_err(|e| OrchestratorError::VectorStore(format!("delete lookup failed: {e}")))?
            .result
            .len();

        if matched == 0 {
            return Ok(0);
        }

        self.client
            .delete_points(DeletePointsBuilder::new(collection).points(filter).wait(true))
            .await
            .map_err(|e| OrchestratorError::VectorStore(format!("delete failed: {e}")))?;

        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_scalars() {
        let v = json_to_qdrant_value(&JsonValue::from("hello"));
        assert_eq!(qdrant_value_to_json(&v), JsonValue::from("hello"));
        let v = json_to_qdrant_value(&JsonValue::from(42));
        assert_eq!(qdrant_value_to_json(&v), JsonValue::from(42));
        let v = json_to_qdrant_value(&JsonValue::Bool(true));
        assert_eq!(qdrant_value_to_json(&v), JsonValue::Bool(true));
    }

    #[test]
    fn id_filter_includes_tenant_condition_when_present() {
        let filter = id_filter(&["a".to_string()], Some("tenant-1"));
        assert_eq!(filter.must.len(), 2);
    }

    #[test]
    fn id_filter_omits_tenant_condition_when_absent() {
        let filter = id_filter(&["a".to_string()], None);
        assert_eq!(filter.must.len(), 1);
    }
}
