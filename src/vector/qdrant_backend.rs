//! Network-mode Vector Store backend (§4.1, server mode), behind the
//! `qdrant` feature. Mirrors the optional `qdrant-client` dependency pattern
//! used in the retrieved corpus for swappable vector backends — the
//! embedded local-file store (`local::LocalVectorStore`) remains the
//! default when this feature is disabled.

use qdrant_client::qdrant::{
    condition::ConditionOneOf, vectors_config::Config as VectorsConfigOneOf, Condition,
    CreateCollectionBuilder, DeletePointsBuilder, Distance, FieldCondition, Filter as QdrantFilter,
    GetPointsBuilder, Match, PointId, PointStruct, PointsIdsList, PointsSelector,
    Range as QdrantRange, ScrollPointsBuilder, SearchPointsBuilder, SetPayloadPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParams, VectorsConfig,
};
use qdrant_client::{Payload as QdrantPayload, Qdrant};
use std::sync::Arc;
use tokio::runtime::Runtime;

use crate::error::{MemoryAnchorError, Result};
use crate::types::Payload;
use crate::vector::{
    dimension_error, Filter, FieldPredicate, ScoredPoint, ScrollPage, UpsertOutcome, VectorPoint,
    VectorStore,
};

pub struct QdrantVectorStore {
    client: Qdrant,
    rt: Arc<Runtime>,
}

impl QdrantVectorStore {
    pub fn connect(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| MemoryAnchorError::StorageUnavailable(e.to_string()))?;
        let rt = Runtime::new().map_err(|e| MemoryAnchorError::StorageUnavailable(e.to_string()))?;
        Ok(QdrantVectorStore { client, rt: Arc::new(rt) })
    }

    fn block<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, qdrant_client::QdrantError>>,
    {
        self.rt
            .block_on(fut)
            .map_err(|e| MemoryAnchorError::StorageUnavailable(e.to_string()))
    }
}

fn to_qdrant_filter(filter: &Filter) -> QdrantFilter {
    match filter {
        Filter::And(fs) => QdrantFilter::all(fs.iter().map(to_qdrant_filter_condition).collect()),
        Filter::Or(fs) => QdrantFilter::any(fs.iter().map(to_qdrant_filter_condition).collect()),
        Filter::Field(..) => QdrantFilter::all(vec![to_qdrant_filter_condition(filter)]),
    }
}

fn to_qdrant_filter_condition(filter: &Filter) -> Condition {
    match filter {
        Filter::And(_) | Filter::Or(_) => Condition {
            condition_one_of: Some(ConditionOneOf::Filter(to_qdrant_filter(filter))),
        },
        Filter::Field(field, pred) => match pred {
            FieldPredicate::Eq(v) => Condition::matches(field.clone(), match_value(v)),
            FieldPredicate::IsNull => Condition::is_null(field.clone()),
            FieldPredicate::IsNotNull => {
                Condition::is_empty(field.clone()).negate_as_condition()
            }
            FieldPredicate::Gte(v) => Condition::range(
                field.clone(),
                QdrantRange {
                    gte: v.as_f64(),
                    ..Default::default()
                },
            ),
            FieldPredicate::Lte(v) => Condition::range(
                field.clone(),
                QdrantRange {
                    lte: v.as_f64(),
                    ..Default::default()
                },
            ),
            FieldPredicate::Gt(v) => Condition::range(
                field.clone(),
                QdrantRange {
                    gt: v.as_f64(),
                    ..Default::default()
                },
            ),
            FieldPredicate::Lt(v) => Condition::range(
                field.clone(),
                QdrantRange {
                    lt: v.as_f64(),
                    ..Default::default()
                },
            ),
        },
    }
}

fn match_value(v: &serde_json::Value) -> Match {
    match v {
        serde_json::Value::String(s) => Match::new_value(s.clone()),
        serde_json::Value::Bool(b) => Match::new_value(*b),
        serde_json::Value::Number(n) if n.is_i64() => Match::new_value(n.as_i64().unwrap()),
        other => Match::new_value(other.to_string()),
    }
}

fn payload_to_qdrant(payload: &Payload) -> QdrantPayload {
    let mut map = std::collections::HashMap::new();
    for (k, v) in payload {
        map.insert(k.clone(), QdrantValue::from(v.clone()));
    }
    QdrantPayload::from(map)
}

fn qdrant_to_payload(map: std::collections::HashMap<String, QdrantValue>) -> Payload {
    map.into_iter()
        .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|jv| (k, jv)))
        .collect()
}

trait ConditionNegateExt {
    fn negate_as_condition(self) -> Condition;
}

impl ConditionNegateExt for Condition {
    fn negate_as_condition(self) -> Condition {
        Condition {
            condition_one_of: Some(ConditionOneOf::Filter(QdrantFilter {
                must_not: vec![self],
                ..Default::default()
            })),
        }
    }
}

impl VectorStore for QdrantVectorStore {
    fn ensure_collection(&self, name: &str, dim: usize) -> Result<()> {
        let exists = self.block(self.client.collection_exists(name))?;
        if exists {
            let info = self
                .block(self.client.collection_info(name))
                .map_err(|e| MemoryAnchorError::StorageUnavailable(e.to_string()))?;
            if let Some(params) = info
                .result
                .and_then(|r| r.config)
                .and_then(|c| c.params)
                .and_then(|p| p.vectors_config)
                .and_then(|vc| vc.config)
            {
                if let VectorsConfigOneOf::Params(VectorParams { size, .. }) = params {
                    if size as usize != dim {
                        return Err(dimension_error(size as usize, dim));
                    }
                }
            }
            return Ok(());
        }
        self.block(
            self.client.create_collection(
                CreateCollectionBuilder::new(name).vectors_config(VectorsConfig {
                    config: Some(VectorsConfigOneOf::Params(VectorParams {
                        size: dim as u64,
                        distance: Distance::Cosine.into(),
                        ..Default::default()
                    })),
                }),
            ),
        )?;
        Ok(())
    }

    fn upsert(&self, name: &str, point: VectorPoint) -> Result<()> {
        self.batch_upsert(name, vec![point]).map(|_| ())
    }

    fn batch_upsert(&self, name: &str, points: Vec<VectorPoint>) -> Result<Vec<UpsertOutcome>> {
        let ids: Vec<String> = points.iter().map(|p| p.id.clone()).collect();
        let structs: Vec<PointStruct> = points
            .into_iter()
            .map(|p| PointStruct::new(p.id, p.vector, payload_to_qdrant(&p.payload)))
            .collect();
        let result = self.block(
            self.client
                .upsert_points(UpsertPointsBuilder::new(name, structs)),
        );
        match result {
            Ok(_) => Ok(ids
                .into_iter()
                .map(|id| UpsertOutcome {
                    id,
                    ok: true,
                    error: None,
                })
                .collect()),
            Err(e) => Ok(ids
                .into_iter()
                .map(|id| UpsertOutcome {
                    id,
                    ok: false,
                    error: Some(e.to_string()),
                })
                .collect()),
        }
    }

    fn search(
        &self,
        name: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut builder = SearchPointsBuilder::new(name, query_vector.to_vec(), k as u64)
            .with_payload(true);
        if let Some(f) = filter {
            builder = builder.filter(to_qdrant_filter(f));
        }
        let response = self.block(self.client.search_points(builder))?;
        Ok(response
            .result
            .into_iter()
            .map(|p| ScoredPoint {
                id: point_id_to_string(p.id),
                score: p.score,
                payload: qdrant_to_payload(p.payload),
            })
            .collect())
    }

    fn scroll(
        &self,
        name: &str,
        filter: Option<&Filter>,
        cursor: Option<String>,
        page_size: usize,
    ) -> Result<ScrollPage> {
        let mut builder = ScrollPointsBuilder::new(name)
            .limit(page_size as u32)
            .with_payload(true);
        if let Some(f) = filter {
            builder = builder.filter(to_qdrant_filter(f));
        }
        if let Some(c) = &cursor {
            builder = builder.offset(PointId::from(c.clone()));
        }
        let response = self.block(self.client.scroll(builder))?;
        let next_cursor = response.next_page_offset.map(point_id_to_string);
        let points = response
            .result
            .into_iter()
            .map(|p| ScoredPoint {
                id: point_id_to_string(p.id.unwrap_or_default()),
                score: 0.0,
                payload: qdrant_to_payload(p.payload),
            })
            .collect();
        Ok(ScrollPage { points, next_cursor })
    }

    fn update_payload(&self, name: &str, id: &str, partial: Payload) -> Result<()> {
        let selector = PointsSelector::from(vec![PointId::from(id.to_string())]);
        self.block(
            self.client.set_payload(
                SetPayloadPointsBuilder::new(name, payload_to_qdrant(&partial))
                    .points_selector(selector),
            ),
        )?;
        Ok(())
    }

    fn delete(&self, name: &str, id: &str) -> Result<()> {
        let selector = PointsSelector::from(PointsIdsList {
            ids: vec![PointId::from(id.to_string())],
        });
        self.block(
            self.client
                .delete_points(DeletePointsBuilder::new(name).points(selector)),
        )?;
        Ok(())
    }

    fn get_vector(&self, name: &str, id: &str) -> Result<Option<Vec<f32>>> {
        let response = self.block(
            self.client.get_points(
                GetPointsBuilder::new(name, vec![PointId::from(id.to_string())]).with_vectors(true),
            ),
        )?;
        let Some(point) = response.result.into_iter().next() else {
            return Ok(None);
        };
        let vector = point
            .vectors
            .and_then(|v| v.vectors_options)
            .and_then(|opt| match opt {
                qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(v) => Some(v.data),
                _ => None,
            });
        Ok(vector)
    }

    fn ping(&self) -> Result<()> {
        self.block(self.client.health_check())?;
        Ok(())
    }
}

fn point_id_to_string(id: PointId) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match id.point_id_options {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}
