use async_trait::async_trait;
use qdrant_client::prelude::*;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, point_id::PointIdOptions, points_selector::PointsSelectorOneOf,
    r#match::MatchValue, vectors_config::Config, vectors_output::VectorsOptions, Condition,
    CreateCollection, Distance, FieldCondition, Filter, Match, PointId, PointStruct,
    PointsIdsList, PointsSelector, Range, RepeatedStrings, SearchPoints, VectorParams,
    VectorParamsMap, VectorsConfig,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use toolhub_models::{FieldPredicate, FilterOperator, PointPayload, VectorSpace};

use crate::errors::{SearchError, StoreErrorKind};

/// A raw search hit from one space, before rank normalisation.
#[derive(Debug, Clone)]
pub struct RawHit {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// Store-agnostic filter handed to the adapter: a conjunction of abstract
/// predicates plus ids to exclude. Translation to the store's native filter
/// dialect happens here and nowhere else.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub predicates: Vec<FieldPredicate>,
    pub exclude_ids: Vec<String>,
}

impl VectorFilter {
    pub fn from_predicates(predicates: &[FieldPredicate]) -> Self {
        Self { predicates: predicates.to_vec(), exclude_ids: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty() && self.exclude_ids.is_empty()
    }
}

/// The search seam the retriever and the context service depend on.
#[async_trait]
pub trait VectorSearcher: Send + Sync {
    async fn search_space(
        &self,
        space: VectorSpace,
        vector: &[f32],
        top_k: usize,
        filter: Option<&VectorFilter>,
    ) -> Result<Vec<RawHit>, SearchError>;
}

/// The write seam the seeder depends on.
#[async_trait]
pub trait VectorIndexWriter: Send + Sync {
    async fn ensure_collections(&self) -> Result<(), SearchError>;

    async fn clear_all(&self) -> Result<(), SearchError>;

    async fn upsert_named(
        &self,
        record_id: &str,
        vectors: &HashMap<VectorSpace, Vec<f32>>,
        payload: &PointPayload,
    ) -> Result<(), SearchError>;

    async fn count(&self, space: VectorSpace) -> Result<u64, SearchError>;
}

#[derive(Debug, Clone)]
pub struct SpaceCollectionInfo {
    pub collection: String,
    pub points_count: u64,
    /// Raw status code as reported by the store.
    pub status: i32,
}

/// Storage layouts: one collection per space with plain vectors, or a single
/// enhanced collection holding one point per record with named vectors.
#[derive(Debug, Clone)]
pub enum CollectionLayout {
    PerSpace,
    Enhanced { collection: String },
}

impl CollectionLayout {
    fn collection_for(&self, space: VectorSpace) -> String {
        match self {
            CollectionLayout::PerSpace => space.legacy_collection(),
            CollectionLayout::Enhanced { collection } => collection.clone(),
        }
    }

    fn vector_name_for(&self, space: VectorSpace) -> Option<String> {
        match self {
            CollectionLayout::PerSpace => None,
            CollectionLayout::Enhanced { .. } => Some(space.as_str().to_string()),
        }
    }
}

/// Derive the deterministic point ID for a record.
///
/// Algorithm (part of the on-disk format; changing it is a reindex):
/// SHA-256 over `namespace`, a zero byte, and the record id; the first 16
/// bytes become a UUID with the version nibble forced to 5 and the RFC 4122
/// variant bits set. Indexer and readers share this function.
pub fn point_id_for(namespace: &str, record_id: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(record_id.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x50;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

pub struct QdrantVectorStore {
    client: QdrantClient,
    layout: CollectionLayout,
    namespace: String,
    dimension: usize,
    timeout: Duration,
}

impl QdrantVectorStore {
    pub async fn connect(
        url: &str,
        layout: CollectionLayout,
        namespace: String,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        info!("connecting to vector store at {url}");
        let client = QdrantClient::from_url(url)
            .build()
            .map_err(|e| SearchError::vector_transport(e.to_string()))?;

        let store = Self { client, layout, namespace, dimension, timeout };
        if !store.is_available().await {
            warn!("vector store health check failed at startup");
        }
        Ok(store)
    }

    pub async fn is_available(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, self.client.health_check()).await,
            Ok(Ok(_))
        )
    }

    pub fn point_id(&self, record_id: &str) -> Uuid {
        point_id_for(&self.namespace, record_id)
    }

    /// Create every collection this layout needs, if missing. Dimensions are
    /// fixed at create time; reseeding with a different dimension means a new
    /// collection.
    pub async fn ensure_collections(&self) -> Result<(), SearchError> {
        let existing = self.list_collections().await?;
        match &self.layout {
            CollectionLayout::PerSpace => {
                for space in VectorSpace::ALL {
                    let name = space.legacy_collection();
                    if !existing.contains(&name) {
                        self.create_single_vector_collection(&name).await?;
                    }
                }
            }
            CollectionLayout::Enhanced { collection } => {
                if !existing.contains(collection) {
                    self.create_named_vector_collection(collection).await?;
                }
            }
        }
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, SearchError> {
        let response = tokio::time::timeout(self.timeout, self.client.list_collections())
            .await
            .map_err(|_| SearchError::Timeout(self.timeout))?
            .map_err(|e| SearchError::vector_transport(e.to_string()))?;
        Ok(response.collections.into_iter().map(|c| c.name).collect())
    }

    async fn create_single_vector_collection(&self, name: &str) -> Result<(), SearchError> {
        info!("creating collection {name} (dim {})", self.dimension);
        let request = CreateCollection {
            collection_name: name.to_string(),
            vectors_config: Some(VectorsConfig {
                config: Some(Config::Params(VectorParams {
                    size: self.dimension as u64,
                    distance: Distance::Cosine.into(),
                    ..Default::default()
                })),
            }),
            ..Default::default()
        };
        tokio::time::timeout(self.timeout, self.client.create_collection(&request))
            .await
            .map_err(|_| SearchError::Timeout(self.timeout))?
            .map_err(|e| SearchError::vector_transport(e.to_string()))?;
        Ok(())
    }

    async fn create_named_vector_collection(&self, name: &str) -> Result<(), SearchError> {
        info!("creating enhanced collection {name} (dim {})", self.dimension);
        let mut map = HashMap::new();
        for space in VectorSpace::ALL {
            map.insert(
                space.as_str().to_string(),
                VectorParams {
                    size: self.dimension as u64,
                    distance: Distance::Cosine.into(),
                    ..Default::default()
                },
            );
        }
        let request = CreateCollection {
            collection_name: name.to_string(),
            vectors_config: Some(VectorsConfig {
                config: Some(Config::ParamsMap(VectorParamsMap { map })),
            }),
            ..Default::default()
        };
        tokio::time::timeout(self.timeout, self.client.create_collection(&request))
            .await
            .map_err(|_| SearchError::Timeout(self.timeout))?
            .map_err(|e| SearchError::vector_transport(e.to_string()))?;
        Ok(())
    }

    /// Upsert one record's vectors. Atomic per point in the enhanced layout;
    /// per-space points in the legacy layout.
    pub async fn upsert_named(
        &self,
        record_id: &str,
        vectors: &HashMap<VectorSpace, Vec<f32>>,
        payload: &PointPayload,
    ) -> Result<(), SearchError> {
        for (space, vector) in vectors {
            if vector.len() != self.dimension {
                return Err(SearchError::VectorStore {
                    kind: StoreErrorKind::SchemaMismatch,
                    message: format!(
                        "vector for {space} has length {}, collection expects {}",
                        vector.len(),
                        self.dimension
                    ),
                });
            }
        }

        let point_id = self.point_id(record_id).to_string();
        let payload_map = serde_json::to_value(payload)
            .ok()
            .and_then(|value| value.as_object().cloned())
            .ok_or(SearchError::VectorStore {
                kind: StoreErrorKind::SchemaMismatch,
                message: "payload is not an object".to_string(),
            })?;
        let qdrant_payload: Payload = payload_map.into();

        match &self.layout {
            CollectionLayout::Enhanced { collection } => {
                let named: HashMap<String, Vec<f32>> = vectors
                    .iter()
                    .map(|(space, vector)| (space.as_str().to_string(), vector.clone()))
                    .collect();
                let point = PointStruct::new(point_id, named, qdrant_payload);
                self.upsert_with_retry(collection, vec![point]).await
            }
            CollectionLayout::PerSpace => {
                for (space, vector) in vectors {
                    let point = PointStruct::new(
                        point_id.clone(),
                        vector.clone(),
                        qdrant_payload.clone(),
                    );
                    self.upsert_with_retry(&space.legacy_collection(), vec![point]).await?;
                }
                Ok(())
            }
        }
    }

    async fn upsert_with_retry(
        &self,
        collection: &str,
        points: Vec<PointStruct>,
    ) -> Result<(), SearchError> {
        debug!("upserting {} points into {collection}", points.len());
        for attempt in 0..=1u8 {
            let outcome = tokio::time::timeout(
                self.timeout,
                self.client.upsert_points_blocking(collection, None, points.clone(), None),
            )
            .await;
            match outcome {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) if attempt == 0 => {
                    warn!("upsert into {collection} failed: {e}, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Ok(Err(e)) => return Err(SearchError::vector_transport(e.to_string())),
                Err(_) if attempt == 0 => {
                    warn!("upsert into {collection} timed out, retrying");
                }
                Err(_) => return Err(SearchError::Timeout(self.timeout)),
            }
        }
        Ok(())
    }

    /// Fetch one stored vector back, mainly for reference-tool embeddings.
    pub async fn retrieve_vector(
        &self,
        record_id: &str,
        space: VectorSpace,
    ) -> Result<Vec<f32>, SearchError> {
        let collection = self.layout.collection_for(space);
        let point_id: PointId = self.point_id(record_id).to_string().into();

        let response = tokio::time::timeout(
            self.timeout,
            self.client.get_points(
                collection,
                None,
                &[point_id],
                Some(true),
                Some(false),
                None,
            ),
        )
        .await
        .map_err(|_| SearchError::Timeout(self.timeout))?
        .map_err(|e| SearchError::vector_transport(e.to_string()))?;

        let point = response.result.into_iter().next().ok_or(SearchError::VectorStore {
            kind: StoreErrorKind::NotFound,
            message: format!("no point for record {record_id}"),
        })?;

        let vectors = point.vectors.and_then(|v| v.vectors_options).ok_or({
            SearchError::VectorStore {
                kind: StoreErrorKind::NotFound,
                message: format!("point for {record_id} has no vectors"),
            }
        })?;

        match vectors {
            VectorsOptions::Vector(vector) => Ok(vector.data),
            VectorsOptions::Vectors(named) => named
                .vectors
                .get(space.as_str())
                .map(|v| v.data.clone())
                .ok_or(SearchError::VectorStore {
                    kind: StoreErrorKind::NotFound,
                    message: format!("record {record_id} has no {space} vector"),
                }),
        }
    }

    /// Delete a record from one space, or from all of them.
    pub async fn delete(
        &self,
        record_id: &str,
        space: Option<VectorSpace>,
    ) -> Result<(), SearchError> {
        let point_id: PointId = self.point_id(record_id).to_string().into();
        let selector = PointsSelector {
            points_selector_one_of: Some(PointsSelectorOneOf::Points(PointsIdsList {
                ids: vec![point_id],
            })),
        };

        let collections: Vec<String> = match (&self.layout, space) {
            (CollectionLayout::Enhanced { collection }, _) => vec![collection.clone()],
            (CollectionLayout::PerSpace, Some(space)) => vec![space.legacy_collection()],
            (CollectionLayout::PerSpace, None) => {
                VectorSpace::ALL.iter().map(|s| s.legacy_collection()).collect()
            }
        };

        for collection in collections {
            tokio::time::timeout(
                self.timeout,
                self.client.delete_points(&collection, None, &selector, None),
            )
            .await
            .map_err(|_| SearchError::Timeout(self.timeout))?
            .map_err(|e| SearchError::vector_transport(e.to_string()))?;
        }
        Ok(())
    }

    /// Collection metadata behind a space. In the enhanced layout every
    /// space shares the record-level point count.
    pub async fn collection_info(
        &self,
        space: VectorSpace,
    ) -> Result<SpaceCollectionInfo, SearchError> {
        let collection = self.layout.collection_for(space);
        let response = tokio::time::timeout(
            self.timeout,
            self.client.collection_info(&collection),
        )
        .await
        .map_err(|_| SearchError::Timeout(self.timeout))?
        .map_err(|e| SearchError::vector_transport(e.to_string()))?;

        let info = response.result.ok_or(SearchError::VectorStore {
            kind: StoreErrorKind::NotFound,
            message: format!("collection {collection} not found"),
        })?;
        Ok(SpaceCollectionInfo {
            collection,
            points_count: info.points_count.unwrap_or(0),
            status: info.status,
        })
    }

    pub async fn count(&self, space: VectorSpace) -> Result<u64, SearchError> {
        Ok(self.collection_info(space).await?.points_count)
    }

    /// Drop and recreate every collection this layout owns.
    pub async fn clear_all(&self) -> Result<(), SearchError> {
        let existing = self.list_collections().await?;
        let owned: Vec<String> = match &self.layout {
            CollectionLayout::Enhanced { collection } => vec![collection.clone()],
            CollectionLayout::PerSpace => {
                VectorSpace::ALL.iter().map(|s| s.legacy_collection()).collect()
            }
        };
        for collection in owned {
            if existing.contains(&collection) {
                info!("clearing collection {collection}");
                tokio::time::timeout(self.timeout, self.client.delete_collection(&collection))
                    .await
                    .map_err(|_| SearchError::Timeout(self.timeout))?
                    .map_err(|e| SearchError::vector_transport(e.to_string()))?;
            }
        }
        self.ensure_collections().await
    }

    fn build_filter(&self, filter: &VectorFilter) -> Option<Filter> {
        if filter.is_empty() {
            return None;
        }
        let mut must = Vec::new();
        let mut must_not = Vec::new();

        for predicate in &filter.predicates {
            match translate_predicate(predicate) {
                Some(condition) => must.push(condition),
                None => warn!(
                    "dropping untranslatable predicate on field {}",
                    predicate.field
                ),
            }
        }
        for id in &filter.exclude_ids {
            must_not.push(match_condition("id", MatchValue::Keyword(id.clone())));
        }

        Some(Filter { must, must_not, ..Default::default() })
    }
}

fn match_condition(key: &str, value: MatchValue) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match { match_value: Some(value) }),
            ..Default::default()
        })),
    }
}

fn range_condition(key: &str, range: Range) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            range: Some(range),
            ..Default::default()
        })),
    }
}

/// Abstract predicate -> native condition. Equality on an array value means
/// any-of; `contains` on a payload array is element membership.
fn translate_predicate(predicate: &FieldPredicate) -> Option<Condition> {
    let key = predicate.field.as_str();
    match predicate.op {
        FilterOperator::Eq | FilterOperator::Contains => match &predicate.value {
            Value::Bool(flag) => Some(match_condition(key, MatchValue::Boolean(*flag))),
            Value::String(s) => Some(match_condition(key, MatchValue::Keyword(s.clone()))),
            Value::Number(n) => {
                if let Some(int) = n.as_i64() {
                    Some(match_condition(key, MatchValue::Integer(int)))
                } else {
                    let v = n.as_f64()?;
                    Some(range_condition(key, Range {
                        gte: Some(v),
                        lte: Some(v),
                        ..Default::default()
                    }))
                }
            }
            Value::Array(items) => {
                let strings: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                if strings.is_empty() {
                    None
                } else {
                    Some(match_condition(
                        key,
                        MatchValue::Keywords(RepeatedStrings { strings }),
                    ))
                }
            }
            _ => None,
        },
        FilterOperator::Lt => predicate.value.as_f64().map(|v| {
            range_condition(key, Range { lt: Some(v), ..Default::default() })
        }),
        FilterOperator::Lte => predicate.value.as_f64().map(|v| {
            range_condition(key, Range { lte: Some(v), ..Default::default() })
        }),
        FilterOperator::Gt => predicate.value.as_f64().map(|v| {
            range_condition(key, Range { gt: Some(v), ..Default::default() })
        }),
        FilterOperator::Gte => predicate.value.as_f64().map(|v| {
            range_condition(key, Range { gte: Some(v), ..Default::default() })
        }),
    }
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|p| p.point_id_options) {
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl VectorSearcher for QdrantVectorStore {
    async fn search_space(
        &self,
        space: VectorSpace,
        vector: &[f32],
        top_k: usize,
        filter: Option<&VectorFilter>,
    ) -> Result<Vec<RawHit>, SearchError> {
        let collection = self.layout.collection_for(space);
        let request = SearchPoints {
            collection_name: collection.clone(),
            vector: vector.to_vec(),
            vector_name: self.layout.vector_name_for(space),
            limit: top_k as u64,
            with_payload: Some(true.into()),
            filter: filter.and_then(|f| self.build_filter(f)),
            ..Default::default()
        };

        debug!("searching {collection} ({space}) top_k={top_k}");

        let mut last_error = None;
        for attempt in 0..=1u8 {
            match tokio::time::timeout(self.timeout, self.client.search_points(&request)).await {
                Ok(Ok(response)) => {
                    let hits = response
                        .result
                        .into_iter()
                        .map(|point| {
                            let payload = serde_json::to_value(&point.payload)
                                .unwrap_or(Value::Null);
                            let id = payload
                                .get("id")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .unwrap_or_else(|| point_id_string(point.id));
                            RawHit { id, score: point.score, payload }
                        })
                        .collect();
                    return Ok(hits);
                }
                Ok(Err(e)) => {
                    if attempt == 0 {
                        warn!("search in {collection} failed: {e}, retrying");
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    last_error = Some(SearchError::vector_transport(e.to_string()));
                }
                Err(_) => {
                    if attempt == 0 {
                        warn!("search in {collection} timed out, retrying");
                    }
                    last_error = Some(SearchError::Timeout(self.timeout));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SearchError::vector_transport("search failed")))
    }
}

#[async_trait]
impl VectorIndexWriter for QdrantVectorStore {
    async fn ensure_collections(&self) -> Result<(), SearchError> {
        QdrantVectorStore::ensure_collections(self).await
    }

    async fn clear_all(&self) -> Result<(), SearchError> {
        QdrantVectorStore::clear_all(self).await
    }

    async fn upsert_named(
        &self,
        record_id: &str,
        vectors: &HashMap<VectorSpace, Vec<f32>>,
        payload: &PointPayload,
    ) -> Result<(), SearchError> {
        QdrantVectorStore::upsert_named(self, record_id, vectors, payload).await
    }

    async fn count(&self, space: VectorSpace) -> Result<u64, SearchError> {
        QdrantVectorStore::count(self, space).await
    }
}
