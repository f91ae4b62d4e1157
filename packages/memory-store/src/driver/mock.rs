//! Brute-force in-memory driver satisfying the [`VectorDriver`] contract.
//!
//! Used by the test harness and doctests; a cosine-similarity scan over a
//! small in-memory collection is adequate here and keeps the pool and the
//! stores testable without a real backend (§4.A).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{CollectionInfo, DistanceMetric, FieldCondition, Filter, Payload, Point, PayloadValue, ScoredPoint, VectorDriver};
use crate::error::{MemoryError, Result};

#[derive(Debug, Clone)]
struct Collection {
    dimension: usize,
    points: HashMap<String, Point>,
}

/// Shared backend state behind every pooled [`MockDriver`] handle.
#[derive(Debug, Default)]
pub struct MockBackend {
    collections: RwLock<HashMap<String, Collection>>,
    /// Flipped by tests to simulate a backend outage for retry/breaker tests.
    down: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate the backend going down (every call returns a transient error)
    /// or recovering.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<()> {
        if self.is_down() {
            Err(MemoryError::transient("mock backend is down"))
        } else {
            Ok(())
        }
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

fn condition_matches(payload: &Payload, cond: &FieldCondition) -> bool {
    match cond {
        FieldCondition::Equals { field, value } => payload.get(field) == Some(value),
        FieldCondition::MatchAny { field, values } => {
            payload.get(field).map(|v| values.contains(v)).unwrap_or(false)
        }
        FieldCondition::GreaterOrEqual { field, value } => {
            payload.get(field).and_then(|v| v.as_i64()).map(|v| v >= *value).unwrap_or(false)
        }
        FieldCondition::LessThan { field, value } => {
            payload.get(field).and_then(|v| v.as_i64()).map(|v| v < *value).unwrap_or(false)
        }
    }
}

fn filter_matches(payload: &Payload, filter: &Filter) -> bool {
    if !filter.must.iter().all(|c| condition_matches(payload, c)) {
        return false;
    }
    if !filter.should.is_empty() && !filter.should.iter().any(|c| condition_matches(payload, c)) {
        return false;
    }
    true
}

/// A lightweight handle to a [`MockBackend`], the unit the connection pool
/// manages. Distinct handles are distinct "connections" even though they
/// share the same underlying data.
#[derive(Debug, Clone)]
pub struct MockDriver {
    backend: Arc<MockBackend>,
}

impl MockDriver {
    pub fn new(backend: Arc<MockBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl VectorDriver for MockDriver {
    async fn list_collections(&self) -> Result<Vec<String>> {
        self.backend.check_up()?;
        Ok(self.backend.collections.read().unwrap().keys().cloned().collect())
    }

    async fn create_collection(&self, name: &str, dim: usize, _distance: DistanceMetric) -> Result<()> {
        self.backend.check_up()?;
        let mut collections = self.backend.collections.write().unwrap();
        collections.entry(name.to_string()).or_insert_with(|| Collection {
            dimension: dim,
            points: HashMap::new(),
        });
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.backend.check_up()?;
        self.backend.collections.write().unwrap().remove(name);
        Ok(())
    }

    async fn get_collection_info(&self, name: &str) -> Result<CollectionInfo> {
        self.backend.check_up()?;
        let collections = self.backend.collections.read().unwrap();
        let collection = collections
            .get(name)
            .ok_or_else(|| MemoryError::not_found(format!("collection {name}")))?;
        let point_count = collection.points.len() as u64;
        Ok(CollectionInfo {
            point_count,
            segment_count: 1,
            indexed_count: point_count,
        })
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        self.backend.check_up()?;
        let mut collections = self.backend.collections.write().unwrap();
        let collection = collections
            .get_mut(collection)
            .ok_or_else(|| MemoryError::not_found(format!("collection {collection}")))?;
        for point in points {
            collection.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn get(
        &self,
        collection: &str,
        ids: &[String],
        _with_payload: bool,
        with_vectors: bool,
    ) -> Result<Vec<Point>> {
        self.backend.check_up()?;
        let collections = self.backend.collections.read().unwrap();
        let collection = collections
            .get(collection)
            .ok_or_else(|| MemoryError::not_found(format!("collection {collection}")))?;
        Ok(ids
            .iter()
            .filter_map(|id| collection.points.get(id))
            .map(|p| strip_vector(p.clone(), with_vectors))
            .collect())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        _with_payload: bool,
        with_vectors: bool,
    ) -> Result<Vec<Point>> {
        self.backend.check_up()?;
        let collections = self.backend.collections.read().unwrap();
        let collection = collections
            .get(collection)
            .ok_or_else(|| MemoryError::not_found(format!("collection {collection}")))?;
        let mut out: Vec<Point> = collection
            .points
            .values()
            .filter(|p| filter.map(|f| filter_matches(&p.payload, f)).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out.truncate(limit);
        Ok(out.into_iter().map(|p| strip_vector(p, with_vectors)).collect())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f64],
        filter: Option<&Filter>,
        limit: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<ScoredPoint>> {
        self.backend.check_up()?;
        let collections = self.backend.collections.read().unwrap();
        let collection = collections
            .get(collection)
            .ok_or_else(|| MemoryError::not_found(format!("collection {collection}")))?;
        let mut scored: Vec<ScoredPoint> = collection
            .points
            .values()
            .filter(|p| filter.map(|f| filter_matches(&p.payload, f)).unwrap_or(true))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
                vector: Some(p.vector.clone()),
            })
            .filter(|sp| score_threshold.map(|t| sp.score >= t).unwrap_or(true))
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.backend.check_up()?;
        let mut collections = self.backend.collections.write().unwrap();
        let collection = collections
            .get_mut(collection)
            .ok_or_else(|| MemoryError::not_found(format!("collection {collection}")))?;
        for id in ids {
            collection.points.remove(id);
        }
        Ok(())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.backend.check_up()?;
        let mut collections = self.backend.collections.write().unwrap();
        let collection = collections
            .get_mut(collection)
            .ok_or_else(|| MemoryError::not_found(format!("collection {collection}")))?;
        let to_remove: Vec<String> = collection
            .points
            .values()
            .filter(|p| filter_matches(&p.payload, filter))
            .map(|p| p.id.clone())
            .collect();
        for id in &to_remove {
            collection.points.remove(id);
        }
        Ok(to_remove.len() as u64)
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64> {
        self.backend.check_up()?;
        let collections = self.backend.collections.read().unwrap();
        let collection = collections
            .get(collection)
            .ok_or_else(|| MemoryError::not_found(format!("collection {collection}")))?;
        Ok(collection
            .points
            .values()
            .filter(|p| filter.map(|f| filter_matches(&p.payload, f)).unwrap_or(true))
            .count() as u64)
    }
}

fn strip_vector(mut point: Point, with_vectors: bool) -> Point {
    if !with_vectors {
        point.vector.clear();
    }
    point
}

#[async_trait]
impl crate::pool::PoolableConnection for MockDriver {
    async fn is_healthy(&self) -> bool {
        !self.backend.is_down()
    }

    fn reset(&self) {}
}

/// Hands out [`MockDriver`] handles onto a shared [`MockBackend`].
pub struct MockDriverFactory {
    backend: Arc<MockBackend>,
}

impl MockDriverFactory {
    pub fn new(backend: Arc<MockBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl crate::pool::ConnectionFactory<MockDriver> for MockDriverFactory {
    async fn create(&self) -> Result<MockDriver> {
        self.backend.check_up()?;
        Ok(MockDriver::new(self.backend.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_with(field: &str, value: PayloadValue) -> Payload {
        let mut p = HashMap::new();
        p.insert(field.to_string(), value);
        p
    }

    #[tokio::test]
    async fn upsert_and_get_roundtrip() {
        let backend = MockBackend::new();
        let driver = MockDriver::new(backend);
        driver.create_collection("c", 3, DistanceMetric::Cosine).await.unwrap();
        let point = Point {
            id: "p1".into(),
            vector: vec![1.0, 0.0, 0.0],
            payload: payload_with("repo", PayloadValue::from("alpha")),
        };
        driver.upsert("c", vec![point.clone()]).await.unwrap();
        let got = driver.get("c", &["p1".to_string()], true, true).await.unwrap();
        assert_eq!(got, vec![point]);
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_similarity() {
        let backend = MockBackend::new();
        let driver = MockDriver::new(backend);
        driver.create_collection("c", 2, DistanceMetric::Cosine).await.unwrap();
        driver
            .upsert(
                "c",
                vec![
                    Point { id: "near".into(), vector: vec![1.0, 0.0], payload: Payload::new() },
                    Point { id: "far".into(), vector: vec![0.0, 1.0], payload: Payload::new() },
                ],
            )
            .await
            .unwrap();
        let results = driver.query("c", &[1.0, 0.0], None, 10, None).await.unwrap();
        assert_eq!(results[0].id, "near");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn down_backend_returns_transient_error() {
        let backend = MockBackend::new();
        backend.set_down(true);
        let driver = MockDriver::new(backend);
        let err = driver.list_collections().await.unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn delete_by_filter_removes_matching_points() {
        let backend = MockBackend::new();
        let driver = MockDriver::new(backend);
        driver.create_collection("c", 1, DistanceMetric::Cosine).await.unwrap();
        driver
            .upsert(
                "c",
                vec![
                    Point { id: "a".into(), vector: vec![0.0], payload: payload_with("repo", PayloadValue::from("x")) },
                    Point { id: "b".into(), vector: vec![0.0], payload: payload_with("repo", PayloadValue::from("y")) },
                ],
            )
            .await
            .unwrap();
        let filter = Filter { must: vec![FieldCondition::Equals { field: "repo".into(), value: PayloadValue::from("x") }], should: vec![] };
        let deleted = driver.delete_by_filter("c", &filter).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(driver.count("c", None).await.unwrap(), 1);
    }
}
