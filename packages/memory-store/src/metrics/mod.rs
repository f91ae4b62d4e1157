//! Metrics (§4.I): per-operation counters, latency averages and error
//! counts, updated at every public store method boundary and exported as
//! read-only snapshots.
//!
//! Backed by `dashmap` for lock-free per-operation counters and a
//! running-mean latency.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    BatchResult, Chunk, ChunkStoreStats, ConfidenceFactors, GraphTraversalResult, RelationType, Relationship,
    RelationshipQuery, SearchQuery, SearchResult,
};
use crate::error::Result;
use crate::store::{ChunkStore, RelationshipStore};

/// Connection health as observed by the most recent store operation (§4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Unknown = 0,
    Connecting = 1,
    Connected = 2,
    Healthy = 3,
    Error = 4,
    Closed = 5,
}

impl ConnectionStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Connected,
            3 => ConnectionStatus::Healthy,
            4 => ConnectionStatus::Error,
            5 => ConnectionStatus::Closed,
            _ => ConnectionStatus::Unknown,
        }
    }
}

/// A process-scoped, read-only snapshot of one operation's counters.
#[derive(Debug, Clone, Default)]
pub struct OperationSnapshot {
    pub count: u64,
    pub error_count: u64,
    pub average_latency_ms: f64,
}

/// Process-scoped metrics for one store instance (§4.I, §9). Cheap to clone
/// (every field is a shared handle); share one across every layer of the
/// resilience stack that wraps the same logical store.
#[derive(Clone)]
pub struct StoreMetrics {
    operation_counts: std::sync::Arc<DashMap<&'static str, u64>>,
    error_counts: std::sync::Arc<DashMap<&'static str, u64>>,
    average_latency: std::sync::Arc<DashMap<&'static str, f64>>,
    connection_status: std::sync::Arc<AtomicU8>,
    last_operation: std::sync::Arc<RwLock<&'static str>>,
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self {
            operation_counts: Default::default(),
            error_counts: Default::default(),
            average_latency: Default::default(),
            connection_status: std::sync::Arc::new(AtomicU8::new(ConnectionStatus::Unknown as u8)),
            last_operation: std::sync::Arc::new(RwLock::new("")),
        }
    }
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.connection_status.store(status as u8, Ordering::Relaxed);
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.connection_status.load(Ordering::Relaxed))
    }

    pub fn last_operation(&self) -> &'static str {
        *self.last_operation.read().unwrap()
    }

    pub fn snapshot(&self, op: &str) -> OperationSnapshot {
        OperationSnapshot {
            count: *self.operation_counts.get(op).map(|v| *v).get_or_insert(0),
            error_count: *self.error_counts.get(op).map(|v| *v).get_or_insert(0),
            average_latency_ms: *self.average_latency.get(op).map(|v| *v).get_or_insert(0.0),
        }
    }

    /// Records one call to `op`: entry/exit bookkeeping plus the running-mean
    /// latency update (§4.I: `(old * (n-1) + sample) / n`).
    async fn record<F, Fut, T>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        *self.last_operation.write().unwrap() = op;
        let started = Instant::now();
        let result = f().await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut count_entry = self.operation_counts.entry(op).or_insert(0);
        *count_entry += 1;
        let n = *count_entry;
        drop(count_entry);

        self.average_latency
            .entry(op)
            .and_modify(|avg| *avg = (*avg * (n - 1) as f64 + elapsed_ms) / n as f64)
            .or_insert(elapsed_ms);

        if result.is_err() {
            *self.error_counts.entry(op).or_insert(0) += 1;
            self.set_connection_status(ConnectionStatus::Error);
        } else {
            self.set_connection_status(ConnectionStatus::Healthy);
        }
        result
    }
}

macro_rules! instrument_chunk_method {
    ($self:ident, $name:expr, $body:expr) => {
        $self.metrics.record($name, || $body).await
    };
}

/// [`ChunkStore`] wrapped with metrics collection (§4.I). Typically the
/// innermost layer the resilience wrappers sit above, so the counters
/// reflect backend-level outcomes, not retried/breaker-suppressed ones.
pub struct MetricsChunkStore<S: ChunkStore> {
    inner: S,
    metrics: StoreMetrics,
}

impl<S: ChunkStore> MetricsChunkStore<S> {
    pub fn new(inner: S, metrics: StoreMetrics) -> Self {
        Self { inner, metrics }
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }
}

#[async_trait]
impl<S: ChunkStore> ChunkStore for MetricsChunkStore<S> {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        instrument_chunk_method!(self, "chunk_store.initialize", self.inner.initialize(cancel))
    }

    async fn store(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<()> {
        instrument_chunk_method!(self, "chunk_store.store", self.inner.store(chunk, cancel))
    }

    async fn get_by_id(&self, id: &str, cancel: &CancellationToken) -> Result<Chunk> {
        instrument_chunk_method!(self, "chunk_store.get_by_id", self.inner.get_by_id(id, cancel))
    }

    async fn update(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<()> {
        instrument_chunk_method!(self, "chunk_store.update", self.inner.update(chunk, cancel))
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        instrument_chunk_method!(self, "chunk_store.delete", self.inner.delete(id, cancel))
    }

    async fn list_by_repository(
        &self,
        repository: &str,
        limit: usize,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Chunk>> {
        instrument_chunk_method!(
            self,
            "chunk_store.list_by_repository",
            self.inner.list_by_repository(repository, limit, offset, cancel)
        )
    }

    async fn list_by_session(&self, session_id: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        instrument_chunk_method!(self, "chunk_store.list_by_session", self.inner.list_by_session(session_id, cancel))
    }

    async fn search(&self, query: &SearchQuery, embedding: &[f64], cancel: &CancellationToken) -> Result<Vec<SearchResult>> {
        instrument_chunk_method!(self, "chunk_store.search", self.inner.search(query, embedding, cancel))
    }

    async fn batch_store(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<BatchResult> {
        instrument_chunk_method!(self, "chunk_store.batch_store", self.inner.batch_store(chunks, cancel))
    }

    async fn batch_delete(&self, ids: &[String], cancel: &CancellationToken) -> Result<BatchResult> {
        instrument_chunk_method!(self, "chunk_store.batch_delete", self.inner.batch_delete(ids, cancel))
    }

    async fn cleanup(&self, retention_days: i64, cancel: &CancellationToken) -> Result<u64> {
        instrument_chunk_method!(self, "chunk_store.cleanup", self.inner.cleanup(retention_days, cancel))
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        instrument_chunk_method!(self, "chunk_store.health_check", self.inner.health_check(cancel))
    }

    async fn get_stats(&self, cancel: &CancellationToken) -> Result<ChunkStoreStats> {
        instrument_chunk_method!(self, "chunk_store.get_stats", self.inner.get_stats(cancel))
    }
}

/// [`RelationshipStore`] wrapped with metrics collection (§4.I).
pub struct MetricsRelationshipStore<S: RelationshipStore> {
    inner: S,
    metrics: StoreMetrics,
}

impl<S: RelationshipStore> MetricsRelationshipStore<S> {
    pub fn new(inner: S, metrics: StoreMetrics) -> Self {
        Self { inner, metrics }
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }
}

#[async_trait]
impl<S: RelationshipStore> RelationshipStore for MetricsRelationshipStore<S> {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        instrument_chunk_method!(self, "relationship_store.initialize", self.inner.initialize(cancel))
    }

    async fn store(&self, relationship: &Relationship, cancel: &CancellationToken) -> Result<()> {
        instrument_chunk_method!(self, "relationship_store.store", self.inner.store(relationship, cancel))
    }

    async fn store_relationship(
        &self,
        source: &str,
        target: &str,
        relation_type: RelationType,
        confidence: f64,
        created_by: &str,
        cancel: &CancellationToken,
    ) -> Result<Relationship> {
        instrument_chunk_method!(
            self,
            "relationship_store.store_relationship",
            self.inner.store_relationship(source, target, relation_type, confidence, created_by, cancel)
        )
    }

    async fn get_relationships(&self, query: &RelationshipQuery, cancel: &CancellationToken) -> Result<Vec<Relationship>> {
        instrument_chunk_method!(self, "relationship_store.get_relationships", self.inner.get_relationships(query, cancel))
    }

    async fn traverse_graph(
        &self,
        start: &str,
        max_depth: i64,
        relation_types: &[RelationType],
        cancel: &CancellationToken,
    ) -> Result<GraphTraversalResult> {
        instrument_chunk_method!(
            self,
            "relationship_store.traverse_graph",
            self.inner.traverse_graph(start, max_depth, relation_types, cancel)
        )
    }

    async fn update_relationship(
        &self,
        id: &str,
        confidence: Option<f64>,
        factors: Option<ConfidenceFactors>,
        cancel: &CancellationToken,
    ) -> Result<Relationship> {
        instrument_chunk_method!(
            self,
            "relationship_store.update_relationship",
            self.inner.update_relationship(id, confidence, factors, cancel)
        )
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        instrument_chunk_method!(self, "relationship_store.delete", self.inner.delete(id, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChunkType;
    use crate::driver::{MockBackend, MockDriver, MockDriverFactory};
    use crate::pool::{ConnectionPool, PoolConfig};
    use crate::store::chunk_store::DriverChunkStore;
    use std::sync::Arc;

    fn make_store() -> MetricsChunkStore<DriverChunkStore<MockDriver>> {
        let backend = MockBackend::new();
        let factory = Arc::new(MockDriverFactory::new(backend));
        let pool = ConnectionPool::new(PoolConfig { max_size: 2, min_size: 0, ..Default::default() }, factory);
        MetricsChunkStore::new(DriverChunkStore::new(pool, 2), StoreMetrics::new())
    }

    #[tokio::test]
    async fn records_counts_and_errors() {
        let store = make_store();
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();

        let chunk = Chunk::new("s", ChunkType::Problem, "c", "s", vec![0.0, 0.0]);
        store.store(&chunk, &cancel).await.unwrap();
        let snap = store.metrics().snapshot("chunk_store.store");
        assert_eq!(snap.count, 1);
        assert_eq!(snap.error_count, 0);
        assert_eq!(store.metrics().last_operation(), "chunk_store.store");

        let bad = Chunk::new("s", ChunkType::Problem, "c", "s", vec![0.0]);
        let _ = store.store(&bad, &cancel).await;
        let snap = store.metrics().snapshot("chunk_store.store");
        assert_eq!(snap.count, 2);
        assert_eq!(snap.error_count, 1);
    }

    #[tokio::test]
    async fn connection_status_reflects_last_outcome() {
        let store = make_store();
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();
        let chunk = Chunk::new("s", ChunkType::Problem, "c", "s", vec![0.0, 0.0]);
        store.store(&chunk, &cancel).await.unwrap();
        assert_eq!(store.metrics().connection_status(), ConnectionStatus::Healthy);
    }
}
