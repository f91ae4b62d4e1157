//! Circuit breaker wrapper (§4.G): closed/open/half-open state machine that
//! fails fast when the backend is unhealthy. Sits outermost in the
//! canonical stack: `CircuitBreaker -> Retry -> Store`.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{
    BatchResult, Chunk, ChunkStoreStats, ConfidenceFactors, GraphTraversalResult, RelationType, Relationship,
    RelationshipQuery, SearchQuery, SearchResult,
};
use crate::error::{MemoryError, Result};
use crate::store::{ChunkStore, RelationshipStore};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, success_threshold: 2, timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Closed,
    Open,
    HalfOpen,
}

struct State {
    status: Status,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// The state machine itself, independent of which store trait it wraps.
pub struct CircuitBreakerCore {
    config: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreakerCore {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                status: Status::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state.lock().unwrap().status, Status::Open)
    }

    /// Runs `f` unless the breaker is open, in which case it fails fast with
    /// `circuit_breaker_is_open` without ever calling `f` (§4.G).
    pub async fn call<F, Fut, T>(&self, op: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut st = self.state.lock().unwrap();
            match st.status {
                Status::Open => {
                    let elapsed = st.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                    if elapsed >= self.config.timeout {
                        st.status = Status::HalfOpen;
                        st.consecutive_successes = 0;
                        st.trial_in_flight = true;
                        info!(target: "memory_store::breaker", op, "half-open trial starting");
                    } else {
                        return Err(MemoryError::CircuitBreakerOpen);
                    }
                }
                Status::HalfOpen => {
                    if st.trial_in_flight {
                        return Err(MemoryError::CircuitBreakerOpen);
                    }
                    st.trial_in_flight = true;
                }
                Status::Closed => {}
            }
        }

        let result = f().await;

        let mut st = self.state.lock().unwrap();
        match &result {
            Ok(_) => match st.status {
                Status::HalfOpen => {
                    st.trial_in_flight = false;
                    st.consecutive_successes += 1;
                    if st.consecutive_successes >= self.config.success_threshold {
                        st.status = Status::Closed;
                        st.consecutive_failures = 0;
                        st.consecutive_successes = 0;
                        info!(target: "memory_store::breaker", op, "closed after recovery");
                    }
                }
                Status::Closed => st.consecutive_failures = 0,
                Status::Open => {}
            },
            Err(err) if err.is_breaker_neutral() => {
                if st.status == Status::HalfOpen {
                    st.trial_in_flight = false;
                }
            }
            Err(err) => match st.status {
                Status::HalfOpen => {
                    st.trial_in_flight = false;
                    st.status = Status::Open;
                    st.opened_at = Some(Instant::now());
                    st.consecutive_successes = 0;
                    warn!(target: "memory_store::breaker", op, "half-open trial failed, reopening: {err}");
                }
                Status::Closed => {
                    st.consecutive_failures += 1;
                    if st.consecutive_failures >= self.config.failure_threshold {
                        st.status = Status::Open;
                        st.opened_at = Some(Instant::now());
                        warn!(target: "memory_store::breaker", op, failures = st.consecutive_failures, "opening circuit: {err}");
                    }
                }
                Status::Open => {}
            },
        }
        result
    }
}

/// [`ChunkStore`] wrapped with a shared circuit breaker (§4.G).
pub struct CircuitBreakerChunkStore<S: ChunkStore> {
    inner: S,
    breaker: CircuitBreakerCore,
}

impl<S: ChunkStore> CircuitBreakerChunkStore<S> {
    pub fn new(inner: S, config: CircuitBreakerConfig) -> Self {
        Self { inner, breaker: CircuitBreakerCore::new(config) }
    }

    pub fn is_open(&self) -> bool {
        self.breaker.is_open()
    }
}

#[async_trait]
impl<S: ChunkStore> ChunkStore for CircuitBreakerChunkStore<S> {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        self.breaker.call("initialize", || self.inner.initialize(cancel)).await
    }

    async fn store(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<()> {
        self.breaker.call("store", || self.inner.store(chunk, cancel)).await
    }

    async fn get_by_id(&self, id: &str, cancel: &CancellationToken) -> Result<Chunk> {
        self.breaker.call("get_by_id", || self.inner.get_by_id(id, cancel)).await
    }

    async fn update(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<()> {
        self.breaker.call("update", || self.inner.update(chunk, cancel)).await
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        self.breaker.call("delete", || self.inner.delete(id, cancel)).await
    }

    async fn list_by_repository(
        &self,
        repository: &str,
        limit: usize,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Chunk>> {
        self.breaker
            .call("list_by_repository", || self.inner.list_by_repository(repository, limit, offset, cancel))
            .await
    }

    async fn list_by_session(&self, session_id: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        self.breaker.call("list_by_session", || self.inner.list_by_session(session_id, cancel)).await
    }

    async fn search(&self, query: &SearchQuery, embedding: &[f64], cancel: &CancellationToken) -> Result<Vec<SearchResult>> {
        self.breaker.call("search", || self.inner.search(query, embedding, cancel)).await
    }

    async fn batch_store(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<BatchResult> {
        self.breaker.call("batch_store", || self.inner.batch_store(chunks, cancel)).await
    }

    async fn batch_delete(&self, ids: &[String], cancel: &CancellationToken) -> Result<BatchResult> {
        self.breaker.call("batch_delete", || self.inner.batch_delete(ids, cancel)).await
    }

    async fn cleanup(&self, retention_days: i64, cancel: &CancellationToken) -> Result<u64> {
        self.breaker.call("cleanup", || self.inner.cleanup(retention_days, cancel)).await
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        self.breaker.call("health_check", || self.inner.health_check(cancel)).await
    }

    async fn get_stats(&self, cancel: &CancellationToken) -> Result<ChunkStoreStats> {
        self.breaker.call("get_stats", || self.inner.get_stats(cancel)).await
    }
}

/// [`RelationshipStore`] wrapped with a shared circuit breaker (§4.G).
pub struct CircuitBreakerRelationshipStore<S: RelationshipStore> {
    inner: S,
    breaker: CircuitBreakerCore,
}

impl<S: RelationshipStore> CircuitBreakerRelationshipStore<S> {
    pub fn new(inner: S, config: CircuitBreakerConfig) -> Self {
        Self { inner, breaker: CircuitBreakerCore::new(config) }
    }

    pub fn is_open(&self) -> bool {
        self.breaker.is_open()
    }
}

#[async_trait]
impl<S: RelationshipStore> RelationshipStore for CircuitBreakerRelationshipStore<S> {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        self.breaker.call("initialize", || self.inner.initialize(cancel)).await
    }

    async fn store(&self, relationship: &Relationship, cancel: &CancellationToken) -> Result<()> {
        self.breaker.call("store", || self.inner.store(relationship, cancel)).await
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
        self.breaker
            .call("store_relationship", || {
                self.inner.store_relationship(source, target, relation_type, confidence, created_by, cancel)
            })
            .await
    }

    async fn get_relationships(&self, query: &RelationshipQuery, cancel: &CancellationToken) -> Result<Vec<Relationship>> {
        self.breaker.call("get_relationships", || self.inner.get_relationships(query, cancel)).await
    }

    async fn traverse_graph(
        &self,
        start: &str,
        max_depth: i64,
        relation_types: &[RelationType],
        cancel: &CancellationToken,
    ) -> Result<GraphTraversalResult> {
        self.breaker
            .call("traverse_graph", || self.inner.traverse_graph(start, max_depth, relation_types, cancel))
            .await
    }

    async fn update_relationship(
        &self,
        id: &str,
        confidence: Option<f64>,
        factors: Option<ConfidenceFactors>,
        cancel: &CancellationToken,
    ) -> Result<Relationship> {
        self.breaker
            .call("update_relationship", || self.inner.update_relationship(id, confidence, factors, cancel))
            .await
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        self.breaker.call("delete", || self.inner.delete(id, cancel)).await
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

    fn make_wrapped(config: CircuitBreakerConfig) -> (Arc<MockBackend>, CircuitBreakerChunkStore<DriverChunkStore<MockDriver>>) {
        let backend = MockBackend::new();
        let factory = Arc::new(MockDriverFactory::new(backend.clone()));
        let pool = ConnectionPool::new(PoolConfig { max_size: 2, min_size: 0, ..Default::default() }, factory);
        let inner = DriverChunkStore::new(pool, 2);
        (backend, CircuitBreakerChunkStore::new(inner, config))
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fails_fast() {
        let (backend, store) = make_wrapped(CircuitBreakerConfig { failure_threshold: 2, success_threshold: 1, timeout: Duration::from_secs(60) });
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();
        backend.set_down(true);

        let chunk = Chunk::new("s", ChunkType::Problem, "c", "s", vec![0.0, 0.0]);
        assert!(matches!(store.store(&chunk, &cancel).await.unwrap_err(), MemoryError::Transient(_)));
        assert!(matches!(store.store(&chunk, &cancel).await.unwrap_err(), MemoryError::Transient(_)));

        // third call must fail fast without reaching the backend
        let err = store.store(&chunk, &cancel).await.unwrap_err();
        assert!(matches!(err, MemoryError::CircuitBreakerOpen));
        assert!(store.is_open());
    }

    #[tokio::test]
    async fn half_open_trial_succeeds_and_closes() {
        let (backend, store) = make_wrapped(CircuitBreakerConfig { failure_threshold: 1, success_threshold: 1, timeout: Duration::from_millis(20) });
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();
        backend.set_down(true);

        let chunk = Chunk::new("s", ChunkType::Problem, "c", "s", vec![0.0, 0.0]);
        let _ = store.store(&chunk, &cancel).await;
        assert!(store.is_open());

        tokio::time::sleep(Duration::from_millis(30)).await;
        backend.set_down(false);
        store.store(&chunk, &cancel).await.unwrap();
        assert!(!store.is_open());
    }

    #[tokio::test]
    async fn validation_errors_are_breaker_neutral() {
        let (_backend, store) = make_wrapped(CircuitBreakerConfig { failure_threshold: 1, success_threshold: 1, timeout: Duration::from_secs(60) });
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();
        let bad = Chunk::new("s", ChunkType::Problem, "c", "s", vec![0.0]);
        let _ = store.store(&bad, &cancel).await;
        assert!(!store.is_open());
    }
}
