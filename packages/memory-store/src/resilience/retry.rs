//! Retry wrapper (§4.F): idempotent-safe retries with exponential backoff
//! and optional jitter, layered uniformly over a [`ChunkStore`] or
//! [`RelationshipStore`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::{
    BatchResult, Chunk, ChunkStoreStats, ConfidenceFactors, GraphTraversalResult, RelationType, Relationship,
    RelationshipQuery, SearchQuery, SearchResult,
};
use crate::error::Result;
use crate::store::{ChunkStore, RelationshipStore};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// The backoff/attempt-loop logic, independent of which store trait it
/// ends up wrapping (§4.F).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before attempt `n` (1-indexed), per `min(initial * multiplier^(n-1), max)`
    /// with optional ±25% jitter (§4.F).
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.config.multiplier.powi(attempt as i32 - 1);
        let base_ms = (self.config.initial_delay.as_millis() as f64 * exp)
            .min(self.config.max_delay.as_millis() as f64);
        let ms = if self.config.jitter {
            let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
            (base_ms * (1.0 + jitter_frac)).max(0.0)
        } else {
            base_ms
        };
        Duration::from_millis(ms as u64)
    }

    /// Runs `f`, retrying on retriable errors until `max_attempts` is
    /// exhausted or `cancel` fires. Non-retriable errors and cancellation
    /// return immediately (§4.F, §7).
    pub async fn call<F, Fut, T>(&self, cancel: &CancellationToken, op: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && attempt < self.config.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(target: "memory_store::retry", op, attempt, delay_ms = delay.as_millis() as u64, "retrying after transient error: {err}");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(crate::error::MemoryError::Cancelled),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// [`ChunkStore`] wrapped with retry/backoff (§4.F). Composed beneath the
/// circuit breaker in the canonical stack: `CircuitBreaker -> Retry -> Store`.
pub struct RetryChunkStore<S: ChunkStore> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ChunkStore> RetryChunkStore<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, policy: RetryPolicy::new(config) }
    }
}

#[async_trait]
impl<S: ChunkStore> ChunkStore for RetryChunkStore<S> {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        self.policy.call(cancel, "initialize", || self.inner.initialize(cancel)).await
    }

    async fn store(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<()> {
        self.policy.call(cancel, "store", || self.inner.store(chunk, cancel)).await
    }

    async fn get_by_id(&self, id: &str, cancel: &CancellationToken) -> Result<Chunk> {
        self.policy.call(cancel, "get_by_id", || self.inner.get_by_id(id, cancel)).await
    }

    async fn update(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<()> {
        self.policy.call(cancel, "update", || self.inner.update(chunk, cancel)).await
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        self.policy.call(cancel, "delete", || self.inner.delete(id, cancel)).await
    }

    async fn list_by_repository(
        &self,
        repository: &str,
        limit: usize,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Chunk>> {
        self.policy
            .call(cancel, "list_by_repository", || self.inner.list_by_repository(repository, limit, offset, cancel))
            .await
    }

    async fn list_by_session(&self, session_id: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        self.policy.call(cancel, "list_by_session", || self.inner.list_by_session(session_id, cancel)).await
    }

    async fn search(&self, query: &SearchQuery, embedding: &[f64], cancel: &CancellationToken) -> Result<Vec<SearchResult>> {
        self.policy.call(cancel, "search", || self.inner.search(query, embedding, cancel)).await
    }

    async fn batch_store(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<BatchResult> {
        self.policy.call(cancel, "batch_store", || self.inner.batch_store(chunks, cancel)).await
    }

    async fn batch_delete(&self, ids: &[String], cancel: &CancellationToken) -> Result<BatchResult> {
        self.policy.call(cancel, "batch_delete", || self.inner.batch_delete(ids, cancel)).await
    }

    async fn cleanup(&self, retention_days: i64, cancel: &CancellationToken) -> Result<u64> {
        self.policy.call(cancel, "cleanup", || self.inner.cleanup(retention_days, cancel)).await
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        self.policy.call(cancel, "health_check", || self.inner.health_check(cancel)).await
    }

    async fn get_stats(&self, cancel: &CancellationToken) -> Result<ChunkStoreStats> {
        self.policy.call(cancel, "get_stats", || self.inner.get_stats(cancel)).await
    }
}

/// [`RelationshipStore`] wrapped with retry/backoff (§4.F).
pub struct RetryRelationshipStore<S: RelationshipStore> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: RelationshipStore> RetryRelationshipStore<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, policy: RetryPolicy::new(config) }
    }
}

#[async_trait]
impl<S: RelationshipStore> RelationshipStore for RetryRelationshipStore<S> {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        self.policy.call(cancel, "initialize", || self.inner.initialize(cancel)).await
    }

    async fn store(&self, relationship: &Relationship, cancel: &CancellationToken) -> Result<()> {
        self.policy.call(cancel, "store", || self.inner.store(relationship, cancel)).await
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
        self.policy
            .call(cancel, "store_relationship", || {
                self.inner.store_relationship(source, target, relation_type, confidence, created_by, cancel)
            })
            .await
    }

    async fn get_relationships(&self, query: &RelationshipQuery, cancel: &CancellationToken) -> Result<Vec<Relationship>> {
        self.policy.call(cancel, "get_relationships", || self.inner.get_relationships(query, cancel)).await
    }

    async fn traverse_graph(
        &self,
        start: &str,
        max_depth: i64,
        relation_types: &[RelationType],
        cancel: &CancellationToken,
    ) -> Result<GraphTraversalResult> {
        self.policy
            .call(cancel, "traverse_graph", || self.inner.traverse_graph(start, max_depth, relation_types, cancel))
            .await
    }

    async fn update_relationship(
        &self,
        id: &str,
        confidence: Option<f64>,
        factors: Option<ConfidenceFactors>,
        cancel: &CancellationToken,
    ) -> Result<Relationship> {
        self.policy
            .call(cancel, "update_relationship", || self.inner.update_relationship(id, confidence, factors.clone(), cancel))
            .await
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        self.policy.call(cancel, "delete", || self.inner.delete(id, cancel)).await
    }
}
