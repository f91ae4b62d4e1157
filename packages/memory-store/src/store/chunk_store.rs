//! Chunk store (§4.C): CRUD and query of [`Chunk`] records in the primary
//! collection.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::domain::{
    BatchError, BatchResult, Chunk, ChunkStoreStats, SearchQuery, SearchResult, DEFAULT_CHUNK_COLLECTION,
};
use crate::driver::{DistanceMetric, FieldCondition, Filter, VectorDriver};
use crate::error::{MemoryError, Result};
use crate::pool::{ConnectionPool, PoolableConnection};

use super::codec::{chunk_to_point, point_to_chunk};
use super::filter::{build_chunk_filter, build_retention_filter};

/// Scroll bound used by any read that could otherwise walk an unbounded
/// collection (§4.C, §8 boundary behavior).
pub const SCROLL_CAP: usize = 10_000;
/// Points sampled by `get_stats` for the type/repo/timestamp breakdown (§4.C).
const STATS_SAMPLE_CAP: usize = 1_000;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()>;
    async fn store(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<()>;
    async fn get_by_id(&self, id: &str, cancel: &CancellationToken) -> Result<Chunk>;
    async fn update(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<()>;
    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()>;
    async fn list_by_repository(
        &self,
        repository: &str,
        limit: usize,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Chunk>>;
    async fn list_by_session(&self, session_id: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>>;
    async fn search(&self, query: &SearchQuery, embedding: &[f64], cancel: &CancellationToken) -> Result<Vec<SearchResult>>;
    async fn batch_store(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<BatchResult>;
    async fn batch_delete(&self, ids: &[String], cancel: &CancellationToken) -> Result<BatchResult>;
    async fn cleanup(&self, retention_days: i64, cancel: &CancellationToken) -> Result<u64>;
    async fn health_check(&self, cancel: &CancellationToken) -> Result<()>;
    async fn get_stats(&self, cancel: &CancellationToken) -> Result<ChunkStoreStats>;
}

fn validate_chunk(chunk: &Chunk, dimension: usize) -> Result<()> {
    if chunk.id.is_empty() {
        return Err(MemoryError::validation("chunk id must not be empty"));
    }
    if chunk.content.is_empty() {
        return Err(MemoryError::validation("chunk content must not be empty"));
    }
    if chunk.embedding.len() != dimension {
        return Err(MemoryError::validation(format!(
            "embedding length {} does not match configured dimension {dimension}",
            chunk.embedding.len()
        )));
    }
    Ok(())
}

/// Base implementation: pool + driver, no retry or breaker behavior. Those
/// are layered on top in [`crate::resilience`] (§4.F, §4.G).
pub struct DriverChunkStore<C: PoolableConnection + Clone + VectorDriver> {
    pool: ConnectionPool<C>,
    collection: String,
    dimension: usize,
}

impl<C: PoolableConnection + Clone + VectorDriver> DriverChunkStore<C> {
    pub fn new(pool: ConnectionPool<C>, dimension: usize) -> Self {
        Self { pool, collection: DEFAULT_CHUNK_COLLECTION.to_string(), dimension }
    }

    pub fn with_collection(pool: ConnectionPool<C>, collection: impl Into<String>, dimension: usize) -> Self {
        Self { pool, collection: collection.into(), dimension }
    }

    async fn driver(&self, cancel: &CancellationToken) -> Result<crate::pool::PooledConnection<C>> {
        self.pool.get(cancel).await
    }
}

#[async_trait]
impl<C: PoolableConnection + Clone + VectorDriver> ChunkStore for DriverChunkStore<C> {
    #[instrument(skip_all, fields(collection = %self.collection))]
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        let conn = self.driver(cancel).await?;
        conn.conn().create_collection(&self.collection, self.dimension, DistanceMetric::Cosine).await
    }

    #[instrument(skip_all, fields(chunk_id = %chunk.id))]
    async fn store(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<()> {
        validate_chunk(chunk, self.dimension)?;
        let point = chunk_to_point(chunk);
        let conn = self.driver(cancel).await?;
        conn.conn().upsert(&self.collection, vec![point]).await
    }

    #[instrument(skip_all, fields(chunk_id = %id))]
    async fn get_by_id(&self, id: &str, cancel: &CancellationToken) -> Result<Chunk> {
        let conn = self.driver(cancel).await?;
        let mut points = conn.conn().get(&self.collection, &[id.to_string()], true, true).await?;
        let point = points.pop().ok_or_else(|| MemoryError::not_found(id))?;
        point_to_chunk(point)
    }

    async fn update(&self, chunk: &Chunk, cancel: &CancellationToken) -> Result<()> {
        self.store(chunk, cancel).await
    }

    #[instrument(skip_all, fields(chunk_id = %id))]
    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let conn = self.driver(cancel).await?;
        conn.conn().delete(&self.collection, &[id.to_string()]).await
    }

    #[instrument(skip_all, fields(repository = %repository))]
    async fn list_by_repository(
        &self,
        repository: &str,
        limit: usize,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Chunk>> {
        let scroll_limit = (limit + offset).min(SCROLL_CAP);
        let filter = Filter {
            must: vec![FieldCondition::Equals { field: "repository".into(), value: repository.into() }],
            should: vec![],
        };
        let conn = self.driver(cancel).await?;
        let points = conn.conn().scroll(&self.collection, Some(&filter), scroll_limit, true, true).await?;
        let mut chunks: Vec<Chunk> = points.into_iter().map(point_to_chunk).collect::<Result<_>>()?;
        chunks.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(chunks.into_iter().skip(offset).take(limit).collect())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn list_by_session(&self, session_id: &str, cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        let filter = Filter {
            must: vec![FieldCondition::Equals { field: "session_id".into(), value: session_id.into() }],
            should: vec![],
        };
        let conn = self.driver(cancel).await?;
        let points = conn.conn().scroll(&self.collection, Some(&filter), SCROLL_CAP, true, true).await?;
        let mut chunks: Vec<Chunk> = points.into_iter().map(point_to_chunk).collect::<Result<_>>()?;
        chunks.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(chunks)
    }

    #[instrument(skip_all, fields(limit = query.limit))]
    async fn search(&self, query: &SearchQuery, embedding: &[f64], cancel: &CancellationToken) -> Result<Vec<SearchResult>> {
        let filter = build_chunk_filter(query, Utc::now());
        let conn = self.driver(cancel).await?;
        let scored = conn.conn().query(&self.collection, embedding, filter.as_ref(), query.limit, None).await?;
        let mut results = Vec::with_capacity(scored.len());
        for point in scored {
            if point.score < query.min_relevance_score {
                continue;
            }
            let score = point.score;
            let chunk = point_to_chunk(crate::driver::Point { id: point.id, vector: point.vector.unwrap_or_default(), payload: point.payload })?;
            results.push(SearchResult { chunk, score });
        }
        Ok(results)
    }

    #[instrument(skip_all, fields(count = chunks.len()))]
    async fn batch_store(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<BatchResult> {
        if chunks.is_empty() {
            return Ok(BatchResult::default());
        }
        let mut result = BatchResult::default();
        let mut points = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            match validate_chunk(chunk, self.dimension) {
                Ok(()) => points.push(chunk_to_point(chunk)),
                Err(err) => {
                    result.failed += 1;
                    result.errors.push(BatchError { index, message: err.to_string() });
                }
            }
        }
        if points.is_empty() {
            return Ok(result);
        }
        let conn = self.driver(cancel).await?;
        match conn.conn().upsert(&self.collection, points).await {
            Ok(()) => {
                result.success = chunks.len() - result.failed;
                Ok(result)
            }
            Err(err) => {
                let message = err.to_string();
                let already_failed: std::collections::HashSet<usize> = result.errors.iter().map(|e| e.index).collect();
                for index in 0..chunks.len() {
                    if !already_failed.contains(&index) {
                        result.errors.push(BatchError { index, message: message.clone() });
                    }
                }
                result.success = 0;
                result.failed = chunks.len();
                tracing::error!(target: "memory_store::store", failed = result.failed, "batch upsert failed: {message}");
                Err(MemoryError::transient(format!("batch upsert of {} chunks failed: {message}", chunks.len())))
            }
        }
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn batch_delete(&self, ids: &[String], cancel: &CancellationToken) -> Result<BatchResult> {
        if ids.is_empty() {
            return Ok(BatchResult::default());
        }
        let conn = self.driver(cancel).await?;
        conn.conn().delete(&self.collection, ids).await?;
        Ok(BatchResult { success: ids.len(), failed: 0, errors: vec![] })
    }

    #[instrument(skip_all, fields(retention_days))]
    async fn cleanup(&self, retention_days: i64, cancel: &CancellationToken) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let filter = build_retention_filter(cutoff);
        let conn = self.driver(cancel).await?;
        let pre_count = conn.conn().count(&self.collection, Some(&filter)).await?;
        conn.conn().delete_by_filter(&self.collection, &filter).await?;
        Ok(pre_count)
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        let conn = self.driver(cancel).await?;
        conn.conn().get_collection_info(&self.collection).await.map(|_| ())
    }

    #[instrument(skip_all)]
    async fn get_stats(&self, cancel: &CancellationToken) -> Result<ChunkStoreStats> {
        let conn = self.driver(cancel).await?;
        let info = conn.conn().get_collection_info(&self.collection).await?;
        let total = info.point_count;
        let estimated_storage_bytes =
            total * (self.dimension as u64) * 4 + total * 2048 + info.segment_count * 1024 * 1024;

        let sample_limit = (total as usize).min(STATS_SAMPLE_CAP);
        let points = conn.conn().scroll(&self.collection, None, sample_limit, true, false).await?;

        let mut chunks_by_type: HashMap<String, u64> = HashMap::new();
        let mut chunks_by_repo: HashMap<String, u64> = HashMap::new();
        let mut oldest = None;
        let mut newest = None;
        for point in points {
            let chunk = point_to_chunk(point)?;
            *chunks_by_type.entry(chunk.chunk_type.as_str().to_string()).or_insert(0) += 1;
            *chunks_by_repo.entry(chunk.metadata.repository.clone()).or_insert(0) += 1;
            oldest = Some(oldest.map_or(chunk.timestamp, |o: chrono::DateTime<Utc>| o.min(chunk.timestamp)));
            newest = Some(newest.map_or(chunk.timestamp, |n: chrono::DateTime<Utc>| n.max(chunk.timestamp)));
        }

        Ok(ChunkStoreStats {
            total_chunks: total,
            estimated_storage_bytes,
            chunks_by_type,
            chunks_by_repo,
            oldest_timestamp: oldest,
            newest_timestamp: newest,
            average_embedding_length: self.dimension as f64,
        })
    }
}
