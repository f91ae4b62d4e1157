//! A content-addressable memory engine: a vector-indexed chunk store paired
//! with a typed relationship graph over the same chunks, fronted by a
//! connection pool and resilience wrappers, so that callers speak a small
//! stable API regardless of which vector backend answers underneath.
//!
//! ## Layout
//!
//! - [`domain`]: the `Chunk`/`Relationship` model and the query/result
//!   types built around them.
//! - [`error`]: the crate-wide [`MemoryError`] taxonomy.
//! - [`driver`]: the [`driver::VectorDriver`] trait any backend implements,
//!   plus a brute-force [`driver::MockDriver`] used in tests.
//! - [`pool`]: a generic [`pool::ConnectionPool`] over any
//!   [`pool::PoolableConnection`].
//! - [`store`]: [`store::ChunkStore`] and [`store::RelationshipStore`],
//!   plus their driver-backed implementations and the payload codec/filter
//!   compiler they share.
//! - [`resilience`]: retry-with-backoff and circuit-breaker decorators that
//!   layer over either store trait.
//! - [`metrics`]: a lock-free per-operation counters/latency decorator,
//!   layering the same way.
//! - [`adapter`]: a mapping layer for callers still speaking the legacy
//!   `Content` domain model.
//! - [`config`]: layered [`config::StorageConfig`], defaults then env then
//!   builder overrides.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use memory_store::config::StorageConfig;
//! use memory_store::driver::{MockBackend, MockDriverFactory};
//! use memory_store::pool::{ConnectionPool, PoolConfig};
//! use memory_store::resilience::{CircuitBreakerChunkStore, CircuitBreakerConfig, RetryChunkStore, RetryConfig};
//! use memory_store::store::{ChunkStore, DriverChunkStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = StorageConfig::from_env();
//! let backend = MockBackend::new();
//! let factory = Arc::new(MockDriverFactory::new(backend));
//! let pool = ConnectionPool::new(PoolConfig::default(), factory);
//!
//! let store = DriverChunkStore::new(pool, config.vector_dimension);
//! let store = RetryChunkStore::new(store, RetryConfig::default());
//! let store = CircuitBreakerChunkStore::new(store, CircuitBreakerConfig::default());
//!
//! let cancel = CancellationToken::new();
//! store.initialize(&cancel).await?;
//! ```

pub mod adapter;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod resilience;
pub mod store;

pub use error::{MemoryError, Result};

pub use domain::{Chunk, ChunkMetadata, ChunkType, MemoryTier, RelationType, Relationship};
pub use store::{ChunkStore, RelationshipStore};
