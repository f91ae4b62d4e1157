//! Resilience wrappers (§4.F, §4.G): retry-with-backoff and circuit-breaker
//! decorators that layer uniformly over [`crate::store::ChunkStore`] and
//! [`crate::store::RelationshipStore`].
//!
//! The canonical composition (§2) is `CircuitBreaker -> Retry -> Store`:
//!
//! ```rust,ignore
//! let breaker = CircuitBreakerChunkStore::new(
//!     RetryChunkStore::new(driver_store, RetryConfig::default()),
//!     CircuitBreakerConfig::default(),
//! );
//! ```

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreakerChunkStore, CircuitBreakerConfig, CircuitBreakerCore, CircuitBreakerRelationshipStore};
pub use retry::{RetryChunkStore, RetryConfig, RetryPolicy, RetryRelationshipStore};
