//! Crate-wide error taxonomy (§7).
//!
//! A single `thiserror`-derived enum classifies every failure path so that
//! wrappers (retry, circuit breaker) can decide what to do with an error
//! without re-parsing a message string.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("pool closed")]
    PoolClosed,

    #[error("pool exhausted")]
    PoolExhausted,

    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    #[error("circuit breaker is open")]
    CircuitBreakerOpen,

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// Coarse classification used by the retry wrapper and circuit breaker (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Transient,
    PoolState,
    Breaker,
    Cancelled,
    Config,
    NotImplemented,
}

impl MemoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::Validation(_) => ErrorKind::Validation,
            MemoryError::NotFound(_) => ErrorKind::NotFound,
            MemoryError::Transient(_) => ErrorKind::Transient,
            MemoryError::PoolClosed | MemoryError::PoolExhausted | MemoryError::InvalidConnection(_) => {
                ErrorKind::PoolState
            }
            MemoryError::CircuitBreakerOpen => ErrorKind::Breaker,
            MemoryError::Cancelled => ErrorKind::Cancelled,
            MemoryError::Config(_) => ErrorKind::Config,
            MemoryError::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }

    /// Whether the retry wrapper (§4.F) is allowed to retry this error.
    ///
    /// Transient backend errors and a momentarily-exhausted pool are
    /// retriable; everything else (validation, not-found, cancellation,
    /// a permanently closed pool) is surfaced immediately.
    pub fn is_retriable(&self) -> bool {
        matches!(self, MemoryError::Transient(_) | MemoryError::PoolExhausted)
    }

    /// Whether the circuit breaker (§4.G) should treat this as neither a
    /// success nor a failure (cancellation and validation pass through).
    pub fn is_breaker_neutral(&self) -> bool {
        matches!(self, MemoryError::Cancelled | MemoryError::Validation(_))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        MemoryError::Validation(message.into())
    }

    pub fn not_found(id: impl std::fmt::Display) -> Self {
        MemoryError::NotFound(id.to_string())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        MemoryError::Transient(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(MemoryError::transient("timeout").is_retriable());
        assert!(MemoryError::PoolExhausted.is_retriable());
        assert!(!MemoryError::validation("bad").is_retriable());
        assert!(!MemoryError::not_found("x").is_retriable());
        assert!(!MemoryError::Cancelled.is_retriable());
        assert!(!MemoryError::PoolClosed.is_retriable());
    }

    #[test]
    fn breaker_neutral_classification() {
        assert!(MemoryError::Cancelled.is_breaker_neutral());
        assert!(MemoryError::validation("bad").is_breaker_neutral());
        assert!(!MemoryError::transient("x").is_breaker_neutral());
        assert!(!MemoryError::CircuitBreakerOpen.is_breaker_neutral());
    }

    #[test]
    fn kind_mapping() {
        assert_eq!(MemoryError::PoolClosed.kind(), ErrorKind::PoolState);
        assert_eq!(MemoryError::PoolExhausted.kind(), ErrorKind::PoolState);
        assert_eq!(MemoryError::CircuitBreakerOpen.kind(), ErrorKind::Breaker);
    }
}
