//! Layered configuration (§10.3): compiled-in defaults, overridden by
//! environment variables, overridden by explicit builder calls. No
//! file-format parser is implemented; the loader only ever reads `std::env`.

use std::env;
use std::time::Duration;

use crate::domain::DEFAULT_EMBEDDING_DIMENSION;
use crate::pool::{DEFAULT_MAX_SIZE, DEFAULT_MIN_SIZE};

/// Storage-wide configuration (§6). Every field has a compiled-in default;
/// [`StorageConfig::from_env`] layers environment overrides on top, and the
/// builder methods layer explicit overrides on top of that.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Connection string for the content adapter's external database.
    /// The engine itself never dials this; it is carried for adapter
    /// implementations that do.
    pub database_url: Option<String>,
    pub max_connections: usize,
    pub min_connections: usize,
    pub conn_max_lifetime: Duration,

    pub vector_url: Option<String>,
    pub vector_dimension: usize,

    pub batch_size: usize,
    pub query_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,

    pub encryption_key: Option<String>,
    pub enable_audit_log: bool,
    pub enable_caching: bool,
    pub enable_metrics: bool,
    pub enable_tracing: bool,

    pub log_level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_SIZE,
            min_connections: DEFAULT_MIN_SIZE,
            conn_max_lifetime: Duration::from_secs(60 * 60),
            vector_url: None,
            vector_dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 100,
            query_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            encryption_key: None,
            enable_audit_log: false,
            enable_caching: true,
            enable_metrics: true,
            enable_tracing: true,
            log_level: "info".to_string(),
        }
    }
}

impl StorageConfig {
    /// Start from compiled-in defaults, then apply recognized environment
    /// variable overrides (§10.3): `POOL_MAX_SIZE`, `POOL_MIN_SIZE`,
    /// `MEMORY_VECTOR_URL`, `MEMORY_VECTOR_DIMENSION`, `MEMORY_LOG_LEVEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_usize("POOL_MAX_SIZE") {
            config.max_connections = v;
        }
        if let Some(v) = env_usize("POOL_MIN_SIZE") {
            config.min_connections = v;
        }
        if let Ok(v) = env::var("MEMORY_VECTOR_URL") {
            config.vector_url = Some(v);
        }
        if let Some(v) = env_usize("MEMORY_VECTOR_DIMENSION") {
            config.vector_dimension = v;
        }
        if let Ok(v) = env::var("MEMORY_LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_vector_url(mut self, url: impl Into<String>) -> Self {
        self.vector_url = Some(url.into());
        self
    }

    pub fn with_vector_dimension(mut self, dimension: usize) -> Self {
        self.vector_dimension = dimension;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pool_and_embedding_constants() {
        let config = StorageConfig::default();
        assert_eq!(config.max_connections, DEFAULT_MAX_SIZE);
        assert_eq!(config.min_connections, DEFAULT_MIN_SIZE);
        assert_eq!(config.vector_dimension, DEFAULT_EMBEDDING_DIMENSION);
        assert!(config.enable_metrics);
    }

    #[test]
    fn builder_overrides_apply_on_top_of_defaults() {
        let config = StorageConfig::default()
            .with_max_connections(25)
            .with_vector_dimension(768)
            .with_retry(5, Duration::from_millis(50));

        assert_eq!(config.max_connections, 25);
        assert_eq!(config.vector_dimension, 768);
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(50));
    }

    #[test]
    fn env_overrides_apply_over_defaults_when_present() {
        env::set_var("POOL_MAX_SIZE", "42");
        env::set_var("MEMORY_VECTOR_DIMENSION", "256");
        let config = StorageConfig::from_env();
        env::remove_var("POOL_MAX_SIZE");
        env::remove_var("MEMORY_VECTOR_DIMENSION");

        assert_eq!(config.max_connections, 42);
        assert_eq!(config.vector_dimension, 256);
    }
}
