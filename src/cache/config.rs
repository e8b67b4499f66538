//! Cache configuration types and defaults
//!
//! Configuration is read once at cache construction. It can be built in code
//! with the `with_*` methods or loaded from a TOML file; either way
//! [`CacheConfig::validate`] runs before a cache accepts it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::cache;
use crate::errors::{ConfigError, ConfigResult};

/// What to do with a failed segment when its range is requested again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryPolicy {
    /// Drop the failed segment and create a fresh Empty one in its place
    #[default]
    Reallocate,
    /// Reset the failed segment to Empty in place, reusing its slot
    ResetInPlace,
}

/// Configuration for a [`FileCache`](super::FileCache) instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory for segment files (OS-specific default if None)
    pub cache_root: Option<PathBuf>,
    /// Total cache capacity in bytes
    pub capacity: u64,
    /// Maximum size of a single segment; larger gaps are split
    pub max_segment_size: u64,
    /// Bounded wait for capacity reservations
    #[serde(with = "humantime_serde")]
    pub reservation_timeout: Duration,
    /// Retry handling for failed segments
    pub retry_policy: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: None, // Will use the OS cache directory
            capacity: cache::DEFAULT_CAPACITY,
            max_segment_size: cache::DEFAULT_MAX_SEGMENT_SIZE,
            reservation_timeout: cache::DEFAULT_RESERVATION_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Create a configuration rooted at a specific directory
    pub fn with_cache_root(cache_root: PathBuf) -> Self {
        Self {
            cache_root: Some(cache_root),
            ..Default::default()
        }
    }

    /// Set total capacity in bytes
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the maximum single-segment size in bytes
    pub fn with_max_segment_size(mut self, max_segment_size: u64) -> Self {
        self.max_segment_size = max_segment_size;
        self
    }

    /// Set the bounded wait for capacity reservations
    pub fn with_reservation_timeout(mut self, timeout: Duration) -> Self {
        self.reservation_timeout = timeout;
        self
    }

    /// Set the retry policy for failed segments
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Check the configuration for values the cache cannot operate with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "capacity".to_string(),
                value: "0".to_string(),
                reason: "cache capacity must be positive".to_string(),
            });
        }
        if self.max_segment_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_segment_size".to_string(),
                value: "0".to_string(),
                reason: "segments must be able to hold at least one byte".to_string(),
            });
        }
        if self.max_segment_size > self.capacity {
            return Err(ConfigError::InvalidValue {
                field: "max_segment_size".to_string(),
                value: self.max_segment_size.to_string(),
                reason: format!(
                    "a single segment cannot exceed the cache capacity of {} bytes",
                    self.capacity
                ),
            });
        }
        Ok(())
    }

    /// Load and validate a configuration from a TOML file
    pub async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: CacheConfig = toml::from_str(&content)?;
        config.validate()?;

        debug!("Loaded cache configuration from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_root, None);
        assert_eq!(config.capacity, cache::DEFAULT_CAPACITY);
        assert_eq!(config.max_segment_size, cache::DEFAULT_MAX_SEGMENT_SIZE);
        assert_eq!(config.reservation_timeout, cache::DEFAULT_RESERVATION_TIMEOUT);
        assert_eq!(config.retry_policy, RetryPolicy::Reallocate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let root = PathBuf::from("/tmp/test");
        let config = CacheConfig::with_cache_root(root.clone())
            .with_capacity(1024 * 1024)
            .with_max_segment_size(64 * 1024)
            .with_reservation_timeout(Duration::from_secs(2))
            .with_retry_policy(RetryPolicy::ResetInPlace);

        assert_eq!(config.cache_root, Some(root));
        assert_eq!(config.capacity, 1024 * 1024);
        assert_eq!(config.max_segment_size, 64 * 1024);
        assert_eq!(config.reservation_timeout, Duration::from_secs(2));
        assert_eq!(config.retry_policy, RetryPolicy::ResetInPlace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_degenerate_sizes() {
        let zero_capacity = CacheConfig::default().with_capacity(0);
        assert!(zero_capacity.validate().is_err());

        let zero_segment = CacheConfig::default().with_max_segment_size(0);
        assert!(zero_segment.validate().is_err());

        let oversized_segment = CacheConfig::default()
            .with_capacity(100)
            .with_max_segment_size(200);
        assert!(oversized_segment.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = CacheConfig::with_cache_root(PathBuf::from("/var/cache/ranges"))
            .with_capacity(10 * 1024 * 1024)
            .with_reservation_timeout(Duration::from_millis(1500));

        let toml = toml::to_string(&config).unwrap();
        let back: CacheConfig = toml::from_str(&toml).unwrap();

        assert_eq!(back.cache_root, config.cache_root);
        assert_eq!(back.capacity, config.capacity);
        assert_eq!(back.reservation_timeout, config.reservation_timeout);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CacheConfig = toml::from_str(
            r#"
            capacity = 4096
            reservation_timeout = "250ms"
            retry_policy = "reset-in-place"
            "#,
        )
        .unwrap();

        assert_eq!(config.capacity, 4096);
        assert_eq!(config.reservation_timeout, Duration::from_millis(250));
        assert_eq!(config.retry_policy, RetryPolicy::ResetInPlace);
        assert_eq!(config.max_segment_size, cache::DEFAULT_MAX_SEGMENT_SIZE);
    }

    #[tokio::test]
    async fn test_load_from_missing_file() {
        let err = CacheConfig::load_from_file(Path::new("/nonexistent/cache.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.toml");
        tokio::fs::write(
            &path,
            r#"
            capacity = 1048576
            max_segment_size = 65536
            reservation_timeout = "3s"
            "#,
        )
        .await
        .unwrap();

        let config = CacheConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.capacity, 1048576);
        assert_eq!(config.max_segment_size, 65536);
        assert_eq!(config.reservation_timeout, Duration::from_secs(3));
    }
}
