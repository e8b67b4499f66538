//! Error types for the range cache
//!
//! This module defines the error taxonomy for cache operations. Errors are
//! designed to be actionable: recoverable conditions (capacity pressure,
//! writer conflicts) are distinguishable from defects and storage failures.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cache::{CacheKey, SegmentRange};

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// I/O error reading configuration
    #[error("I/O error reading configuration")]
    Io(#[from] std::io::Error),
}

/// Cache operation errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// Capacity reservation not satisfied within the timeout
    #[error("Cache capacity exhausted: could not reserve {requested} bytes within {timeout:?}")]
    CapacityExhausted { requested: u64, timeout: Duration },

    /// Write would exceed the segment's declared range
    #[error(
        "Range violation for segment {key}@{range}: write of {requested} bytes exceeds \
         remaining {remaining} bytes"
    )]
    RangeViolation {
        key: CacheKey,
        range: SegmentRange,
        requested: u64,
        remaining: u64,
    },

    /// Segment already owned by another writer
    #[error("Segment {key}@{range} is already being written by another writer")]
    WriterConflict { key: CacheKey, range: SegmentRange },

    /// State machine violation - a defect, not a runtime condition
    #[error("Invalid segment state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Segment failed and holds no readable bytes
    #[error("Segment {key}@{range} is in the errored state and holds no readable data")]
    SegmentErrored { key: CacheKey, range: SegmentRange },

    /// Bounded wait elapsed before the awaited data arrived
    #[error("Timed out after {timeout:?} waiting for segment data")]
    WaitTimeout { timeout: Duration },

    /// Segment still pinned or downloading, cannot be removed
    #[error("Segment {key}@{range} cannot be removed: {reason}")]
    RemovalDenied {
        key: CacheKey,
        range: SegmentRange,
        reason: String,
    },

    /// Invalid cache key format
    #[error("Invalid cache key: {key}. Expected 32-character hex string")]
    InvalidKey { key: String },

    /// Invalid byte range
    #[error("Invalid segment range [{start}, {end})")]
    InvalidRange { start: u64, end: u64 },

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Underlying storage error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Check if the error is recoverable (the caller may retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::CapacityExhausted { .. } | CacheError::WriterConflict { .. }
        )
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            CacheError::DirectoryNotAccessible { .. } => "directory",
            CacheError::CapacityExhausted { .. } => "capacity",
            CacheError::RangeViolation { .. } => "range",
            CacheError::WriterConflict { .. } => "writer",
            CacheError::InvalidStateTransition { .. } => "state",
            CacheError::SegmentErrored { .. } => "segment",
            CacheError::WaitTimeout { .. } => "timeout",
            CacheError::RemovalDenied { .. } => "removal",
            CacheError::InvalidKey { .. } => "key",
            CacheError::InvalidRange { .. } => "range",
            CacheError::Config(_) => "config",
            CacheError::Io(_) => "io",
        }
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let capacity = CacheError::CapacityExhausted {
            requested: 1024,
            timeout: Duration::from_secs(1),
        };
        assert!(capacity.is_recoverable());

        let defect = CacheError::InvalidStateTransition {
            from: "Downloaded".to_string(),
            to: "Downloading".to_string(),
        };
        assert!(!defect.is_recoverable());

        let io = CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!io.is_recoverable());
    }

    #[test]
    fn test_categories() {
        let capacity = CacheError::CapacityExhausted {
            requested: 10,
            timeout: Duration::ZERO,
        };
        assert_eq!(capacity.category(), "capacity");

        let key = CacheError::InvalidKey {
            key: "nope".to_string(),
        };
        assert_eq!(key.category(), "key");
    }
}
