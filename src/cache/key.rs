//! Compact cache key type
//!
//! A [`CacheKey`] is the stable identity of a cached logical object. It is
//! stored as the raw 16-byte MD5 of the object's logical path rather than a
//! hex string, which keeps map lookups to a byte comparison and avoids heap
//! allocation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{CacheError, CacheResult};

/// Stable identifier of a cached logical object
///
/// Derived from the object's logical path (a URL, a remote object name, a
/// filesystem path) by hashing. Equal paths always map to equal keys, so a
/// cache instance shared between readers converges on one set of segments
/// per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 16]);

impl CacheKey {
    /// Derive a key from an object's logical path
    pub fn from_path(path: &str) -> Self {
        CacheKey(md5::compute(path.as_bytes()).0)
    }

    /// Parse a key from its 32-character hex representation
    pub fn from_hex(hex: &str) -> CacheResult<Self> {
        if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CacheError::InvalidKey {
                key: hex.to_string(),
            });
        }

        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).expect("validated ascii hex");
            bytes[i] = u8::from_str_radix(pair, 16).expect("validated ascii hex");
        }

        Ok(CacheKey(bytes))
    }

    /// Lowercase 32-character hex representation
    pub fn to_hex(&self) -> String {
        use std::fmt::Write;
        self.0.iter().fold(String::with_capacity(32), |mut acc, b| {
            write!(&mut acc, "{:02x}", b).expect("writing to a String cannot fail");
            acc
        })
    }

    /// Raw 16-byte representation
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        CacheKey(bytes)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

// Transparent serialization as a hex string
impl Serialize for CacheKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_is_stable() {
        let a = CacheKey::from_path("s3://bucket/part-0001.parquet");
        let b = CacheKey::from_path("s3://bucket/part-0001.parquet");
        let c = CacheKey::from_path("s3://bucket/part-0002.parquet");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hex_round_trip() {
        let key = CacheKey::from_path("object");
        let hex = key.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(CacheKey::from_hex(&hex).unwrap(), key);
    }

    #[test]
    fn test_case_insensitive_parse() {
        let lower = CacheKey::from_hex("50c9d1c465f3cbff652be1509c2e2a4e").unwrap();
        let upper = CacheKey::from_hex("50C9D1C465F3CBFF652BE1509C2E2A4E").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.to_hex(), "50c9d1c465f3cbff652be1509c2e2a4e");
    }

    #[test]
    fn test_invalid_hex_rejected() {
        for bad in ["", "50c9", "zz c9d1c465f3cbff652be1509c2e2a4e"] {
            assert!(CacheKey::from_hex(bad).is_err(), "should reject: {bad:?}");
        }
    }

    #[test]
    fn test_from_str_trait() {
        let key: CacheKey = "50c9d1c465f3cbff652be1509c2e2a4e".parse().unwrap();
        assert_eq!(key.to_hex(), "50c9d1c465f3cbff652be1509c2e2a4e");
    }

    #[test]
    fn test_size() {
        assert_eq!(std::mem::size_of::<CacheKey>(), 16);
    }
}
