//! Object store locations parsed from `scheme://bucket/key` URIs

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// A bucket/key pair addressing one object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    /// Bucket name, never empty and never containing `/`
    pub bucket: String,

    /// Object key, the remainder after the bucket segment
    pub key: String,
}

impl StorageLocation {
    /// Build a location from parts, enforcing the bucket invariant
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() || bucket.contains('/') {
            return Err(Error::InvalidLocation {
                uri: format!("{}/{}", bucket, key),
                reason: "bucket must be non-empty and contain no '/'".to_string(),
            });
        }
        Ok(Self { bucket, key })
    }

    /// Parse `scheme://bucket/key`
    ///
    /// `gs://my-bucket/ckpt/epoch=3.ckpt` → `("my-bucket", "ckpt/epoch=3.ckpt")`
    ///
    /// A URI with a bucket but no key (`s3://bucket`) parses with an empty key.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidLocation {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        if uri.is_empty() {
            return Err(invalid("path cannot be empty"));
        }

        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid("expected scheme://bucket/key"))?;

        if scheme.is_empty() {
            return Err(invalid("scheme must be non-empty"));
        }

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(invalid("bucket name must be non-empty"));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Ensure the location names an object, not just a bucket
    pub fn require_key(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::InvalidLocation {
                uri: self.to_string(),
                reason: "object key must be non-empty".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}
