//! Minimal bucket key namespace.
//!
//! Snapshots need bucket contents to capture and diff. Keys are addressed by
//! name and carry an [`ObjectId`] taken from the log index of the entry that
//! created them, so every replica assigns the same ids.

use crate::error::{Result, TesseraError};
use crate::snapshot::name::validate_bucket_path;
use crate::snapshot::{BucketCheckpoint, KeyInfo};
use crate::types::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keys of one bucket by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Keys by name.
    pub keys: BTreeMap<String, KeyInfo>,
}

/// All buckets, keyed by `(volume, bucket)` joined as `/{volume}/{bucket}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNamespace {
    buckets: BTreeMap<String, Bucket>,
}

fn bucket_key(volume: &str, bucket: &str) -> String {
    format!("/{volume}/{bucket}")
}

impl KeyNamespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bucket. Existing buckets are left untouched.
    ///
    /// Returns whether the bucket is new. Fails with `InvalidBucketName` when
    /// either name breaks the naming rules.
    pub fn create_bucket(&mut self, volume: &str, bucket: &str) -> Result<bool> {
        validate_bucket_path(volume, bucket)?;
        let key = bucket_key(volume, bucket);
        if self.buckets.contains_key(&key) {
            return Ok(false);
        }
        self.buckets.insert(key, Bucket::default());
        Ok(true)
    }

    /// Whether a bucket exists.
    #[must_use]
    pub fn has_bucket(&self, volume: &str, bucket: &str) -> bool {
        self.buckets.contains_key(&bucket_key(volume, bucket))
    }

    fn bucket_mut(&mut self, volume: &str, bucket: &str) -> Result<&mut Bucket> {
        self.buckets
            .get_mut(&bucket_key(volume, bucket))
            .ok_or_else(|| TesseraError::BucketNotFound {
                volume: volume.to_string(),
                bucket: bucket.to_string(),
            })
    }

    /// Bucket contents.
    pub fn bucket(&self, volume: &str, bucket: &str) -> Result<&Bucket> {
        self.buckets
            .get(&bucket_key(volume, bucket))
            .ok_or_else(|| TesseraError::BucketNotFound {
                volume: volume.to_string(),
                bucket: bucket.to_string(),
            })
    }

    /// Create or overwrite a key at log index `index`.
    ///
    /// A new key gets `ObjectId(index)`; an overwrite keeps its object id.
    pub fn put_key(
        &mut self,
        volume: &str,
        bucket: &str,
        key: &str,
        size: u64,
        checksum: &str,
        index: u64,
    ) -> Result<KeyInfo> {
        let b = self.bucket_mut(volume, bucket)?;
        let info = match b.keys.get(key) {
            Some(existing) => KeyInfo {
                object_id: existing.object_id,
                name: key.to_string(),
                size,
                checksum: checksum.to_string(),
                update_index: index,
            },
            None => KeyInfo {
                object_id: ObjectId::new(index),
                name: key.to_string(),
                size,
                checksum: checksum.to_string(),
                update_index: index,
            },
        };
        b.keys.insert(key.to_string(), info.clone());
        Ok(info)
    }

    /// Remove a key.
    pub fn delete_key(&mut self, volume: &str, bucket: &str, key: &str) -> Result<KeyInfo> {
        self.bucket_mut(volume, bucket)?
            .keys
            .remove(key)
            .ok_or_else(|| TesseraError::KeyNotFound {
                volume: volume.to_string(),
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    /// Rename a key, keeping its object id.
    pub fn rename_key(
        &mut self,
        volume: &str,
        bucket: &str,
        from: &str,
        to: &str,
        index: u64,
    ) -> Result<KeyInfo> {
        let b = self.bucket_mut(volume, bucket)?;
        if b.keys.contains_key(to) {
            return Err(TesseraError::KeyExists {
                volume: volume.to_string(),
                bucket: bucket.to_string(),
                key: to.to_string(),
            });
        }
        let mut info = b.keys.remove(from).ok_or_else(|| TesseraError::KeyNotFound {
            volume: volume.to_string(),
            bucket: bucket.to_string(),
            key: from.to_string(),
        })?;
        info.name = to.to_string();
        info.update_index = index;
        b.keys.insert(to.to_string(), info.clone());
        Ok(info)
    }

    /// Freeze the current keys of a bucket.
    pub fn checkpoint(&self, volume: &str, bucket: &str) -> Result<BucketCheckpoint> {
        let b = self.bucket(volume, bucket)?;
        Ok(BucketCheckpoint {
            snapshot_id: None,
            objects: b
                .keys
                .values()
                .map(|info| (info.object_id, info.clone()))
                .collect(),
        })
    }
}
