//! Entries
//!
//! The logical record the protocol stores and retrieves: a bounded key, a
//! tag describing the value's integrity, the value itself, and the version
//! and durability metadata the device acts on.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::buffer::ByteBuffer;
use crate::error::{KineticError, Result};

/// Maximum key length accepted by the device
pub const MAX_KEY_LEN: usize = 4096;

/// Maximum tag length
pub const MAX_TAG_LEN: usize = 4096;

/// Maximum version length (both `new_version` and `db_version`)
pub const MAX_VERSION_LEN: usize = 2048;

/// Maximum value length (1 MB)
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

/// Algorithm used to produce an entry's tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Sha1,
    Sha2,
    Sha3,
    Crc32,
    Crc64,
}

/// Durability the device must reach before acknowledging a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Synchronization {
    /// Persisted before the response is sent
    WriteThrough,

    /// Acknowledged once buffered; persisted later
    WriteBack,

    /// Persisted along with every earlier write-back entry
    Flush,
}

/// A key/value record with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Bytes,
    pub tag: Bytes,
    pub value: Bytes,

    /// Version to store with the entry (put)
    pub new_version: Bytes,

    /// Version the device must currently hold (put/delete), unless `force`
    pub db_version: Bytes,

    pub algorithm: Algorithm,
    pub synchronization: Synchronization,

    /// Skip the version check on the device
    pub force: bool,

    /// For reads: return metadata without the value
    pub metadata_only: bool,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            key: Bytes::new(),
            tag: Bytes::new(),
            value: Bytes::new(),
            new_version: Bytes::new(),
            db_version: Bytes::new(),
            algorithm: Algorithm::Sha1,
            synchronization: Synchronization::WriteThrough,
            force: false,
            metadata_only: false,
        }
    }
}

impl Entry {
    /// Entry with a key and value; the tag is left empty
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Entry carrying only a key, for reads and deletes
    pub fn with_key(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<Bytes>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn new_version(mut self, version: impl Into<Bytes>) -> Self {
        self.new_version = version.into();
        self
    }

    pub fn db_version(mut self, version: impl Into<Bytes>) -> Self {
        self.db_version = version.into();
        self
    }

    pub fn synchronization(mut self, sync: Synchronization) -> Self {
        self.synchronization = sync;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn metadata_only(mut self, metadata_only: bool) -> Self {
        self.metadata_only = metadata_only;
        self
    }

    /// Replace the tag with a digest of the value computed with `algorithm`
    pub fn compute_tag(mut self, algorithm: Algorithm) -> Result<Self> {
        self.tag = compute_tag(algorithm, &self.value)?;
        self.algorithm = algorithm;
        Ok(self)
    }

    /// Check every field against the device limits
    pub fn validate(&self) -> Result<()> {
        check_len("key", &self.key, MAX_KEY_LEN)?;
        check_len("tag", &self.tag, MAX_TAG_LEN)?;
        check_len("value", &self.value, MAX_VALUE_LEN)?;
        check_len("new_version", &self.new_version, MAX_VERSION_LEN)?;
        check_len("db_version", &self.db_version, MAX_VERSION_LEN)?;
        Ok(())
    }
}

/// Key range for range scans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start_key: Bytes,
    pub end_key: Bytes,
    pub start_inclusive: bool,
    pub end_inclusive: bool,

    /// Upper bound on keys returned by the device
    pub max_returned: u32,

    /// Return keys in descending order
    pub reverse: bool,
}

impl KeyRange {
    /// Inclusive range `[start, end]`
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>, max_returned: u32) -> Self {
        Self {
            start_key: start.into(),
            end_key: end.into(),
            start_inclusive: true,
            end_inclusive: true,
            max_returned,
            reverse: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_len("start_key", &self.start_key, MAX_KEY_LEN)?;
        check_len("end_key", &self.end_key, MAX_KEY_LEN)?;
        if self.max_returned == 0 {
            return Err(KineticError::InvalidEntry(
                "max_returned must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Digest `value` with `algorithm`
pub fn compute_tag(algorithm: Algorithm, value: &[u8]) -> Result<Bytes> {
    let mut tag = ByteBuffer::with_capacity(MAX_TAG_LEN);
    match algorithm {
        Algorithm::Sha1 => tag.append(&Sha1::digest(value))?,
        Algorithm::Sha2 => tag.append(&Sha256::digest(value))?,
        Algorithm::Crc32 => tag.append(&crc32fast::hash(value).to_be_bytes())?,
        Algorithm::Sha3 | Algorithm::Crc64 => {
            return Err(KineticError::InvalidEntry(format!(
                "tag computation not supported for {:?}",
                algorithm
            )))
        }
    };
    Ok(tag.freeze())
}

fn check_len(field: &str, bytes: &[u8], max: usize) -> Result<()> {
    if bytes.len() > max {
        return Err(KineticError::InvalidEntry(format!(
            "{} too long: {} bytes (max {})",
            field,
            bytes.len(),
            max
        )));
    }
    Ok(())
}
