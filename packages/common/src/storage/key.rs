use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::StorageError;

/// Opaque handle to one physical object in a [`BlobStore`](super::BlobStore).
///
/// Every write mints a fresh key, so two logical records share bytes only by
/// holding the same key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey(Uuid);

impl BlobKey {
    /// Mint a new, time-ordered key.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// 32-character lowercase hex form, as persisted in records.
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }

    /// First 2 hex characters (shard directory).
    pub fn shard_prefix(&self) -> String {
        self.to_hex()[..2].to_string()
    }

    /// Remaining 30 hex characters (file name within the shard).
    pub fn shard_suffix(&self) -> String {
        self.to_hex()[2..].to_string()
    }
}

impl FromStr for BlobKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidKey(format!(
                "expected 32 hex characters, got {s:?}"
            )));
        }
        Uuid::try_parse(s)
            .map(Self)
            .map_err(|e| StorageError::InvalidKey(e.to_string()))
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.to_hex())
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for BlobKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlobKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
