use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use common::storage::{BlobKey, ContentHash};
use sea_orm::Set;
use uuid::Uuid;

use crate::entity::file_record;

use super::error::FileError;

/// Who owns the physical bytes a record points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The record owns its bytes.
    Canonical,
    /// The record shares the bytes of `canonical_id`, which is always canonical itself.
    Duplicate { canonical_id: Uuid },
}

/// A logical upload as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: Uuid,
    pub display_name: String,
    pub physical_ref: BlobKey,
    pub content_type: String,
    pub byte_size: u64,
    pub content_hash: ContentHash,
    pub created_at: DateTime<Utc>,
    pub ownership: Ownership,
}

impl FileRecord {
    pub fn is_duplicate(&self) -> bool {
        matches!(self.ownership, Ownership::Duplicate { .. })
    }

    pub fn canonical_id(&self) -> Option<Uuid> {
        match self.ownership {
            Ownership::Canonical => None,
            Ownership::Duplicate { canonical_id } => Some(canonical_id),
        }
    }

    /// Display name of the canonical owner, for duplicates only.
    pub fn original_name<'a>(&self, canonicals: &'a HashMap<Uuid, FileRecord>) -> Option<&'a str> {
        self.canonical_id()
            .and_then(|id| canonicals.get(&id))
            .map(|canonical| canonical.display_name.as_str())
    }
}

impl TryFrom<file_record::Model> for FileRecord {
    type Error = FileError;

    fn try_from(model: file_record::Model) -> Result<Self, Self::Error> {
        let id = model.id;
        let corrupt = |reason: String| FileError::CorruptRecord { id, reason };

        let physical_ref: BlobKey = model
            .physical_ref
            .parse()
            .map_err(|e| corrupt(format!("physical_ref: {e}")))?;
        let content_hash = ContentHash::from_hex(&model.content_hash)
            .map_err(|e| corrupt(format!("content_hash: {e}")))?;
        let byte_size = u64::try_from(model.byte_size)
            .map_err(|_| corrupt(format!("negative byte_size {}", model.byte_size)))?;

        let ownership = match model.canonical_id {
            None => Ownership::Canonical,
            Some(canonical_id) if canonical_id == model.id => {
                return Err(corrupt("record references itself".into()));
            }
            Some(canonical_id) => Ownership::Duplicate { canonical_id },
        };

        Ok(Self {
            id: model.id,
            display_name: model.display_name,
            physical_ref,
            content_type: model.content_type,
            byte_size,
            content_hash,
            created_at: model.created_at,
            ownership,
        })
    }
}

/// A record known to own its bytes. Duplicates can only be derived from one of
/// these, which keeps every duplicate exactly one hop from its owner.
#[derive(Debug, Clone)]
pub struct CanonicalRecord(FileRecord);

impl CanonicalRecord {
    pub fn new(record: FileRecord) -> Option<Self> {
        match record.ownership {
            Ownership::Canonical => Some(Self(record)),
            Ownership::Duplicate { .. } => None,
        }
    }

    pub fn record(&self) -> &FileRecord {
        &self.0
    }
}

/// A record about to be inserted.
#[derive(Debug, Clone)]
pub struct NewRecord {
    display_name: String,
    content_type: String,
    physical_ref: BlobKey,
    byte_size: u64,
    content_hash: ContentHash,
    ownership: Ownership,
}

impl NewRecord {
    /// A record owning freshly written bytes.
    pub fn canonical(
        display_name: String,
        content_type: String,
        physical_ref: BlobKey,
        byte_size: u64,
        content_hash: ContentHash,
    ) -> Self {
        Self {
            display_name,
            content_type,
            physical_ref,
            byte_size,
            content_hash,
            ownership: Ownership::Canonical,
        }
    }

    /// A record sharing the bytes of `canonical`. Size and location come from
    /// the owner, never from the new upload.
    pub fn duplicate_of(
        canonical: &CanonicalRecord,
        display_name: String,
        content_type: String,
    ) -> Self {
        let owner = canonical.record();
        Self {
            display_name,
            content_type,
            physical_ref: owner.physical_ref,
            byte_size: owner.byte_size,
            content_hash: owner.content_hash,
            ownership: Ownership::Duplicate {
                canonical_id: owner.id,
            },
        }
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    /// Assign identity and creation time.
    pub(crate) fn materialize(self) -> FileRecord {
        FileRecord {
            id: Uuid::now_v7(),
            display_name: self.display_name,
            physical_ref: self.physical_ref,
            content_type: self.content_type,
            byte_size: self.byte_size,
            content_hash: self.content_hash,
            // Stored with microsecond precision.
            created_at: Utc::now().trunc_subsecs(6),
            ownership: self.ownership,
        }
    }
}

impl From<&FileRecord> for file_record::ActiveModel {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: Set(record.id),
            display_name: Set(record.display_name.clone()),
            physical_ref: Set(record.physical_ref.to_hex()),
            content_type: Set(record.content_type.clone()),
            byte_size: Set(i64::try_from(record.byte_size).unwrap_or(i64::MAX)),
            content_hash: Set(record.content_hash.to_hex()),
            created_at: Set(record.created_at),
            canonical_id: Set(record.canonical_id()),
        }
    }
}
