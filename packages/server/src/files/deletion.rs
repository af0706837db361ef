use common::storage::BlobKey;
use sea_orm::ConnectionTrait;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::error::FileError;
use super::record::Ownership;
use super::store::FileRecordStore;

/// What a deletion changed, before commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub removed: Uuid,
    /// Duplicate that took over ownership of the shared bytes.
    pub promoted: Option<Uuid>,
    /// Other duplicates re-pointed at the promoted record.
    pub repointed: u64,
    /// Blob no longer referenced by any record. Delete it only after commit.
    pub released_blob: Option<BlobKey>,
}

/// Removes records while keeping every duplicate one hop from a live owner.
pub struct DeletionCoordinator<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> DeletionCoordinator<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Delete `id`.
    ///
    /// Deleting a canonical that still has duplicates promotes the oldest
    /// duplicate and re-points the rest at it. Deleting the last reference to
    /// a blob releases it.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete_record(&self, id: Uuid) -> Result<DeletionOutcome, FileError> {
        let store = FileRecordStore::new(self.conn);
        let record = store.get_for_update(id).await?;

        if let Ownership::Duplicate { .. } = record.ownership {
            store.delete(id).await?;
            debug!("Deleted duplicate record");
            return Ok(DeletionOutcome {
                removed: id,
                promoted: None,
                repointed: 0,
                released_blob: None,
            });
        }

        let duplicates = store.duplicates_of(id).await?;
        store.delete(id).await?;

        let Some(heir) = duplicates.first() else {
            debug!(key = %record.physical_ref, "Deleted last reference to blob");
            return Ok(DeletionOutcome {
                removed: id,
                promoted: None,
                repointed: 0,
                released_blob: Some(record.physical_ref),
            });
        };

        store.promote(heir.id).await?;
        let repointed = store.repoint(id, heir.id).await?;
        debug!(promoted = %heir.id, repointed, "Promoted oldest duplicate to canonical");

        Ok(DeletionOutcome {
            removed: id,
            promoted: Some(heir.id),
            repointed,
            released_blob: None,
        })
    }
}
