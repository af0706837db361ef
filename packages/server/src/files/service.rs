use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::RetryPolicy;
use common::storage::spool::SpooledUpload;
use common::storage::{BlobStore, BoxReader};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entity::storage_statistics;
use crate::utils::filename::validate_display_name;

use super::deletion::{DeletionCoordinator, DeletionOutcome};
use super::error::FileError;
use super::pending::PendingBlob;
use super::record::FileRecord;
use super::resolver::{DedupResolver, Resolution, UploadRequest};
use super::stats::StatisticsAggregator;
use super::store::{FileFilter, FileRecordStore};

/// Entry point of the engine. Every mutation runs as one transaction that
/// also recomputes the statistics row.
#[derive(Clone)]
pub struct FileService {
    db: DatabaseConnection,
    blob_store: Arc<dyn BlobStore>,
    retry: RetryPolicy,
}

impl FileService {
    pub fn new(db: DatabaseConnection, blob_store: Arc<dyn BlobStore>, retry: RetryPolicy) -> Self {
        Self {
            db,
            blob_store,
            retry,
        }
    }

    /// Record an upload, storing its bytes only if no canonical copy exists.
    ///
    /// A lost race for the canonical slot is retried, and the retry resolves
    /// to a duplicate of the winner.
    #[instrument(skip(self, content, content_type))]
    pub async fn upload(
        &self,
        content: &SpooledUpload,
        declared_name: &str,
        declared_size: u64,
        content_type: Option<&str>,
    ) -> Result<FileRecord, FileError> {
        let name = validate_display_name(declared_name)
            .map_err(|e| FileError::Validation(e.message().into()))?;

        retry_lost_races(&self.retry, move || {
            self.upload_once(UploadRequest {
                content,
                declared_name: name.to_string(),
                declared_size,
                content_type: content_type.map(str::to_string),
            })
        })
        .await
    }

    async fn upload_once(&self, request: UploadRequest<'_>) -> Result<FileRecord, FileError> {
        let txn = self.db.begin().await?;

        let Resolution {
            record,
            pending_blob,
        } = DedupResolver::new(&txn, &self.blob_store)
            .resolve(request)
            .await?;

        if let Err(e) = StatisticsAggregator::new(&txn).recompute().await {
            discard(pending_blob).await;
            return Err(e.into());
        }
        if let Err(e) = txn.commit().await {
            discard(pending_blob).await;
            return Err(e.into());
        }

        if let Some(pending) = pending_blob {
            pending.keep();
        }
        debug!(id = %record.id, duplicate = record.is_duplicate(), "Upload committed");
        Ok(record)
    }

    /// Delete a record. Bytes released by the deletion are removed after commit.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<DeletionOutcome, FileError> {
        let txn = self.db.begin().await?;
        let outcome = DeletionCoordinator::new(&txn).delete_record(id).await?;
        StatisticsAggregator::new(&txn).recompute().await?;
        txn.commit().await?;

        if let Some(key) = outcome.released_blob {
            match self.blob_store.delete(&key).await {
                Ok(_) => debug!(%key, "Removed released blob"),
                Err(e) => warn!(%key, error = %e, "Failed to remove released blob"),
            }
        }
        Ok(outcome)
    }

    pub async fn get(&self, id: Uuid) -> Result<FileRecord, FileError> {
        FileRecordStore::new(&self.db).get(id).await
    }

    pub async fn list(&self, filter: &FileFilter) -> Result<Vec<FileRecord>, FileError> {
        FileRecordStore::new(&self.db).list(filter).await
    }

    /// Canonical owners of the duplicates in `records`, keyed by id.
    pub async fn canonical_owners(
        &self,
        records: &[FileRecord],
    ) -> Result<HashMap<Uuid, FileRecord>, FileError> {
        let ids: HashSet<Uuid> = records.iter().filter_map(FileRecord::canonical_id).collect();
        let ids: Vec<Uuid> = ids.into_iter().collect();
        FileRecordStore::new(&self.db).find_many(&ids).await
    }

    /// The statistics row as of the last committed mutation.
    pub async fn statistics(&self) -> Result<Option<storage_statistics::Model>, FileError> {
        Ok(StatisticsAggregator::new(&self.db).snapshot().await?)
    }

    /// A reader over the bytes of `record`.
    pub async fn open_content(&self, record: &FileRecord) -> Result<BoxReader, FileError> {
        Ok(self.blob_store.get_stream(&record.physical_ref).await?)
    }
}

/// Run `attempt` again while it loses the canonical race and `policy` allows.
async fn retry_lost_races<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T, FileError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FileError>>,
{
    let mut attempts: u8 = 1;
    loop {
        match attempt().await {
            Err(FileError::Consistency { hash }) if policy.allows_retry(attempts) => {
                let delay = policy.delay_after(attempts);
                warn!(%hash, attempt = attempts, ?delay, "Lost canonical race, retrying");
                tokio::time::sleep(delay).await;
                attempts += 1;
            }
            result => return result,
        }
    }
}

async fn discard(pending: Option<PendingBlob>) {
    if let Some(pending) = pending {
        pending.discard().await;
    }
}
