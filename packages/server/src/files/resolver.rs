use std::sync::Arc;

use common::storage::BlobStore;
use common::storage::spool::SpooledUpload;
use sea_orm::ConnectionTrait;
use tracing::{debug, instrument};

use crate::utils::filename::{derive_content_type, normalize_content_type};

use super::error::FileError;
use super::pending::PendingBlob;
use super::record::{FileRecord, NewRecord};
use super::store::FileRecordStore;

/// A fully received upload handed to the engine.
pub struct UploadRequest<'u> {
    pub content: &'u SpooledUpload,
    pub declared_name: String,
    pub declared_size: u64,
    /// Explicit file type; derived from the name when absent or blank.
    pub content_type: Option<String>,
}

impl UploadRequest<'_> {
    fn resolved_content_type(&self) -> String {
        self.content_type
            .as_deref()
            .map(normalize_content_type)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| derive_content_type(&self.declared_name))
    }
}

/// Outcome of a resolution that has not been committed yet.
pub struct Resolution {
    pub record: FileRecord,
    /// Set when new bytes were written for a canonical record.
    pub pending_blob: Option<PendingBlob>,
}

/// Decides whether an upload becomes a new canonical record or a duplicate.
pub struct DedupResolver<'a, C: ConnectionTrait> {
    conn: &'a C,
    blob_store: &'a Arc<dyn BlobStore>,
}

impl<'a, C: ConnectionTrait> DedupResolver<'a, C> {
    pub fn new(conn: &'a C, blob_store: &'a Arc<dyn BlobStore>) -> Self {
        Self { conn, blob_store }
    }

    #[instrument(skip(self, request), fields(name = %request.declared_name, hash = %request.content.fingerprint().hash))]
    pub async fn resolve(&self, request: UploadRequest<'_>) -> Result<Resolution, FileError> {
        let store = FileRecordStore::new(self.conn);
        let fingerprint = request.content.fingerprint();
        let content_type = request.resolved_content_type();

        if request.declared_size != fingerprint.size {
            return Err(FileError::Validation(format!(
                "Declared size {} does not match received size {}",
                request.declared_size, fingerprint.size
            )));
        }

        if let Some(canonical) = store.find_canonical_by_hash(&fingerprint.hash).await? {
            debug!(canonical_id = %canonical.record().id, "Content already stored, recording duplicate");
            let new = NewRecord::duplicate_of(&canonical, request.declared_name, content_type);
            let record = store.insert(new).await?;
            return Ok(Resolution {
                record,
                pending_blob: None,
            });
        }

        let reader = request.content.reader().await?;
        let key = self.blob_store.put_stream(reader).await?;
        let pending = PendingBlob::new(self.blob_store.clone(), key);

        let new = NewRecord::canonical(
            request.declared_name,
            content_type,
            key,
            request.declared_size,
            fingerprint.hash,
        );
        match store.insert(new).await {
            Ok(record) => {
                debug!(id = %record.id, key = %key, "Stored new canonical content");
                Ok(Resolution {
                    record,
                    pending_blob: Some(pending),
                })
            }
            Err(e) => {
                pending.discard().await;
                Err(e)
            }
        }
    }
}
