use std::sync::Arc;

use common::storage::{BlobKey, BlobStore};
use tracing::{debug, warn};

/// Freshly written bytes that no committed record references yet.
///
/// Unless [`keep`](Self::keep) is called after the owning transaction
/// commits, the blob is deleted: explicitly through [`discard`](Self::discard)
/// on known failure paths, or from `Drop` when the request is cancelled.
pub struct PendingBlob {
    store: Arc<dyn BlobStore>,
    key: BlobKey,
    armed: bool,
}

impl PendingBlob {
    pub fn new(store: Arc<dyn BlobStore>, key: BlobKey) -> Self {
        Self {
            store,
            key,
            armed: true,
        }
    }

    /// The referencing record is committed; the blob stays.
    pub fn keep(mut self) {
        self.armed = false;
    }

    /// Delete the blob now.
    pub async fn discard(mut self) {
        self.armed = false;
        match self.store.delete(&self.key).await {
            Ok(_) => debug!(key = %self.key, "Discarded uncommitted blob"),
            Err(e) => warn!(key = %self.key, error = %e, "Failed to discard uncommitted blob"),
        }
    }
}

impl Drop for PendingBlob {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let store = self.store.clone();
        let key = self.key;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.delete(&key).await {
                        warn!(%key, error = %e, "Failed to remove abandoned blob");
                    }
                });
            }
            Err(_) => warn!(%key, "No runtime to remove abandoned blob; it is orphaned"),
        }
    }
}
