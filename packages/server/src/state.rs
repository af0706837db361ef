use std::sync::Arc;

use common::storage::BlobStore;
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::files::FileService;

#[derive(Clone)]
pub struct AppState {
    pub files: FileService,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(db: DatabaseConnection, blob_store: Arc<dyn BlobStore>, config: AppConfig) -> Self {
        let files = FileService::new(db, blob_store, config.dedup);
        Self { files, config }
    }
}
