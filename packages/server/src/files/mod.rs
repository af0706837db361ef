//! Deduplication and statistics engine.

pub mod deletion;
pub mod error;
pub mod pending;
pub mod record;
pub mod resolver;
pub mod service;
pub mod stats;
pub mod store;

pub use deletion::{DeletionCoordinator, DeletionOutcome};
pub use error::FileError;
pub use pending::PendingBlob;
pub use record::{CanonicalRecord, FileRecord, NewRecord, Ownership};
pub use resolver::{DedupResolver, Resolution, UploadRequest};
pub use service::FileService;
pub use stats::{StatisticsAggregator, StorageTotals};
pub use store::{FileFilter, FileRecordStore};
