use sea_orm::{ConnectionTrait, DbErr};
use tracing::info;

use crate::files::StatisticsAggregator;

/// One canonical record per content hash. Entity attributes cannot express a
/// partial index, so it is created by hand on startup.
const CANONICAL_HASH_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS \
    idx_file_record_canonical_hash ON file_record (content_hash) \
    WHERE canonical_id IS NULL";

/// Ensure required database indexes exist. Errors are fatal.
pub async fn ensure_indexes<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    db.execute_unprepared(CANONICAL_HASH_INDEX).await?;
    info!("Ensured index idx_file_record_canonical_hash exists");
    Ok(())
}

/// Seed the singleton `storage_statistics` row.
pub async fn seed_statistics<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    StatisticsAggregator::new(db).ensure_row().await?;
    info!("Ensured storage statistics row exists");
    Ok(())
}
