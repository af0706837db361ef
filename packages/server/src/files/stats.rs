use chrono::{SubsecRound, Utc};
use sea_orm::sea_query::{LockType, OnConflict};
use sea_orm::{ConnectionTrait, DbBackend, DbErr, EntityTrait, QuerySelect, Set};
use uuid::Uuid;

use crate::entity::file_record;
use crate::entity::storage_statistics::{self, STATISTICS_ROW_ID};

/// Aggregate counters over the whole record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageTotals {
    pub total_files: i64,
    pub unique_files: i64,
    pub duplicate_files: i64,
    pub total_logical_size: i64,
    pub actual_physical_size: i64,
    pub saved_size: i64,
}

impl StorageTotals {
    /// Fold `(canonical_id, byte_size)` rows into totals.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (Option<Uuid>, i64)>,
    {
        let mut totals = Self::default();
        for (canonical_id, byte_size) in rows {
            let byte_size = byte_size.max(0);
            totals.total_files += 1;
            totals.total_logical_size = totals.total_logical_size.saturating_add(byte_size);
            if canonical_id.is_none() {
                totals.unique_files += 1;
                totals.actual_physical_size =
                    totals.actual_physical_size.saturating_add(byte_size);
            }
        }
        totals.duplicate_files = totals.total_files - totals.unique_files;
        totals.saved_size = totals.total_logical_size - totals.actual_physical_size;
        totals
    }

    fn into_active_model(self) -> storage_statistics::ActiveModel {
        storage_statistics::ActiveModel {
            id: Set(STATISTICS_ROW_ID),
            total_files: Set(self.total_files),
            unique_files: Set(self.unique_files),
            duplicate_files: Set(self.duplicate_files),
            total_logical_size: Set(self.total_logical_size),
            actual_physical_size: Set(self.actual_physical_size),
            saved_size: Set(self.saved_size),
            last_updated: Set(Utc::now().trunc_subsecs(6)),
        }
    }
}

/// Maintains the singleton statistics row.
pub struct StatisticsAggregator<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> StatisticsAggregator<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Insert the all-zero row if it does not exist yet.
    pub async fn ensure_row(&self) -> Result<(), DbErr> {
        let seed = StorageTotals::default().into_active_model();
        let result = storage_statistics::Entity::insert(seed)
            .on_conflict(
                OnConflict::column(storage_statistics::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.conn)
            .await;

        match result {
            Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Rescan every file record and overwrite the statistics row.
    ///
    /// Must run inside the transaction that mutated the records. The row is
    /// locked first so concurrent recomputes apply in commit order.
    pub async fn recompute(&self) -> Result<storage_statistics::Model, DbErr> {
        let lock = storage_statistics::Entity::find_by_id(STATISTICS_ROW_ID);
        let lock = match self.conn.get_database_backend() {
            DbBackend::Sqlite => lock,
            _ => lock.lock(LockType::Update),
        };
        lock.one(self.conn).await?;

        let rows: Vec<(Option<Uuid>, i64)> = file_record::Entity::find()
            .select_only()
            .column(file_record::Column::CanonicalId)
            .column(file_record::Column::ByteSize)
            .into_tuple()
            .all(self.conn)
            .await?;

        let totals = StorageTotals::from_rows(rows);
        let model = totals.into_active_model();

        storage_statistics::Entity::insert(model)
            .on_conflict(
                OnConflict::column(storage_statistics::Column::Id)
                    .update_columns([
                        storage_statistics::Column::TotalFiles,
                        storage_statistics::Column::UniqueFiles,
                        storage_statistics::Column::DuplicateFiles,
                        storage_statistics::Column::TotalLogicalSize,
                        storage_statistics::Column::ActualPhysicalSize,
                        storage_statistics::Column::SavedSize,
                        storage_statistics::Column::LastUpdated,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.conn)
            .await?;

        tracing::debug!(
            total_files = totals.total_files,
            unique_files = totals.unique_files,
            saved_size = totals.saved_size,
            "Recomputed storage statistics"
        );

        storage_statistics::Entity::find_by_id(STATISTICS_ROW_ID)
            .one(self.conn)
            .await?
            .ok_or_else(|| {
                DbErr::RecordNotFound("storage_statistics row missing after upsert".into())
            })
    }

    /// Read-only view of the last recompute.
    pub async fn snapshot(&self) -> Result<Option<storage_statistics::Model>, DbErr> {
        storage_statistics::Entity::find_by_id(STATISTICS_ROW_ID)
            .one(self.conn)
            .await
    }
}
