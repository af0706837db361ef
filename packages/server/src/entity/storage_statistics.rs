use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Singleton aggregate over all file records. Only the row with
/// [`STATISTICS_ROW_ID`] is ever written.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "storage_statistics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub total_files: i64,
    pub unique_files: i64,
    pub duplicate_files: i64,
    pub total_logical_size: i64,
    pub actual_physical_size: i64,
    pub saved_size: i64,
    pub last_updated: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

pub const STATISTICS_ROW_ID: i32 = 1;
