use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One logical upload.
///
/// `canonical_id` is `None` for the record that owns its physical bytes and
/// points at that owner for duplicates. `physical_ref` and `byte_size` are
/// copied from the owner onto duplicates so list and aggregate queries never
/// need a self-join.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_record")]
pub struct Model {
    /// UUIDv7 primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// User-supplied filename.
    pub display_name: String,

    /// Blob key of the physical bytes (32 hex characters).
    pub physical_ref: String,

    /// Lower-cased extension or caller-supplied type, without a leading dot.
    pub content_type: String,

    pub byte_size: i64,

    /// SHA-256 of the content (64 hex characters).
    #[sea_orm(indexed)]
    pub content_hash: String,

    #[sea_orm(indexed)]
    pub created_at: DateTimeUtc,

    #[sea_orm(indexed)]
    pub canonical_id: Option<Uuid>,
}

impl ActiveModelBehavior for ActiveModel {}
