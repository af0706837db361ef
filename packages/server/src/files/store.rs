use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::storage::ContentHash;
use sea_orm::prelude::Expr;
use sea_orm::sea_query::{Func, LikeExpr, LockType};
use sea_orm::*;
use uuid::Uuid;

use crate::entity::file_record;

use super::error::FileError;
use super::record::{CanonicalRecord, FileRecord, NewRecord};

/// Optional, AND-combined listing filters. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Case-insensitive substring of the display name.
    pub name_contains: Option<String>,
    /// Exact file type.
    pub content_type: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub uploaded_from: Option<DateTime<Utc>>,
    pub uploaded_to: Option<DateTime<Utc>>,
}

impl FileFilter {
    pub fn validate(&self) -> Result<(), FileError> {
        if let (Some(min), Some(max)) = (self.min_size, self.max_size)
            && min > max
        {
            return Err(FileError::Validation(
                "min_size must not exceed max_size".into(),
            ));
        }
        if let (Some(from), Some(to)) = (self.uploaded_from, self.uploaded_to)
            && from > to
        {
            return Err(FileError::Validation(
                "from_date must not be after to_date".into(),
            ));
        }
        Ok(())
    }

    fn apply(&self, mut select: Select<file_record::Entity>) -> Select<file_record::Entity> {
        if let Some(ref name) = self.name_contains {
            let term = escape_like(name.trim());
            if !term.is_empty() {
                select = select.filter(
                    Expr::expr(Func::lower(Expr::col(file_record::Column::DisplayName)))
                        .like(LikeExpr::new(format!("%{}%", term.to_lowercase())).escape('\\')),
                );
            }
        }
        if let Some(ref content_type) = self.content_type {
            select = select.filter(file_record::Column::ContentType.eq(content_type.as_str()));
        }
        if let Some(min) = self.min_size {
            select = select.filter(file_record::Column::ByteSize.gte(clamp_size(min)));
        }
        if let Some(max) = self.max_size {
            select = select.filter(file_record::Column::ByteSize.lte(clamp_size(max)));
        }
        if let Some(from) = self.uploaded_from {
            select = select.filter(file_record::Column::CreatedAt.gte(from));
        }
        if let Some(to) = self.uploaded_to {
            select = select.filter(file_record::Column::CreatedAt.lte(to));
        }
        select
    }
}

fn clamp_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Escape LIKE wildcard characters in a search string.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Row lock for the enclosing transaction. SQLite serializes writers on its
/// own and has no `FOR UPDATE`.
fn lock_rows(
    backend: DbBackend,
    select: Select<file_record::Entity>,
) -> Select<file_record::Entity> {
    match backend {
        DbBackend::Sqlite => select,
        _ => select.lock(LockType::Update),
    }
}

fn duplicates_query(canonical_id: Uuid) -> Select<file_record::Entity> {
    file_record::Entity::find()
        .filter(file_record::Column::CanonicalId.eq(canonical_id))
        .order_by_asc(file_record::Column::CreatedAt)
        .order_by_asc(file_record::Column::Id)
}

/// Durable CRUD over file records.
pub struct FileRecordStore<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> FileRecordStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    fn for_update(&self, select: Select<file_record::Entity>) -> Select<file_record::Entity> {
        lock_rows(self.conn.get_database_backend(), select)
    }

    /// Assign id and creation time, then insert.
    ///
    /// A second canonical record for the same content violates the partial
    /// unique index and surfaces as [`FileError::Consistency`].
    pub async fn insert(&self, new: NewRecord) -> Result<FileRecord, FileError> {
        let hash = *new.content_hash();
        let record = new.materialize();

        match file_record::Entity::insert(file_record::ActiveModel::from(&record))
            .exec_without_returning(self.conn)
            .await
        {
            Ok(_) => Ok(record),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(FileError::Consistency { hash })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<FileRecord>, FileError> {
        file_record::Entity::find_by_id(id)
            .one(self.conn)
            .await?
            .map(FileRecord::try_from)
            .transpose()
    }

    pub async fn get(&self, id: Uuid) -> Result<FileRecord, FileError> {
        self.find_by_id(id).await?.ok_or(FileError::NotFound(id))
    }

    /// Like [`get`](Self::get), holding a row lock until the transaction ends.
    pub async fn get_for_update(&self, id: Uuid) -> Result<FileRecord, FileError> {
        self.for_update(file_record::Entity::find_by_id(id))
            .one(self.conn)
            .await?
            .map(FileRecord::try_from)
            .transpose()?
            .ok_or(FileError::NotFound(id))
    }

    /// The record owning the bytes for `hash`, locked for the transaction.
    pub async fn find_canonical_by_hash(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<CanonicalRecord>, FileError> {
        let select = file_record::Entity::find()
            .filter(file_record::Column::ContentHash.eq(hash.to_hex()))
            .filter(file_record::Column::CanonicalId.is_null());

        let Some(model) = self.for_update(select).one(self.conn).await? else {
            return Ok(None);
        };

        let id = model.id;
        let record = FileRecord::try_from(model)?;
        CanonicalRecord::new(record).map(Some).ok_or_else(|| FileError::CorruptRecord {
            id,
            reason: "matched canonical query but is a duplicate".into(),
        })
    }

    /// Duplicates pointing at `canonical_id`, oldest first, each locked for
    /// the transaction. Rows deleted by a concurrent transaction are skipped.
    pub async fn duplicates_of(&self, canonical_id: Uuid) -> Result<Vec<FileRecord>, FileError> {
        self.for_update(duplicates_query(canonical_id))
            .all(self.conn)
            .await?
            .into_iter()
            .map(FileRecord::try_from)
            .collect()
    }

    /// Records by id; missing ids are skipped.
    pub async fn find_many(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, FileRecord>, FileError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        file_record::Entity::find()
            .filter(file_record::Column::Id.is_in(ids.iter().copied()))
            .all(self.conn)
            .await?
            .into_iter()
            .map(|model| FileRecord::try_from(model).map(|record| (record.id, record)))
            .collect()
    }

    /// Filtered listing, newest first.
    pub async fn list(&self, filter: &FileFilter) -> Result<Vec<FileRecord>, FileError> {
        filter.validate()?;

        filter
            .apply(file_record::Entity::find())
            .order_by_desc(file_record::Column::CreatedAt)
            .order_by_desc(file_record::Column::Id)
            .all(self.conn)
            .await?
            .into_iter()
            .map(FileRecord::try_from)
            .collect()
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), FileError> {
        let result = file_record::Entity::delete_by_id(id).exec(self.conn).await?;
        if result.rows_affected == 0 {
            return Err(FileError::NotFound(id));
        }
        Ok(())
    }

    /// Turn a duplicate into the owner of the bytes it already shares.
    pub async fn promote(&self, id: Uuid) -> Result<(), FileError> {
        let result = file_record::Entity::update_many()
            .col_expr(file_record::Column::CanonicalId, Expr::value(Option::<Uuid>::None))
            .filter(file_record::Column::Id.eq(id))
            .exec(self.conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(FileError::NotFound(id));
        }
        Ok(())
    }

    /// Point every duplicate of `from` at `to`. Returns the number of rows moved.
    pub async fn repoint(&self, from: Uuid, to: Uuid) -> Result<u64, FileError> {
        let result = file_record::Entity::update_many()
            .col_expr(file_record::Column::CanonicalId, Expr::value(Some(to)))
            .filter(file_record::Column::CanonicalId.eq(from))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
