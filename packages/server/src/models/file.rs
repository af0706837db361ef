use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::storage_statistics;
use crate::files::{FileFilter, FileRecord};

/// Query parameters for file listing. All filters are optional and combined with AND.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct FileListQuery {
    /// Case-insensitive substring of the file name.
    #[param(example = "report")]
    pub file_name: Option<String>,
    /// Exact file type (lower-case extension without the dot).
    #[param(example = "pdf")]
    pub file_type: Option<String>,
    /// Minimum size in bytes, inclusive.
    #[param(example = 100)]
    pub min_size: Option<u64>,
    /// Maximum size in bytes, inclusive.
    #[param(example = 200)]
    pub max_size: Option<u64>,
    /// Earliest upload time, inclusive (RFC 3339).
    #[param(example = "2025-01-01T00:00:00Z")]
    pub from_date: Option<DateTime<Utc>>,
    /// Latest upload time, inclusive (RFC 3339).
    #[param(example = "2025-12-31T23:59:59Z")]
    pub to_date: Option<DateTime<Utc>>,
}

impl From<FileListQuery> for FileFilter {
    fn from(query: FileListQuery) -> Self {
        Self {
            name_contains: query.file_name.filter(|s| !s.trim().is_empty()),
            content_type: query
                .file_type
                .map(|t| t.trim().trim_start_matches('.').to_lowercase())
                .filter(|t| !t.is_empty()),
            min_size: query.min_size,
            max_size: query.max_size,
            uploaded_from: query.from_date,
            uploaded_to: query.to_date,
        }
    }
}

/// A stored file as seen by clients.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FileResponse {
    /// File ID (UUIDv7).
    #[schema(example = "01936f0e-1234-7abc-8000-000000000001")]
    pub id: String,
    /// Name the file was uploaded under.
    #[schema(example = "report.pdf")]
    pub name: String,
    /// Download URL.
    #[schema(example = "/api/v1/files/01936f0e-1234-7abc-8000-000000000001/download")]
    pub file: String,
    #[schema(example = "pdf")]
    pub file_type: String,
    /// Size in bytes.
    #[schema(example = 142857)]
    pub size: u64,
    /// SHA-256 of the content.
    #[schema(example = "a1b2c3d4e5f6...")]
    pub content_hash: String,
    pub uploaded_at: DateTime<Utc>,
    /// Whether the bytes are shared with an earlier upload.
    pub is_duplicate: bool,
    /// Name of the upload that owns the bytes, for duplicates.
    #[schema(example = "report-final.pdf")]
    pub original_filename: Option<String>,
}

impl FileResponse {
    /// `owners` must contain the canonical record of `record` if it is a duplicate.
    pub fn new(record: &FileRecord, owners: &HashMap<Uuid, FileRecord>) -> Self {
        Self {
            id: record.id.to_string(),
            name: record.display_name.clone(),
            file: download_url(record.id),
            file_type: record.content_type.clone(),
            size: record.byte_size,
            content_hash: record.content_hash.to_hex(),
            uploaded_at: record.created_at,
            is_duplicate: record.is_duplicate(),
            original_filename: record.original_name(owners).map(str::to_string),
        }
    }
}

pub fn download_url(id: Uuid) -> String {
    format!("/api/v1/files/{id}/download")
}

/// Response DTO for listing files.
#[derive(Serialize, utoipa::ToSchema)]
pub struct FileListResponse {
    pub files: Vec<FileResponse>,
    pub total: u64,
}

/// Aggregate storage savings.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatisticsResponse {
    /// Number of uploads.
    #[schema(example = 10)]
    pub total_files: i64,
    /// Uploads that own their bytes.
    #[schema(example = 4)]
    pub unique_files: i64,
    /// Uploads that share bytes with an earlier upload.
    #[schema(example = 6)]
    pub duplicates: i64,
    /// Sum of all upload sizes in bytes.
    #[schema(example = 1000)]
    pub total_size: i64,
    /// Bytes physically stored.
    #[schema(example = 400)]
    pub actual_size: i64,
    /// `total_size - actual_size`.
    #[schema(example = 600)]
    pub saved_size: i64,
    pub last_updated: DateTime<Utc>,
}

impl From<storage_statistics::Model> for StatisticsResponse {
    fn from(m: storage_statistics::Model) -> Self {
        Self {
            total_files: m.total_files,
            unique_files: m.unique_files,
            duplicates: m.duplicate_files,
            total_size: m.total_logical_size,
            actual_size: m.actual_physical_size,
            saved_size: m.saved_size,
            last_updated: m.last_updated,
        }
    }
}
