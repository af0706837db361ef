use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::storage::spool::{SpooledUpload, UploadSpool};
use tokio_util::io::ReaderStream;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::extractors::query::AppQuery;
use crate::files::FileFilter;
use crate::models::file::{FileListQuery, FileListResponse, FileResponse, StatisticsResponse};
use crate::state::AppState;
use crate::utils::filename::content_disposition_value;

/// Multipart framing overhead allowed on top of the largest accepted file.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

pub fn upload_body_limit(max_blob_size: u64) -> DefaultBodyLimit {
    let limit = max_blob_size.saturating_add(MULTIPART_OVERHEAD);
    DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX))
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Files",
    operation_id = "uploadFile",
    summary = "Upload a file",
    description = "Stores a file. If byte-identical content was uploaded before, the new file \
        shares the existing bytes and is reported as a duplicate. The `file` multipart field is \
        required; an optional `file_type` field overrides the type derived from the extension.",
    request_body(content_type = "multipart/form-data", description = "File upload with optional type"),
    responses(
        (status = 201, description = "File stored", body = FileResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 409, description = "Concurrent upload of the same content (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, multipart), fields(name, size))]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut upload: Option<(String, SpooledUpload)> = None;
    let mut file_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| AppError::Validation("File field must have a filename".into()))?;
                let spooled = spool_field(field, &state).await?;
                upload = Some((name, spooled));
            }
            Some("file_type") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file_type: {e}")))?;
                file_type = Some(text);
            }
            _ => {} // Ignore unknown fields.
        }
    }

    let (name, content) = upload.ok_or_else(|| AppError::Validation("No file provided".into()))?;
    tracing::Span::current().record("name", name.as_str());
    tracing::Span::current().record("size", content.size());

    let record = state
        .files
        .upload(&content, &name, content.size(), file_type.as_deref())
        .await?;
    let owners = state
        .files
        .canonical_owners(std::slice::from_ref(&record))
        .await?;

    Ok((StatusCode::CREATED, Json(FileResponse::new(&record, &owners))))
}

/// Write a multipart field to a spool file chunk by chunk.
async fn spool_field(mut field: Field<'_>, state: &AppState) -> Result<SpooledUpload, AppError> {
    let storage = &state.config.storage;
    let mut spool = UploadSpool::create(&storage.spool_dir, storage.max_blob_size).await?;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
    {
        spool.write_chunk(&chunk).await?;
    }

    Ok(spool.finish().await?)
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Files",
    operation_id = "listFiles",
    summary = "List files",
    description = "Returns files newest first. Filters are optional and combined with AND; \
        size and date bounds are inclusive.",
    params(FileListQuery),
    responses(
        (status = 200, description = "File list", body = FileListResponse),
        (status = 400, description = "Invalid filter (VALIDATION_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, query))]
pub async fn list_files(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<FileListQuery>,
) -> Result<Json<FileListResponse>, AppError> {
    let filter = FileFilter::from(query);
    let records = state.files.list(&filter).await?;
    let owners = state.files.canonical_owners(&records).await?;

    let total = records.len() as u64;
    let files = records
        .iter()
        .map(|record| FileResponse::new(record, &owners))
        .collect();

    Ok(Json(FileListResponse { files, total }))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Files",
    operation_id = "getFile",
    summary = "Get file metadata",
    params(("id" = String, Path, description = "File ID (UUID)")),
    responses(
        (status = 200, description = "File metadata", body = FileResponse),
        (status = 400, description = "Invalid ID (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(id))]
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileResponse>, AppError> {
    let id = parse_file_id(&id)?;

    let record = state.files.get(id).await?;
    let owners = state
        .files
        .canonical_owners(std::slice::from_ref(&record))
        .await?;

    Ok(Json(FileResponse::new(&record, &owners)))
}

#[utoipa::path(
    get,
    path = "/{id}/download",
    tag = "Files",
    operation_id = "downloadFile",
    summary = "Download file content",
    description = "Streams the file content. Supports ETag-based caching via If-None-Match; \
        the ETag is the SHA-256 of the content.",
    params(("id" = String, Path, description = "File ID (UUID)")),
    responses(
        (status = 200, description = "File content"),
        (status = 304, description = "Not Modified (ETag match)"),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers), fields(id))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let id = parse_file_id(&id)?;
    let record = state.files.get(id).await?;

    let etag_value = format!("\"{}\"", record.content_hash);
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH)
        && let Ok(val) = if_none_match.to_str()
        && (val == etag_value || val == "*")
    {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let reader = state.files.open_content(&record).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    let content_type = mime_guess::from_path(&record.display_name)
        .first_or_octet_stream()
        .to_string();

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, record.byte_size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_value(&record.display_name),
        )
        .header(header::ETAG, &etag_value)
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))?;

    Ok(response)
}

#[utoipa::path(
    delete,
    path = "/{id}",
    tag = "Files",
    operation_id = "deleteFile",
    summary = "Delete a file",
    description = "Removes the file. When it owned bytes shared by duplicates, the oldest \
        duplicate takes over ownership; bytes no longer referenced are removed.",
    params(("id" = String, Path, description = "File ID (UUID)")),
    responses(
        (status = 204, description = "File deleted"),
        (status = 400, description = "Invalid ID (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(id))]
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_file_id(&id)?;
    state.files.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/storage_statistics",
    tag = "Files",
    operation_id = "getStorageStatistics",
    summary = "Storage savings",
    description = "Aggregate counters as of the last upload or deletion.",
    responses(
        (status = 200, description = "Statistics", body = StatisticsResponse),
        (status = 404, description = "No statistics available (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn storage_statistics(
    State(state): State<AppState>,
) -> Result<Json<StatisticsResponse>, AppError> {
    let stats = state
        .files
        .statistics()
        .await?
        .ok_or_else(|| AppError::NotFound("No statistics available".into()))?;

    Ok(Json(StatisticsResponse::from(stats)))
}

fn parse_file_id(id: &str) -> Result<Uuid, AppError> {
    let id = Uuid::parse_str(id).map_err(|_| AppError::Validation("Invalid file ID".into()))?;
    tracing::Span::current().record("id", tracing::field::display(id));
    Ok(id)
}
