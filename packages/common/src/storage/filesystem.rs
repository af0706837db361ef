use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use super::error::StorageError;
use super::key::BlobKey;
use super::traits::{BlobStore, BoxReader};

/// Filesystem-backed blob store.
///
/// Blobs are stored in a sharded directory layout:
/// `{base_path}/{first 2 hex chars}/{remaining 30 hex chars}`
pub struct FilesystemBlobStore {
    base_path: PathBuf,
    max_size: u64,
}

impl FilesystemBlobStore {
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn blob_path(&self, key: &BlobKey) -> PathBuf {
        self.base_path
            .join(key.shard_prefix())
            .join(key.shard_suffix())
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }

    /// Copy `reader` into `temp_path`, enforcing the size limit.
    async fn spool(&self, reader: &mut BoxReader, temp_path: &Path) -> Result<u64, StorageError> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut total_bytes: u64 = 0;
        let mut temp_file = fs::File::create(temp_path).await?;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            total_bytes += n as u64;
            if total_bytes > self.max_size {
                return Err(StorageError::SizeLimitExceeded {
                    actual: total_bytes,
                    limit: self.max_size,
                });
            }

            temp_file.write_all(&buf[..n]).await?;
        }

        temp_file.flush().await?;
        temp_file.sync_all().await?;
        Ok(total_bytes)
    }
}

/// Partially written blob under `.tmp`. Removed on drop, including when the
/// write is cancelled, unless it was renamed into place.
struct TempBlob {
    path: PathBuf,
    persisted: bool,
}

impl TempBlob {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    fn keep(mut self) {
        self.persisted = true;
    }
}

impl Drop for TempBlob {
    fn drop(&mut self) {
        if !self.persisted {
            // Best effort.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put_stream(&self, mut reader: BoxReader) -> Result<BlobKey, StorageError> {
        let temp = TempBlob::new(self.temp_path());

        self.spool(&mut reader, &temp.path).await?;

        let key = BlobKey::generate();
        let blob_path = self.blob_path(&key);

        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&temp.path, &blob_path).await?;
        temp.keep();

        tracing::debug!(%key, "Stored blob");
        Ok(key)
    }

    async fn get_stream(&self, key: &BlobKey) -> Result<BoxReader, StorageError> {
        let blob_path = self.blob_path(key);
        match fs::File::open(&blob_path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.blob_path(key)).await?)
    }

    async fn delete(&self, key: &BlobKey) -> Result<bool, StorageError> {
        match fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, key: &BlobKey) -> Result<u64, StorageError> {
        match fs::metadata(self.blob_path(key)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
