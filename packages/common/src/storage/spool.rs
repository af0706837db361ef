use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::error::StorageError;
use super::hash::{Fingerprint, hash_stream};
use super::traits::BoxReader;

/// Removes the spool file when dropped, including on cancellation.
#[derive(Debug)]
struct SpoolGuard {
    path: PathBuf,
}

impl Drop for SpoolGuard {
    fn drop(&mut self) {
        // Best effort.
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Incoming upload being written to a temporary file chunk by chunk.
pub struct UploadSpool {
    guard: SpoolGuard,
    file: fs::File,
    written: u64,
    max_size: u64,
}

impl UploadSpool {
    /// Create an empty spool file under `dir`.
    pub async fn create(dir: &Path, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(format!("upload-{}", uuid::Uuid::new_v4()));
        let file = fs::File::create(&path).await?;
        Ok(Self {
            guard: SpoolGuard { path },
            file,
            written: 0,
            max_size,
        })
    }

    /// Append one chunk, enforcing the size limit.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        let written = self.written + chunk.len() as u64;
        if written > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: written,
                limit: self.max_size,
            });
        }
        self.file.write_all(chunk).await?;
        self.written = written;
        Ok(())
    }

    /// Bytes received so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush the spool, fingerprint it and hand back a re-readable handle.
    pub async fn finish(mut self) -> Result<SpooledUpload, StorageError> {
        self.file.flush().await?;
        drop(self.file);

        let mut file = fs::File::open(&self.guard.path).await?;
        let fingerprint = hash_stream(&mut file).await?;

        Ok(SpooledUpload {
            guard: self.guard,
            fingerprint,
        })
    }
}

/// A fully received upload: its fingerprint plus the spooled bytes.
#[derive(Debug)]
pub struct SpooledUpload {
    guard: SpoolGuard,
    fingerprint: Fingerprint,
}

impl SpooledUpload {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn size(&self) -> u64 {
        self.fingerprint.size
    }

    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Open a fresh reader positioned at the start of the content.
    ///
    /// May be called any number of times while `self` is alive.
    pub async fn reader(&self) -> Result<BoxReader, StorageError> {
        let file = fs::File::open(&self.guard.path).await?;
        Ok(Box::new(file))
    }
}
