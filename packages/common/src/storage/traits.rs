use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;
use super::key::BlobKey;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Physical byte storage addressed by opaque [`BlobKey`]s.
///
/// The store never deduplicates on its own; callers decide when to write new
/// bytes and when to share an existing key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under a freshly minted key.
    async fn put(&self, data: &[u8]) -> Result<BlobKey, StorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.put_stream(reader).await
    }

    /// Store data from an async reader under a freshly minted key.
    async fn put_stream(&self, reader: BoxReader) -> Result<BlobKey, StorageError>;

    /// Retrieve all bytes of a blob.
    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.get_stream(key).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Retrieve a blob as a streaming async reader.
    async fn get_stream(&self, key: &BlobKey) -> Result<BoxReader, StorageError>;

    async fn exists(&self, key: &BlobKey) -> Result<bool, StorageError>;

    /// Delete a blob.
    ///
    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    async fn delete(&self, key: &BlobKey) -> Result<bool, StorageError>;

    /// Size of a blob in bytes.
    async fn size(&self, key: &BlobKey) -> Result<u64, StorageError>;
}
