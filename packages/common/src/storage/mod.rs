mod error;
mod hash;
mod key;
mod traits;

pub mod filesystem;
pub mod spool;

pub use error::StorageError;
pub use hash::{ContentHash, Fingerprint, HASH_CHUNK_SIZE, hash_stream};
pub use key::BlobKey;
pub use traits::{BlobStore, BoxReader};
