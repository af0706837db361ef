use std::path::PathBuf;

use serde::Deserialize;

/// Physical storage configuration shared by every component that touches blobs.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory of the blob store. Default: "./data/blobs".
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
    /// Directory for in-flight upload spool files. Default: the OS temp dir.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    /// Largest accepted upload in bytes. Default: 128 MiB.
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("./data/blobs")
}
fn default_spool_dir() -> PathBuf {
    std::env::temp_dir().join("dedup-spool")
}
fn default_max_blob_size() -> u64 {
    128 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
            spool_dir: default_spool_dir(),
            max_blob_size: default_max_blob_size(),
        }
    }
}
