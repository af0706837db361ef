use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::RetryPolicy;
use common::StorageConfig;
use common::storage::BlobStore;
use common::storage::filesystem::FilesystemBlobStore;
use common::storage::spool::{SpooledUpload, UploadSpool};
use reqwest::Client;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tempfile::TempDir;

use server::config::{AppConfig, CorsConfig, DatabaseConfig, ServerConfig};
use server::files::FileService;
use server::state::AppState;
use server::{database, seed};

/// Largest upload accepted by test servers.
pub const TEST_MAX_BLOB_SIZE: u64 = 64 * 1024;

pub mod routes {
    pub const FILES: &str = "/api/v1/files";
    pub const STATISTICS: &str = "/api/v1/files/storage_statistics";

    pub fn file(id: &str) -> String {
        format!("/api/v1/files/{id}")
    }

    pub fn download(id: &str) -> String {
        format!("/api/v1/files/{id}/download")
    }
}

/// A running test server backed by a private SQLite file and blob directory.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    pub files: FileService,
    pub blob_store: Arc<dyn BlobStore>,
    pub config: AppConfig,
    _dir: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
    pub headers: reqwest::header::HeaderMap,
}

impl TestResponse {
    async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let text = res.text().await.expect("Failed to read response body");
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self {
            status,
            text,
            body,
            headers,
        }
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_store(None).await
    }

    /// Spawn with a custom blob store in place of the filesystem one.
    pub async fn spawn_with_store(blob_store: Option<Arc<dyn BlobStore>>) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let app_config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors: CorsConfig::default(),
            },
            database: DatabaseConfig {
                url: format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display()),
                max_connections: 8,
            },
            storage: StorageConfig {
                blob_dir: dir.path().join("blobs"),
                spool_dir: dir.path().join("spool"),
                max_blob_size: TEST_MAX_BLOB_SIZE,
            },
            dedup: RetryPolicy::default(),
        };

        let db = database::init_db(&app_config.database)
            .await
            .expect("Failed to initialize test database");
        seed::ensure_indexes(&db)
            .await
            .expect("Failed to create indexes");
        seed::seed_statistics(&db)
            .await
            .expect("Failed to seed statistics");

        let blob_store = match blob_store {
            Some(store) => store,
            None => Arc::new(
                FilesystemBlobStore::new(
                    app_config.storage.blob_dir.clone(),
                    app_config.storage.max_blob_size,
                )
                .await
                .expect("Failed to create blob store"),
            ),
        };

        let state = AppState::new(db.clone(), blob_store.clone(), app_config.clone());
        let files = state.files.clone();
        let app = server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            db,
            files,
            blob_store,
            config: app_config,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.config.storage.blob_dir.clone()
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.config.storage.spool_dir.clone()
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_with_query(&self, path: &str, query: &[(&str, &str)]) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_with_header(&self, path: &str, name: &str, value: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .header(name, value)
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("Failed to send DELETE request");

        TestResponse::from_response(res).await
    }

    pub async fn upload(&self, file_name: &str, file_bytes: Vec<u8>) -> TestResponse {
        self.upload_with_type(file_name, file_bytes, None).await
    }

    pub async fn upload_with_type(
        &self,
        file_name: &str,
        file_bytes: Vec<u8>,
        file_type: Option<&str>,
    ) -> TestResponse {
        let part = reqwest::multipart::Part::bytes(file_bytes)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .expect("Failed to set MIME type");
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(file_type) = file_type {
            form = form.text("file_type", file_type.to_string());
        }

        self.send_form(form).await
    }

    pub async fn send_form(&self, form: reqwest::multipart::Form) -> TestResponse {
        let res = self
            .client
            .post(self.url(routes::FILES))
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart upload request");

        TestResponse::from_response(res).await
    }

    /// Upload and return the created file body, asserting success.
    pub async fn upload_ok(&self, file_name: &str, file_bytes: &[u8]) -> Value {
        let res = self.upload(file_name, file_bytes.to_vec()).await;
        assert_eq!(res.status, 201, "Upload failed: {}", res.text);
        res.body
    }

    pub async fn statistics(&self) -> Value {
        let res = self.get(routes::STATISTICS).await;
        assert_eq!(res.status, 200, "Statistics failed: {}", res.text);
        res.body
    }

    /// Spool `bytes` the way the upload handler does.
    pub async fn spool(&self, bytes: &[u8]) -> SpooledUpload {
        let mut spool = UploadSpool::create(&self.spool_dir(), TEST_MAX_BLOB_SIZE)
            .await
            .expect("Failed to create spool");
        spool.write_chunk(bytes).await.expect("Failed to spool");
        spool.finish().await.expect("Failed to finish spool")
    }

    /// Number of blobs currently stored on disk.
    pub fn blob_count(&self) -> usize {
        count_files(&self.blob_dir())
    }
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if entry.file_name() == ".tmp" {
                0
            } else if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

/// Number of files left in a directory, non-recursive.
pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.flatten().count())
        .unwrap_or(0)
}
