use std::sync::Arc;

use ::common::storage::{BlobKey, BlobStore, BoxReader, ContentHash, StorageError};
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, EntityTrait, PaginatorTrait, TransactionTrait};
use tokio::sync::Notify;

use server::entity::file_record;
use server::files::{
    DedupResolver, FileError, FileRecordStore, NewRecord, Ownership, UploadRequest,
};

use crate::common::{TestApp, file_count};

/// Blob store whose writes always fail.
struct BrokenStore;

#[async_trait]
impl BlobStore for BrokenStore {
    async fn put_stream(&self, _reader: BoxReader) -> Result<BlobKey, StorageError> {
        Err(StorageError::Io(std::io::Error::other("disk on fire")))
    }

    async fn get_stream(&self, key: &BlobKey) -> Result<BoxReader, StorageError> {
        Err(StorageError::NotFound(key.to_hex()))
    }

    async fn exists(&self, _key: &BlobKey) -> Result<bool, StorageError> {
        Ok(false)
    }

    async fn delete(&self, _key: &BlobKey) -> Result<bool, StorageError> {
        Ok(false)
    }

    async fn size(&self, key: &BlobKey) -> Result<u64, StorageError> {
        Err(StorageError::NotFound(key.to_hex()))
    }
}

/// Blob store that holds every write until released.
struct GatedStore {
    inner: Arc<dyn BlobStore>,
    reached: Arc<Notify>,
    resume: Arc<Notify>,
}

#[async_trait]
impl BlobStore for GatedStore {
    async fn put_stream(&self, reader: BoxReader) -> Result<BlobKey, StorageError> {
        self.reached.notify_one();
        self.resume.notified().await;
        self.inner.put_stream(reader).await
    }

    async fn get_stream(&self, key: &BlobKey) -> Result<BoxReader, StorageError> {
        self.inner.get_stream(key).await
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &BlobKey) -> Result<bool, StorageError> {
        self.inner.delete(key).await
    }

    async fn size(&self, key: &BlobKey) -> Result<u64, StorageError> {
        self.inner.size(key).await
    }
}

async fn record_count(app: &TestApp) -> u64 {
    file_record::Entity::find().count(&app.db).await.unwrap()
}

#[tokio::test]
async fn identical_content_yields_identical_fingerprints() {
    let app = TestApp::spawn().await;

    let first = app.spool(b"fingerprint me").await;
    let second = app.spool(b"fingerprint me").await;
    let other = app.spool(b"something else").await;

    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_ne!(first.fingerprint().hash, other.fingerprint().hash);
    assert_eq!(first.size(), 14);
}

#[tokio::test]
async fn duplicate_shares_reference_of_canonical() {
    let app = TestApp::spawn().await;
    let content = app.spool(b"shared reference").await;

    let canonical = app.files.upload(&content, "a.txt", 16, None).await.unwrap();
    let duplicate = app.files.upload(&content, "b.md", 16, None).await.unwrap();

    assert_eq!(canonical.ownership, Ownership::Canonical);
    assert_eq!(
        duplicate.ownership,
        Ownership::Duplicate {
            canonical_id: canonical.id
        }
    );
    assert_eq!(duplicate.physical_ref, canonical.physical_ref);
    assert_eq!(duplicate.content_hash, canonical.content_hash);
    assert_eq!(duplicate.content_type, "md");
}

#[tokio::test]
async fn declared_size_mismatch_is_rejected_before_writing() {
    let app = TestApp::spawn().await;
    let content = app.spool(b"twelve bytes").await;

    let err = app
        .files
        .upload(&content, "a.txt", 13, None)
        .await
        .unwrap_err();

    assert!(matches!(err, FileError::Validation(_)), "{err:?}");
    assert_eq!(app.blob_count(), 0);
    assert_eq!(record_count(&app).await, 0);
}

#[tokio::test]
async fn invalid_display_name_is_rejected() {
    let app = TestApp::spawn().await;
    let content = app.spool(b"x").await;

    for name in ["", "   ", "..", "dir/file.txt", "bad\nname"] {
        let err = app.files.upload(&content, name, 1, None).await.unwrap_err();
        assert!(matches!(err, FileError::Validation(_)), "{name:?}: {err:?}");
    }
    assert_eq!(record_count(&app).await, 0);
}

#[tokio::test]
async fn second_canonical_for_same_hash_is_a_consistency_error() {
    let app = TestApp::spawn().await;
    let store = FileRecordStore::new(&app.db);
    let hash = ContentHash::compute(b"contested");

    let canonical = |name: &str| {
        NewRecord::canonical(name.into(), "txt".into(), BlobKey::generate(), 9, hash)
    };

    store.insert(canonical("winner.txt")).await.unwrap();
    let err = store.insert(canonical("loser.txt")).await.unwrap_err();

    assert!(
        matches!(err, FileError::Consistency { hash: h } if h == hash),
        "{err:?}"
    );
    assert_eq!(record_count(&app).await, 1);
}

#[tokio::test]
async fn canonical_race_loser_discards_blob_and_retries_as_duplicate() {
    let app = TestApp::spawn().await;
    let content = app.spool(b"contested bytes").await;
    let hash = content.fingerprint().hash;

    let reached = Arc::new(Notify::new());
    let resume = Arc::new(Notify::new());
    let gated: Arc<dyn BlobStore> = Arc::new(GatedStore {
        inner: app.blob_store.clone(),
        reached: reached.clone(),
        resume: resume.clone(),
    });

    let txn = app.db.begin().await.unwrap();
    let resolver = DedupResolver::new(&txn, &gated);
    let request = UploadRequest {
        content: &content,
        declared_name: "loser.txt".into(),
        declared_size: 15,
        content_type: None,
    };

    // The winner claims the canonical slot while the loser's bytes are
    // being written, after the loser's lookup found nothing.
    let winner = async {
        reached.notified().await;
        let key = app.blob_store.put(b"contested bytes").await.unwrap();
        let record = FileRecordStore::new(&txn)
            .insert(NewRecord::canonical(
                "winner.txt".into(),
                "txt".into(),
                key,
                15,
                hash,
            ))
            .await
            .unwrap();
        resume.notify_one();
        record
    };

    let (lost, winner) = tokio::join!(resolver.resolve(request), winner);
    assert!(matches!(
        lost,
        Err(FileError::Consistency { hash: h }) if h == hash
    ));
    txn.commit().await.unwrap();
    assert_eq!(app.blob_count(), 1);

    let retried = app
        .files
        .upload(&content, "loser.txt", 15, None)
        .await
        .unwrap();

    assert_eq!(
        retried.ownership,
        Ownership::Duplicate {
            canonical_id: winner.id
        }
    );
    assert_eq!(retried.physical_ref, winner.physical_ref);
    assert_eq!(app.blob_count(), 1);
    assert_eq!(record_count(&app).await, 2);
}

#[tokio::test]
async fn failed_blob_write_leaves_no_record() {
    let app = TestApp::spawn_with_store(Some(Arc::new(BrokenStore))).await;

    let res = app.upload("a.txt", b"never stored".to_vec()).await;

    assert_eq!(res.status, 500);
    assert_eq!(res.body["code"], "INTERNAL_ERROR");
    assert_eq!(record_count(&app).await, 0);
    assert_eq!(app.statistics().await["total_files"], 0);
    assert_eq!(file_count(&app.spool_dir()), 0);
}

#[tokio::test]
async fn failed_commit_discards_written_blob() {
    let app = TestApp::spawn().await;
    app.db
        .execute_unprepared("DROP TABLE storage_statistics")
        .await
        .unwrap();
    let content = app.spool(b"orphan candidate").await;

    let err = app
        .files
        .upload(&content, "a.txt", 16, None)
        .await
        .unwrap_err();

    assert!(matches!(err, FileError::Database(_)), "{err:?}");
    assert_eq!(app.blob_count(), 0);
    assert_eq!(record_count(&app).await, 0);
}

#[tokio::test]
async fn deletion_outcome_reports_promotion() {
    let app = TestApp::spawn().await;
    let content = app.spool(b"inheritance").await;

    let a = app.files.upload(&content, "a", 11, None).await.unwrap();
    let b = app.files.upload(&content, "b", 11, None).await.unwrap();
    let c = app.files.upload(&content, "c", 11, None).await.unwrap();
    let d = app.files.upload(&content, "d", 11, None).await.unwrap();

    let outcome = app.files.delete(a.id).await.unwrap();

    assert_eq!(outcome.removed, a.id);
    assert_eq!(outcome.promoted, Some(b.id));
    assert_eq!(outcome.repointed, 2);
    assert_eq!(outcome.released_blob, None);

    let b = app.files.get(b.id).await.unwrap();
    assert_eq!(b.ownership, Ownership::Canonical);
    for id in [c.id, d.id] {
        let record = app.files.get(id).await.unwrap();
        assert_eq!(record.canonical_id(), Some(b.id));
        assert_eq!(record.physical_ref, b.physical_ref);
    }
    assert!(app.blob_store.exists(&b.physical_ref).await.unwrap());
}

#[tokio::test]
async fn deleting_sole_canonical_releases_blob() {
    let app = TestApp::spawn().await;
    let content = app.spool(b"solo").await;
    let record = app.files.upload(&content, "solo", 4, None).await.unwrap();

    let outcome = app.files.delete(record.id).await.unwrap();

    assert_eq!(outcome.released_blob, Some(record.physical_ref));
    assert!(!app.blob_store.exists(&record.physical_ref).await.unwrap());
    assert!(matches!(
        app.files.delete(record.id).await,
        Err(FileError::NotFound(id)) if id == record.id
    ));
}

#[tokio::test]
async fn canonical_owners_resolve_original_names() {
    let app = TestApp::spawn().await;
    let content = app.spool(b"names").await;
    let original = app.files.upload(&content, "orig.txt", 5, None).await.unwrap();
    let copy = app.files.upload(&content, "copy.txt", 5, None).await.unwrap();

    let records = vec![original.clone(), copy.clone()];
    let owners = app.files.canonical_owners(&records).await.unwrap();

    assert_eq!(owners.len(), 1);
    assert_eq!(copy.original_name(&owners), Some("orig.txt"));
    assert_eq!(original.original_name(&owners), None);
}
