use serde_json::{Value, json};

use crate::common::{TestApp, routes};

/// The six counters, without `last_updated`.
fn counters(stats: &Value) -> Value {
    json!({
        "total_files": stats["total_files"],
        "unique_files": stats["unique_files"],
        "duplicates": stats["duplicates"],
        "total_size": stats["total_size"],
        "actual_size": stats["actual_size"],
        "saved_size": stats["saved_size"],
    })
}

fn assert_saved_invariant(stats: &Value) {
    let total = stats["total_size"].as_i64().unwrap();
    let actual = stats["actual_size"].as_i64().unwrap();
    assert_eq!(stats["saved_size"].as_i64().unwrap(), total - actual);
    let files = stats["total_files"].as_i64().unwrap();
    let unique = stats["unique_files"].as_i64().unwrap();
    assert_eq!(stats["duplicates"].as_i64().unwrap(), files - unique);
}

#[tokio::test]
async fn fresh_store_reports_zeroes() {
    let app = TestApp::spawn().await;

    let stats = app.statistics().await;

    assert_eq!(
        counters(&stats),
        json!({
            "total_files": 0,
            "unique_files": 0,
            "duplicates": 0,
            "total_size": 0,
            "actual_size": 0,
            "saved_size": 0,
        })
    );
    assert!(stats["last_updated"].is_string());
}

#[tokio::test]
async fn n_uploads_of_one_byte() {
    let app = TestApp::spawn().await;
    let n = 4;

    for i in 0..n {
        app.upload_ok(&format!("a{i}.txt"), b"A").await;
    }

    assert_eq!(
        counters(&app.statistics().await),
        json!({
            "total_files": n,
            "unique_files": 1,
            "duplicates": n - 1,
            "total_size": n,
            "actual_size": 1,
            "saved_size": n - 1,
        })
    );
}

#[tokio::test]
async fn deleting_duplicate_only_touches_logical_counters() {
    let app = TestApp::spawn().await;
    app.upload_ok("a.txt", b"0123456789").await;
    let dup = app.upload_ok("b.txt", b"0123456789").await;
    app.upload_ok("c.txt", b"other").await;
    let before = app.statistics().await;

    let res = app
        .delete(&routes::file(dup["id"].as_str().unwrap()))
        .await;
    assert_eq!(res.status, 204);
    let after = app.statistics().await;

    assert_eq!(after["total_files"], before["total_files"].as_i64().unwrap() - 1);
    assert_eq!(after["duplicates"], before["duplicates"].as_i64().unwrap() - 1);
    assert_eq!(after["unique_files"], before["unique_files"]);
    assert_eq!(after["actual_size"], before["actual_size"]);
    assert_eq!(after["total_size"], before["total_size"].as_i64().unwrap() - 10);
    assert_saved_invariant(&after);
}

#[tokio::test]
async fn saved_size_invariant_holds_after_every_mutation() {
    let app = TestApp::spawn().await;

    let a = app.upload_ok("a.bin", &[1u8; 300]).await;
    assert_saved_invariant(&app.statistics().await);
    app.upload_ok("b.bin", &[1u8; 300]).await;
    assert_saved_invariant(&app.statistics().await);
    app.upload_ok("c.bin", &[2u8; 120]).await;
    assert_saved_invariant(&app.statistics().await);
    app.upload_ok("d.bin", &[1u8; 300]).await;
    assert_saved_invariant(&app.statistics().await);

    app.delete(&routes::file(a["id"].as_str().unwrap())).await;
    let stats = app.statistics().await;
    assert_saved_invariant(&stats);

    // The promoted duplicate keeps the shared bytes counted once.
    assert_eq!(
        counters(&stats),
        json!({
            "total_files": 3,
            "unique_files": 2,
            "duplicates": 1,
            "total_size": 720,
            "actual_size": 420,
            "saved_size": 300,
        })
    );
}

#[tokio::test]
async fn empty_uploads_count_as_one_unique_file() {
    let app = TestApp::spawn().await;

    app.upload_ok("e1", b"").await;
    app.upload_ok("e2", b"").await;

    assert_eq!(
        counters(&app.statistics().await),
        json!({
            "total_files": 2,
            "unique_files": 1,
            "duplicates": 1,
            "total_size": 0,
            "actual_size": 0,
            "saved_size": 0,
        })
    );
}

#[tokio::test]
async fn last_updated_advances_on_mutation() {
    let app = TestApp::spawn().await;
    let before = app.statistics().await["last_updated"].clone();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    app.upload_ok("a.txt", b"tick").await;
    let after = app.statistics().await["last_updated"].clone();

    let parse = |v: &Value| {
        chrono::DateTime::parse_from_rfc3339(v.as_str().unwrap()).unwrap()
    };
    assert!(parse(&after) > parse(&before));
}

#[tokio::test]
async fn concurrent_identical_uploads_keep_one_canonical() {
    let app = TestApp::spawn().await;

    let names: Vec<String> = (0..8).map(|i| format!("c{i}.txt")).collect();
    let uploads = names.iter().map(|name| app.upload(name, b"race".to_vec()));
    let responses = futures::future::join_all(uploads).await;

    for res in &responses {
        assert_eq!(res.status, 201, "{}", res.text);
    }
    let canonicals = responses
        .iter()
        .filter(|res| res.body["is_duplicate"] == false)
        .count();
    assert_eq!(canonicals, 1);
    assert_eq!(app.blob_count(), 1);

    let stats = app.statistics().await;
    assert_eq!(stats["total_files"], 8);
    assert_eq!(stats["unique_files"], 1);
    assert_eq!(stats["actual_size"], 4);
}
