use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use cursor_lab::api::{create_app, RunResponse};
use cursor_lab::bench::BenchRunner;
use cursor_lab::collection::{seed_document, DocumentCollection};
use cursor_lab::memory::{MemoryCollection, MemoryConnector};
use cursor_lab::mongo::MongoConnector;
use cursor_lab::store::{ResultStore, SqliteResultStore};
use std::sync::Arc;
use tower::util::ServiceExt;

struct Harness {
    app: Router,
    collection: MemoryCollection,
    results: Arc<SqliteResultStore>,
}

fn harness(strict: bool) -> Harness {
    let collection = MemoryCollection::new();
    let results = Arc::new(SqliteResultStore::memory().unwrap());
    results.init_schema().unwrap();

    let runner = BenchRunner::new(
        Arc::new(MemoryConnector::new(collection.clone())),
        results.clone(),
    )
    .strict(strict);

    Harness {
        app: create_app(Arc::new(runner)),
        collection,
        results,
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn limit_run_seeds_reads_and_records() {
    let h = harness(false);

    let (status, body) = get(&h.app, "/experiments/run/?cursor_type=limit&doc_count=50").await;

    assert_eq!(status, StatusCode::OK);
    let response: RunResponse = serde_json::from_slice(&body).unwrap();
    assert!(response.success);
    assert_eq!(response.cursor_type, "limit");
    assert_eq!(response.doc_count, 50);
    assert!(response.execution_time >= 0.0);

    assert_eq!(h.collection.count().await.unwrap(), 50);
    assert_eq!(h.collection.finds(), 1);

    let recorded = h.results.list_recent().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].document_count, 50);
    assert_eq!(recorded[0].cursor_type, "limit");
    assert_eq!(recorded[0].query_pattern, "find()");
}

#[tokio::test]
async fn unknown_strategy_is_a_recorded_no_op() {
    let h = harness(false);

    let (status, body) = get(&h.app, "/experiments/run/?cursor_type=bogus&doc_count=10").await;

    assert_eq!(status, StatusCode::OK);
    let response: RunResponse = serde_json::from_slice(&body).unwrap();
    assert!(response.success);
    assert_eq!(response.cursor_type, "bogus");
    assert!(response.execution_time < 0.1);
    assert_eq!(h.collection.finds(), 0);
    assert_eq!(h.results.count().unwrap(), 1);
}

#[tokio::test]
async fn strict_mode_rejects_unknown_strategy() {
    let h = harness(true);

    let (status, body) = get(&h.app, "/experiments/run/?cursor_type=bogus&doc_count=10").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(h.results.count().unwrap(), 0);
}

#[tokio::test]
async fn malformed_doc_count_fails_before_store_access() {
    let h = harness(false);

    for uri in [
        "/experiments/run/?cursor_type=limit&doc_count=abc",
        "/experiments/run/?cursor_type=limit&doc_count=-5",
    ] {
        let (status, _) = get(&h.app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    assert_eq!(h.collection.count().await.unwrap(), 0);
    assert_eq!(h.results.count().unwrap(), 0);
}

#[tokio::test]
async fn defaults_apply_without_query() {
    let h = harness(false);

    let (status, body) = get(&h.app, "/experiments/run/").await;

    assert_eq!(status, StatusCode::OK);
    let response: RunResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.cursor_type, "default");
    assert_eq!(response.doc_count, 1000);
    assert_eq!(h.collection.count().await.unwrap(), 1000);
}

#[tokio::test]
async fn experiment_list_is_newest_first() {
    let h = harness(false);
    get(&h.app, "/experiments/run/?cursor_type=no_cursor&doc_count=5").await;
    get(&h.app, "/experiments/run/?cursor_type=skip&doc_count=5").await;

    let (status, body) = get(&h.app, "/experiments/").await;

    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    let skip = html.find("<td>skip</td>").unwrap();
    let no_cursor = html.find("<td>no_cursor</td>").unwrap();
    assert!(skip < no_cursor);
}

#[tokio::test]
async fn experiment_list_escapes_strategy_names() {
    let h = harness(false);
    get(&h.app, "/experiments/run/?cursor_type=%3Cscript%3E&doc_count=1").await;

    let (_, body) = get(&h.app, "/experiments/").await;

    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("&lt;script&gt;"));
    assert!(!html.contains("<script>"));
}

#[tokio::test]
async fn home_page_links_strategies() {
    let h = harness(false);

    let (status, body) = get(&h.app, "/").await;

    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    for strategy in ["no_cursor", "batch_size", "limit", "skip"] {
        assert!(html.contains(&format!("cursor_type={}", strategy)));
    }
}

#[tokio::test]
async fn estimate_reports_batch_size() {
    let h = harness(false);
    h.collection
        .insert_many((0..20).map(seed_document).collect())
        .await
        .unwrap();

    let (status, body) = get(&h.app, "/experiments/estimate/").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["sampled"], 5);
    assert_eq!(json["batch_size"], 1000);
}

#[tokio::test]
async fn explain_summarizes_strategy() {
    let h = harness(false);
    h.collection
        .insert_many((0..30).map(seed_document).collect())
        .await
        .unwrap();

    let (status, body) = get(&h.app, "/experiments/explain/?cursor_type=limit&doc_count=5").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["stage"], "LIMIT");
    assert_eq!(json["n_returned"], 5);
}

#[tokio::test]
async fn unconfigured_store_is_a_service_error() {
    let results = Arc::new(SqliteResultStore::memory().unwrap());
    results.init_schema().unwrap();
    let runner = BenchRunner::new(
        Arc::new(MongoConnector::new(None, "cursor_analysis", "test_data")),
        results.clone(),
    );
    let app = create_app(Arc::new(runner));

    // Pages that don't touch the document store still work.
    let (status, _) = get(&app, "/experiments/").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&app, "/experiments/run/?cursor_type=limit&doc_count=5").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "MONGODB_URI is not set");
    assert_eq!(results.count().unwrap(), 0);
}

#[tokio::test]
async fn health_check() {
    let h = harness(false);
    let (status, body) = get(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}
