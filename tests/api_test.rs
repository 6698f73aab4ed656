use axum::http::StatusCode;
use liquidator::api;
use liquidator::config::Config;
use liquidator::db::init_db;
use liquidator::domain::{CarrierReport, Decimal, Idpos, Period, SubscriberId, TermReport};
use liquidator::orchestration::LogNotifier;
use liquidator::{FeedError, MemoryStore, MockRecordFeed, RecordFeed, Repository, TokioDispatcher};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct TestApp {
    app: axum::Router,
    repo: Arc<Repository>,
    _temp: TempDir,
}

async fn setup_test_app(feed: Option<Arc<dyn RecordFeed>>) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let mut config = Config::with_database_path(&db_path);
    config.chunk_size = 2;
    config.store_batch_size = 1;

    let state = api::AppState::new(
        repo.clone(),
        feed,
        Arc::new(MemoryStore::new()),
        Arc::new(TokioDispatcher::new(2, Duration::from_secs(30))),
        Arc::new(LogNotifier),
        &config,
    );

    TestApp {
        app: api::create_router(state),
        repo,
        _temp: temp_dir,
    }
}

fn july() -> Period {
    "2025-07".parse().unwrap()
}

fn carrier(subscriber: i64, total_recharge: i64) -> CarrierReport {
    CarrierReport {
        subscriber_id: Some(SubscriberId::new(subscriber)),
        phone: None,
        iccid: None,
        period: july(),
        commission_split_a: Decimal::from(800),
        commission_split_b: Decimal::from(200),
        recharge_period_amount: Decimal::zero(),
        carrier_total_recharge: Decimal::from(total_recharge),
        activation_date: None,
        cutoff_date: None,
        commission_status: None,
        transaction_code: None,
        source_cutoff_label: "C1".to_string(),
    }
}

fn term(subscriber: i64, idpos: &str) -> TermReport {
    TermReport {
        subscriber_id: SubscriberId::new(subscriber),
        idpos: Idpos::new(idpos.to_string()),
        sale_price: Decimal::from(90000),
        residual_percentage: Some(Decimal::from(10)),
        period: july(),
        created_at_ms: 1,
    }
}

/// Stores S1 and S2; subscribers 1..=3 belong to S1, 4 to S2 and 5 to a
/// store code nobody registered.
fn seeded_feed() -> MockRecordFeed {
    MockRecordFeed::new()
        .with_carrier_records((1..=5).map(|n| carrier(n, 1000 * n)).collect())
        .with_term(term(1, "S1"))
        .with_term(term(2, "S1"))
        .with_term(term(3, "S1"))
        .with_term(term(4, "S2"))
        .with_term(term(5, "S9"))
}

async fn seeded_app() -> (TestApp, i64, i64) {
    let test_app = setup_test_app(Some(Arc::new(seeded_feed()))).await;
    let s1 = test_app
        .repo
        .upsert_store(&Idpos::new("S1".to_string()), "Store One")
        .await
        .unwrap();
    let s2 = test_app
        .repo
        .upsert_store(&Idpos::new("S2".to_string()), "Store Two")
        .await
        .unwrap();

    let (status, _) = request(&test_app.app, "POST", "/v1/periods/2025-07/ingest", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(&test_app.app, "POST", "/v1/periods/2025-07/consolidate", None).await;
    assert_eq!(status, StatusCode::OK);

    (test_app, s1.id.as_i64(), s2.id.as_i64())
}

async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = axum::http::Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

/// Poll until `done` holds for the response body.
async fn poll_until(
    app: &axum::Router,
    uri: &str,
    done: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    for _ in 0..500 {
        let (status, json) = request(app, "GET", uri, None).await;
        assert!(status.is_success(), "GET {uri} returned {status}");
        if done(&json) {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{uri} never finished");
}

fn dec(value: &serde_json::Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal string")).unwrap()
}

#[tokio::test]
async fn test_health_and_ready() {
    let test_app = setup_test_app(None).await;
    let (status, json) = request(&test_app.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");

    let (status, json) = request(&test_app.app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ready");
}

#[tokio::test]
async fn test_malformed_period_is_rejected() {
    let test_app = setup_test_app(None).await;
    for uri in [
        "/v1/periods/2025-13/consolidate",
        "/v1/periods/july/previews",
        "/v1/periods/2025-7/stores/1/settlement",
    ] {
        let (status, json) = request(&test_app.app, "POST", uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn test_ingest_without_feed_is_unavailable() {
    let test_app = setup_test_app(None).await;
    let (status, _) = request(&test_app.app, "POST", "/v1/periods/2025-07/ingest", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let failing: Arc<dyn RecordFeed> =
        Arc::new(MockRecordFeed::new().failing(FeedError::Unavailable("carrier portal down".into())));
    let test_app = setup_test_app(Some(failing)).await;
    let (status, json) = request(&test_app.app, "POST", "/v1/periods/2025-07/ingest", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["error"].as_str().unwrap().contains("carrier portal down"));
}

#[tokio::test]
async fn test_ingest_and_consolidate_report_counts() {
    let test_app = setup_test_app(Some(Arc::new(seeded_feed()))).await;

    let (status, json) = request(&test_app.app, "POST", "/v1/periods/2025-07/ingest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["carrierNew"], 5);
    assert_eq!(json["termsNew"], 5);

    let (status, first) = request(&test_app.app, "POST", "/v1/periods/2025-07/consolidate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["rawCount"], 5);
    assert_eq!(first["consolidatedCount"], 5);

    let (_, second) = request(&test_app.app, "POST", "/v1/periods/2025-07/consolidate", None).await;
    assert_eq!(first["fingerprint"], second["fingerprint"]);
    assert_eq!(first["fingerprint"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_preview_flow_with_filters() {
    let (test_app, s1, s2) = seeded_app().await;

    let (status, started) = request(&test_app.app, "POST", "/v1/periods/2025-07/previews", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["recordCount"], 5);
    assert_eq!(started["chunkCount"], 3);
    let job_key = started["jobKey"].as_str().unwrap().to_string();

    poll_until(&test_app.app, &format!("/v1/previews/{job_key}/progress"), |json| {
        json["progress"] == 100
    })
    .await;

    let (status, page) = request(&test_app.app, "GET", &format!("/v1/previews/{job_key}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["totalStores"], 3);
    assert!(page["generatedAt"].as_i64().unwrap() > 0);
    // 10% of 1000 + 2000 + 3000, 4000 and 5000.
    assert_eq!(dec(&page["grandTotal"]), Decimal::from(1500));
    let stores = page["stores"].as_array().unwrap();
    assert_eq!(stores[0]["storeId"], s1);
    assert_eq!(dec(&stores[0]["total"]), Decimal::from(600));
    assert_eq!(stores[1]["storeId"], s2);
    assert_eq!(stores[2]["storeId"], -1);
    assert!(stores.iter().all(|s| s["status"] == "pending"));

    let (_, page) = request(
        &test_app.app,
        "GET",
        &format!("/v1/previews/{job_key}?page=2&perPage=2"),
        None,
    )
    .await;
    assert_eq!(page["page"], 2);
    assert_eq!(page["stores"].as_array().unwrap().len(), 1);
    assert_eq!(page["totalStores"], 3);

    let (_, page) = request(
        &test_app.app,
        "GET",
        &format!("/v1/previews/{job_key}?status=liquidated"),
        None,
    )
    .await;
    assert_eq!(page["totalStores"], 0);

    let (status, _) = request(&test_app.app, "GET", "/v1/previews/preview:missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = request(&test_app.app, "GET", "/v1/previews/preview:missing/progress", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_commit_settlement_endpoint() {
    let (test_app, s1, _) = seeded_app().await;
    let uri = format!("/v1/periods/2025-07/stores/{s1}/settlement");

    let (status, draft) = request(
        &test_app.app,
        "POST",
        &format!("/v1/periods/2025-07/stores/{s1}/draft"),
        Some(serde_json::json!({"actorId": "reviewer"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(draft["settlement"]["status"], "draft");
    assert_eq!(draft["settlement"]["version"], 1);
    assert!(draft.get("ledgerEntry").is_none());

    let (status, receipt) = request(
        &test_app.app,
        "POST",
        &uri,
        Some(serde_json::json!({"actorId": "admin-7"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["settlement"]["status"], "closed");
    assert_eq!(receipt["settlement"]["version"], 2);
    assert_eq!(receipt["settlement"]["actorId"], "admin-7");
    assert_eq!(receipt["released"], 3);
    assert_eq!(dec(&receipt["settlement"]["netAmount"]), Decimal::from(600));
    assert_eq!(dec(&receipt["ledgerEntry"]["balanceAfter"]), Decimal::from(600));

    let (status, json) = request(&test_app.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("already closed"));

    let (status, _) = request(&test_app.app, "POST", "/v1/periods/2025-07/stores/999/settlement", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(&test_app.app, "POST", "/v1/periods/2025-07/stores/-1/settlement", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(&test_app.app, "POST", &format!("/v1/periods/2025-08/stores/{s1}/settlement"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let store = test_app
        .repo
        .get_store(liquidator::StoreId::new(s1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.balance, Decimal::from(600));
}

#[tokio::test]
async fn test_settlement_batch_endpoint() {
    let (test_app, s1, s2) = seeded_app().await;

    let (status, json) = request(
        &test_app.app,
        "POST",
        "/v1/periods/2025-07/settlement-batches",
        Some(serde_json::json!({"storeIds": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());

    let (status, started) = request(
        &test_app.app,
        "POST",
        "/v1/periods/2025-07/settlement-batches",
        Some(serde_json::json!({"storeIds": [s1, s2, 404], "actorId": "ops"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["total"], 3);
    let job_id = started["jobId"].as_str().unwrap().to_string();

    let job = poll_until(&test_app.app, &format!("/v1/settlement-batches/{job_id}"), |json| {
        json["status"] != "running"
    })
    .await;
    assert_eq!(job["status"], "completed_with_failures");
    assert_eq!(job["processed"], 3);
    assert_eq!(job["failed"], 1);
    assert_eq!(job["error"], "1 of 3 stores failed");

    // Only the unassigned subscriber is left for the next preview.
    let (_, started) = request(&test_app.app, "POST", "/v1/periods/2025-07/previews", None).await;
    assert_eq!(started["recordCount"], 1);

    let (status, _) = request(&test_app.app, "GET", "/v1/settlement-batches/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
