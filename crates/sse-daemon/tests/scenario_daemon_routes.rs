//! In-process router tests for `sse-daemon`'s health/status surface — no DB
//! or network required. Follows `mqk-daemon`'s `tower::ServiceExt::oneshot`
//! scenario-test style.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sse_daemon::routes;
use tower::ServiceExt;

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

#[tokio::test]
async fn health_reports_ok_and_service_name() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let client = stripe::Client::new("sk_test_fake");
    let upsert_engine =
        sse_upsert::UpsertEngine::new(pool.clone(), client.clone(), true, sse_stripe::RetryPolicy::default());
    let registry = sse_backfill::build_production_registry(client.clone(), upsert_engine.clone(), false);
    let backfill_registry = sse_backfill::build_production_registry(client.clone(), upsert_engine.clone(), false);
    let backfill = sse_backfill::BackfillEngine::new(pool.clone(), client.clone(), backfill_registry, 1, 10, true, false, None);
    let router_engine = sse_router::RouterEngine {
        pool: pool.clone(),
        client,
        upsert_engine,
        configured_api_key: "sk_test_fake".to_string(),
        static_signing_secret: Some("whsec_fake".to_string()),
        revalidate_via_api: vec![],
    };
    let state = sse_daemon::state::AppState::new(pool, "acct_test".to_string(), registry, backfill, router_engine);

    let req = Request::builder().method("GET").uri("/v1/health").body(axum::body::Body::empty()).unwrap();
    let (status, body) = call(routes::build_router(Arc::clone(&state)), req).await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "sse-daemon");
}

#[tokio::test]
async fn webhook_endpoint_rejects_missing_signature_header() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let client = stripe::Client::new("sk_test_fake");
    let upsert_engine =
        sse_upsert::UpsertEngine::new(pool.clone(), client.clone(), true, sse_stripe::RetryPolicy::default());
    let registry = sse_backfill::build_production_registry(client.clone(), upsert_engine.clone(), false);
    let backfill_registry = sse_backfill::build_production_registry(client.clone(), upsert_engine.clone(), false);
    let backfill = sse_backfill::BackfillEngine::new(pool.clone(), client.clone(), backfill_registry, 1, 10, true, false, None);
    let router_engine = sse_router::RouterEngine {
        pool: pool.clone(),
        client,
        upsert_engine,
        configured_api_key: "sk_test_fake".to_string(),
        static_signing_secret: Some("whsec_fake".to_string()),
        revalidate_via_api: vec![],
    };
    let state = sse_daemon::state::AppState::new(pool, "acct_test".to_string(), registry, backfill, router_engine);

    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .body(axum::body::Body::from("{}"))
        .unwrap();
    let (status, _body) = call(routes::build_router(Arc::clone(&state)), req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
