//! HTTP API tests against an in-process router.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::TestFixture;

async fn create(fixture: &TestFixture, links: serde_json::Value) -> String {
    let response = fixture
        .post(
            "/api/v1/items",
            json!({
                "source_links": links,
                "metadata": { "title": "Big Buck Bunny", "runtime": 10 }
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    response.body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_create_item_starts_pending() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/items",
            json!({
                "source_links": {
                    "720p": "https://host.example/a",
                    " 1080p ": " https://host.example/b "
                }
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["stage"], "pending");
    assert_eq!(response.body["error_count"], 0);
    assert_eq!(response.body["source_links"]["1080p"], "https://host.example/b");
    assert!(response.body["references"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_item_rejects_empty_links() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/items", json!({ "source_links": {} }))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("at least one source link"));

    let response = fixture
        .post("/api/v1/items", json!({ "source_links": { "720p": "  " } }))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_item_rejects_malformed_json() {
    let fixture = TestFixture::new().await;

    let response = fixture.post_raw("/api/v1/items", "{not json").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_item() {
    let fixture = TestFixture::new().await;
    let id = create(&fixture, json!({ "720p": "https://host.example/a" })).await;

    let response = fixture.get(&format!("/api/v1/items/{}", id)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["id"], id.as_str());
    assert_eq!(response.body["metadata"]["title"], "Big Buck Bunny");
}

#[tokio::test]
async fn test_get_missing_item_is_404() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/items/does-not-exist").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn test_list_items_with_stage_filter() {
    let fixture = TestFixture::new().await;
    for n in 0..3 {
        create(&fixture, json!({ "720p": format!("https://host.example/{}", n) })).await;
    }

    let response = fixture.get("/api/v1/items?limit=2").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["items"].as_array().unwrap().len(), 2);
    assert_eq!(response.body["total"], 3);
    assert_eq!(response.body["limit"], 2);

    let response = fixture.get("/api/v1/items?stage=pending&offset=2").await;
    assert_eq!(response.body["items"].as_array().unwrap().len(), 1);
    assert_eq!(response.body["total"], 3);

    let response = fixture.get("/api/v1/items?stage=completed").await;
    assert!(response.body["items"].as_array().unwrap().is_empty());
    assert_eq!(response.body["total"], 0);
}

#[tokio::test]
async fn test_list_items_rejects_unknown_stage() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/items?stage=downloading").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_counts_every_stage() {
    let fixture = TestFixture::new().await;
    create(&fixture, json!({ "720p": "https://host.example/a" })).await;
    create(&fixture, json!({ "720p": "https://host.example/b" })).await;

    let response = fixture.get("/api/v1/status").await;

    assert_eq!(response.status, StatusCode::OK);
    let items = response.body["items"].as_object().unwrap();
    assert_eq!(items.len(), 8);
    assert_eq!(items["pending"], 2);
    assert_eq!(items["error"], 0);
    assert_eq!(response.body["total_items"], 2);
    assert!(response.body["workers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_metrics_exposition() {
    let fixture = TestFixture::new().await;
    create(&fixture, json!({ "720p": "https://host.example/a" })).await;

    let (status, text) = fixture.get_text("/api/v1/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("mediarelay_items_by_stage"));
    assert!(text.contains("mediarelay_http_requests_total"));
}

#[tokio::test]
async fn test_workers_drive_item_to_completion() {
    let fixture = TestFixture::with_workers().await;
    let id = create(
        &fixture,
        json!({
            "720p": "https://host.example/a",
            "1080p": "https://host.example/b"
        }),
    )
    .await;

    let item = fixture
        .wait_for_stage(&id, "completed", Duration::from_secs(10))
        .await;

    assert_eq!(item["stage"], "completed");
    assert_eq!(item["references"].as_object().unwrap().len(), 2);
    assert_eq!(fixture.publisher.calls().len(), 2);

    let status = fixture.get("/api/v1/status").await;
    assert_eq!(status.body["workers"].as_array().unwrap().len(), 3);
    assert_eq!(status.body["items"]["completed"], 1);

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_unresolvable_variant_is_dropped() {
    let fixture = TestFixture::with_workers().await;
    fixture
        .resolver
        .fail("https://host.example/gone", "file removed");
    let id = create(
        &fixture,
        json!({
            "720p": "https://host.example/ok",
            "1080p": "https://host.example/gone"
        }),
    )
    .await;

    let item = fixture
        .wait_for_stage(&id, "completed", Duration::from_secs(10))
        .await;

    assert_eq!(item["stage"], "completed");
    assert!(item["references"].get("720p").is_some());
    assert!(item["references"].get("1080p").is_none());
    assert!(item["resolve_errors"]["1080p"].is_object());

    fixture.shutdown().await;
}
