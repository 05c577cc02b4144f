//! HTTP surface tests
//!
//! Drive the axum router directly with tower's oneshot, the same way
//! the binary wires it up in main.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower::ServiceExt;

use callqa::api::{campaign_routes, worker_routes, AppState};
use callqa::config::AppConfig;
use callqa::db;
use callqa::events::EventBus;

async fn setup_app() -> (tempfile::TempDir, SqlitePool, Router) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("api-test.db");
    let pool = db::init_database(path.to_str().unwrap()).await.unwrap();

    let state = AppState {
        pool: pool.clone(),
        event_bus: EventBus::new(),
        config: Arc::new(AppConfig::default()),
    };

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest("/api/campaigns", campaign_routes())
        .nest("/api/worker", worker_routes())
        .with_state(state);

    (dir, pool, app)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_body(rows: usize) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = (0..rows)
        .map(|i| {
            serde_json::json!({
                "recording_url": format!("https://cdn.example.com/{}.mp3", i),
                "agent_name": "Asha",
                "call_id": format!("C-{}", i),
                "team": "alpha",
            })
        })
        .collect();
    serde_json::json!({
        "campaignName": "api campaign",
        "timezone": "Asia/Kolkata",
        "rows": rows,
        "parameterSetId": "ps-1",
        "applyRateLimit": false,
    })
}

async fn create_campaign(app: &Router, rows: usize) -> String {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/campaigns", create_body(rows)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["data"]["totalJobs"], rows as i64);
    json["data"]["campaignId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn create_and_fetch_campaign() {
    let (_dir, _pool, app) = setup_app().await;
    let campaign_id = create_campaign(&app, 3).await;

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("/api/campaigns/{}", campaign_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "queued");
    assert_eq!(json["data"]["totalJobs"], 3);
    assert_eq!(json["data"]["queuedJobs"], 3);
    // No throughput yet, so no ETA field
    assert!(json["data"].get("etaSeconds").is_none());
}

#[tokio::test]
async fn create_campaign_from_csv_text() {
    let (_dir, _pool, app) = setup_app().await;

    let body = serde_json::json!({
        "campaignName": "csv campaign",
        "csv": "Recording URL,Agent Name,Team\nhttps://cdn.example.com/a.mp3,Asha,alpha\nhttps://cdn.example.com/b.mp3,Ben,beta\n",
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/campaigns", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["data"]["totalJobs"], 2);
}

#[tokio::test]
async fn create_campaign_rejects_empty_input() {
    let (_dir, _pool, app) = setup_app().await;

    let body = serde_json::json!({
        "campaignName": "empty",
        "rows": [],
    });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/campaigns", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = serde_json::json!({ "campaignName": "no input" });
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/campaigns", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_campaigns_shows_live_counters() {
    let (_dir, pool, app) = setup_app().await;
    let campaign_id = create_campaign(&app, 2).await;

    // One claim moves a job into processing
    db::claim_next_queued(&pool, &campaign_id).await.unwrap().unwrap();

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/api/campaigns"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["pagination"]["total"], 1);
    assert_eq!(json["data"][0]["processingJobs"], 1);
    assert_eq!(json["data"][0]["queuedJobs"], 1);
    assert_eq!(json["data"][0]["status"], "running");
}

#[tokio::test]
async fn job_listing_is_paginated_and_ordered() {
    let (_dir, _pool, app) = setup_app().await;
    let campaign_id = create_campaign(&app, 5).await;

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/api/campaigns/{}/jobs?limit=3&offset=3", campaign_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["pagination"]["total"], 5);
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
    assert_eq!(json["data"][0]["rowIndex"], 3);
    assert_eq!(json["data"][0]["payload"]["team"], "alpha");
}

#[tokio::test]
async fn retry_action_reports_count() {
    let (_dir, pool, app) = setup_app().await;
    let campaign_id = create_campaign(&app, 2).await;

    // Fail both jobs by hand
    for _ in 0..2 {
        let job = db::claim_next_queued(&pool, &campaign_id).await.unwrap().unwrap();
        db::fail_job(&pool, &job.id.to_string(), "boom").await.unwrap();
    }

    let response = app
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/api/campaigns/{}?action=retry", campaign_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["retried"], 2);

    let campaign = db::get_campaign(&pool, &campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.failed_jobs, 0);
}

#[tokio::test]
async fn reset_stuck_action_reports_count() {
    let (_dir, _pool, app) = setup_app().await;
    let campaign_id = create_campaign(&app, 1).await;

    // Nothing is stuck, so the count is zero
    let response = app
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/api/campaigns/{}?action=reset-stuck", campaign_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["reset"], 0);
}

#[tokio::test]
async fn unknown_action_is_rejected() {
    let (_dir, _pool, app) = setup_app().await;
    let campaign_id = create_campaign(&app, 1).await;

    let response = app
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/api/campaigns/{}?action=explode", campaign_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_cancels_active_then_deletes_terminal() {
    let (_dir, pool, app) = setup_app().await;
    let campaign_id = create_campaign(&app, 3).await;

    // First DELETE cancels the active campaign
    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &format!("/api/campaigns/{}", campaign_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "canceled");
    assert_eq!(json["data"]["canceledJobs"], 3);

    let campaign = db::get_campaign(&pool, &campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status.as_str(), "canceled");

    // Second DELETE hard-deletes it with its jobs
    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &format!("/api/campaigns/{}", campaign_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(db::get_campaign(&pool, &campaign_id).await.unwrap().is_none());
    assert_eq!(db::count_jobs(&pool, &campaign_id, None).await.unwrap(), 0);
}

#[tokio::test]
async fn report_download_sets_csv_headers() {
    let (_dir, _pool, app) = setup_app().await;
    let campaign_id = create_campaign(&app, 2).await;

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/api/campaigns/{}/report?includeTokens=true", campaign_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .contains("attachment"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("row,call_id"));
    assert!(text.contains("total_tokens"));
    // Header plus one line per queued job
    assert_eq!(text.lines().count(), 3);
}

#[tokio::test]
async fn missing_campaign_returns_not_found() {
    let (_dir, _pool, app) = setup_app().await;

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            "/api/campaigns/00000000-0000-0000-0000-000000000000",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn worker_nudge_is_accepted() {
    let (_dir, _pool, app) = setup_app().await;

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/api/worker"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "scheduled");
}
