use axum::http::{Method, StatusCode};
use sandplane::config::ControlPlaneConfig;
use serde_json::json;

use super::{request, TestApp};

const KEY: &str = "spk_test_key";

fn secured() -> TestApp {
    TestApp::with_config(
        ControlPlaneConfig::builder()
            .api_keys(vec![KEY.to_string()])
            .build(),
    )
}

#[tokio::test]
async fn test_client_routes_require_api_key() {
    let app = secured();

    let (status, body) = app.get("/sandboxes").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_type"], "authentication_error");

    let (status, _) = app
        .send(request(
            Method::GET,
            "/sandboxes",
            None,
            &[("authorization", "Bearer spk_wrong")],
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.post("/cleanup", json!(null)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_key_in_either_header() {
    let app = secured();
    let bearer = format!("Bearer {KEY}");

    let (status, _) = app
        .send(request(
            Method::POST,
            "/sandboxes",
            Some(json!({ "image": "alpine" })),
            &[("authorization", bearer.as_str())],
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .send(request(Method::GET, "/sandboxes", None, &[("x-api-key", KEY)]))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sandboxes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_runner_and_agent_routes_are_not_gated() {
    let app = secured();

    let (status, _) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.runner_get("/jobs", "r1").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/runners/register", json!({ "id": "r1", "capacity": 1 }))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Unknown sandbox, but the request got past the router without a key.
    let (status, _) = app
        .post("/sandboxes/nope/status", json!({ "status": "running" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_without_keys_client_routes_are_open() {
    let app = TestApp::new();

    let (status, _) = app.get("/sandboxes").await;

    assert_eq!(status, StatusCode::OK);
}
