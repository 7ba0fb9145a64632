//! HTTP-level tests driving the router in-process.

mod auth;
mod properties;
mod scenario;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use sandplane::{
    audit::MemoryAuditSink,
    config::ControlPlaneConfig,
    server::{create_router, ServerState},
    store::Store,
};
use serde_json::Value;
use tower::ServiceExt;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: ServerState,
    pub audit: MemoryAuditSink,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(ControlPlaneConfig::default())
    }

    pub fn with_config(config: ControlPlaneConfig) -> Self {
        let audit = MemoryAuditSink::new();
        let state = ServerState::new(Store::new(), &config, Arc::new(audit.clone()));
        Self {
            router: create_router(state.clone()),
            state,
            audit,
        }
    }

    /// Sends a request and returns the status with the parsed JSON body (`Null` if empty).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(request(Method::GET, uri, None, &[])).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(request(Method::POST, uri, Some(body), &[])).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(request(Method::DELETE, uri, None, &[])).await
    }

    pub async fn runner_get(&self, uri: &str, runner_id: &str) -> (StatusCode, Value) {
        self.send(request(Method::GET, uri, None, &[("x-runner-id", runner_id)]))
            .await
    }

    pub async fn runner_post(&self, uri: &str, runner_id: &str, body: Value) -> (StatusCode, Value) {
        self.send(request(
            Method::POST,
            uri,
            Some(body),
            &[("x-runner-id", runner_id)],
        ))
        .await
    }

    /// Creates a sandbox and returns `(sandbox_id, create_job_id)`.
    pub async fn create_sandbox(&self, image: &str) -> (String, String) {
        let (status, body) = self
            .post("/sandboxes", serde_json::json!({ "image": image }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["sandbox"]["id"].as_str().unwrap().to_string(),
            body["job"]["id"].as_str().unwrap().to_string(),
        )
    }

    /// Walks a fresh sandbox to `running`, owned by `runner_id`.
    pub async fn running_sandbox(&self, runner_id: &str) -> String {
        let (sandbox_id, job_id) = self.create_sandbox("python:3.11").await;

        let (status, _) = self
            .runner_post(&format!("/jobs/{job_id}/accept"), runner_id, Value::Null)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = self
            .runner_post(
                &format!("/sandboxes/{sandbox_id}/runner-status"),
                runner_id,
                serde_json::json!({ "status": "running", "host": "10.0.0.5", "port": 32000 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        sandbox_id
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub fn request(
    method: Method,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
