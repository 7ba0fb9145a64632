use axum::http::StatusCode;
use serde_json::{json, Value};

use super::TestApp;

#[test_log::test(tokio::test)]
async fn test_create_provision_delete_lifecycle() {
    let app = TestApp::new();

    // Create
    let (status, body) = app.post("/sandboxes", json!({ "image": "python:3.11" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["sandbox"]["status"], "pending");
    assert_eq!(body["sandbox"]["image"], "python:3.11");
    assert_eq!(body["job"]["type"], "create");
    assert_eq!(body["job"]["status"], "pending");
    let sandbox_id = body["sandbox"]["id"].as_str().unwrap().to_string();
    let create_job = body["job"]["id"].as_str().unwrap().to_string();

    // Poll
    let (status, body) = app.runner_get("/jobs", "r1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(body["jobs"][0]["id"], create_job.as_str());
    assert_eq!(body["jobs"][0]["sandboxId"], sandbox_id.as_str());

    // Accept
    let (status, body) = app
        .runner_post(&format!("/jobs/{create_job}/accept"), "r1", Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["status"], "running");
    assert_eq!(body["job"]["runnerId"], "r1");

    // Runner reports the sandbox up
    let (status, body) = app
        .runner_post(
            &format!("/sandboxes/{sandbox_id}/runner-status"),
            "r1",
            json!({ "status": "running", "host": "10.0.0.5", "port": 32000, "containerId": "c1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sandbox"]["status"], "running");
    assert_eq!(body["sandbox"]["runnerId"], "r1");
    assert_eq!(body["sandbox"]["containerId"], "c1");

    // Complete the create job
    let (status, body) = app
        .runner_post(
            &format!("/jobs/{create_job}/complete"),
            "r1",
            json!({ "success": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["status"], "completed");
    assert_eq!(body["sandboxRemoved"], false);

    // Connection falls back to the sandbox address
    let (status, body) = app.get(&format!("/sandboxes/{sandbox_id}/connection")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["host"], "10.0.0.5");
    assert_eq!(body["port"], 32000);
    assert_eq!(body["source"], "sandbox");

    // Client deletes
    let (status, body) = app.delete(&format!("/sandboxes/{sandbox_id}")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "deleting");
    assert_eq!(body["sandbox"]["status"], "deleting");
    assert_eq!(body["job"]["type"], "delete");
    let delete_job = body["job"]["id"].as_str().unwrap().to_string();

    // Runner tears it down
    let (status, _) = app
        .runner_post(&format!("/jobs/{delete_job}/accept"), "r1", Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .runner_post(
            &format!("/jobs/{delete_job}/complete"),
            "r1",
            json!({ "success": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sandboxRemoved"], true);

    let (status, body) = app.get(&format!("/sandboxes/{sandbox_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_type"], "not_found");
}

#[tokio::test]
async fn test_agent_address_takes_precedence_for_connection() {
    let app = TestApp::new();
    let sandbox_id = app.running_sandbox("r1").await;

    let (status, _) = app
        .post(
            &format!("/sandboxes/{sandbox_id}/agent-address"),
            json!({ "host": "10.0.0.5", "port": 50051, "token": "agent-token" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get(&format!("/sandboxes/{sandbox_id}/connection")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["port"], 50051);
    assert_eq!(body["token"], "agent-token");
    assert_eq!(body["source"], "agent");
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let app = TestApp::new();
    let running = app.running_sandbox("r1").await;
    app.create_sandbox("alpine").await;

    let (status, body) = app.get("/sandboxes?status=running").await;
    assert_eq!(status, StatusCode::OK);
    let sandboxes = body["sandboxes"].as_array().unwrap();
    assert_eq!(sandboxes.len(), 1);
    assert_eq!(sandboxes[0]["id"], running.as_str());

    let (status, body) = app.get("/sandboxes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sandboxes"].as_array().unwrap().len(), 2);

    let (status, body) = app.get("/sandboxes?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "validation_error");
}

#[tokio::test]
async fn test_runner_registration_and_health() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/runners/register",
            json!({ "id": "r1", "address": "10.0.0.2:7000", "capacity": 4 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["runner"]["id"], "r1");
    assert_eq!(body["runner"]["status"], "available");

    let (status, body) = app.get("/runners").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["runners"].as_array().unwrap().len(), 1);

    app.create_sandbox("alpine").await;
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sandboxes"], 1);
    assert_eq!(body["pendingJobs"], 1);
    assert_eq!(body["runners"], 1);
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    let app = TestApp::new();

    let (status, body) = app.post("/sandboxes", json!({ "cpu": 2 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "validation_error");

    let (status, _) = app.post("/sandboxes", json!({ "image": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, job_id) = app.create_sandbox("alpine").await;
    let (status, body) = app
        .post(&format!("/jobs/{job_id}/accept"), Value::Null)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("x-runner-id"));

    let (status, _) = app.get("/jobs/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get("/sandboxes/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
