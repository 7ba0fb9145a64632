use axum::http::StatusCode;
use chrono::{Duration, Utc};
use sandplane::{audit::AuditAction, config::ControlPlaneConfig, models::TransitionPolicy};
use serde_json::{json, Value};

use super::TestApp;

#[tokio::test]
async fn test_created_sandbox_is_pending_with_create_job() {
    let app = TestApp::new();

    let (sandbox_id, job_id) = app.create_sandbox("python:3.11").await;

    let (_, body) = app.get(&format!("/sandboxes/{sandbox_id}")).await;
    assert_eq!(body["sandbox"]["status"], "pending");

    let (status, body) = app.get(&format!("/jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["type"], "create");
    assert_eq!(body["job"]["sandboxId"], sandbox_id.as_str());
}

#[tokio::test]
async fn test_delete_forks_on_status() {
    let app = TestApp::new();

    let pending = app.create_sandbox("alpine").await.0;
    let (status, body) = app.delete(&format!("/sandboxes/{pending}")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "deleting");

    // Another delete returns the same unresolved job.
    let first_job = body["job"]["id"].clone();
    let (_, body) = app.delete(&format!("/sandboxes/{pending}")).await;
    assert_eq!(body["job"]["id"], first_job);

    let stopped = app.running_sandbox("r1").await;
    let (status, _) = app
        .runner_post(
            &format!("/sandboxes/{stopped}/runner-status"),
            "r1",
            json!({ "status": "stopped" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.delete(&format!("/sandboxes/{stopped}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "removed");
    assert!(body.get("job").is_none());

    let (_, body) = app.runner_get("/jobs", "r9").await;
    let delete_jobs: Vec<&Value> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|job| job["type"] == "delete")
        .collect();
    assert_eq!(delete_jobs.len(), 1);
    assert_eq!(delete_jobs[0]["sandboxId"], pending.as_str());
}

#[tokio::test]
async fn test_accepted_job_stays_visible_to_its_runner_only() {
    let app = TestApp::new();
    let (_, job_id) = app.create_sandbox("alpine").await;

    app.runner_post(&format!("/jobs/{job_id}/accept"), "r1", Value::Null)
        .await;

    let (_, own) = app.runner_get("/jobs", "r1").await;
    assert_eq!(own["jobs"][0]["id"], job_id.as_str());
    assert_eq!(own["jobs"][0]["status"], "running");

    let (_, other) = app.runner_get("/jobs", "r2").await;
    assert!(other["jobs"].as_array().unwrap().is_empty());

    let (_, anonymous) = app.get("/jobs").await;
    assert!(anonymous["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_accepts_have_one_winner() {
    let app = TestApp::new();
    let (_, job_id) = app.create_sandbox("alpine").await;
    let uri = format!("/jobs/{job_id}/accept");

    let (a, b) = tokio::join!(
        app.runner_post(&uri, "r1", Value::Null),
        app.runner_post(&uri, "r2", Value::Null),
    );

    let mut statuses = [a.0.as_u16(), b.0.as_u16()];
    statuses.sort_unstable();
    assert_eq!(statuses, [200, 409]);

    let loser = if a.0 == StatusCode::CONFLICT { a.1 } else { b.1 };
    assert_eq!(loser["error_type"], "conflict");
    assert!(loser["details"].as_str().unwrap().contains("status=running"));
}

#[tokio::test]
async fn test_delete_job_outcome_decides_removal() {
    let app = TestApp::new();

    for (success, removed) in [(false, false), (true, true)] {
        let sandbox_id = app.running_sandbox("r1").await;
        let (_, body) = app.delete(&format!("/sandboxes/{sandbox_id}")).await;
        let job_id = body["job"]["id"].as_str().unwrap().to_string();
        app.runner_post(&format!("/jobs/{job_id}/accept"), "r1", Value::Null)
            .await;

        let (status, body) = app
            .runner_post(
                &format!("/jobs/{job_id}/complete"),
                "r1",
                json!({ "success": success, "error": "container busy" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sandboxRemoved"], removed);

        let (status, body) = app.get(&format!("/sandboxes/{sandbox_id}")).await;
        if removed {
            assert_eq!(status, StatusCode::NOT_FOUND);
        } else {
            assert_eq!(body["sandbox"]["status"], "deleting");
            let (_, job) = app.get(&format!("/jobs/{job_id}")).await;
            assert_eq!(job["job"]["status"], "failed");
            assert_eq!(job["job"]["error"], "container busy");
        }
    }
}

#[tokio::test]
async fn test_deleting_pending_sandbox_withdraws_create_job() {
    let app = TestApp::new();
    let (sandbox_id, create_job) = app.create_sandbox("alpine").await;

    let (status, body) = app.delete(&format!("/sandboxes/{sandbox_id}")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let delete_job = body["job"]["id"].as_str().unwrap().to_string();

    let (_, body) = app.runner_get("/jobs", "r1").await;
    let polled: Vec<&str> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|job| job["id"].as_str().unwrap())
        .collect();
    assert_eq!(polled, vec![delete_job.as_str()]);

    let (_, body) = app.get(&format!("/jobs/{create_job}")).await;
    assert_eq!(body["job"]["status"], "failed");
    assert_eq!(body["job"]["error"], "superseded by delete");

    let (status, _) = app
        .runner_post(&format!("/jobs/{create_job}/accept"), "r2", Value::Null)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.runner_post(&format!("/jobs/{delete_job}/accept"), "r1", Value::Null)
        .await;
    let (status, body) = app
        .runner_post(
            &format!("/jobs/{delete_job}/complete"),
            "r1",
            json!({ "success": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sandboxRemoved"], true);

    let (_, body) = app.runner_get("/jobs", "r2").await;
    assert!(body["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_permissive_transitions_allow_runner_overwrites() {
    let strict = TestApp::new();
    let permissive = TestApp::with_config(
        ControlPlaneConfig::builder()
            .transitions(TransitionPolicy::Permissive)
            .build(),
    );

    for (app, expected) in [(&strict, StatusCode::CONFLICT), (&permissive, StatusCode::OK)] {
        let sandbox_id = app.running_sandbox("r1").await;
        let uri = format!("/sandboxes/{sandbox_id}/runner-status");
        let (status, _) = app
            .runner_post(&uri, "r1", json!({ "status": "stopped" }))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .runner_post(&uri, "r1", json!({ "status": "deleting" }))
            .await;
        assert_eq!(status, expected);
    }

    let (_, body) = permissive.get("/sandboxes?status=deleting").await;
    assert_eq!(body["sandboxes"].as_array().unwrap().len(), 1);
    let (_, body) = strict.get("/sandboxes?status=stopped").await;
    assert_eq!(body["sandboxes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_runner_status_from_non_owner_is_rejected() {
    let app = TestApp::new();
    let sandbox_id = app.running_sandbox("r1").await;
    let (_, before) = app.get(&format!("/sandboxes/{sandbox_id}")).await;

    let (status, body) = app
        .runner_post(
            &format!("/sandboxes/{sandbox_id}/runner-status"),
            "r2",
            json!({ "status": "failed", "host": "10.9.9.9" }),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_type"], "conflict");
    let (_, after) = app.get(&format!("/sandboxes/{sandbox_id}")).await;
    assert_eq!(before, after);
    assert!(app
        .audit
        .entries()
        .iter()
        .any(|entry| entry.action == AuditAction::OwnershipRejected
            && entry.sandbox_id.as_deref() == Some(sandbox_id.as_str())));
}

#[tokio::test]
async fn test_runner_status_requires_runner_header() {
    let app = TestApp::new();
    let (sandbox_id, _) = app.create_sandbox("alpine").await;

    let (status, _) = app
        .post(
            &format!("/sandboxes/{sandbox_id}/runner-status"),
            json!({ "status": "running" }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sweep_stops_only_stale_heartbeats() {
    let app = TestApp::new();
    let sandbox_id = app.running_sandbox("r1").await;

    let (status, _) = app
        .post(
            &format!("/sandboxes/{sandbox_id}/status"),
            json!({ "status": "running", "metrics": { "cpu": 0.2 } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let sweeper = app.state.sweeper();
    let report = sweeper.sweep_at(Utc::now() + Duration::seconds(30)).await;
    assert!(report.stopped.is_empty());
    let (_, body) = app.get(&format!("/sandboxes/{sandbox_id}")).await;
    assert_eq!(body["sandbox"]["status"], "running");

    let report = sweeper.sweep_at(Utc::now() + Duration::seconds(121)).await;
    assert_eq!(report.stopped, vec![sandbox_id.clone()]);
    let (_, body) = app.get(&format!("/sandboxes/{sandbox_id}")).await;
    assert_eq!(body["sandbox"]["status"], "stopped");
}

#[tokio::test]
async fn test_sweep_purges_stuck_deleting_without_completion() {
    let app = TestApp::new();
    let sandbox_id = app.running_sandbox("r1").await;
    app.delete(&format!("/sandboxes/{sandbox_id}")).await;

    app.state
        .sweeper()
        .sweep_at(Utc::now() + Duration::seconds(301))
        .await;

    let (status, _) = app.get(&format!("/sandboxes/{sandbox_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_cleanup_route() {
    let app = TestApp::new();
    let (sandbox_id, _) = app.create_sandbox("alpine").await;
    app.delete(&format!("/sandboxes/{sandbox_id}")).await;

    // Nothing has been deleting long enough yet.
    let (status, body) = app.post("/cleanup", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["purged"].as_array().unwrap().is_empty());

    let report = app
        .state
        .sweeper()
        .cleanup_at(Utc::now() + Duration::seconds(61))
        .await;
    assert_eq!(report.purged, vec![sandbox_id]);
}

#[tokio::test]
async fn test_agent_stop_forces_stopped() {
    let app = TestApp::new();
    let sandbox_id = app.running_sandbox("r1").await;

    let (status, body) = app
        .post(
            &format!("/sandboxes/{sandbox_id}/status"),
            json!({ "status": "stopped" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sandbox"]["status"], "stopped");
    assert!(body["sandbox"]["agentInfo"]["lastHeartbeat"].is_string());
}
