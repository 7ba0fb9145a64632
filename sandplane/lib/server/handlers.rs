//! HTTP request handlers.
//!
//! Handlers only translate between HTTP and the control plane components held in
//! [`ServerState`]; every rule lives in those components.

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;

use super::{
    state::ServerState,
    types::{
        CleanupResponse, CompleteJobResponse, CreateSandboxResponse, DeleteKind,
        DeleteSandboxResponse, ErrorResponse, ErrorType, HealthResponse, JobListResponse,
        JobResponse, ListSandboxesQuery, RunnerListResponse, RunnerResponse, SandboxListResponse,
        SandboxResponse,
    },
};
use crate::{
    callbacks::{AgentAddressReport, AgentStatusReport, ConnectionInfo},
    config::RUNNER_ID_HEADER,
    dispatch::CompletionReport,
    models::{JobStatus, RunnerUpdate, SandboxSpec, SandboxStatus},
    queue::AcceptOutcome,
    registry::DeleteOutcome,
    runners::RunnerRegistration,
    SandplaneError, SandplaneResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runner identity taken from the `X-Runner-Id` header. Rejects the request if absent.
#[derive(Debug, Clone)]
pub struct RunnerId(pub String);

/// Runner identity taken from the `X-Runner-Id` header, if present.
#[derive(Debug, Clone)]
pub struct MaybeRunnerId(pub Option<String>);

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    let tables = state.store().snapshot().await;
    let uptime = chrono::Utc::now() - state.started_at();

    Json(HealthResponse {
        status: "ok",
        sandboxes: tables.sandboxes().count(),
        pending_jobs: tables
            .jobs()
            .filter(|job| job.status == JobStatus::Pending)
            .count(),
        runners: tables.runners().count(),
        uptime_secs: uptime.num_seconds(),
    })
}

/// POST /sandboxes
pub async fn create_sandbox(
    State(state): State<ServerState>,
    payload: Result<Json<SandboxSpec>, JsonRejection>,
) -> SandplaneResult<(StatusCode, Json<CreateSandboxResponse>)> {
    let spec = body(payload)?;
    let created = state.registry().create(spec).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSandboxResponse {
            sandbox: created.sandbox,
            job: created.job,
        }),
    ))
}

/// GET /sandboxes
pub async fn list_sandboxes(
    State(state): State<ServerState>,
    Query(query): Query<ListSandboxesQuery>,
) -> SandplaneResult<Json<SandboxListResponse>> {
    let sandboxes = match query.status {
        Some(status) => {
            let status: SandboxStatus = status.parse()?;
            state.registry().list_by_status(status).await
        }
        None => state.registry().list().await,
    };

    Ok(Json(SandboxListResponse { sandboxes }))
}

/// GET /sandboxes/{id}
pub async fn get_sandbox(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> SandplaneResult<Json<SandboxResponse>> {
    let sandbox = state.registry().get(&id).await?;
    Ok(Json(SandboxResponse { sandbox }))
}

/// DELETE /sandboxes/{id}
pub async fn delete_sandbox(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> SandplaneResult<(StatusCode, Json<DeleteSandboxResponse>)> {
    let response = match state.registry().request_delete(&id).await? {
        DeleteOutcome::Deleting { sandbox, job } => (
            StatusCode::ACCEPTED,
            Json(DeleteSandboxResponse {
                outcome: DeleteKind::Deleting,
                sandbox: Some(sandbox),
                job: Some(job),
            }),
        ),
        DeleteOutcome::Removed => (
            StatusCode::OK,
            Json(DeleteSandboxResponse {
                outcome: DeleteKind::Removed,
                sandbox: None,
                job: None,
            }),
        ),
    };

    Ok(response)
}

/// GET /sandboxes/{id}/connection
pub async fn get_connection(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> SandplaneResult<Json<ConnectionInfo>> {
    Ok(Json(state.callbacks().connection_info(&id).await?))
}

/// POST /cleanup
pub async fn cleanup(State(state): State<ServerState>) -> Json<CleanupResponse> {
    let report = state.sweeper().cleanup().await;
    Json(CleanupResponse {
        purged: report.purged,
    })
}

/// POST /sandboxes/{id}/status
pub async fn agent_status(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    payload: Result<Json<AgentStatusReport>, JsonRejection>,
) -> SandplaneResult<Json<SandboxResponse>> {
    let report = body(payload)?;
    let sandbox = state.callbacks().agent_status(&id, report).await?;
    Ok(Json(SandboxResponse { sandbox }))
}

/// POST /sandboxes/{id}/runner-status
pub async fn runner_status(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RunnerId(runner_id): RunnerId,
    payload: Result<Json<RunnerUpdate>, JsonRejection>,
) -> SandplaneResult<Json<SandboxResponse>> {
    let update = body(payload)?;
    let sandbox = state
        .callbacks()
        .runner_status(&id, &runner_id, update)
        .await?;
    Ok(Json(SandboxResponse { sandbox }))
}

/// POST /sandboxes/{id}/agent-address
pub async fn agent_address(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    payload: Result<Json<AgentAddressReport>, JsonRejection>,
) -> SandplaneResult<Json<SandboxResponse>> {
    let report = body(payload)?;
    let sandbox = state.callbacks().agent_address(&id, report).await?;
    Ok(Json(SandboxResponse { sandbox }))
}

/// GET /jobs
pub async fn poll_jobs(
    State(state): State<ServerState>,
    MaybeRunnerId(runner_id): MaybeRunnerId,
) -> SandplaneResult<Json<JobListResponse>> {
    let jobs = state.dispatcher().poll(runner_id.as_deref()).await?;
    Ok(Json(JobListResponse { jobs }))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> SandplaneResult<Json<JobResponse>> {
    let job = state.dispatcher().job(&id).await?;
    Ok(Json(JobResponse { job }))
}

/// POST /jobs/{id}/accept
pub async fn accept_job(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    RunnerId(runner_id): RunnerId,
) -> SandplaneResult<Response> {
    let response = match state.dispatcher().accept(&id, &runner_id).await? {
        AcceptOutcome::Accepted(job) => Json(JobResponse { job }).into_response(),
        AcceptOutcome::AlreadyClaimed {
            status,
            runner_id: owner,
        } => {
            let owner = owner.as_deref().unwrap_or("none");
            ErrorResponse::new(
                ErrorType::Conflict.status().as_u16(),
                format!("job {id} is already claimed"),
                ErrorType::Conflict,
            )
            .with_details(format!("status={status}, runner={owner}"))
            .into_response()
        }
    };

    Ok(response)
}

/// POST /jobs/{id}/complete
pub async fn complete_job(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    MaybeRunnerId(runner_id): MaybeRunnerId,
    payload: Result<Json<CompletionReport>, JsonRejection>,
) -> SandplaneResult<Json<CompleteJobResponse>> {
    let report = body(payload)?;
    let completed = state
        .dispatcher()
        .complete(&id, runner_id.as_deref(), report)
        .await?;

    Ok(Json(CompleteJobResponse {
        job: completed.job,
        sandbox_removed: completed.sandbox_removed,
    }))
}

/// POST /runners/register
pub async fn register_runner(
    State(state): State<ServerState>,
    payload: Result<Json<RunnerRegistration>, JsonRejection>,
) -> SandplaneResult<Json<RunnerResponse>> {
    let registration = body(payload)?;
    let runner = state.dispatcher().register(registration).await?;
    Ok(Json(RunnerResponse { runner }))
}

/// GET /runners
pub async fn list_runners(State(state): State<ServerState>) -> Json<RunnerListResponse> {
    Json(RunnerListResponse {
        runners: state.dispatcher().runners().await,
    })
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Turns a JSON body rejection into a validation error.
fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> SandplaneResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| SandplaneError::Validation(rejection.body_text()))
}

fn runner_header(parts: &Parts) -> SandplaneResult<Option<String>> {
    match parts.headers.get(RUNNER_ID_HEADER) {
        Some(value) => value
            .to_str()
            .map(|id| Some(id.trim().to_string()))
            .map_err(|_| {
                SandplaneError::Validation(format!("{RUNNER_ID_HEADER} header is not valid ascii"))
            }),
        None => Ok(None),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<S> FromRequestParts<S> for RunnerId
where
    S: Send + Sync,
{
    type Rejection = SandplaneError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        runner_header(parts)?
            .filter(|id| !id.is_empty())
            .map(RunnerId)
            .ok_or_else(|| SandplaneError::Validation(format!("{RUNNER_ID_HEADER} header is required")))
    }
}

impl<S> FromRequestParts<S> for MaybeRunnerId
where
    S: Send + Sync,
{
    type Rejection = SandplaneError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeRunnerId(runner_header(parts)?))
    }
}
