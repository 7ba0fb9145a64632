//! Route table of the HTTP API.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::{auth::require_api_key, handlers, state::ServerState};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the router with every endpoint configured.
///
/// Client routes sit behind the API key gate. Runner and agent routes do not.
pub fn create_router(state: ServerState) -> Router {
    let client = Router::new()
        .route(
            "/sandboxes",
            post(handlers::create_sandbox).get(handlers::list_sandboxes),
        )
        .route(
            "/sandboxes/{id}",
            get(handlers::get_sandbox).delete(handlers::delete_sandbox),
        )
        .route("/sandboxes/{id}/connection", get(handlers::get_connection))
        .route("/cleanup", post(handlers::cleanup))
        .route_layer(middleware::from_fn_with_state(
            state.auth().clone(),
            require_api_key,
        ));

    let protocol = Router::new()
        .route("/sandboxes/{id}/status", post(handlers::agent_status))
        .route("/sandboxes/{id}/runner-status", post(handlers::runner_status))
        .route("/sandboxes/{id}/agent-address", post(handlers::agent_address))
        .route("/jobs", get(handlers::poll_jobs))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/accept", post(handlers::accept_job))
        .route("/jobs/{id}/complete", post(handlers::complete_job))
        .route("/runners/register", post(handlers::register_runner))
        .route("/runners", get(handlers::list_runners))
        .route("/health", get(handlers::health));

    client.merge(protocol).with_state(state)
}
