//! HTTP surface of the control plane.
//!
//! Clients create, inspect and delete sandboxes behind an API key. Runners poll, claim
//! and complete jobs and push status; in-sandbox agents push heartbeats. The latter two
//! identify themselves only by header and are not authenticated.

mod api;
mod auth;
mod handlers;
mod routes;
mod state;
mod types;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use api::*;
pub use auth::*;
pub use handlers::{MaybeRunnerId, RunnerId};
pub use routes::*;
pub use state::*;
pub use types::*;
