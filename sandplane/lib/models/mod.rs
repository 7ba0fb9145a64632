//! Records owned by the control plane.
//!
//! A [`Sandbox`] is created per client request and walks the lifecycle described on
//! [`SandboxStatus`]. A [`Job`] is one unit of provisioning work handed to a runner; jobs
//! are never deleted, only transitioned, so they double as a trail of dispatched work.

mod job;
mod runner;
mod sandbox;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use job::*;
pub use runner::*;
pub use sandbox::*;
