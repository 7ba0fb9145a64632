//! `sandplane` is the control plane for ephemeral sandboxes.
//!
//! # Overview
//!
//! Clients ask for sandboxes; independent runner processes do the actual provisioning.
//! Runners never receive pushed work. They poll for jobs, claim them, report progress
//! through status callbacks and finally complete them. In-sandbox agents push heartbeats
//! on their own channel. The control plane owns all sandbox and job state and resolves
//! conflicting views of it:
//!
//! - a sandbox is bound to the first runner that reports on it, and later reports from
//!   any other runner are rejected
//! - a job is claimed with a compare-and-swap, so two runners never both own it
//! - a periodic sweep stops sandboxes whose agent went silent and purges sandboxes stuck
//!   in `deleting`
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sandplane::{
//!     audit::TracingAuditSink,
//!     config::ControlPlaneConfig,
//!     server::{SandplaneServer, ServerState},
//!     store::Store,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ControlPlaneConfig::default();
//!     let state = ServerState::new(Store::new(), &config, Arc::new(TracingAuditSink));
//!
//!     let sweeper = state.sweeper().clone().spawn();
//!     SandplaneServer::new(config.socket_addr(), state)
//!         .serve(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     sweeper.stop().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`models`] - Sandbox, job and runner records
//! - [`store`] - The shared in-memory store and its snapshots
//! - [`registry`] - Sandbox lifecycle and ownership
//! - [`queue`] - Job queue with atomic claims
//! - [`runners`] - Advisory runner directory
//! - [`dispatch`] - Poll, accept and complete protocol for runners
//! - [`callbacks`] - Status pushes from runners and agents
//! - [`sweeper`] - Health sweep and manual cleanup
//! - [`audit`] - Audit trail of control actions
//! - [`server`] - HTTP API
//! - [`config`] - Configuration and defaults
//! - [`cli`] - Command line arguments

#![warn(missing_docs)]

mod error;
mod log;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod audit;
pub mod callbacks;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod models;
pub mod queue;
pub mod registry;
pub mod runners;
pub mod server;
pub mod store;
pub mod sweeper;
pub mod utils;

pub use error::*;
pub use log::*;
