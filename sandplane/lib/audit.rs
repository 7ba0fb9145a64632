//! Append-only record of control actions.
//!
//! Components write to an [`AuditSink`] but never read from it. The default sink emits
//! entries on the `sandplane::audit` tracing target; [`MemoryAuditSink`] keeps them in
//! memory for inspection.

use std::{
    fmt::{self, Display},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single control action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// When the action happened.
    pub at: DateTime<Utc>,

    /// Who performed it.
    pub actor: Actor,

    /// What was done.
    pub action: AuditAction,

    /// The sandbox affected, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,

    /// The job affected, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Free-form detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The party responsible for an audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Actor {
    /// A client holding an API key.
    Client,

    /// A runner, identified by its header.
    Runner(String),

    /// An in-sandbox agent.
    Agent,

    /// The periodic health sweep.
    Sweeper,

    /// An operator-invoked cleanup.
    Operator,
}

/// The kinds of audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A sandbox was created.
    SandboxCreated,

    /// A delete job was dispatched for a sandbox.
    SandboxDeleteRequested,

    /// A sandbox record was removed.
    SandboxRemoved,

    /// A sandbox changed status.
    SandboxStatusChanged,

    /// A runner-status callback was rejected for ownership.
    OwnershipRejected,

    /// A job was enqueued.
    JobEnqueued,

    /// A job was accepted by a runner.
    JobAccepted,

    /// A job was completed.
    JobCompleted,

    /// A job failed.
    JobFailed,

    /// A runner registered.
    RunnerRegistered,
}

/// Destination for audit entries.
pub trait AuditSink: Send + Sync {
    /// Appends an entry.
    fn record(&self, entry: AuditEntry);
}

/// Writes audit entries to the `sandplane::audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

/// Keeps audit entries in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(actor: Actor, action: AuditAction) -> Self {
        Self {
            at: Utc::now(),
            actor,
            action,
            sandbox_id: None,
            job_id: None,
            detail: None,
        }
    }

    /// Sets the affected sandbox.
    pub fn sandbox(mut self, sandbox_id: impl Into<String>) -> Self {
        self.sandbox_id = Some(sandbox_id.into());
        self
    }

    /// Sets the affected job.
    pub fn job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Sets the detail text.
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every entry recorded so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "sandplane::audit",
            actor = %entry.actor,
            action = ?entry.action,
            sandbox_id = entry.sandbox_id.as_deref().unwrap_or(""),
            job_id = entry.job_id.as_deref().unwrap_or(""),
            detail = entry.detail.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

impl Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Client => f.write_str("client"),
            Actor::Runner(id) => write!(f, "runner:{id}"),
            Actor::Agent => f.write_str("agent"),
            Actor::Sweeper => f.write_str("sweeper"),
            Actor::Operator => f.write_str("operator"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
