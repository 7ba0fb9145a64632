use std::{
    collections::HashMap,
    fmt::{self, Display},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Sandbox;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One dispatched unit of provisioning work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier.
    pub id: String,

    /// What the runner is asked to do.
    #[serde(rename = "type")]
    pub job_type: JobType,

    /// The sandbox the work is for.
    pub sandbox_id: String,

    /// The sandbox image.
    pub image: String,

    /// The sandbox connection token, so the runner can configure access.
    pub token: String,

    /// Environment variables for the sandbox.
    pub env: HashMap<String, String>,

    /// Memory in MiB.
    pub memory: u32,

    /// Number of CPUs.
    pub cpu: u32,

    /// Network mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,

    /// Dispatch status.
    pub status: JobStatus,

    /// The runner that accepted the job.
    #[serde(default)]
    pub runner_id: Option<String>,

    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,

    /// When a runner accepted the job.
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,

    /// When the job was completed or failed.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Failure reason reported by the runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The kind of work a job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Provision the sandbox.
    Create,

    /// Tear the sandbox down.
    Delete,
}

/// The dispatch status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a runner.
    Pending,

    /// Accepted by a runner.
    Running,

    /// Finished successfully.
    Completed,

    /// Finished unsuccessfully.
    Failed,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Job {
    /// Creates a pending job of `job_type` mirroring the sandbox's provisioning spec.
    pub fn for_sandbox(
        id: String,
        job_type: JobType,
        sandbox: &Sandbox,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_type,
            sandbox_id: sandbox.id.clone(),
            image: sandbox.image.clone(),
            token: sandbox.token.clone(),
            env: sandbox.env.clone(),
            memory: sandbox.memory,
            cpu: sandbox.cpu,
            network_mode: sandbox.network_mode.clone(),
            status: JobStatus::Pending,
            runner_id: None,
            created_at: now,
            accepted_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Whether the job has reached `completed` or `failed`.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the job is in flight on `runner_id`.
    pub fn is_running_on(&self, runner_id: &str) -> bool {
        self.status == JobStatus::Running && self.runner_id.as_deref() == Some(runner_id)
    }
}

impl JobStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Returns the status as its wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Create => f.write_str("create"),
            JobType::Delete => f.write_str("delete"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
