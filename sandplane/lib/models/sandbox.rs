use std::{
    collections::HashMap,
    fmt::{self, Display},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use typed_builder::TypedBuilder;

use crate::{
    config::{DEFAULT_CPU, DEFAULT_MEMORY_MIB, DEFAULT_SANDBOX_USER},
    SandplaneError, SandplaneResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Prefix used for the display name of sandboxes created without one.
const DEFAULT_NAME_PREFIX: &str = "sandbox-";

/// Number of id characters kept in a generated display name.
const DEFAULT_NAME_ID_LEN: usize = 8;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A client-requested ephemeral compute environment tracked by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    /// Unique identifier, never reused.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Lifecycle status.
    pub status: SandboxStatus,

    /// The image the sandbox runs.
    pub image: String,

    /// Number of CPUs requested.
    pub cpu: u32,

    /// Memory requested, in MiB.
    pub memory: u32,

    /// Environment variables passed to the sandbox.
    pub env: HashMap<String, String>,

    /// Network mode requested for the sandbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,

    /// SSH host, filled in by the runner.
    #[serde(default)]
    pub host: Option<String>,

    /// SSH port, filled in by the runner.
    #[serde(default)]
    pub port: Option<u16>,

    /// Login user.
    pub user: String,

    /// Connection token generated at creation.
    pub token: String,

    /// The runner this sandbox is bound to, once one has reported on it.
    #[serde(default)]
    pub runner_id: Option<String>,

    /// Opaque handle owned by the runner.
    #[serde(default)]
    pub container_id: Option<String>,

    /// Data pushed by the in-sandbox agent.
    #[serde(default)]
    pub agent_info: AgentInfo,

    /// When the sandbox was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last modified.
    pub updated_at: DateTime<Utc>,

    /// When `status` last changed.
    pub status_changed_at: DateTime<Utc>,

    /// Optional expiry requested by the client.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Caller supplied key/value pairs.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// The lifecycle status of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// Created, waiting for a runner to provision it.
    Pending,

    /// Provisioned and reported operational by its runner.
    Running,

    /// Stopped by the runner, the agent or a stale heartbeat.
    Stopped,

    /// A delete job has been dispatched.
    Deleting,

    /// Torn down.
    Deleted,

    /// The runner reported a failure.
    Failed,
}

/// How strictly status changes are checked against the lifecycle table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Only the transitions of the lifecycle table are accepted.
    #[default]
    Strict,

    /// Any status may overwrite any other.
    Permissive,
}

/// Liveness and address information pushed by the agent or runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    /// Last time the agent reported in.
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Host of the in-sandbox command-execution endpoint.
    #[serde(default)]
    pub address_host: Option<String>,

    /// Port of the in-sandbox command-execution endpoint.
    #[serde(default)]
    pub address_port: Option<u16>,

    /// Token for the in-sandbox command-execution endpoint.
    #[serde(default)]
    pub address_token: Option<String>,

    /// Most recent metrics reported by the agent.
    #[serde(default)]
    pub metrics: HashMap<String, Value>,
}

/// The immutable provisioning spec of a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSpec {
    /// Display name, defaults from the id.
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub name: Option<String>,

    /// The image to run.
    #[serde(default)]
    #[builder(setter(into))]
    pub image: String,

    /// Number of CPUs.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub cpu: Option<u32>,

    /// Memory in MiB.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub memory: Option<u32>,

    /// Environment variables.
    #[serde(default)]
    #[builder(default)]
    pub env: HashMap<String, String>,

    /// Network mode.
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub network_mode: Option<String>,

    /// Login user.
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub user: Option<String>,

    /// Time to live, in seconds from creation.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub ttl_secs: Option<u64>,

    /// Caller supplied key/value pairs.
    #[serde(default)]
    #[builder(default)]
    pub metadata: HashMap<String, Value>,
}

/// Fields a runner may change through the runner-status channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerUpdate {
    /// New status.
    #[serde(default)]
    pub status: Option<SandboxStatus>,

    /// Container handle.
    #[serde(default)]
    pub container_id: Option<String>,

    /// SSH host.
    #[serde(default)]
    pub host: Option<String>,

    /// SSH port.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Fields merged into [`AgentInfo`]. Always allowed, regardless of ownership.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentInfoUpdate {
    /// Heartbeat time to record.
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Metrics replacing the previous ones.
    pub metrics: Option<HashMap<String, Value>>,

    /// Agent endpoint host.
    pub address_host: Option<String>,

    /// Agent endpoint port.
    pub address_port: Option<u16>,

    /// Agent endpoint token.
    pub address_token: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Sandbox {
    /// Creates a `pending` sandbox from a validated spec.
    pub fn new(id: String, spec: SandboxSpec, token: String, now: DateTime<Utc>) -> Self {
        let name = spec
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_name(&id));

        Self {
            id,
            name,
            status: SandboxStatus::Pending,
            image: spec.image,
            cpu: spec.cpu.unwrap_or(DEFAULT_CPU),
            memory: spec.memory.unwrap_or(DEFAULT_MEMORY_MIB),
            env: spec.env,
            network_mode: spec.network_mode,
            host: None,
            port: None,
            user: spec
                .user
                .unwrap_or_else(|| DEFAULT_SANDBOX_USER.to_string()),
            token,
            runner_id: None,
            container_id: None,
            agent_info: AgentInfo::default(),
            created_at: now,
            updated_at: now,
            status_changed_at: now,
            expires_at: spec
                .ttl_secs
                .and_then(|ttl| i64::try_from(ttl).ok())
                .map(|ttl| now + chrono::Duration::seconds(ttl)),
            metadata: spec.metadata,
        }
    }

    /// Moves the sandbox to `to`, checking the change against `policy`.
    ///
    /// Reporting the current status again is accepted and leaves
    /// `status_changed_at` untouched.
    pub fn transition(
        &mut self,
        to: SandboxStatus,
        policy: TransitionPolicy,
        now: DateTime<Utc>,
    ) -> SandplaneResult<()> {
        if self.status == to {
            return Ok(());
        }

        if policy == TransitionPolicy::Strict && !self.status.can_transition_to(to) {
            return Err(SandplaneError::InvalidTransition {
                sandbox_id: self.id.clone(),
                from: self.status,
                to,
            });
        }

        self.status = to;
        self.status_changed_at = now;
        self.updated_at = now;
        Ok(())
    }

    /// Applies a runner-status update on behalf of `runner_id`.
    ///
    /// Rejects the update without touching the record if the sandbox is bound to a
    /// different runner or the status change is not allowed. Otherwise binds the
    /// sandbox to the runner and merges the provided fields.
    pub fn apply_runner_update(
        &mut self,
        runner_id: &str,
        update: RunnerUpdate,
        policy: TransitionPolicy,
        now: DateTime<Utc>,
    ) -> SandplaneResult<()> {
        if let Some(owner) = &self.runner_id {
            if owner != runner_id {
                return Err(SandplaneError::OwnershipConflict {
                    sandbox_id: self.id.clone(),
                    owner: owner.clone(),
                    caller: runner_id.to_string(),
                });
            }
        }

        if let Some(status) = update.status {
            self.transition(status, policy, now)?;
        }

        self.runner_id = Some(runner_id.to_string());
        if let Some(container_id) = update.container_id {
            self.container_id = Some(container_id);
        }
        if let Some(host) = update.host {
            self.host = Some(host);
        }
        if let Some(port) = update.port {
            self.port = Some(port);
        }
        self.updated_at = now;

        Ok(())
    }

    /// Merges agent information into the record.
    pub fn apply_agent_update(&mut self, update: AgentInfoUpdate, now: DateTime<Utc>) {
        let info = &mut self.agent_info;
        if let Some(heartbeat) = update.last_heartbeat {
            info.last_heartbeat = Some(heartbeat);
        }
        if let Some(metrics) = update.metrics {
            info.metrics = metrics;
        }
        if let Some(host) = update.address_host {
            info.address_host = Some(host);
        }
        if let Some(port) = update.address_port {
            info.address_port = Some(port);
        }
        if let Some(token) = update.address_token {
            info.address_token = Some(token);
        }
        self.updated_at = now;
    }

    /// Whether the agent's last heartbeat is older than `stale_after` at `now`.
    ///
    /// Sandboxes whose agent never reported are not considered stale.
    pub fn heartbeat_is_stale(&self, stale_after: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.agent_info
            .last_heartbeat
            .is_some_and(|heartbeat| now - heartbeat > stale_after)
    }

    /// How long the sandbox has been in its current status at `now`.
    pub fn time_in_status(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.status_changed_at
    }
}

impl SandboxStatus {
    /// Whether the lifecycle table allows moving from `self` to `to`.
    ///
    /// Deleting a `stopped` or `failed` sandbox removes the record instead of
    /// transitioning it, so those edges are absent here.
    pub fn can_transition_to(self, to: SandboxStatus) -> bool {
        use SandboxStatus::*;

        if to == Failed {
            return self != Deleted;
        }

        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Stopped)
                | (Stopped, Running)
                | (Pending, Deleting)
                | (Running, Deleting)
        )
    }

    /// Whether a runner is actively provisioning or serving the sandbox.
    pub fn is_provisioned(self) -> bool {
        matches!(self, SandboxStatus::Pending | SandboxStatus::Running)
    }

    /// Returns the status as its wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxStatus::Pending => "pending",
            SandboxStatus::Running => "running",
            SandboxStatus::Stopped => "stopped",
            SandboxStatus::Deleting => "deleting",
            SandboxStatus::Deleted => "deleted",
            SandboxStatus::Failed => "failed",
        }
    }
}

impl SandboxSpec {
    /// Checks the spec before anything is created.
    pub fn validate(&self) -> SandplaneResult<()> {
        if self.image.trim().is_empty() {
            return Err(SandplaneError::Validation("image is required".to_string()));
        }

        if self.cpu == Some(0) {
            return Err(SandplaneError::Validation(
                "cpu must be greater than zero".to_string(),
            ));
        }

        if self.memory == Some(0) {
            return Err(SandplaneError::Validation(
                "memory must be greater than zero".to_string(),
            ));
        }

        if self.env.keys().any(|key| key.is_empty() || key.contains('=')) {
            return Err(SandplaneError::Validation(
                "env keys must be non-empty and must not contain '='".to_string(),
            ));
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_name(id: &str) -> String {
    let short: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(DEFAULT_NAME_ID_LEN)
        .collect();
    format!("{DEFAULT_NAME_PREFIX}{short}")
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SandboxStatus {
    type Err = SandplaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(SandboxStatus::Pending),
            "running" => Ok(SandboxStatus::Running),
            "stopped" => Ok(SandboxStatus::Stopped),
            "deleting" => Ok(SandboxStatus::Deleting),
            "deleted" => Ok(SandboxStatus::Deleted),
            "failed" => Ok(SandboxStatus::Failed),
            other => Err(SandplaneError::Validation(format!(
                "unknown sandbox status: {other}"
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
