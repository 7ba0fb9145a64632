//! Status callbacks pushed by runners and in-sandbox agents.
//!
//! There are three independent channels, each keyed by the caller's role:
//! - agent-status: heartbeat and metrics; may stop a running sandbox, never starts one.
//! - runner-status: status, container and address from the owning runner.
//! - agent-address: where the in-sandbox command endpoint listens.
//!
//! Connection info for command-execution clients is resolved from the same records.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    models::{AgentInfoUpdate, RunnerUpdate, Sandbox},
    registry::SandboxRegistry,
    runners::validate_runner_id,
    SandplaneError, SandplaneResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Entry point for runner and agent status pushes.
#[derive(Clone)]
pub struct StatusCallbacks {
    registry: SandboxRegistry,
}

/// State the agent reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// The agent is up. Never promotes the sandbox to running.
    Running,

    /// The agent is shutting down.
    Stopping,

    /// The agent has stopped.
    Stopped,
}

/// Heartbeat pushed by the in-sandbox agent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusReport {
    /// What the agent says it is doing.
    #[serde(default)]
    pub status: Option<AgentState>,

    /// Metrics replacing the previous ones.
    #[serde(default)]
    pub metrics: Option<HashMap<String, Value>>,
}

/// Agent endpoint published by the runner.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAddressReport {
    /// Endpoint host.
    pub host: String,

    /// Endpoint port.
    pub port: u16,

    /// Endpoint token.
    #[serde(default)]
    pub token: Option<String>,
}

/// Where a command-execution client should connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// The sandbox.
    pub sandbox_id: String,

    /// Host to connect to.
    pub host: String,

    /// Port to connect to.
    pub port: u16,

    /// Token to present.
    pub token: String,

    /// Login user.
    pub user: String,

    /// Whether the address came from the agent or the sandbox itself.
    pub source: ConnectionSource,
}

/// Origin of a [`ConnectionInfo`] address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionSource {
    /// The in-sandbox agent endpoint.
    Agent,

    /// The sandbox's own host and port.
    Sandbox,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StatusCallbacks {
    /// Creates the callback handlers over `registry`.
    pub fn new(registry: SandboxRegistry) -> Self {
        Self { registry }
    }

    /// Handles an agent heartbeat.
    pub async fn agent_status(
        &self,
        sandbox_id: &str,
        report: AgentStatusReport,
    ) -> SandplaneResult<Sandbox> {
        let stop = matches!(
            report.status,
            Some(AgentState::Stopping | AgentState::Stopped)
        );
        let update = AgentInfoUpdate {
            last_heartbeat: Some(Utc::now()),
            metrics: report.metrics,
            ..Default::default()
        };

        tracing::trace!(sandbox_id = %sandbox_id, status = ?report.status, "agent heartbeat");
        self.registry
            .apply_agent_report(sandbox_id, update, stop)
            .await
    }

    /// Handles a runner-status report from `runner_id`. Ownership checked.
    pub async fn runner_status(
        &self,
        sandbox_id: &str,
        runner_id: &str,
        update: RunnerUpdate,
    ) -> SandplaneResult<Sandbox> {
        validate_runner_id(runner_id)?;

        if update.host.as_deref().is_some_and(|host| host.trim().is_empty()) {
            return Err(SandplaneError::Validation(
                "host must not be empty".to_string(),
            ));
        }

        if update.port == Some(0) {
            return Err(SandplaneError::Validation(
                "port must be non-zero".to_string(),
            ));
        }

        self.registry
            .update_runner_status(sandbox_id, runner_id, update)
            .await
    }

    /// Handles the runner publishing the agent endpoint.
    pub async fn agent_address(
        &self,
        sandbox_id: &str,
        report: AgentAddressReport,
    ) -> SandplaneResult<Sandbox> {
        if report.host.trim().is_empty() {
            return Err(SandplaneError::Validation("host is required".to_string()));
        }

        if report.port == 0 {
            return Err(SandplaneError::Validation(
                "port must be non-zero".to_string(),
            ));
        }

        tracing::info!(sandbox_id = %sandbox_id, host = %report.host, port = report.port, "agent address published");
        self.registry
            .update_agent_address(sandbox_id, report.host, report.port, report.token)
            .await
    }

    /// Resolves where to connect to a sandbox.
    ///
    /// Prefers the agent endpoint and token and falls back to the sandbox's own host,
    /// port and token.
    pub async fn connection_info(&self, sandbox_id: &str) -> SandplaneResult<ConnectionInfo> {
        let sandbox = self.registry.get(sandbox_id).await?;
        resolve_connection(&sandbox)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Picks the agent address if one was published, the sandbox address otherwise.
pub fn resolve_connection(sandbox: &Sandbox) -> SandplaneResult<ConnectionInfo> {
    let agent = &sandbox.agent_info;

    let (host, port, source) = match (&agent.address_host, agent.address_port) {
        (Some(host), Some(port)) => (host.clone(), port, ConnectionSource::Agent),
        _ => match (&sandbox.host, sandbox.port) {
            (Some(host), Some(port)) => (host.clone(), port, ConnectionSource::Sandbox),
            _ => {
                return Err(SandplaneError::NotConnectable(format!(
                    "sandbox {} has no published address",
                    sandbox.id
                )))
            }
        },
    };

    Ok(ConnectionInfo {
        sandbox_id: sandbox.id.clone(),
        host,
        port,
        token: agent
            .address_token
            .clone()
            .unwrap_or_else(|| sandbox.token.clone()),
        user: sandbox.user.clone(),
        source,
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
