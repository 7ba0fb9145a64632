use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{models::TransitionPolicy, SandplaneError, SandplaneResult};

use super::{
    DEFAULT_HEARTBEAT_STALE_SECS, DEFAULT_MANUAL_CLEANUP_SECS, DEFAULT_SERVER_HOST,
    DEFAULT_SERVER_PORT, DEFAULT_STUCK_DELETING_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration of a control plane instance.
///
/// Every field has a default, so an empty TOML file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default, deny_unknown_fields)]
pub struct ControlPlaneConfig {
    /// Address to bind the HTTP server to.
    #[builder(default = default_host())]
    host: IpAddr,

    /// Port to bind the HTTP server to.
    #[builder(default = DEFAULT_SERVER_PORT)]
    port: u16,

    /// API keys accepted on client routes. Empty disables client authentication.
    #[builder(default)]
    api_keys: Vec<String>,

    /// Whether status changes are checked against the lifecycle table.
    #[builder(default)]
    transitions: TransitionPolicy,

    /// File the store is loaded from at startup and saved to after sweeps.
    #[builder(default, setter(strip_option))]
    state_file: Option<PathBuf>,

    /// Directory for rolling log files.
    #[builder(default, setter(strip_option))]
    log_dir: Option<PathBuf>,

    /// Health sweep timing.
    #[builder(default)]
    sweep: SweepPolicy,
}

/// Timing of the health sweep and of manual cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default, deny_unknown_fields)]
pub struct SweepPolicy {
    /// Seconds between sweeps.
    #[builder(default = DEFAULT_SWEEP_INTERVAL_SECS)]
    interval_secs: u64,

    /// Heartbeat age, in seconds, after which a running sandbox is stopped.
    #[builder(default = DEFAULT_HEARTBEAT_STALE_SECS)]
    heartbeat_stale_secs: u64,

    /// Seconds in `deleting` after which the sweep purges a sandbox.
    #[builder(default = DEFAULT_STUCK_DELETING_SECS)]
    stuck_deleting_secs: u64,

    /// Seconds in `deleting` after which a manual cleanup purges a sandbox.
    #[builder(default = DEFAULT_MANUAL_CLEANUP_SECS)]
    manual_cleanup_secs: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ControlPlaneConfig {
    /// Loads the configuration from a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> SandplaneResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            SandplaneError::InvalidConfig(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "loaded control plane config");
        Ok(config)
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> SandplaneResult<()> {
        if self.port == 0 {
            return Err(SandplaneError::InvalidConfig(
                "port must be non-zero".to_string(),
            ));
        }

        if self.api_keys.iter().any(|key| key.trim().is_empty()) {
            return Err(SandplaneError::InvalidConfig(
                "api keys must not be empty".to_string(),
            ));
        }

        self.sweep.validate()
    }

    /// Socket address the HTTP server binds to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Overrides the bind host.
    pub fn set_host(&mut self, host: IpAddr) {
        self.host = host;
    }

    /// Overrides the bind port.
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Adds API keys to the accepted set.
    pub fn extend_api_keys(&mut self, keys: impl IntoIterator<Item = String>) {
        self.api_keys.extend(keys);
    }

    /// Overrides the transition policy.
    pub fn set_transitions(&mut self, transitions: TransitionPolicy) {
        self.transitions = transitions;
    }

    /// Overrides the snapshot file.
    pub fn set_state_file(&mut self, state_file: PathBuf) {
        self.state_file = Some(state_file);
    }

    /// Overrides the log directory.
    pub fn set_log_dir(&mut self, log_dir: PathBuf) {
        self.log_dir = Some(log_dir);
    }

    /// Overrides the sweep interval.
    pub fn set_sweep_interval_secs(&mut self, secs: u64) {
        self.sweep.interval_secs = secs;
    }
}

impl SweepPolicy {
    /// Checks that every duration is non-zero.
    pub fn validate(&self) -> SandplaneResult<()> {
        let fields = [
            ("interval_secs", self.interval_secs),
            ("heartbeat_stale_secs", self.heartbeat_stale_secs),
            ("stuck_deleting_secs", self.stuck_deleting_secs),
            ("manual_cleanup_secs", self.manual_cleanup_secs),
        ];

        if let Some((name, _)) = fields.iter().find(|(_, value)| *value == 0) {
            return Err(SandplaneError::InvalidConfig(format!(
                "sweep.{name} must be non-zero"
            )));
        }

        Ok(())
    }

    /// Time between sweeps.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    /// Heartbeat staleness threshold.
    pub fn heartbeat_stale_after(&self) -> chrono::Duration {
        secs(self.heartbeat_stale_secs)
    }

    /// Stuck-deleting threshold used by the periodic sweep.
    pub fn stuck_deleting_after(&self) -> chrono::Duration {
        secs(self.stuck_deleting_secs)
    }

    /// Stuck-deleting threshold used by manual cleanup.
    pub fn manual_cleanup_after(&self) -> chrono::Duration {
        secs(self.manual_cleanup_secs)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_host() -> IpAddr {
    DEFAULT_SERVER_HOST
        .parse()
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
