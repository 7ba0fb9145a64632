use std::{net::IpAddr, path::PathBuf};

use clap::Parser;

use crate::{
    cli::styles,
    config::{ControlPlaneConfig, CONFIG_FILE_ENV_VAR},
    models::TransitionPolicy,
    SandplaneResult,
};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `sandplane` is the control plane for ephemeral sandboxes provisioned by runners
#[derive(Debug, Parser)]
#[command(name = "sandplane", author, version, styles=styles::styles())]
pub struct SandplaneArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<SandplaneSubcommand>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum SandplaneSubcommand {
    /// Run the control plane HTTP server
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Generate a new client API key
    #[command(name = "keygen")]
    Keygen,
}

/// Arguments of `sandplane serve`
#[derive(Debug, Default, Parser)]
pub struct ServeArgs {
    /// Path to a TOML configuration file
    #[arg(short, long, env = CONFIG_FILE_ENV_VAR)]
    pub config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long, env = "SANDPLANE_HOST")]
    pub host: Option<IpAddr>,

    /// Port to bind to
    #[arg(short, long, env = "SANDPLANE_PORT")]
    pub port: Option<u16>,

    /// API key accepted on client routes; may be repeated
    #[arg(long = "api-key", env = "SANDPLANE_API_KEYS", value_delimiter = ',')]
    pub api_keys: Vec<String>,

    /// File the state is loaded from and saved to
    #[arg(long, env = "SANDPLANE_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Directory for rolling log files
    #[arg(long, env = "SANDPLANE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Accept any sandbox status change instead of the lifecycle table
    #[arg(long)]
    pub permissive: bool,

    /// Seconds between health sweeps
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl ServeArgs {
    /// Loads the configuration file, if any, and applies the command line overrides.
    pub async fn resolve_config(&self) -> SandplaneResult<ControlPlaneConfig> {
        let mut config = match &self.config {
            Some(path) => ControlPlaneConfig::load(path).await?,
            None => ControlPlaneConfig::default(),
        };

        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut ControlPlaneConfig) {
        if let Some(host) = self.host {
            config.set_host(host);
        }

        if let Some(port) = self.port {
            config.set_port(port);
        }

        config.extend_api_keys(self.api_keys.iter().filter(|key| !key.is_empty()).cloned());

        if let Some(state_file) = &self.state_file {
            config.set_state_file(state_file.clone());
        }

        if let Some(log_dir) = &self.log_dir {
            config.set_log_dir(log_dir.clone());
        }

        if self.permissive {
            config.set_transitions(TransitionPolicy::Permissive);
        }

        if let Some(secs) = self.sweep_interval_secs {
            config.set_sweep_interval_secs(secs);
        }
    }
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
