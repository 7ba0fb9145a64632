//! Shared state handed to every request handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    audit::AuditSink,
    callbacks::StatusCallbacks,
    config::ControlPlaneConfig,
    dispatch::Dispatcher,
    queue::JobQueue,
    registry::SandboxRegistry,
    runners::RunnerDirectory,
    store::Store,
    sweeper::HealthSweeper,
};

use super::{ApiKeyValidator, StaticApiKeys};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Every control plane component, wired over one store.
#[derive(Clone)]
pub struct ServerState {
    registry: SandboxRegistry,
    dispatcher: Dispatcher,
    callbacks: StatusCallbacks,
    sweeper: Arc<HealthSweeper>,
    auth: Arc<dyn ApiKeyValidator>,
    started_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ServerState {
    /// Wires the components over `store` using `config`, with the static key set from it.
    pub fn new(store: Store, config: &ControlPlaneConfig, audit: Arc<dyn AuditSink>) -> Self {
        let auth = Arc::new(StaticApiKeys::new(config.get_api_keys().iter().cloned()));
        Self::with_validator(store, config, audit, auth)
    }

    /// Wires the components with a custom API key validator.
    pub fn with_validator(
        store: Store,
        config: &ControlPlaneConfig,
        audit: Arc<dyn AuditSink>,
        auth: Arc<dyn ApiKeyValidator>,
    ) -> Self {
        if !auth.enabled() {
            tracing::warn!("no api keys configured, client routes are unauthenticated");
        }

        let registry = SandboxRegistry::new(store.clone(), audit.clone(), *config.get_transitions());
        let queue = JobQueue::new(store.clone(), audit.clone());
        let runners = RunnerDirectory::new(store);
        let sweeper = HealthSweeper::new(
            registry.clone(),
            config.get_sweep().clone(),
            config.get_state_file().clone(),
        );

        Self {
            callbacks: StatusCallbacks::new(registry.clone()),
            dispatcher: Dispatcher::new(queue, runners, audit),
            sweeper: Arc::new(sweeper),
            registry,
            auth,
            started_at: Utc::now(),
        }
    }

    /// The sandbox registry.
    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    /// The runner dispatch protocol.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The status callback handlers.
    pub fn callbacks(&self) -> &StatusCallbacks {
        &self.callbacks
    }

    /// The health sweeper.
    pub fn sweeper(&self) -> &Arc<HealthSweeper> {
        &self.sweeper
    }

    /// The API key validator.
    pub fn auth(&self) -> &Arc<dyn ApiKeyValidator> {
        &self.auth
    }

    /// The backing store.
    pub fn store(&self) -> &Store {
        self.registry.store()
    }

    /// When the state was built.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
