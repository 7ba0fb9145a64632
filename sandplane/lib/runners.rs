//! Advisory directory of known runners.
//!
//! Nothing here is consulted when dispatching work; the directory only records who has
//! registered, what they declared, and when they were last seen polling.

use chrono::Utc;
use serde::Deserialize;

use crate::{
    models::{RunnerInfo, RunnerStatus},
    store::Store,
    SandplaneError, SandplaneResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Maximum accepted length of a runner id.
const MAX_RUNNER_ID_LEN: usize = 128;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Registry of runner identities and declared capacity.
#[derive(Debug, Clone)]
pub struct RunnerDirectory {
    store: Store,
}

/// What a runner declares when it registers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerRegistration {
    /// Runner identity.
    pub id: String,

    /// Address the runner can be reached at.
    #[serde(default)]
    pub address: String,

    /// Number of sandboxes the runner can host.
    #[serde(default)]
    pub capacity: u32,

    /// Declared availability.
    #[serde(default)]
    pub status: RunnerStatus,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RunnerDirectory {
    /// Creates a directory over `store`.
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Registers a runner, or refreshes the declaration of one already known.
    pub async fn register(&self, registration: RunnerRegistration) -> SandplaneResult<RunnerInfo> {
        validate_runner_id(&registration.id)?;

        let now = Utc::now();
        let mut tables = self.store.write().await;
        let registered_at = tables
            .runners
            .get(&registration.id)
            .map_or(now, |existing| existing.registered_at);

        let runner = RunnerInfo {
            id: registration.id,
            address: registration.address,
            capacity: registration.capacity,
            status: registration.status,
            registered_at,
            last_seen_at: now,
        };
        tables.runners.insert(runner.id.clone(), runner.clone());

        tracing::info!(runner_id = %runner.id, address = %runner.address, capacity = runner.capacity, "runner registered");
        Ok(runner)
    }

    /// Gets a runner by id.
    pub async fn get(&self, id: &str) -> Option<RunnerInfo> {
        self.store.read().await.runners.get(id).cloned()
    }

    /// Lists every registered runner, by id.
    pub async fn list(&self) -> Vec<RunnerInfo> {
        let mut runners: Vec<RunnerInfo> = self.store.read().await.runners().cloned().collect();
        runners.sort_by(|a, b| a.id.cmp(&b.id));
        runners
    }

    /// Records that `id` was just seen. Returns whether the runner is registered.
    pub async fn touch(&self, id: &str) -> bool {
        match self.store.write().await.runners.get_mut(id) {
            Some(runner) => {
                runner.last_seen_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks that a runner id is usable as an identity.
pub fn validate_runner_id(id: &str) -> SandplaneResult<()> {
    if id.trim().is_empty() {
        return Err(SandplaneError::Validation(
            "runner id is required".to_string(),
        ));
    }

    if id.len() > MAX_RUNNER_ID_LEN {
        return Err(SandplaneError::Validation(format!(
            "runner id must be at most {MAX_RUNNER_ID_LEN} characters"
        )));
    }

    if !id.chars().all(|c| c.is_ascii_graphic()) {
        return Err(SandplaneError::Validation(
            "runner id must be printable ascii without spaces".to_string(),
        ));
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
