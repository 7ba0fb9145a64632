use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A known runner. Advisory only; dispatch never consults it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerInfo {
    /// Runner identity, as sent in the runner header.
    pub id: String,

    /// Address the runner can be reached at.
    pub address: String,

    /// Declared number of sandboxes the runner can host.
    pub capacity: u32,

    /// Declared availability.
    pub status: RunnerStatus,

    /// When the runner first registered.
    pub registered_at: DateTime<Utc>,

    /// Last time the runner registered or polled for jobs.
    pub last_seen_at: DateTime<Utc>,
}

/// Declared availability of a runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    /// Accepting work.
    #[default]
    Available,

    /// At capacity.
    Busy,
}
