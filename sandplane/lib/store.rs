//! The single shared store.
//!
//! Sandboxes, jobs and runners live in one set of tables behind one lock, so every
//! mutating operation (including the ones spanning a sandbox and its job) runs under a
//! single write guard and is atomic with respect to every other request and the sweep.

use std::{collections::HashMap, path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    models::{Job, JobStatus, JobType, RunnerInfo, Sandbox},
    utils, SandplaneError, SandplaneResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Shared handle to the control plane's tables. Cloning shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct Store {
    tables: Arc<RwLock<Tables>>,
}

/// The records held by a [`Store`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    /// Sandboxes by id.
    #[serde(default)]
    pub(crate) sandboxes: HashMap<String, Sandbox>,

    /// Jobs by id.
    #[serde(default)]
    pub(crate) jobs: HashMap<String, Job>,

    /// Runners by id.
    #[serde(default)]
    pub(crate) runners: HashMap<String, RunnerInfo>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `tables`.
    pub fn from_tables(tables: Tables) -> Self {
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    /// Acquires shared access to the tables.
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().await
    }

    /// Acquires exclusive access to the tables.
    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().await
    }

    /// Returns a point-in-time copy of the tables.
    pub async fn snapshot(&self) -> Tables {
        self.tables.read().await.clone()
    }

    /// Writes a snapshot of the tables to `path` as JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> SandplaneResult<()> {
        let path = path.as_ref();
        let serialized = {
            let tables = self.read().await;
            serde_json::to_vec_pretty(&*tables)?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write a sibling file, then rename it over the snapshot.
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, serialized).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        tracing::debug!(path = %path.display(), "saved store snapshot");
        Ok(())
    }

    /// Loads a store from a snapshot at `path`, or returns an empty one if none exists.
    pub async fn load(path: impl AsRef<Path>) -> SandplaneResult<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            tracing::info!(path = %path.display(), "no store snapshot found, starting empty");
            return Ok(Self::new());
        }

        let data = tokio::fs::read(path).await?;
        let tables: Tables = serde_json::from_slice(&data)?;

        tracing::info!(
            path = %path.display(),
            sandboxes = tables.sandboxes.len(),
            jobs = tables.jobs.len(),
            runners = tables.runners.len(),
            "loaded store snapshot"
        );
        Ok(Self::from_tables(tables))
    }
}

impl Tables {
    /// All sandboxes.
    pub fn sandboxes(&self) -> impl Iterator<Item = &Sandbox> {
        self.sandboxes.values()
    }

    /// All jobs.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// All runners.
    pub fn runners(&self) -> impl Iterator<Item = &RunnerInfo> {
        self.runners.values()
    }

    /// Creates a `pending` job of `job_type` for the existing sandbox `sandbox_id`.
    ///
    /// This is the only place jobs are created.
    pub(crate) fn enqueue_job(
        &mut self,
        job_type: JobType,
        sandbox_id: &str,
        now: DateTime<Utc>,
    ) -> SandplaneResult<Job> {
        let sandbox = self
            .sandboxes
            .get(sandbox_id)
            .ok_or_else(|| SandplaneError::SandboxNotFound(sandbox_id.to_string()))?;
        let job = Job::for_sandbox(utils::new_id(), job_type, sandbox, now);
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    /// Fails every unclaimed `create` job of `sandbox_id` with `reason`.
    ///
    /// Claimed jobs belong to their runner and are left alone. Returns the failed jobs.
    pub(crate) fn supersede_create_jobs(
        &mut self,
        sandbox_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Vec<Job> {
        self.jobs
            .values_mut()
            .filter(|job| {
                job.sandbox_id == sandbox_id
                    && job.job_type == JobType::Create
                    && job.status == JobStatus::Pending
            })
            .map(|job| {
                job.status = JobStatus::Failed;
                job.finished_at = Some(now);
                job.error = Some(reason.to_string());
                job.clone()
            })
            .collect()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::SandboxSpec;

    #[tokio::test]
    async fn test_save_and_load_snapshot() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state").join("sandplane.json");
        let store = Store::new();

        {
            let now = Utc::now();
            let mut tables = store.write().await;
            let sandbox = Sandbox::new(
                "sb".into(),
                SandboxSpec::builder().image("alpine").build(),
                "tok".into(),
                now,
            );
            tables.sandboxes.insert(sandbox.id.clone(), sandbox);
            tables.enqueue_job(JobType::Create, "sb", now)?;
        }

        store.save(&path).await?;
        let loaded = Store::load(&path).await?;

        assert_eq!(loaded.snapshot().await, store.snapshot().await);
        assert!(!path.with_extension("tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let store = Store::load(dir.path().join("missing.json")).await?;

        assert_eq!(store.snapshot().await, Tables::default());
        Ok(())
    }

    #[test]
    fn test_enqueue_job_requires_sandbox() {
        let mut tables = Tables::default();

        let err = tables
            .enqueue_job(JobType::Delete, "missing", Utc::now())
            .unwrap_err();

        assert!(matches!(err, SandplaneError::SandboxNotFound(_)));
        assert_eq!(tables.jobs().count(), 0);
    }

    #[test]
    fn test_supersede_leaves_claimed_create_jobs() -> anyhow::Result<()> {
        let now = Utc::now();
        let mut tables = Tables::default();
        let sandbox = Sandbox::new(
            "sb".into(),
            SandboxSpec::builder().image("alpine").build(),
            "tok".into(),
            now,
        );
        tables.sandboxes.insert("sb".into(), sandbox);

        let unclaimed = tables.enqueue_job(JobType::Create, "sb", now)?;
        let claimed = tables.enqueue_job(JobType::Create, "sb", now)?;
        if let Some(job) = tables.jobs.get_mut(&claimed.id) {
            job.status = JobStatus::Running;
            job.runner_id = Some("r1".into());
        }

        let failed = tables.supersede_create_jobs("sb", "superseded by delete", now);

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, unclaimed.id);
        assert_eq!(failed[0].error.as_deref(), Some("superseded by delete"));
        assert_eq!(failed[0].finished_at, Some(now));
        assert_eq!(tables.jobs[&claimed.id].status, JobStatus::Running);
        Ok(())
    }

    #[tokio::test]
    async fn test_clones_share_tables() {
        let store = Store::new();
        let other = store.clone();

        let now = Utc::now();
        let sandbox = Sandbox::new(
            "sb".into(),
            SandboxSpec::builder().image("alpine").build(),
            "tok".into(),
            now,
        );
        store.write().await.sandboxes.insert("sb".into(), sandbox);

        assert_eq!(other.read().await.sandboxes().count(), 1);
    }
}
