//! Authoritative queue of provisioning jobs.
//!
//! Jobs move `pending -> running -> completed | failed` and are never deleted. A runner
//! polling with its id also gets back the jobs it already accepted but has not finished,
//! which is how a restarted runner resumes in-flight work.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    audit::{Actor, AuditAction, AuditEntry, AuditSink},
    models::{Job, JobStatus, JobType},
    store::Store,
    SandplaneError, SandplaneResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Authoritative store of job records.
#[derive(Clone)]
pub struct JobQueue {
    store: Store,
    audit: Arc<dyn AuditSink>,
}

/// Result of trying to claim a job.
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    /// The caller now owns the job.
    Accepted(Job),

    /// Another runner got there first, or the job is already finished.
    AlreadyClaimed {
        /// The job's current status.
        status: JobStatus,

        /// The runner the job is bound to, if any.
        runner_id: Option<String>,
    },
}

/// A finished job and whether finishing it removed its sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedJob {
    /// The job, now `completed` or `failed`.
    pub job: Job,

    /// Whether a successful `delete` job removed the sandbox.
    pub sandbox_removed: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl JobQueue {
    /// Creates a queue over `store`.
    pub fn new(store: Store, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Enqueues a `pending` job of `job_type` for an existing sandbox.
    pub async fn enqueue(&self, job_type: JobType, sandbox_id: &str) -> SandplaneResult<Job> {
        let job = self
            .store
            .write()
            .await
            .enqueue_job(job_type, sandbox_id, Utc::now())?;

        tracing::info!(job_id = %job.id, sandbox_id = %sandbox_id, job_type = %job_type, "enqueued job");
        self.audit.record(
            AuditEntry::new(Actor::Client, AuditAction::JobEnqueued)
                .sandbox(sandbox_id)
                .job(&job.id)
                .detail(job_type.to_string()),
        );

        Ok(job)
    }

    /// Gets a job by id.
    pub async fn get(&self, id: &str) -> SandplaneResult<Job> {
        self.store
            .read()
            .await
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| SandplaneError::JobNotFound(id.to_string()))
    }

    /// Lists every job, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.store.read().await.jobs().cloned().collect();
        sort_oldest_first(&mut jobs);
        jobs
    }

    /// Returns unclaimed `pending` jobs, plus the `running` jobs bound to `runner_id`
    /// when one is given. Oldest first.
    ///
    /// Unclaimed jobs whose sandbox no longer exists are never handed out.
    pub async fn poll_pending(&self, runner_id: Option<&str>) -> Vec<Job> {
        let tables = self.store.read().await;
        let mut jobs: Vec<Job> = tables
            .jobs()
            .filter(|job| {
                (job.status == JobStatus::Pending && tables.sandboxes.contains_key(&job.sandbox_id))
                    || runner_id.is_some_and(|runner_id| job.is_running_on(runner_id))
            })
            .cloned()
            .collect();
        drop(tables);
        sort_oldest_first(&mut jobs);
        jobs
    }

    /// Claims a `pending` job for `runner_id`.
    ///
    /// The status check and the update happen under one write guard, so of two runners
    /// racing for the same job exactly one gets [`AcceptOutcome::Accepted`]. A runner
    /// re-accepting a job it already holds gets it back unchanged.
    pub async fn accept(&self, id: &str, runner_id: &str) -> SandplaneResult<AcceptOutcome> {
        let outcome = {
            let mut tables = self.store.write().await;
            let job = tables
                .jobs
                .get_mut(id)
                .ok_or_else(|| SandplaneError::JobNotFound(id.to_string()))?;

            match job.status {
                JobStatus::Pending => {
                    job.status = JobStatus::Running;
                    job.runner_id = Some(runner_id.to_string());
                    job.accepted_at = Some(Utc::now());
                    AcceptOutcome::Accepted(job.clone())
                }
                JobStatus::Running if job.runner_id.as_deref() == Some(runner_id) => {
                    return Ok(AcceptOutcome::Accepted(job.clone()));
                }
                status => AcceptOutcome::AlreadyClaimed {
                    status,
                    runner_id: job.runner_id.clone(),
                },
            }
        };

        match &outcome {
            AcceptOutcome::Accepted(job) => {
                tracing::info!(job_id = %id, runner_id = %runner_id, sandbox_id = %job.sandbox_id, "job accepted");
                self.audit.record(
                    AuditEntry::new(Actor::Runner(runner_id.to_string()), AuditAction::JobAccepted)
                        .sandbox(&job.sandbox_id)
                        .job(id),
                );
            }
            AcceptOutcome::AlreadyClaimed { status, runner_id: owner } => {
                tracing::debug!(job_id = %id, runner_id = %runner_id, status = %status, owner = ?owner, "job already claimed");
            }
        }

        Ok(outcome)
    }

    /// Finishes a job as `completed` or `failed`.
    ///
    /// A successful `delete` job removes its sandbox under the same write guard. A
    /// `create` job's completion does not touch its sandbox. Repeating a completion with
    /// the same outcome returns the job unchanged.
    pub async fn complete(
        &self,
        id: &str,
        success: bool,
        runner_id: Option<&str>,
        error: Option<String>,
    ) -> SandplaneResult<CompletedJob> {
        let target = if success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };

        let completed = {
            let mut tables = self.store.write().await;
            let job = tables
                .jobs
                .get_mut(id)
                .ok_or_else(|| SandplaneError::JobNotFound(id.to_string()))?;

            if let (Some(caller), Some(owner)) = (runner_id, job.runner_id.as_deref()) {
                if caller != owner {
                    return Err(SandplaneError::JobOwnershipConflict {
                        job_id: id.to_string(),
                        owner: owner.to_string(),
                        caller: caller.to_string(),
                    });
                }
            }

            match job.status {
                JobStatus::Pending => {
                    return Err(SandplaneError::InvalidJobState {
                        job_id: id.to_string(),
                        status: job.status,
                        reason: "job has not been accepted".to_string(),
                    });
                }
                status if status == target => {
                    return Ok(CompletedJob {
                        job: job.clone(),
                        sandbox_removed: false,
                    });
                }
                status if status.is_terminal() => {
                    return Err(SandplaneError::InvalidJobState {
                        job_id: id.to_string(),
                        status,
                        reason: format!("job already finished, cannot mark {target}"),
                    });
                }
                _ => {}
            }

            job.status = target;
            job.finished_at = Some(Utc::now());
            job.error = if success { None } else { error };
            let job = job.clone();

            let sandbox_removed = job.job_type == JobType::Delete
                && success
                && tables.sandboxes.remove(&job.sandbox_id).is_some();

            CompletedJob {
                job,
                sandbox_removed,
            }
        };

        let job = &completed.job;
        let actor = Actor::Runner(job.runner_id.clone().unwrap_or_default());
        if success {
            tracing::info!(job_id = %id, job_type = %job.job_type, sandbox_id = %job.sandbox_id, "job completed");
            self.audit.record(
                AuditEntry::new(actor.clone(), AuditAction::JobCompleted)
                    .sandbox(&job.sandbox_id)
                    .job(id),
            );
        } else {
            tracing::warn!(job_id = %id, job_type = %job.job_type, sandbox_id = %job.sandbox_id, error = ?job.error, "job failed");
            let mut entry = AuditEntry::new(actor.clone(), AuditAction::JobFailed)
                .sandbox(&job.sandbox_id)
                .job(id);
            if let Some(error) = &job.error {
                entry = entry.detail(error);
            }
            self.audit.record(entry);
        }

        if completed.sandbox_removed {
            tracing::info!(sandbox_id = %job.sandbox_id, job_id = %id, "delete job removed sandbox");
            self.audit.record(
                AuditEntry::new(actor, AuditAction::SandboxRemoved)
                    .sandbox(&job.sandbox_id)
                    .job(id),
            );
        }

        Ok(completed)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn sort_oldest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
