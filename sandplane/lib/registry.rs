//! Authoritative registry of sandboxes.
//!
//! The registry owns every sandbox mutation. Runner-driven updates are ownership
//! checked; agent information is merged unconditionally. Deleting is a fork: a sandbox a
//! runner is actively provisioning gets a `delete` job and moves to `deleting`, anything
//! else is removed on the spot since there is nothing for a runner to tear down.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    audit::{Actor, AuditAction, AuditEntry, AuditSink},
    config::{SANDBOX_TOKEN_LENGTH, SUPERSEDED_BY_DELETE},
    models::{
        AgentInfoUpdate, Job, JobType, RunnerUpdate, Sandbox, SandboxSpec, SandboxStatus,
        TransitionPolicy,
    },
    store::Store,
    utils, SandplaneError, SandplaneResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Authoritative store of sandbox records.
#[derive(Clone)]
pub struct SandboxRegistry {
    store: Store,
    audit: Arc<dyn AuditSink>,
    policy: TransitionPolicy,
}

/// A freshly created sandbox and the job dispatched to provision it.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSandbox {
    /// The new `pending` sandbox.
    pub sandbox: Sandbox,

    /// The `create` job referencing it.
    pub job: Job,
}

/// What a delete request did.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The sandbox is being torn down by a runner.
    Deleting {
        /// The sandbox, now `deleting`.
        sandbox: Sandbox,

        /// The unresolved `delete` job.
        job: Job,
    },

    /// The sandbox record was removed immediately.
    Removed,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxRegistry {
    /// Creates a registry over `store`.
    pub fn new(store: Store, audit: Arc<dyn AuditSink>, policy: TransitionPolicy) -> Self {
        Self {
            store,
            audit,
            policy,
        }
    }

    /// The store this registry writes to.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Creates a `pending` sandbox and enqueues its `create` job.
    pub async fn create(&self, spec: SandboxSpec) -> SandplaneResult<CreatedSandbox> {
        spec.validate()?;

        let now = Utc::now();
        let sandbox = Sandbox::new(
            utils::new_id(),
            spec,
            utils::generate_token(SANDBOX_TOKEN_LENGTH),
            now,
        );

        let job = {
            let mut tables = self.store.write().await;
            tables.sandboxes.insert(sandbox.id.clone(), sandbox.clone());
            tables.enqueue_job(JobType::Create, &sandbox.id, now)?
        };

        tracing::info!(sandbox_id = %sandbox.id, job_id = %job.id, image = %sandbox.image, "created sandbox");
        self.audit.record(
            AuditEntry::new(Actor::Client, AuditAction::SandboxCreated)
                .sandbox(&sandbox.id)
                .job(&job.id)
                .detail(&sandbox.image),
        );

        Ok(CreatedSandbox { sandbox, job })
    }

    /// Gets a sandbox by id.
    pub async fn get(&self, id: &str) -> SandplaneResult<Sandbox> {
        self.store
            .read()
            .await
            .sandboxes
            .get(id)
            .cloned()
            .ok_or_else(|| SandplaneError::SandboxNotFound(id.to_string()))
    }

    /// Lists every sandbox, oldest first.
    pub async fn list(&self) -> Vec<Sandbox> {
        let mut sandboxes: Vec<Sandbox> = self.store.read().await.sandboxes().cloned().collect();
        sandboxes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sandboxes
    }

    /// Lists sandboxes in `status`, oldest first.
    pub async fn list_by_status(&self, status: SandboxStatus) -> Vec<Sandbox> {
        let mut sandboxes = self.list().await;
        sandboxes.retain(|sandbox| sandbox.status == status);
        sandboxes
    }

    /// Applies a runner-status update from `runner_id`.
    ///
    /// Fails with [`SandplaneError::OwnershipConflict`] without mutating anything if the
    /// sandbox is already bound to another runner.
    pub async fn update_runner_status(
        &self,
        id: &str,
        runner_id: &str,
        update: RunnerUpdate,
    ) -> SandplaneResult<Sandbox> {
        let now = Utc::now();
        let requested = update.status;

        let (sandbox, previous) = {
            let mut tables = self.store.write().await;
            let sandbox = tables
                .sandboxes
                .get_mut(id)
                .ok_or_else(|| SandplaneError::SandboxNotFound(id.to_string()))?;
            let previous = sandbox.status;

            if let Err(e) = sandbox.apply_runner_update(runner_id, update, self.policy, now) {
                if matches!(e, SandplaneError::OwnershipConflict { .. }) {
                    tracing::warn!(sandbox_id = %id, runner_id = %runner_id, "rejected runner status from non-owner");
                    self.audit.record(
                        AuditEntry::new(
                            Actor::Runner(runner_id.to_string()),
                            AuditAction::OwnershipRejected,
                        )
                        .sandbox(id)
                        .detail(e.to_string()),
                    );
                }
                return Err(e);
            }

            (sandbox.clone(), previous)
        };

        if requested.is_some_and(|status| status != previous) {
            self.record_status_change(&sandbox, previous, Actor::Runner(runner_id.to_string()));
        }

        Ok(sandbox)
    }

    /// Sets only the status, on behalf of `runner_id`. Ownership checked.
    pub async fn update_status(
        &self,
        id: &str,
        runner_id: &str,
        status: SandboxStatus,
    ) -> SandplaneResult<Sandbox> {
        self.update_runner_status(
            id,
            runner_id,
            RunnerUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Merges agent information. Always allowed, independent of ownership and status.
    pub async fn update_agent_info(
        &self,
        id: &str,
        update: AgentInfoUpdate,
    ) -> SandplaneResult<Sandbox> {
        let now = Utc::now();
        let mut tables = self.store.write().await;
        let sandbox = tables
            .sandboxes
            .get_mut(id)
            .ok_or_else(|| SandplaneError::SandboxNotFound(id.to_string()))?;

        sandbox.apply_agent_update(update, now);
        Ok(sandbox.clone())
    }

    /// Publishes the address of the in-sandbox command-execution endpoint.
    pub async fn update_agent_address(
        &self,
        id: &str,
        host: String,
        port: u16,
        token: Option<String>,
    ) -> SandplaneResult<Sandbox> {
        self.update_agent_info(
            id,
            AgentInfoUpdate {
                address_host: Some(host),
                address_port: Some(port),
                address_token: token,
                ..Default::default()
            },
        )
        .await
    }

    /// Records an agent heartbeat and, if `stop` is set, moves a running sandbox to `stopped`.
    ///
    /// The heartbeat is always merged. The stop only applies to a `running` sandbox, under
    /// either transition policy; in any other status it is skipped, not rejected.
    pub async fn apply_agent_report(
        &self,
        id: &str,
        update: AgentInfoUpdate,
        stop: bool,
    ) -> SandplaneResult<Sandbox> {
        let now = Utc::now();

        let (sandbox, previous) = {
            let mut tables = self.store.write().await;
            let sandbox = tables
                .sandboxes
                .get_mut(id)
                .ok_or_else(|| SandplaneError::SandboxNotFound(id.to_string()))?;
            let previous = sandbox.status;

            sandbox.apply_agent_update(update, now);
            if stop {
                if sandbox.status == SandboxStatus::Running {
                    sandbox.transition(SandboxStatus::Stopped, self.policy, now)?;
                } else {
                    tracing::debug!(sandbox_id = %id, status = %sandbox.status, "ignoring agent stop");
                }
            }

            (sandbox.clone(), previous)
        };

        if sandbox.status != previous {
            self.record_status_change(&sandbox, previous, Actor::Agent);
        }

        Ok(sandbox)
    }

    /// Handles a client delete request.
    ///
    /// `pending` and `running` sandboxes get a `delete` job and move to `deleting`.
    /// A sandbox already `deleting` returns its unresolved `delete` job, or gets a new
    /// one if the previous attempt failed. Anything else is removed immediately.
    ///
    /// Unclaimed `create` jobs of the sandbox fail with [`SUPERSEDED_BY_DELETE`] in the
    /// same step, so no runner provisions a sandbox that is on its way out.
    pub async fn request_delete(&self, id: &str) -> SandplaneResult<DeleteOutcome> {
        let now = Utc::now();

        let (outcome, superseded) = {
            let mut tables = self.store.write().await;
            let status = tables
                .sandboxes
                .get(id)
                .map(|sandbox| sandbox.status)
                .ok_or_else(|| SandplaneError::SandboxNotFound(id.to_string()))?;
            let superseded = tables.supersede_create_jobs(id, SUPERSEDED_BY_DELETE, now);

            let outcome = if status.is_provisioned() || status == SandboxStatus::Deleting {
                let existing = tables
                    .jobs()
                    .filter(|job| {
                        job.sandbox_id == id && job.job_type == JobType::Delete && !job.is_finished()
                    })
                    .min_by_key(|job| job.created_at)
                    .cloned();

                let (job, enqueued) = match existing {
                    Some(job) if status == SandboxStatus::Deleting => (job, false),
                    _ => (tables.enqueue_job(JobType::Delete, id, now)?, true),
                };

                let sandbox = tables
                    .sandboxes
                    .get_mut(id)
                    .ok_or_else(|| SandplaneError::SandboxNotFound(id.to_string()))?;
                if status != SandboxStatus::Deleting {
                    // Deleting an actively provisioned sandbox is always allowed.
                    sandbox.transition(
                        SandboxStatus::Deleting,
                        TransitionPolicy::Permissive,
                        now,
                    )?;
                }

                (
                    DeleteOutcome::Deleting {
                        sandbox: sandbox.clone(),
                        job,
                    },
                    enqueued,
                    status,
                )
            } else {
                tables.sandboxes.remove(id);
                (DeleteOutcome::Removed, false, status)
            };

            (outcome, superseded)
        };

        for job in &superseded {
            tracing::info!(sandbox_id = %id, job_id = %job.id, "failed unclaimed create job");
            self.audit.record(
                AuditEntry::new(Actor::Client, AuditAction::JobFailed)
                    .sandbox(id)
                    .job(&job.id)
                    .detail(SUPERSEDED_BY_DELETE),
            );
        }

        match outcome {
            (DeleteOutcome::Deleting { sandbox, job }, enqueued, previous) => {
                if enqueued {
                    tracing::info!(sandbox_id = %id, job_id = %job.id, "dispatched delete job");
                    self.audit.record(
                        AuditEntry::new(Actor::Client, AuditAction::SandboxDeleteRequested)
                            .sandbox(id)
                            .job(&job.id)
                            .detail(format!("from {previous}")),
                    );
                }
                Ok(DeleteOutcome::Deleting { sandbox, job })
            }
            (DeleteOutcome::Removed, _, previous) => {
                tracing::info!(sandbox_id = %id, status = %previous, "removed sandbox without dispatch");
                self.audit.record(
                    AuditEntry::new(Actor::Client, AuditAction::SandboxRemoved)
                        .sandbox(id)
                        .detail(format!("from {previous}")),
                );
                Ok(DeleteOutcome::Removed)
            }
        }
    }

    /// Removes a sandbox record. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.store.write().await.sandboxes.remove(id).is_some();
        if removed {
            tracing::info!(sandbox_id = %id, "removed sandbox");
        }
        removed
    }

    /// Moves a sandbox to `stopped` if it is still running with a heartbeat older than
    /// `stale_after` at `now`. Returns whether it did.
    ///
    /// The condition is re-evaluated under the write lock, so a heartbeat or status
    /// report that landed after the caller's snapshot wins.
    pub(crate) async fn stop_if_stale(
        &self,
        id: &str,
        stale_after: chrono::Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let stopped = {
            let mut tables = self.store.write().await;
            match tables.sandboxes.get_mut(id) {
                Some(sandbox)
                    if sandbox.status == SandboxStatus::Running
                        && sandbox.heartbeat_is_stale(stale_after, now) =>
                {
                    match sandbox.transition(SandboxStatus::Stopped, self.policy, now) {
                        Ok(()) => Some(sandbox.clone()),
                        Err(e) => {
                            tracing::error!(sandbox_id = %id, error = %e, "could not stop stale sandbox");
                            None
                        }
                    }
                }
                _ => None,
            }
        };

        match stopped {
            Some(sandbox) => {
                tracing::warn!(sandbox_id = %id, last_heartbeat = ?sandbox.agent_info.last_heartbeat, "heartbeat stale, marked sandbox stopped");
                self.record_status_change(&sandbox, SandboxStatus::Running, Actor::Sweeper);
                true
            }
            None => false,
        }
    }

    /// Removes a sandbox if it has been `deleting` for longer than `stuck_after` at `now`.
    /// Returns whether it did.
    pub(crate) async fn purge_if_stuck(
        &self,
        id: &str,
        stuck_after: chrono::Duration,
        now: DateTime<Utc>,
        actor: Actor,
    ) -> bool {
        let purged = {
            let mut tables = self.store.write().await;
            let stuck = tables.sandboxes.get(id).is_some_and(|sandbox| {
                sandbox.status == SandboxStatus::Deleting
                    && sandbox.time_in_status(now) > stuck_after
            });
            stuck && tables.sandboxes.remove(id).is_some()
        };

        if purged {
            tracing::warn!(sandbox_id = %id, "purged sandbox stuck in deleting");
            self.audit.record(
                AuditEntry::new(actor, AuditAction::SandboxRemoved)
                    .sandbox(id)
                    .detail("stuck in deleting"),
            );
        }

        purged
    }

    fn record_status_change(&self, sandbox: &Sandbox, previous: SandboxStatus, actor: Actor) {
        tracing::info!(sandbox_id = %sandbox.id, from = %previous, to = %sandbox.status, actor = %actor, "sandbox status changed");
        self.audit.record(
            AuditEntry::new(actor, AuditAction::SandboxStatusChanged)
                .sandbox(&sandbox.id)
                .detail(format!("{previous} -> {}", sandbox.status)),
        );
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
