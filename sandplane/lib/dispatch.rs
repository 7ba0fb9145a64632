//! The contract runners use to discover, claim and report on jobs.
//!
//! Runners drive everything: they poll, accept, and complete. The control plane never
//! calls out to a runner, so nothing here waits on anything but the store.

use std::sync::Arc;

use serde::Deserialize;

use crate::{
    audit::{Actor, AuditAction, AuditEntry, AuditSink},
    models::{Job, RunnerInfo},
    queue::{AcceptOutcome, CompletedJob, JobQueue},
    runners::{validate_runner_id, RunnerDirectory, RunnerRegistration},
    SandplaneResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runner-facing dispatch protocol over the job queue and runner directory.
#[derive(Clone)]
pub struct Dispatcher {
    queue: JobQueue,
    runners: RunnerDirectory,
    audit: Arc<dyn AuditSink>,
}

/// A runner's report that it finished a job.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    /// Whether the work succeeded.
    pub success: bool,

    /// Failure reason, kept on the job when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(queue: JobQueue, runners: RunnerDirectory, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            queue,
            runners,
            audit,
        }
    }

    /// Returns the jobs visible to `runner_id`: unclaimed pending jobs plus its own
    /// in-flight ones.
    pub async fn poll(&self, runner_id: Option<&str>) -> SandplaneResult<Vec<Job>> {
        if let Some(runner_id) = runner_id {
            validate_runner_id(runner_id)?;
            self.runners.touch(runner_id).await;
        }

        let jobs = self.queue.poll_pending(runner_id).await;
        tracing::trace!(runner_id = ?runner_id, count = jobs.len(), "polled jobs");
        Ok(jobs)
    }

    /// Claims a job for `runner_id`.
    pub async fn accept(&self, job_id: &str, runner_id: &str) -> SandplaneResult<AcceptOutcome> {
        validate_runner_id(runner_id)?;
        self.queue.accept(job_id, runner_id).await
    }

    /// Finishes a job. When `runner_id` is given it must match the runner that accepted it.
    pub async fn complete(
        &self,
        job_id: &str,
        runner_id: Option<&str>,
        report: CompletionReport,
    ) -> SandplaneResult<CompletedJob> {
        if let Some(runner_id) = runner_id {
            validate_runner_id(runner_id)?;
        }

        self.queue
            .complete(job_id, report.success, runner_id, report.error)
            .await
    }

    /// Registers a runner.
    pub async fn register(&self, registration: RunnerRegistration) -> SandplaneResult<RunnerInfo> {
        let runner = self.runners.register(registration).await?;
        self.audit.record(
            AuditEntry::new(Actor::Runner(runner.id.clone()), AuditAction::RunnerRegistered)
                .detail(format!("capacity={}", runner.capacity)),
        );
        Ok(runner)
    }

    /// Lists registered runners.
    pub async fn runners(&self) -> Vec<RunnerInfo> {
        self.runners.list().await
    }

    /// Gets a job by id.
    pub async fn job(&self, job_id: &str) -> SandplaneResult<Job> {
        self.queue.get(job_id).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audit::MemoryAuditSink,
        models::{JobStatus, RunnerStatus, SandboxSpec, TransitionPolicy},
        registry::SandboxRegistry,
        store::Store,
        SandplaneError,
    };

    fn setup() -> (SandboxRegistry, Dispatcher, RunnerDirectory, MemoryAuditSink) {
        let store = Store::new();
        let memory = MemoryAuditSink::new();
        let audit: Arc<dyn AuditSink> = Arc::new(memory.clone());
        let runners = RunnerDirectory::new(store.clone());
        (
            SandboxRegistry::new(store.clone(), audit.clone(), TransitionPolicy::Strict),
            Dispatcher::new(JobQueue::new(store, audit.clone()), runners.clone(), audit),
            runners,
            memory,
        )
    }

    #[tokio::test]
    async fn test_poll_touches_registered_runner() -> anyhow::Result<()> {
        let (_, dispatcher, runners, _) = setup();
        let runner = dispatcher
            .register(RunnerRegistration {
                id: "r1".into(),
                address: "10.0.0.2:7000".into(),
                capacity: 2,
                status: RunnerStatus::Available,
            })
            .await?;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        dispatcher.poll(Some("r1")).await?;

        let seen = runners.get("r1").await.unwrap();
        assert!(seen.last_seen_at > runner.last_seen_at);
        Ok(())
    }

    #[tokio::test]
    async fn test_poll_with_invalid_runner_id_is_rejected() {
        let (_, dispatcher, _, _) = setup();

        let err = dispatcher.poll(Some("")).await.unwrap_err();

        assert!(matches!(err, SandplaneError::Validation(_)));
    }

    #[tokio::test]
    async fn test_accept_and_complete_roundtrip() -> anyhow::Result<()> {
        let (registry, dispatcher, _, audit) = setup();
        let created = registry
            .create(SandboxSpec::builder().image("python:3.11").build())
            .await?;

        let jobs = dispatcher.poll(Some("r1")).await?;
        assert_eq!(jobs.len(), 1);

        let outcome = dispatcher.accept(&jobs[0].id, "r1").await?;
        assert!(matches!(outcome, AcceptOutcome::Accepted(_)));

        let completed = dispatcher
            .complete(
                &created.job.id,
                Some("r1"),
                CompletionReport {
                    success: true,
                    error: None,
                },
            )
            .await?;
        assert_eq!(completed.job.status, JobStatus::Completed);
        assert!(audit
            .entries()
            .iter()
            .any(|entry| entry.action == AuditAction::JobCompleted));
        Ok(())
    }
}
