//! Periodic health sweep.
//!
//! Each pass stops running sandboxes whose agent heartbeat went stale and purges
//! sandboxes stuck in `deleting`. Decisions are taken on a snapshot and then re-checked
//! per sandbox under the write lock, so a callback that lands mid-sweep wins.

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    audit::Actor, config::SweepPolicy, models::SandboxStatus, registry::SandboxRegistry,
    SandplaneResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs health sweeps and manual cleanups against the registry.
pub struct HealthSweeper {
    registry: SandboxRegistry,
    policy: SweepPolicy,
    state_file: Option<PathBuf>,
}

/// What a sweep or cleanup changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Sandboxes moved to `stopped` for a stale heartbeat.
    pub stopped: Vec<String>,

    /// Sandboxes removed after being stuck in `deleting`.
    pub purged: Vec<String>,
}

/// Handle to a sweeper running in the background.
pub struct SweeperHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HealthSweeper {
    /// Creates a sweeper. If `state_file` is set, the store is saved there after every
    /// background tick.
    pub fn new(registry: SandboxRegistry, policy: SweepPolicy, state_file: Option<PathBuf>) -> Self {
        Self {
            registry,
            policy,
            state_file,
        }
    }

    /// The timing this sweeper runs with.
    pub fn policy(&self) -> &SweepPolicy {
        &self.policy
    }

    /// Runs one sweep at the current time.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Runs one sweep as if the clock read `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let stale_after = self.policy.heartbeat_stale_after();
        let stuck_after = self.policy.stuck_deleting_after();
        let mut report = SweepReport::default();

        for sandbox in self.registry.list().await {
            match sandbox.status {
                SandboxStatus::Running if sandbox.heartbeat_is_stale(stale_after, now) => {
                    if self.registry.stop_if_stale(&sandbox.id, stale_after, now).await {
                        report.stopped.push(sandbox.id);
                    }
                }
                SandboxStatus::Deleting if sandbox.time_in_status(now) > stuck_after => {
                    if self
                        .registry
                        .purge_if_stuck(&sandbox.id, stuck_after, now, Actor::Sweeper)
                        .await
                    {
                        report.purged.push(sandbox.id);
                    }
                }
                _ => {}
            }
        }

        if !report.stopped.is_empty() || !report.purged.is_empty() {
            tracing::info!(
                stopped = report.stopped.len(),
                purged = report.purged.len(),
                "health sweep finished"
            );
        }

        report
    }

    /// Purges sandboxes stuck in `deleting` past the manual cleanup threshold.
    pub async fn cleanup(&self) -> SweepReport {
        self.cleanup_at(Utc::now()).await
    }

    /// Runs a manual cleanup as if the clock read `now`.
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> SweepReport {
        let stuck_after = self.policy.manual_cleanup_after();
        let mut report = SweepReport::default();

        for sandbox in self.registry.list_by_status(SandboxStatus::Deleting).await {
            if self
                .registry
                .purge_if_stuck(&sandbox.id, stuck_after, now, Actor::Operator)
                .await
            {
                report.purged.push(sandbox.id);
            }
        }

        tracing::info!(purged = report.purged.len(), "manual cleanup finished");
        report
    }

    /// Starts sweeping every `interval` until the returned handle is stopped.
    pub fn spawn(self: Arc<Self>) -> SweeperHandle {
        let token = CancellationToken::new();
        let child = token.child_token();

        let handle = tokio::spawn(async move {
            let period = self.policy.interval();
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval_secs = period.as_secs(), "health sweeper started");
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep().await;
                        if let Err(e) = self.persist().await {
                            tracing::error!(error = %e, "failed to save state snapshot");
                        }
                    }
                }
            }
            tracing::info!("health sweeper stopped");
        });

        SweeperHandle { token, handle }
    }

    async fn persist(&self) -> SandplaneResult<()> {
        if let Some(path) = &self.state_file {
            self.registry.store().save(path).await?;
        }
        Ok(())
    }
}

impl SweeperHandle {
    /// Stops the sweeper and waits for the in-flight pass to finish.
    pub async fn stop(self) -> SandplaneResult<()> {
        self.token.cancel();
        self.handle.await?;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
