//! Data-volume backup orchestration.
//!
//! One run enumerates every instance, snapshots each attached data volume,
//! waits for the snapshot to complete, and prunes the volume's history under
//! the retention policy. The run is best-effort: a volume whose snapshot
//! cannot be produced is skipped (with its history left untouched) and the
//! run carries on; only enumeration failure or cancellation aborts the whole
//! run.

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ZapasConfig;
use crate::model::{Snapshot, SnapshotStatus};
use crate::poll::{PollDriver, PollError, PollState};
use crate::provider::Provider;
use crate::retention::RetentionPolicy;
use crate::retry::{AttemptError, RetryOutcome, RetryPolicy};

/// Counters describing one backup run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BackupSummary {
    /// Instances returned by enumeration.
    pub instances_seen: usize,
    /// Instances skipped because no data volume is attached.
    pub instances_skipped: usize,
    /// Snapshots created and observed completed.
    pub snapshots_created: usize,
    /// Expired snapshots deleted by retention.
    pub snapshots_deleted: usize,
    /// Volumes whose snapshot could not be produced this run.
    pub volumes_failed: usize,
    /// Expired snapshots whose deletion failed and was skipped.
    pub deletions_failed: usize,
}

/// Errors that abort a backup run outright.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackupError {
    /// Instance enumeration never succeeded within its retry budget.
    #[error("instance enumeration exhausted after {attempts} attempts")]
    EnumerationExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// The caller cancelled the run.
    #[error("backup run cancelled")]
    Cancelled,
}

/// Orchestrates snapshot creation and retention across all data volumes.
#[derive(Clone, Debug)]
pub struct BackupOrchestrator<P> {
    provider: P,
    retry: RetryPolicy,
    poll: PollDriver,
    retention: RetentionPolicy,
    data_device: String,
}

impl<P> BackupOrchestrator<P>
where
    P: Provider,
{
    /// Creates an orchestrator around an injected provider gateway.
    #[must_use]
    pub fn new(provider: P, config: &ZapasConfig) -> Self {
        Self {
            provider,
            retry: config.snapshot_retry(),
            poll: config.snapshot_poll(),
            retention: config.retention_policy(),
            data_device: config.data_device.clone(),
        }
    }

    /// Overrides the retry policy.
    ///
    /// This is primarily used by tests to keep failure scenarios fast.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the poll driver.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_poll(mut self, poll: PollDriver) -> Self {
        self.poll = poll;
        self
    }

    /// Overrides the retention policy.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Runs one backup pass over every instance.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::EnumerationExhausted`] when instance
    /// enumeration never succeeds, and [`BackupError::Cancelled`] when the
    /// token fires mid-run. Per-volume failures are counted in the summary
    /// instead of surfacing.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<BackupSummary, BackupError> {
        let outcome = self
            .retry
            .run("list_instances", cancel, || async move {
                self.provider
                    .list_instances()
                    .await
                    .map_err(|err| AttemptError::provider("list_instances", err))
            })
            .await;

        let instances = match outcome {
            RetryOutcome::Success { value, .. } => value,
            RetryOutcome::Exhausted { attempts } => {
                return Err(BackupError::EnumerationExhausted { attempts });
            }
            RetryOutcome::Cancelled { .. } => return Err(BackupError::Cancelled),
        };

        let mut summary = BackupSummary {
            instances_seen: instances.len(),
            ..BackupSummary::default()
        };

        for instance in &instances {
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            let Some(volume_id) = instance.block_devices.data_volume_id(&self.data_device) else {
                debug!(
                    instance = %instance.id,
                    device = %self.data_device,
                    "no data volume attached, skipping"
                );
                summary.instances_skipped += 1;
                continue;
            };

            self.backup_volume(volume_id, cancel, &mut summary).await?;
        }

        info!(
            seen = summary.instances_seen,
            skipped = summary.instances_skipped,
            created = summary.snapshots_created,
            deleted = summary.snapshots_deleted,
            failed = summary.volumes_failed,
            "backup run finished"
        );
        Ok(summary)
    }

    /// Snapshots one volume and prunes its history.
    ///
    /// Creation exhaustion and poll failures skip the volume without a
    /// retention pass: stale snapshots stay until a run produces a fresh
    /// protected snapshot to anchor the keep window.
    async fn backup_volume(
        &self,
        volume_id: &str,
        cancel: &CancellationToken,
        summary: &mut BackupSummary,
    ) -> Result<(), BackupError> {
        let outcome = self
            .retry
            .run("create_snapshot", cancel, || async move {
                let description = snapshot_description(volume_id);
                self.provider
                    .create_snapshot(volume_id, &description)
                    .await
                    .map_err(|err| AttemptError::provider("create_snapshot", err))
            })
            .await;

        let snapshot = match outcome {
            RetryOutcome::Success { value, .. } => value,
            RetryOutcome::Exhausted { attempts } => {
                warn!(
                    volume = %volume_id,
                    attempts,
                    "snapshot creation exhausted retries, skipping volume"
                );
                summary.volumes_failed += 1;
                return Ok(());
            }
            RetryOutcome::Cancelled { .. } => return Err(BackupError::Cancelled),
        };
        info!(snapshot = %snapshot.id, volume = %volume_id, "snapshot created");

        match self.wait_for_completion(&snapshot, cancel).await {
            Ok(()) => {}
            Err(PollError::Cancelled { .. }) => return Err(BackupError::Cancelled),
            Err(err) => {
                warn!(
                    snapshot = %snapshot.id,
                    volume = %volume_id,
                    error = %err,
                    "snapshot did not complete, skipping retention"
                );
                summary.volumes_failed += 1;
                return Ok(());
            }
        }
        summary.snapshots_created += 1;

        self.prune(volume_id, &snapshot.id, summary).await;
        Ok(())
    }

    /// Polls the snapshot until it reaches a terminal status.
    async fn wait_for_completion(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
    ) -> Result<(), PollError<P::Error>> {
        let subject = format!("snapshot {}", snapshot.id);
        self.poll
            .run(&subject, cancel, || async move {
                let refreshed = self.provider.get_snapshot(&snapshot.id).await?;
                Ok(match refreshed.status {
                    SnapshotStatus::Completed => PollState::Success(()),
                    SnapshotStatus::Error => PollState::Failed(refreshed.status.to_string()),
                    SnapshotStatus::Pending => PollState::Pending,
                })
            })
            .await
    }

    /// Deletes every snapshot outside the keep window, one by one.
    ///
    /// A failure here only costs the single deletion; the remaining expired
    /// snapshots are still attempted and the run never aborts.
    async fn prune(&self, volume_id: &str, protected_id: &str, summary: &mut BackupSummary) {
        let volume = match self.provider.get_volume(volume_id).await {
            Ok(volume) => volume,
            Err(err) => {
                warn!(volume = %volume_id, error = %err, "volume lookup failed, skipping retention");
                return;
            }
        };
        let history = match self.provider.list_snapshots(&volume.id).await {
            Ok(history) => history,
            Err(err) => {
                warn!(volume = %volume.id, error = %err, "history listing failed, skipping retention");
                return;
            }
        };

        let plan = self.retention.plan(&history, protected_id);
        if plan.is_empty() {
            debug!(
                volume = %volume.id,
                total = history.len(),
                "retention keeps every snapshot"
            );
            return;
        }

        for snapshot in &plan.expired {
            info!(
                snapshot = %snapshot.id,
                description = %snapshot.description,
                "deleting expired snapshot"
            );
            match self.provider.delete_snapshot(&snapshot.id).await {
                Ok(()) => summary.snapshots_deleted += 1,
                Err(err) => {
                    warn!(snapshot = %snapshot.id, error = %err, "failed to delete snapshot");
                    summary.deletions_failed += 1;
                }
            }
        }
    }
}

/// Description recorded on a fresh snapshot: source volume and wall-clock
/// creation time.
fn snapshot_description(volume_id: &str) -> String {
    format!(
        "Vol:{volume_id};Date:{}",
        Utc::now().format("%d-%m-%Y %H:%M:%S")
    )
}

#[cfg(test)]
mod tests;
