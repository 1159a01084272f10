//! Orchestration core for data-volume backup and instance restore.
//!
//! The crate drives two provider-mediated, eventually-consistent workflows
//! to verified terminal states: periodic snapshotting of every attached data
//! volume with keep-N-most-recent retention pruning, and recreation of a
//! replacement instance from a chosen snapshot. The cloud gateway itself is
//! an injected [`Provider`] implementation; all durable state lives behind
//! it.

pub mod backup;
pub mod bootscript;
pub mod config;
pub mod model;
pub mod poll;
pub mod provider;
pub mod restore;
pub mod retention;
pub mod retry;
pub mod test_support;

pub use backup::{BackupError, BackupOrchestrator, BackupSummary};
pub use config::{ConfigError, ZapasConfig};
pub use model::{
    BlockDeviceMapping, DeviceSpec, Instance, InstanceState, Snapshot, SnapshotStatus, Tags,
    Volume, VolumeType,
};
pub use poll::{PollDriver, PollError, PollState};
pub use provider::{LaunchSpec, LaunchSpecBuilder, Provider, ProviderFuture, SpecError};
pub use restore::{NAME_TAG, ProvisionedInstance, RestoreError, RestoreOrchestrator};
pub use retention::{DEFAULT_KEEP_WINDOW, RetentionPlan, RetentionPolicy};
pub use retry::{AttemptError, RetryOutcome, RetryPolicy};
