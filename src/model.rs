//! Entity model for provider-managed compute and storage resources.
//!
//! These types mirror what the provider gateway reports; the orchestration
//! core observes them and never caches state beyond a single call.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag mapping applied to provider resources (name → value).
pub type Tags = BTreeMap<String, String>;

/// Lifecycle state reported for a compute instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    /// The instance is being provisioned.
    Pending,
    /// The instance is up.
    Running,
    /// The instance is being shut down ahead of termination.
    ShuttingDown,
    /// The instance has been terminated and will not come back.
    Terminated,
    /// The instance is stopping.
    Stopping,
    /// The instance is stopped but can be started again.
    Stopped,
    /// A state this crate does not model explicitly.
    #[serde(untagged)]
    Other(String),
}

impl InstanceState {
    /// Returns the provider's wire spelling of the state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Other(state) => state.as_str(),
        }
    }

    /// Returns true when the instance is up and serving.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true when the state means a launch can never succeed.
    #[must_use]
    pub const fn is_failure_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a point-in-time snapshot.
///
/// Transitions pending → {completed, error} exactly once and never reverse;
/// the core only ever observes these values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    /// The snapshot is still being taken.
    Pending,
    /// The snapshot finished and is usable as a restore source.
    Completed,
    /// The snapshot failed and will never complete.
    Error,
}

impl SnapshotStatus {
    /// Returns the provider's wire spelling of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time copy of one volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Provider-assigned snapshot identifier.
    pub id: String,
    /// Identifier of the volume this snapshot was taken from.
    pub volume_id: String,
    /// Creation timestamp used for retention ordering.
    pub created_at: DateTime<Utc>,
    /// Current status as last observed.
    pub status: SnapshotStatus,
    /// Free-form description recorded at creation time.
    pub description: String,
}

/// Provisioning class of a block-storage volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    /// General-purpose SSD.
    Gp2,
    /// Newer general-purpose SSD.
    Gp3,
    /// Provisioned-IOPS SSD; requires an explicit IOPS rate.
    Io1,
    /// Magnetic storage.
    Standard,
}

impl VolumeType {
    /// Returns true when the type cannot be provisioned without an IOPS rate.
    #[must_use]
    pub const fn requires_iops(self) -> bool {
        matches!(self, Self::Io1)
    }

    /// Returns the provider's wire spelling of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gp2 => "gp2",
            Self::Gp3 => "gp3",
            Self::Io1 => "io1",
            Self::Standard => "standard",
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider-managed block-storage volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Provider-assigned volume identifier.
    pub id: String,
    /// Instance the volume is attached to, when attached.
    pub instance_id: Option<String>,
    /// Size in GiB.
    pub size_gb: u32,
    /// Provisioning class.
    pub volume_type: VolumeType,
}

/// A compute instance as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-assigned instance identifier.
    pub id: String,
    /// Lifecycle state as last observed.
    pub state: InstanceState,
    /// Public IPv4 address, once the provider has assigned one.
    pub public_ip: Option<IpAddr>,
    /// Tags applied to the instance.
    pub tags: Tags,
    /// Device path → volume binding observed on the instance.
    pub block_devices: BlockDeviceMapping,
}

/// Per-slot volume specification inside a [`BlockDeviceMapping`].
///
/// The same shape serves both directions: for an observed instance the
/// `volume_id` is populated; for a launch spec the provisioning fields are.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Identifier of the attached volume (observed side only).
    pub volume_id: Option<String>,
    /// Requested size in GiB (launch side).
    pub size_gb: Option<u32>,
    /// Requested provisioning class (launch side).
    pub volume_type: Option<VolumeType>,
    /// Provisioned IOPS rate; only meaningful for types that require one.
    pub iops: Option<u32>,
    /// Snapshot to seed the volume from (launch side).
    pub snapshot_id: Option<String>,
    /// Whether the provider deletes the volume when the instance terminates.
    pub delete_on_termination: bool,
}

impl DeviceSpec {
    /// Spec for a root device left entirely to provider defaults.
    ///
    /// Root volumes die with the instance; the operating system holds no
    /// state worth keeping.
    #[must_use]
    pub fn root() -> Self {
        Self {
            delete_on_termination: true,
            ..Self::default()
        }
    }

    /// Spec for a data device that must outlive instance termination.
    ///
    /// The IOPS rate is recorded only when the volume type actually requires
    /// one; other types get provider defaults.
    #[must_use]
    pub fn data(size_gb: u32, volume_type: VolumeType, iops: Option<u32>) -> Self {
        Self {
            size_gb: Some(size_gb),
            volume_type: Some(volume_type),
            iops: if volume_type.requires_iops() {
                iops
            } else {
                None
            },
            delete_on_termination: false,
            ..Self::default()
        }
    }

    /// Sets the snapshot the volume is seeded from.
    #[must_use]
    pub fn seeded_from(mut self, snapshot_id: Option<String>) -> Self {
        self.snapshot_id = snapshot_id;
        self
    }
}

/// Launch-time or observed binding of device paths to volume specs.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockDeviceMapping {
    devices: BTreeMap<String, DeviceSpec>,
}

impl BlockDeviceMapping {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a device path to a spec, replacing any previous binding.
    pub fn insert(&mut self, device: impl Into<String>, spec: DeviceSpec) {
        self.devices.insert(device.into(), spec);
    }

    /// Returns the spec bound to a device path.
    #[must_use]
    pub fn get(&self, device: &str) -> Option<&DeviceSpec> {
        self.devices.get(device)
    }

    /// Returns the bound device paths in sorted order.
    #[must_use]
    pub fn device_paths(&self) -> Vec<&str> {
        self.devices.keys().map(String::as_str).collect()
    }

    /// Returns true when no device is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Identifier of the volume attached at the given slot.
    ///
    /// Absence of the slot (or of a volume id inside it) means the instance
    /// carries no data volume and is skipped by the backup orchestrator.
    #[must_use]
    pub fn data_volume_id(&self, slot: &str) -> Option<&str> {
        self.devices
            .get(slot)
            .and_then(|spec| spec.volume_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_volume_id_reads_the_configured_slot() {
        let mut mapping = BlockDeviceMapping::new();
        mapping.insert("/dev/sda1", DeviceSpec::root());
        mapping.insert(
            "/dev/xvdf",
            DeviceSpec {
                volume_id: Some(String::from("vol-1")),
                ..DeviceSpec::default()
            },
        );

        assert_eq!(mapping.data_volume_id("/dev/xvdf"), Some("vol-1"));
    }

    #[test]
    fn data_volume_id_is_none_when_slot_absent() {
        let mut mapping = BlockDeviceMapping::new();
        mapping.insert("/dev/sda1", DeviceSpec::root());

        assert_eq!(mapping.data_volume_id("/dev/xvdf"), None);
    }

    #[test]
    fn data_spec_never_deletes_on_termination() {
        let spec = DeviceSpec::data(8, VolumeType::Gp2, None);
        assert!(!spec.delete_on_termination);
    }

    #[test]
    fn data_spec_drops_iops_for_types_that_ignore_it() {
        let spec = DeviceSpec::data(8, VolumeType::Gp2, Some(100));
        assert_eq!(spec.iops, None);

        let provisioned = DeviceSpec::data(8, VolumeType::Io1, Some(100));
        assert_eq!(provisioned.iops, Some(100));
    }

    #[test]
    fn instance_state_round_trips_unknown_values() {
        let state: InstanceState =
            serde_json::from_str("\"rebooting\"").unwrap_or(InstanceState::Pending);
        assert_eq!(state, InstanceState::Other(String::from("rebooting")));
        assert_eq!(state.as_str(), "rebooting");
    }

    #[test]
    fn failure_terminal_covers_terminated_only() {
        assert!(InstanceState::Terminated.is_failure_terminal());
        assert!(!InstanceState::Stopped.is_failure_terminal());
        assert!(!InstanceState::Pending.is_failure_terminal());
    }
}
