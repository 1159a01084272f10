//! Provider gateway abstraction consumed by the orchestrators.
//!
//! The crate never talks to a cloud API directly; everything flows through
//! the [`Provider`] trait so a real client or a test double can be injected
//! at construction time. All durable state lives behind this interface.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::model::{BlockDeviceMapping, Instance, Snapshot, Tags, Volume, VolumeType};

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Narrow interface over the cloud provider's volume, snapshot, and instance
/// operations.
///
/// Every call may fail with the provider's own error condition; the retry and
/// poll layers decide what failure means for the orchestration in progress.
pub trait Provider {
    /// Provider specific error type returned by gateway calls.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists every instance visible in the configured account and region.
    fn list_instances(&self) -> ProviderFuture<'_, Vec<Instance>, Self::Error>;

    /// Looks up one volume by identifier.
    fn get_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, Volume, Self::Error>;

    /// Lists the full snapshot history of one volume.
    fn list_snapshots<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, Vec<Snapshot>, Self::Error>;

    /// Starts an asynchronous snapshot of a volume.
    ///
    /// The returned snapshot is typically still `pending`; callers poll it to
    /// a terminal status via [`Provider::get_snapshot`].
    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        description: &'a str,
    ) -> ProviderFuture<'a, Snapshot, Self::Error>;

    /// Deletes one snapshot.
    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Refreshes one snapshot's status from the provider.
    fn get_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, Snapshot, Self::Error>;

    /// Launches a new instance from a validated spec.
    ///
    /// The returned instance is typically still `pending`; callers poll it to
    /// `running` via [`Provider::get_instance`].
    fn launch_instance<'a>(
        &'a self,
        spec: &'a LaunchSpec,
    ) -> ProviderFuture<'a, Instance, Self::Error>;

    /// Refreshes one instance's state from the provider.
    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Instance, Self::Error>;

    /// Applies tags to an instance, merging with any existing tags.
    fn tag_instance<'a>(
        &'a self,
        instance_id: &'a str,
        tags: &'a Tags,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Terminates an instance.
    ///
    /// Used only by the restore orchestrator's best-effort cleanup of a
    /// partially provisioned instance.
    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;
}

/// Parameters required to launch a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSpec {
    /// Machine image the instance boots from.
    pub image_id: String,
    /// Commercial type or flavour to request (for example `t2.micro`).
    pub instance_type: String,
    /// SSH key pair registered with the provider, when one is wanted.
    pub key_name: Option<String>,
    /// Security groups applied to the instance.
    pub security_group_ids: Vec<String>,
    /// Subnet the instance is placed in, when the provider requires one.
    pub subnet_id: Option<String>,
    /// Device path → volume spec bindings applied at launch.
    pub block_devices: BlockDeviceMapping,
    /// Opaque boot-time payload delivered to the instance.
    pub user_data: Option<String>,
}

impl LaunchSpec {
    /// Starts a builder for a [`LaunchSpec`].
    #[must_use]
    pub fn builder() -> LaunchSpecBuilder {
        LaunchSpecBuilder::new()
    }

    /// Validates the spec, returning a descriptive error when a required
    /// field is missing or a device spec is internally inconsistent.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when a required string field is
    /// empty, or [`SpecError::MissingIops`] when a device requests a volume
    /// type that needs an IOPS rate without supplying one.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.image_id.is_empty() {
            return Err(SpecError::Validation(String::from("image_id")));
        }
        if self.instance_type.is_empty() {
            return Err(SpecError::Validation(String::from("instance_type")));
        }
        for device in self.block_devices.device_paths() {
            let Some(spec) = self.block_devices.get(device) else {
                continue;
            };
            let needs_iops = spec.volume_type.is_some_and(VolumeType::requires_iops);
            if needs_iops && spec.iops.is_none() {
                return Err(SpecError::MissingIops {
                    device: device.to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`LaunchSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LaunchSpecBuilder {
    image_id: String,
    instance_type: String,
    key_name: Option<String>,
    security_group_ids: Vec<String>,
    subnet_id: Option<String>,
    block_devices: BlockDeviceMapping,
    user_data: Option<String>,
}

impl LaunchSpecBuilder {
    /// Creates an empty builder; required fields must be populated before
    /// build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the machine image identifier.
    #[must_use]
    pub fn image_id(mut self, value: impl Into<String>) -> Self {
        self.image_id = value.into();
        self
    }

    /// Sets the instance type.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the optional SSH key pair name.
    #[must_use]
    pub fn key_name(mut self, value: Option<String>) -> Self {
        self.key_name = value;
        self
    }

    /// Sets the security groups applied at launch.
    #[must_use]
    pub fn security_group_ids(mut self, value: Vec<String>) -> Self {
        self.security_group_ids = value;
        self
    }

    /// Sets the optional subnet placement.
    #[must_use]
    pub fn subnet_id(mut self, value: Option<String>) -> Self {
        self.subnet_id = value;
        self
    }

    /// Sets the block-device mapping applied at launch.
    #[must_use]
    pub fn block_devices(mut self, value: BlockDeviceMapping) -> Self {
        self.block_devices = value;
        self
    }

    /// Sets the opaque boot-time payload.
    #[must_use]
    pub fn user_data(mut self, value: Option<String>) -> Self {
        self.user_data = value;
        self
    }

    /// Builds and validates the [`LaunchSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when validation fails.
    pub fn build(self) -> Result<LaunchSpec, SpecError> {
        let spec = LaunchSpec {
            image_id: self.image_id.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            key_name: self.key_name.map(|value| value.trim().to_owned()),
            security_group_ids: self.security_group_ids,
            subnet_id: self.subnet_id.map(|value| value.trim().to_owned()),
            block_devices: self.block_devices,
            user_data: self.user_data,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Errors raised while assembling a launch spec.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a required field is missing or empty.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when a device requests a provisioned-IOPS volume type without
    /// an IOPS rate.
    #[error("device {device} requires an IOPS rate for its volume type")]
    MissingIops {
        /// Device path whose spec is incomplete.
        device: String,
    },
}
