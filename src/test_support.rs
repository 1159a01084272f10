//! Test support utilities shared across unit and behaviour tests.
//!
//! [`FakeProvider`] is a scripted gateway double: tests seed resources and
//! queue failures or status sequences up front, then assert on the recorded
//! call log afterwards. No scripting means every call succeeds against the
//! seeded state.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::ZapasConfig;
use crate::model::{
    BlockDeviceMapping, DeviceSpec, Instance, InstanceState, Snapshot, SnapshotStatus, Tags,
    Volume, VolumeType,
};
use crate::provider::{LaunchSpec, Provider, ProviderFuture};

/// 2025-01-01T00:00:00Z, the base for [`day`] fixtures.
const DAY_BASE_SECS: i64 = 1_735_689_600;

/// 2026-01-01T00:00:00Z; snapshots created through the fake are stamped after
/// every [`day`] fixture so a fresh snapshot is always the newest.
const CREATED_BASE_SECS: i64 = 1_767_225_600;

/// Public IPv4 address the fake assigns to running instances.
const FAKE_PUBLIC_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10));

/// Error type returned by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct FakeProviderError {
    /// Human readable description of the scripted or genuine failure.
    pub message: String,
}

impl FakeProviderError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    instances: Vec<Instance>,
    volumes: Vec<Volume>,
    snapshots: Vec<Snapshot>,
    list_instances_failures: u32,
    create_snapshot_failures: u32,
    launch_failures: u32,
    tag_failures: u32,
    delete_failures: Vec<String>,
    snapshot_statuses: VecDeque<SnapshotStatus>,
    instance_states: VecDeque<InstanceState>,
    withhold_public_ip: bool,
    deleted_snapshots: Vec<String>,
    launch_specs: Vec<LaunchSpec>,
    tags_applied: Vec<(String, Tags)>,
    terminated: Vec<String>,
    calls: Vec<String>,
    snapshot_seq: u32,
    instance_seq: u32,
}

/// Scripted provider double implementing [`Provider`].
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    /// Creates a fake with no seeded resources and no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds an instance visible to `list_instances`.
    pub fn seed_instance(&self, instance: Instance) {
        self.state().instances.push(instance);
    }

    /// Seeds a volume visible to `get_volume`.
    pub fn seed_volume(&self, volume: Volume) {
        self.state().volumes.push(volume);
    }

    /// Seeds a snapshot into a volume's history.
    pub fn seed_snapshot(&self, snapshot: Snapshot) {
        self.state().snapshots.push(snapshot);
    }

    /// Makes the next `times` calls to `list_instances` fail.
    pub fn fail_list_instances(&self, times: u32) {
        self.state().list_instances_failures = times;
    }

    /// Makes the next `times` calls to `create_snapshot` fail.
    pub fn fail_create_snapshot(&self, times: u32) {
        self.state().create_snapshot_failures = times;
    }

    /// Makes the next `times` calls to `launch_instance` fail.
    pub fn fail_launch(&self, times: u32) {
        self.state().launch_failures = times;
    }

    /// Makes the next `times` calls to `tag_instance` fail.
    pub fn fail_tag(&self, times: u32) {
        self.state().tag_failures = times;
    }

    /// Makes every deletion of the given snapshot fail.
    pub fn fail_delete_snapshot(&self, snapshot_id: impl Into<String>) {
        self.state().delete_failures.push(snapshot_id.into());
    }

    /// Queues statuses applied one per `get_snapshot` call; once the queue
    /// drains, snapshots keep their last applied status.
    pub fn script_snapshot_statuses(&self, statuses: &[SnapshotStatus]) {
        self.state().snapshot_statuses.extend(statuses.iter().copied());
    }

    /// Queues states applied one per `get_instance` call; once the queue
    /// drains, instances keep their last applied state.
    pub fn script_instance_states(&self, states: &[InstanceState]) {
        self.state().instance_states.extend(states.iter().cloned());
    }

    /// Prevents the fake from assigning a public IP when an instance runs.
    pub fn withhold_public_ip(&self) {
        self.state().withhold_public_ip = true;
    }

    /// Returns every recorded gateway call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Returns the identifiers of deleted snapshots, in deletion order.
    #[must_use]
    pub fn deleted_snapshots(&self) -> Vec<String> {
        self.state().deleted_snapshots.clone()
    }

    /// Returns every snapshot currently held by the fake.
    #[must_use]
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state().snapshots.clone()
    }

    /// Returns every launch spec received, in order.
    #[must_use]
    pub fn launch_specs(&self) -> Vec<LaunchSpec> {
        self.state().launch_specs.clone()
    }

    /// Returns every tag application received, in order.
    #[must_use]
    pub fn tags_applied(&self) -> Vec<(String, Tags)> {
        self.state().tags_applied.clone()
    }

    /// Returns the identifiers of terminated instances, in order.
    #[must_use]
    pub fn terminated(&self) -> Vec<String> {
        self.state().terminated.clone()
    }
}

impl Provider for FakeProvider {
    type Error = FakeProviderError;

    fn list_instances(&self) -> ProviderFuture<'_, Vec<Instance>, Self::Error> {
        let shared = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(String::from("list_instances"));
            if state.list_instances_failures > 0 {
                state.list_instances_failures -= 1;
                return Err(FakeProviderError::new("scripted enumeration failure"));
            }
            Ok(state.instances.clone())
        })
    }

    fn get_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, Volume, Self::Error> {
        let shared = Arc::clone(&self.state);
        let volume_id = volume_id.to_owned();
        Box::pin(async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(format!("get_volume:{volume_id}"));
            state
                .volumes
                .iter()
                .find(|volume| volume.id == volume_id)
                .cloned()
                .ok_or_else(|| FakeProviderError::new(format!("volume {volume_id} not found")))
        })
    }

    fn list_snapshots<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, Vec<Snapshot>, Self::Error> {
        let shared = Arc::clone(&self.state);
        let volume_id = volume_id.to_owned();
        Box::pin(async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(format!("list_snapshots:{volume_id}"));
            Ok(state
                .snapshots
                .iter()
                .filter(|snapshot| snapshot.volume_id == volume_id)
                .cloned()
                .collect())
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        description: &'a str,
    ) -> ProviderFuture<'a, Snapshot, Self::Error> {
        let shared = Arc::clone(&self.state);
        let volume_id = volume_id.to_owned();
        let description = description.to_owned();
        Box::pin(async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(format!("create_snapshot:{volume_id}"));
            if state.create_snapshot_failures > 0 {
                state.create_snapshot_failures -= 1;
                return Err(FakeProviderError::new("scripted snapshot failure"));
            }
            state.snapshot_seq += 1;
            let created_at =
                DateTime::from_timestamp(CREATED_BASE_SECS + i64::from(state.snapshot_seq), 0)
                    .unwrap_or_default();
            let snapshot = Snapshot {
                id: format!("snap-{}", state.snapshot_seq),
                volume_id,
                created_at,
                status: SnapshotStatus::Pending,
                description,
            };
            state.snapshots.push(snapshot.clone());
            Ok(snapshot)
        })
    }

    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        let shared = Arc::clone(&self.state);
        let snapshot_id = snapshot_id.to_owned();
        Box::pin(async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(format!("delete_snapshot:{snapshot_id}"));
            if state.delete_failures.contains(&snapshot_id) {
                return Err(FakeProviderError::new(format!(
                    "snapshot {snapshot_id} is in use"
                )));
            }
            state.snapshots.retain(|snapshot| snapshot.id != snapshot_id);
            state.deleted_snapshots.push(snapshot_id);
            Ok(())
        })
    }

    fn get_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, Snapshot, Self::Error> {
        let shared = Arc::clone(&self.state);
        let snapshot_id = snapshot_id.to_owned();
        Box::pin(async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(format!("get_snapshot:{snapshot_id}"));
            let next_status = state.snapshot_statuses.pop_front();
            let snapshot = state
                .snapshots
                .iter_mut()
                .find(|snapshot| snapshot.id == snapshot_id)
                .ok_or_else(|| {
                    FakeProviderError::new(format!("snapshot {snapshot_id} not found"))
                })?;
            if let Some(status) = next_status {
                snapshot.status = status;
            }
            Ok(snapshot.clone())
        })
    }

    fn launch_instance<'a>(
        &'a self,
        spec: &'a LaunchSpec,
    ) -> ProviderFuture<'a, Instance, Self::Error> {
        let shared = Arc::clone(&self.state);
        let spec = spec.clone();
        Box::pin(async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(String::from("launch_instance"));
            if state.launch_failures > 0 {
                state.launch_failures -= 1;
                return Err(FakeProviderError::new("scripted launch failure"));
            }
            state.instance_seq += 1;
            let instance = Instance {
                id: format!("i-{}", state.instance_seq),
                state: InstanceState::Pending,
                public_ip: None,
                tags: Tags::new(),
                block_devices: spec.block_devices.clone(),
            };
            state.launch_specs.push(spec);
            state.instances.push(instance.clone());
            Ok(instance)
        })
    }

    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Instance, Self::Error> {
        let shared = Arc::clone(&self.state);
        let instance_id = instance_id.to_owned();
        Box::pin(async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(format!("get_instance:{instance_id}"));
            let next_state = state.instance_states.pop_front();
            let withhold_ip = state.withhold_public_ip;
            let instance = state
                .instances
                .iter_mut()
                .find(|instance| instance.id == instance_id)
                .ok_or_else(|| {
                    FakeProviderError::new(format!("instance {instance_id} not found"))
                })?;
            if let Some(new_state) = next_state {
                instance.state = new_state;
            }
            if instance.state.is_running() && !withhold_ip && instance.public_ip.is_none() {
                instance.public_ip = Some(FAKE_PUBLIC_IP);
            }
            Ok(instance.clone())
        })
    }

    fn tag_instance<'a>(
        &'a self,
        instance_id: &'a str,
        tags: &'a Tags,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let shared = Arc::clone(&self.state);
        let instance_id = instance_id.to_owned();
        let tags = tags.clone();
        Box::pin(async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(format!("tag_instance:{instance_id}"));
            if state.tag_failures > 0 {
                state.tag_failures -= 1;
                return Err(FakeProviderError::new("scripted tagging failure"));
            }
            let applied = tags.clone();
            let instance = state
                .instances
                .iter_mut()
                .find(|instance| instance.id == instance_id)
                .ok_or_else(|| {
                    FakeProviderError::new(format!("instance {instance_id} not found"))
                })?;
            instance.tags.extend(tags);
            state.tags_applied.push((instance_id, applied));
            Ok(())
        })
    }

    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        let shared = Arc::clone(&self.state);
        let instance_id = instance_id.to_owned();
        Box::pin(async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(format!("terminate_instance:{instance_id}"));
            let instance = state
                .instances
                .iter_mut()
                .find(|instance| instance.id == instance_id)
                .ok_or_else(|| {
                    FakeProviderError::new(format!("instance {instance_id} not found"))
                })?;
            instance.state = InstanceState::Terminated;
            state.terminated.push(instance_id);
            Ok(())
        })
    }
}

/// Timestamp `n` days after 2025-01-01, for building dated histories.
#[must_use]
pub fn day(n: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(DAY_BASE_SECS + i64::from(n) * 86_400, 0).unwrap_or_default()
}

/// A completed snapshot with the given identity and creation time.
#[must_use]
pub fn completed_snapshot(id: &str, volume_id: &str, created_at: DateTime<Utc>) -> Snapshot {
    Snapshot {
        id: id.to_owned(),
        volume_id: volume_id.to_owned(),
        created_at,
        status: SnapshotStatus::Completed,
        description: format!("Vol:{volume_id};Date:{created_at}"),
    }
}

/// A running instance carrying a data volume at the given device slot.
#[must_use]
pub fn data_instance(id: &str, data_volume_id: &str, data_device: &str) -> Instance {
    let mut mapping = BlockDeviceMapping::new();
    mapping.insert(
        "/dev/sda1",
        DeviceSpec {
            volume_id: Some(format!("root-{id}")),
            delete_on_termination: true,
            ..DeviceSpec::default()
        },
    );
    mapping.insert(
        data_device,
        DeviceSpec {
            volume_id: Some(data_volume_id.to_owned()),
            ..DeviceSpec::default()
        },
    );
    Instance {
        id: id.to_owned(),
        state: InstanceState::Running,
        public_ip: None,
        tags: Tags::new(),
        block_devices: mapping,
    }
}

/// A running instance with no data volume attached.
#[must_use]
pub fn bare_instance(id: &str) -> Instance {
    let mut mapping = BlockDeviceMapping::new();
    mapping.insert(
        "/dev/sda1",
        DeviceSpec {
            volume_id: Some(format!("root-{id}")),
            delete_on_termination: true,
            ..DeviceSpec::default()
        },
    );
    Instance {
        id: id.to_owned(),
        state: InstanceState::Running,
        public_ip: None,
        tags: Tags::new(),
        block_devices: mapping,
    }
}

/// A data volume owned by the given instance.
#[must_use]
pub fn data_volume(id: &str, instance_id: &str) -> Volume {
    Volume {
        id: id.to_owned(),
        instance_id: Some(instance_id.to_owned()),
        size_gb: 8,
        volume_type: VolumeType::Gp2,
    }
}

/// A fully populated configuration with instant retries, suitable for tests.
#[must_use]
pub fn config_fixture() -> ZapasConfig {
    ZapasConfig {
        region: String::from("us-west-2"),
        access_key: None,
        secret_key: None,
        image_id: String::from("ami-f53b97b6"),
        instance_type: String::from("t2.micro"),
        key_name: Some(String::from("ops-key")),
        security_group_ids: vec![String::from("sg-b47f11a1")],
        subnet_id: Some(String::from("subnet-75bc7719")),
        root_device: String::from("/dev/sda1"),
        data_device: String::from("/dev/xvdf"),
        data_volume_size_gb: 8,
        data_volume_type: VolumeType::Gp2,
        data_volume_iops: None,
        keep_window: 4,
        snapshot_poll_interval_secs: 2,
        instance_poll_interval_secs: 5,
        poll_timeout_secs: 600,
        snapshot_retry_attempts: 3,
        instance_retry_attempts: 5,
        retry_base_delay_ms: 0,
        boot_script: None,
        boot_script_file: None,
    }
}
