//! Replacement-instance provisioning.
//!
//! One attempt walks the whole sequence (build the block-device mapping,
//! render the boot script, launch, poll until running, tag, verify) and any
//! step's failure abandons the attempt. The sequence is wrapped in an outer
//! bounded retry: provisioning either ends with a verified running instance
//! or the caller is explicitly told it failed.

use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bootscript::{self, BootScriptError, TENANT_ID_PLACEHOLDER};
use crate::config::{ConfigError, ZapasConfig};
use crate::model::{BlockDeviceMapping, DeviceSpec, Instance, Tags};
use crate::poll::{PollDriver, PollError, PollState};
use crate::provider::{LaunchSpec, Provider};
use crate::retry::{AttemptError, RetryOutcome, RetryPolicy};

/// Tag under which the generated tenant identifier is recorded.
pub const NAME_TAG: &str = "Name";

/// A verified, running replacement instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionedInstance {
    /// The instance as last observed, running and tagged.
    pub instance: Instance,
    /// Tenant identifier generated for this instance.
    pub tenant_id: String,
    /// Attempts consumed before provisioning succeeded.
    pub attempts: u32,
}

/// Errors surfaced by the restore orchestrator.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RestoreError {
    /// Configuration failed validation at construction time.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The boot script template could not be resolved.
    #[error("boot script error: {0}")]
    BootScript(#[from] BootScriptError),
    /// Every attempt in the outer budget failed; no instance was produced.
    #[error("gave up provisioning an instance after {attempts} attempts")]
    Exhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// The caller cancelled provisioning.
    #[error("restore cancelled")]
    Cancelled,
}

/// Orchestrates instance recreation from an optional source snapshot.
#[derive(Clone, Debug)]
pub struct RestoreOrchestrator<P> {
    provider: P,
    config: ZapasConfig,
    retry: RetryPolicy,
    poll: PollDriver,
    boot_template: String,
}

impl<P> RestoreOrchestrator<P>
where
    P: Provider,
{
    /// Creates an orchestrator around an injected provider gateway.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError::Config`] when the configuration fails
    /// validation and [`RestoreError::BootScript`] when the boot script
    /// template cannot be resolved.
    pub fn new(provider: P, config: ZapasConfig) -> Result<Self, RestoreError> {
        config.validate()?;
        let boot_template = config.resolve_boot_template()?;
        Ok(Self {
            provider,
            retry: config.instance_retry(),
            poll: config.instance_poll(),
            boot_template,
            config,
        })
    }

    /// Overrides the outer retry policy.
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

    /// Provisions a replacement instance, optionally seeding the data volume
    /// from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError::Exhausted`] once the outer retry budget is
    /// consumed and [`RestoreError::Cancelled`] when the token fires. There
    /// is no partial success: an error means no usable instance was handed
    /// over.
    pub async fn provision(
        &self,
        source_snapshot: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedInstance, RestoreError> {
        let outcome = self
            .retry
            .run("provision_instance", cancel, || async move {
                self.attempt(source_snapshot, cancel).await
            })
            .await;

        match outcome {
            RetryOutcome::Success {
                value: (instance, tenant_id),
                attempts,
            } => {
                info!(
                    instance = %instance.id,
                    tenant = %tenant_id,
                    attempts,
                    "instance provisioned and verified"
                );
                Ok(ProvisionedInstance {
                    instance,
                    tenant_id,
                    attempts,
                })
            }
            RetryOutcome::Exhausted { attempts } => Err(RestoreError::Exhausted { attempts }),
            RetryOutcome::Cancelled { .. } => Err(RestoreError::Cancelled),
        }
    }

    /// Runs one full provisioning attempt.
    async fn attempt(
        &self,
        source_snapshot: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(Instance, String), AttemptError> {
        let tenant_id = tenant_id();
        let mapping = self.build_mapping(source_snapshot);
        let user_data = bootscript::render(
            &self.boot_template,
            &[(TENANT_ID_PLACEHOLDER, tenant_id.as_str())],
        )
        .map_err(|err| AttemptError::precondition("render_boot_script", err.to_string()))?;

        let spec = LaunchSpec::builder()
            .image_id(&self.config.image_id)
            .instance_type(&self.config.instance_type)
            .key_name(self.config.key_name.clone())
            .security_group_ids(self.config.security_group_ids.clone())
            .subnet_id(self.config.subnet_id.clone())
            .block_devices(mapping)
            .user_data(Some(user_data))
            .build()
            .map_err(|err| AttemptError::precondition("build_launch_spec", err.to_string()))?;

        let launched = self
            .provider
            .launch_instance(&spec)
            .await
            .map_err(|err| AttemptError::provider("launch_instance", err))?;
        info!(instance = %launched.id, tenant = %tenant_id, "instance launched");

        let running = match self.wait_for_running(&launched.id, cancel).await {
            Ok(instance) => instance,
            Err(PollError::Cancelled { .. }) => {
                // Cancellation abandons the wait without touching the
                // provider-side resource.
                return Err(AttemptError::cancelled("wait_for_running"));
            }
            Err(err) => {
                self.abandon(&launched.id, &err).await;
                return Err(AttemptError::provider("wait_for_running", err));
            }
        };

        let mut tags = Tags::new();
        tags.insert(NAME_TAG.to_owned(), tenant_id.clone());
        if let Err(err) = self.provider.tag_instance(&running.id, &tags).await {
            self.abandon(&running.id, &err).await;
            return Err(AttemptError::provider("tag_instance", err));
        }

        let observed = match self.provider.get_instance(&running.id).await {
            Ok(instance) => instance,
            Err(err) => {
                self.abandon(&running.id, &err).await;
                return Err(AttemptError::provider("verify_instance", err));
            }
        };
        if let Err(reason) = verify(&observed, &tenant_id) {
            self.abandon(&observed.id, &reason).await;
            return Err(AttemptError::precondition("verify_instance", reason));
        }

        Ok((observed, tenant_id))
    }

    /// Root and data slots for the new instance.
    ///
    /// The data slot must outlive instance termination, so its
    /// delete-on-termination flag is always off.
    fn build_mapping(&self, source_snapshot: Option<&str>) -> BlockDeviceMapping {
        let mut mapping = BlockDeviceMapping::new();
        mapping.insert(self.config.root_device.clone(), DeviceSpec::root());
        mapping.insert(
            self.config.data_device.clone(),
            DeviceSpec::data(
                self.config.data_volume_size_gb,
                self.config.data_volume_type,
                self.config.data_volume_iops,
            )
            .seeded_from(source_snapshot.map(ToOwned::to_owned)),
        );
        mapping
    }

    /// Polls the instance until it is running or can never be.
    async fn wait_for_running(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Instance, PollError<P::Error>> {
        let subject = format!("instance {instance_id}");
        self.poll
            .run(&subject, cancel, || async move {
                let refreshed = self.provider.get_instance(instance_id).await?;
                Ok(if refreshed.state.is_running() {
                    PollState::Success(refreshed)
                } else if refreshed.state.is_failure_terminal() {
                    PollState::Failed(refreshed.state.to_string())
                } else {
                    PollState::Pending
                })
            })
            .await
    }

    /// Best-effort cleanup of a partially provisioned instance.
    ///
    /// Retries must not accumulate orphans, so the partial instance is
    /// terminated before the next attempt; if termination itself fails the
    /// provider keeps the record and the operator reconciles from there.
    async fn abandon(&self, instance_id: &str, cause: &dyn fmt::Display) {
        warn!(
            instance = %instance_id,
            error = %cause,
            "abandoning instance after failed attempt"
        );
        if let Err(err) = self.provider.terminate_instance(instance_id).await {
            warn!(
                instance = %instance_id,
                error = %err,
                "best-effort termination failed"
            );
        }
    }
}

/// Post-launch assertions: address assigned, tag present, still running.
fn verify(instance: &Instance, tenant_id: &str) -> Result<(), String> {
    if instance.public_ip.is_none() {
        return Err(format!("instance {} has no public IP", instance.id));
    }
    if instance.tags.get(NAME_TAG).map(String::as_str) != Some(tenant_id) {
        return Err(format!(
            "instance {} is missing its {NAME_TAG}={tenant_id} tag",
            instance.id
        ));
    }
    if !instance.state.is_running() {
        return Err(format!(
            "instance {} left the running state: {}",
            instance.id, instance.state
        ));
    }
    Ok(())
}

/// Short tenant identifier: the first eight hex characters of a v4 UUID.
fn tenant_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
