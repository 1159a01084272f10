//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::bootscript::{self, BootScriptError, DEFAULT_TEMPLATE};
use crate::model::VolumeType;
use crate::poll::PollDriver;
use crate::retention::RetentionPolicy;
use crate::retry::RetryPolicy;

/// Orchestration configuration derived from environment variables,
/// configuration files, and CLI flags.
///
/// Credentials are optional because the provider gateway may authenticate
/// from the ambient environment (profile, role); when present they are
/// passed through to whoever constructs the gateway.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "ZAPAS")]
pub struct ZapasConfig {
    /// Provider region the orchestrators operate in. Required.
    pub region: String,
    /// Access key for the provider gateway, when not ambient.
    pub access_key: Option<String>,
    /// Secret key for the provider gateway, when not ambient.
    pub secret_key: Option<String>,
    /// Machine image new instances boot from. Required for restore.
    pub image_id: String,
    /// Commercial type for new instances.
    #[ortho_config(default = "t2.micro".to_owned())]
    pub instance_type: String,
    /// SSH key pair registered with the provider.
    pub key_name: Option<String>,
    /// Security groups applied to new instances.
    #[ortho_config(default = Vec::new())]
    pub security_group_ids: Vec<String>,
    /// Subnet new instances are placed in.
    pub subnet_id: Option<String>,
    /// Device slot holding the root volume.
    #[ortho_config(default = "/dev/sda1".to_owned())]
    pub root_device: String,
    /// Device slot holding the data volume. An external contract with the
    /// machine image, so configurable rather than hardcoded.
    #[ortho_config(default = "/dev/xvdf".to_owned())]
    pub data_device: String,
    /// Size of a freshly provisioned data volume, in GiB.
    #[ortho_config(default = 8)]
    pub data_volume_size_gb: u32,
    /// Provisioning class of the data volume.
    #[ortho_config(default = VolumeType::Gp2)]
    pub data_volume_type: VolumeType,
    /// IOPS rate; required when the volume type is provisioned-IOPS.
    pub data_volume_iops: Option<u32>,
    /// Number of most-recent snapshots retention always preserves.
    #[ortho_config(default = 4)]
    pub keep_window: usize,
    /// Seconds between snapshot status refreshes.
    #[ortho_config(default = 2)]
    pub snapshot_poll_interval_secs: u64,
    /// Seconds between instance state refreshes.
    #[ortho_config(default = 5)]
    pub instance_poll_interval_secs: u64,
    /// Overall deadline for any single poll-to-completion wait, in seconds.
    #[ortho_config(default = 600)]
    pub poll_timeout_secs: u64,
    /// Attempt budget for snapshot creation and instance enumeration.
    #[ortho_config(default = 3)]
    pub snapshot_retry_attempts: u32,
    /// Attempt budget for whole-instance creation.
    #[ortho_config(default = 5)]
    pub instance_retry_attempts: u32,
    /// Base delay between retry attempts, in milliseconds. Zero disables
    /// backoff.
    #[ortho_config(default = 500)]
    pub retry_base_delay_ms: u64,
    /// Inline boot script template overriding the built-in one.
    pub boot_script: Option<String>,
    /// Path to a boot script template file overriding the built-in one.
    pub boot_script_file: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ZapasConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to zapas.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge
    /// sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("zapas")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on the loaded values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value is out of range or
    /// internally inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.region,
            &FieldMetadata::new("provider region", "ZAPAS_REGION", "region"),
        )?;
        Self::require_field(
            &self.image_id,
            &FieldMetadata::new("machine image", "ZAPAS_IMAGE_ID", "image_id"),
        )?;
        Self::require_field(
            &self.instance_type,
            &FieldMetadata::new("instance type", "ZAPAS_INSTANCE_TYPE", "instance_type"),
        )?;
        Self::require_field(
            &self.data_device,
            &FieldMetadata::new("data device slot", "ZAPAS_DATA_DEVICE", "data_device"),
        )?;

        if self.data_volume_type.requires_iops() && self.data_volume_iops.is_none() {
            return Err(ConfigError::Invalid(format!(
                "data_volume_type {} requires data_volume_iops",
                self.data_volume_type
            )));
        }
        if self.keep_window == 0 {
            return Err(ConfigError::Invalid(String::from(
                "keep_window must be at least 1; retention always preserves the newest snapshot",
            )));
        }
        if self.snapshot_retry_attempts == 0 || self.instance_retry_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "retry budgets must allow at least one attempt",
            )));
        }
        if self.snapshot_poll_interval_secs == 0 || self.instance_poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "poll intervals must be at least one second",
            )));
        }
        Ok(())
    }

    /// Retention policy derived from the keep window.
    #[must_use]
    pub const fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.keep_window)
    }

    /// Retry policy for snapshot creation and instance enumeration.
    #[must_use]
    pub const fn snapshot_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.snapshot_retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    /// Retry policy for whole-instance creation.
    #[must_use]
    pub const fn instance_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.instance_retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    /// Poll driver for snapshot completion waits.
    #[must_use]
    pub const fn snapshot_poll(&self) -> PollDriver {
        PollDriver::new(
            Duration::from_secs(self.snapshot_poll_interval_secs),
            Duration::from_secs(self.poll_timeout_secs),
        )
    }

    /// Poll driver for instance state waits.
    #[must_use]
    pub const fn instance_poll(&self) -> PollDriver {
        PollDriver::new(
            Duration::from_secs(self.instance_poll_interval_secs),
            Duration::from_secs(self.poll_timeout_secs),
        )
    }

    /// Resolves the boot script template, falling back to the built-in one.
    ///
    /// # Errors
    ///
    /// Returns [`BootScriptError`] when both override sources are set or the
    /// file source cannot be read.
    pub fn resolve_boot_template(&self) -> Result<String, BootScriptError> {
        let resolved = bootscript::resolve_template(
            self.boot_script.as_deref(),
            self.boot_script_file.as_deref(),
        )?;
        Ok(resolved.unwrap_or_else(|| DEFAULT_TEMPLATE.to_owned()))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is out of range or internally inconsistent.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::config_fixture;

    #[test]
    fn fixture_passes_validation() {
        let config = config_fixture();
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn blank_region_is_rejected_with_guidance() {
        let config = ZapasConfig {
            region: String::from("  "),
            ..config_fixture()
        };
        let err = config.validate().expect_err("blank region must fail");
        let ConfigError::MissingField(message) = err else {
            panic!("expected MissingField, got {err:?}");
        };
        assert!(message.contains("ZAPAS_REGION"), "message: {message}");
    }

    #[test]
    fn io1_without_iops_is_rejected() {
        let config = ZapasConfig {
            data_volume_type: VolumeType::Io1,
            data_volume_iops: None,
            ..config_fixture()
        };
        let err = config.validate().expect_err("io1 without iops must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn io1_with_iops_is_accepted() {
        let config = ZapasConfig {
            data_volume_type: VolumeType::Io1,
            data_volume_iops: Some(200),
            ..config_fixture()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn zero_keep_window_is_rejected() {
        let config = ZapasConfig {
            keep_window: 0,
            ..config_fixture()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_retry_budget_is_rejected() {
        let config = ZapasConfig {
            instance_retry_attempts: 0,
            ..config_fixture()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn poll_drivers_reflect_configured_intervals() {
        let config = config_fixture();
        assert_eq!(
            config.snapshot_poll().interval(),
            Duration::from_secs(config.snapshot_poll_interval_secs)
        );
        assert_eq!(
            config.instance_poll().interval(),
            Duration::from_secs(config.instance_poll_interval_secs)
        );
    }

    #[test]
    fn boot_template_falls_back_to_the_builtin() {
        let template = config_fixture()
            .resolve_boot_template()
            .unwrap_or_else(|err| panic!("template should resolve: {err}"));
        assert_eq!(template, DEFAULT_TEMPLATE);
    }

    #[test]
    fn inline_boot_template_wins_when_set() {
        let config = ZapasConfig {
            boot_script: Some(String::from("echo {{tenant_id}}")),
            ..config_fixture()
        };
        let template = config
            .resolve_boot_template()
            .unwrap_or_else(|err| panic!("template should resolve: {err}"));
        assert_eq!(template, "echo {{tenant_id}}");
    }

    #[test]
    fn conflicting_boot_template_sources_are_rejected() {
        let config = ZapasConfig {
            boot_script: Some(String::from("echo hi")),
            boot_script_file: Some(String::from("/tmp/boot.sh")),
            ..config_fixture()
        };
        assert!(config.resolve_boot_template().is_err());
    }
}
