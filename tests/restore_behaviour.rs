//! End-to-end restore behaviour through the public API.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use zapas::test_support::{FakeProvider, config_fixture};
use zapas::{InstanceState, NAME_TAG, PollDriver, RestoreError, RestoreOrchestrator};

fn orchestrator(provider: FakeProvider) -> RestoreOrchestrator<FakeProvider> {
    RestoreOrchestrator::new(provider, config_fixture())
        .unwrap_or_else(|err| panic!("orchestrator should build: {err}"))
        .with_poll(PollDriver::new(
            Duration::from_millis(1),
            Duration::from_secs(5),
        ))
}

#[tokio::test]
async fn a_restore_ends_with_a_tagged_running_instance() {
    let provider = FakeProvider::new();
    provider.script_instance_states(&[
        InstanceState::Pending,
        InstanceState::Pending,
        InstanceState::Running,
    ]);

    let provisioned = orchestrator(provider.clone())
        .provision(Some("snap-source"), &CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("provision should succeed: {err}"));

    assert!(provisioned.instance.state.is_running());
    assert!(provisioned.instance.public_ip.is_some());
    assert_eq!(
        provisioned.instance.tags.get(NAME_TAG),
        Some(&provisioned.tenant_id)
    );

    let specs = provider.launch_specs();
    let Some(spec) = specs.first() else {
        panic!("a launch spec should have been recorded");
    };
    let data = spec
        .block_devices
        .get("/dev/xvdf")
        .unwrap_or_else(|| panic!("data slot should exist"));
    assert_eq!(data.snapshot_id.as_deref(), Some("snap-source"));
    assert!(!data.delete_on_termination);
}

#[tokio::test]
async fn the_outer_retry_absorbs_four_launch_failures() {
    let provider = FakeProvider::new();
    provider.fail_launch(4);
    provider.script_instance_states(&[InstanceState::Running]);

    let provisioned = orchestrator(provider.clone())
        .provision(None, &CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("provision should succeed: {err}"));

    assert_eq!(provisioned.attempts, 5);
    assert!(provisioned.instance.state.is_running());
}

#[tokio::test]
async fn a_launch_that_never_succeeds_surfaces_a_fatal_error() {
    let provider = FakeProvider::new();
    provider.fail_launch(u32::MAX);

    let err = orchestrator(provider.clone())
        .provision(None, &CancellationToken::new())
        .await
        .expect_err("provision should fail");

    assert_eq!(err, RestoreError::Exhausted { attempts: 5 });
}

#[tokio::test]
async fn a_failed_verification_retries_with_a_fresh_tenant_identity() {
    let provider = FakeProvider::new();
    provider.fail_tag(1);
    provider.script_instance_states(&[InstanceState::Running, InstanceState::Running]);

    let provisioned = orchestrator(provider.clone())
        .provision(None, &CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("provision should succeed: {err}"));

    assert_eq!(provisioned.attempts, 2);
    assert_eq!(provider.terminated(), vec![String::from("i-1")]);
    assert_eq!(provisioned.instance.id, "i-2");

    let applied = provider.tags_applied();
    let Some((_, tags)) = applied.first() else {
        panic!("tags should have been applied on the second attempt");
    };
    assert_eq!(
        tags.get(NAME_TAG).map(String::as_str),
        Some(provisioned.tenant_id.as_str())
    );
}
