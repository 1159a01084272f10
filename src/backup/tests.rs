//! Unit tests for the backup orchestrator.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::test_support::{
    FakeProvider, bare_instance, completed_snapshot, config_fixture, data_instance, data_volume,
    day,
};

fn orchestrator(provider: FakeProvider) -> BackupOrchestrator<FakeProvider> {
    BackupOrchestrator::new(provider, &config_fixture())
        .with_poll(PollDriver::new(Duration::from_millis(1), Duration::from_secs(5)))
}

fn seed_history(provider: &FakeProvider, volume_id: &str, days: &[u32]) {
    for n in days {
        provider.seed_snapshot(completed_snapshot(
            &format!("snap-day{n}"),
            volume_id,
            day(*n),
        ));
    }
}

#[tokio::test]
async fn backs_up_every_data_volume_and_skips_bare_instances() {
    let provider = FakeProvider::new();
    provider.seed_instance(data_instance("i-1", "vol-1", "/dev/xvdf"));
    provider.seed_instance(data_instance("i-2", "vol-2", "/dev/xvdf"));
    provider.seed_instance(bare_instance("i-3"));
    provider.seed_volume(data_volume("vol-1", "i-1"));
    provider.seed_volume(data_volume("vol-2", "i-2"));
    provider.script_snapshot_statuses(&[SnapshotStatus::Completed, SnapshotStatus::Completed]);

    let summary = orchestrator(provider.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(
        summary,
        BackupSummary {
            instances_seen: 3,
            instances_skipped: 1,
            snapshots_created: 2,
            ..BackupSummary::default()
        }
    );
    let creates: Vec<String> = provider
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("create_snapshot:"))
        .collect();
    assert_eq!(creates, vec!["create_snapshot:vol-1", "create_snapshot:vol-2"]);
}

#[tokio::test]
async fn an_instance_without_a_data_volume_costs_no_snapshot_calls() {
    let provider = FakeProvider::new();
    provider.seed_instance(bare_instance("i-1"));

    let summary = orchestrator(provider.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(summary.instances_skipped, 1);
    assert_eq!(provider.calls(), vec![String::from("list_instances")]);
}

#[tokio::test]
async fn snapshot_descriptions_carry_volume_and_date() {
    let provider = FakeProvider::new();
    provider.seed_instance(data_instance("i-1", "vol-1", "/dev/xvdf"));
    provider.seed_volume(data_volume("vol-1", "i-1"));
    provider.script_snapshot_statuses(&[SnapshotStatus::Completed]);

    orchestrator(provider.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    let snapshots = provider.snapshots();
    let created = snapshots
        .iter()
        .find(|snapshot| snapshot.id == "snap-1")
        .unwrap_or_else(|| panic!("snapshot should exist"));
    assert!(
        created.description.starts_with("Vol:vol-1;Date:"),
        "description: {}",
        created.description
    );
}

#[tokio::test]
async fn enumeration_failures_are_retried_within_budget() {
    let provider = FakeProvider::new();
    provider.seed_instance(bare_instance("i-1"));
    provider.fail_list_instances(2);

    let summary = orchestrator(provider.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(summary.instances_seen, 1);
    assert_eq!(
        provider
            .calls()
            .iter()
            .filter(|call| call.as_str() == "list_instances")
            .count(),
        3
    );
}

#[tokio::test]
async fn enumeration_exhaustion_aborts_the_run() {
    let provider = FakeProvider::new();
    provider.seed_instance(data_instance("i-1", "vol-1", "/dev/xvdf"));
    provider.fail_list_instances(3);

    let err = orchestrator(provider.clone())
        .run(&CancellationToken::new())
        .await
        .expect_err("run should abort");

    assert_eq!(err, BackupError::EnumerationExhausted { attempts: 3 });
    assert!(
        provider
            .calls()
            .iter()
            .all(|call| call.as_str() == "list_instances"),
        "no instance should be processed"
    );
}

#[tokio::test]
async fn creation_exhaustion_skips_the_volume_without_retention() {
    let provider = FakeProvider::new();
    provider.seed_instance(data_instance("i-1", "vol-1", "/dev/xvdf"));
    provider.seed_volume(data_volume("vol-1", "i-1"));
    seed_history(&provider, "vol-1", &[1, 2, 3, 4, 5, 6]);
    provider.fail_create_snapshot(3);

    let summary = orchestrator(provider.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(summary.volumes_failed, 1);
    assert_eq!(summary.snapshots_created, 0);
    assert_eq!(summary.snapshots_deleted, 0);
    assert!(provider.deleted_snapshots().is_empty());
    assert!(
        !provider
            .calls()
            .iter()
            .any(|call| call.starts_with("list_snapshots:")),
        "stale history must stay untouched"
    );
}

#[tokio::test]
async fn an_error_status_snapshot_skips_retention() {
    let provider = FakeProvider::new();
    provider.seed_instance(data_instance("i-1", "vol-1", "/dev/xvdf"));
    provider.seed_volume(data_volume("vol-1", "i-1"));
    seed_history(&provider, "vol-1", &[1, 2, 3, 4, 5, 6]);
    provider.script_snapshot_statuses(&[SnapshotStatus::Pending, SnapshotStatus::Error]);

    let summary = orchestrator(provider.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(summary.volumes_failed, 1);
    assert_eq!(summary.snapshots_created, 0);
    assert!(provider.deleted_snapshots().is_empty());
}

#[tokio::test]
async fn a_failed_deletion_does_not_abort_the_remaining_ones() {
    let provider = FakeProvider::new();
    provider.seed_instance(data_instance("i-1", "vol-1", "/dev/xvdf"));
    provider.seed_volume(data_volume("vol-1", "i-1"));
    seed_history(&provider, "vol-1", &[1, 2, 3, 4, 5, 6]);
    provider.script_snapshot_statuses(&[SnapshotStatus::Completed]);
    provider.fail_delete_snapshot("snap-day2");

    let summary = orchestrator(provider.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(summary.snapshots_deleted, 2);
    assert_eq!(summary.deletions_failed, 1);
    assert_eq!(
        provider.deleted_snapshots(),
        vec![String::from("snap-day1"), String::from("snap-day3")]
    );
}

#[tokio::test]
async fn volume_lookup_failure_skips_retention_but_keeps_the_snapshot() {
    let provider = FakeProvider::new();
    provider.seed_instance(data_instance("i-1", "vol-1", "/dev/xvdf"));
    // vol-1 deliberately not seeded as a volume
    provider.script_snapshot_statuses(&[SnapshotStatus::Completed]);

    let summary = orchestrator(provider.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(summary.snapshots_created, 1);
    assert_eq!(summary.snapshots_deleted, 0);
    assert!(
        !provider
            .calls()
            .iter()
            .any(|call| call.starts_with("list_snapshots:"))
    );
}

#[tokio::test]
async fn a_cancelled_token_aborts_before_any_provider_call() {
    let provider = FakeProvider::new();
    provider.seed_instance(data_instance("i-1", "vol-1", "/dev/xvdf"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator(provider.clone())
        .run(&cancel)
        .await
        .expect_err("run should abort");

    assert_eq!(err, BackupError::Cancelled);
    assert!(provider.calls().is_empty());
}
