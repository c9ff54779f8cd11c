//! Provisioning behaviour against the mock control plane.
//!
//! Time is paused so the full 300-poll budget runs instantly.

use std::time::Duration;

use rcloud_reconcile::{
    Cleanup, ControlPlaneError, MockControlPlane, ProvisionPolicy, ReconcileError, ResourceSpec,
    VmInfo, VmReconciler,
};
use rstest::rstest;
use tokio::sync::watch;

fn spec() -> ResourceSpec {
    ResourceSpec {
        name: "kdevops-1".to_string(),
        vcpus: 4,
        memory_gb: 4,
        base_image: "debian-13-generic-amd64.qcow2".to_string(),
        root_disk_gb: 50,
        ssh_user: Some("kdevops".to_string()),
        ssh_public_key: Some("ssh-ed25519 AAAAC3Nza test@host".to_string()),
    }
}

fn server_error() -> ControlPlaneError {
    ControlPlaneError::Status {
        status: 500,
        body: "libvirt unavailable".to_string(),
    }
}

#[rstest]
#[case::first_poll(1)]
#[case::second_poll(2)]
#[case::progress_boundary(31)]
#[case::last_poll(300)]
#[tokio::test(start_paused = true)]
async fn test_ready_on_poll_k(#[case] k: u32) {
    let reconciler = VmReconciler::new(MockControlPlane::new().ip_on_poll(k));

    let provisioned = reconciler.provision(&spec(), None).await.unwrap();

    let mock = reconciler.client();
    assert_eq!(provisioned.attempts, k);
    assert!(provisioned.observed.ip_address.is_some());
    assert_eq!(provisioned.observed.state, "running");
    assert_eq!(provisioned.observed.id, provisioned.id);
    assert_eq!(mock.create_calls(), 1);
    assert_eq!(mock.get_calls(), k);
    assert_eq!(mock.delete_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ready_waits_one_interval_per_missed_poll() {
    let reconciler = VmReconciler::new(MockControlPlane::new().ip_on_poll(5));
    let start = tokio::time::Instant::now();

    reconciler.provision(&spec(), None).await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_deletes_created_vm() {
    let reconciler = VmReconciler::new(MockControlPlane::new().never_ready());
    let start = tokio::time::Instant::now();

    let err = reconciler.provision(&spec(), None).await.unwrap_err();

    // 300 polls, no sleep after the last one.
    assert_eq!(start.elapsed(), Duration::from_secs(299));

    let mock = reconciler.client();
    assert_eq!(mock.get_calls(), 300);
    assert_eq!(mock.delete_calls(), 1);

    match err {
        ReconcileError::ProvisioningTimeout {
            name,
            id,
            max_wait,
            last_state,
            cleanup,
        } => {
            assert_eq!(name, "kdevops-1");
            assert_eq!(mock.deleted_ids(), vec![id.clone()]);
            assert!(!mock.contains(&id));
            assert_eq!(max_wait, Duration::from_secs(300));
            assert_eq!(last_state.as_deref(), Some("running"));
            assert_eq!(cleanup, Cleanup::Deleted);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reported_even_when_cleanup_fails() {
    let reconciler = VmReconciler::new(
        MockControlPlane::new()
            .never_ready()
            .failing_delete(server_error()),
    );

    let err = reconciler.provision(&spec(), None).await.unwrap_err();

    assert!(err.cleanup_failed());
    assert!(err.to_string().contains("Cleanup failed"));
    assert!(err.to_string().contains("300 seconds"));
    match &err {
        ReconcileError::ProvisioningTimeout { cleanup, id, .. } => {
            assert!(matches!(cleanup, Cleanup::Failed(reason) if reason.contains("500")));
            assert_eq!(err.leaked_id(), Some(id.as_str()));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(reconciler.client().delete_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_failure_makes_no_further_calls() {
    let reconciler = VmReconciler::new(MockControlPlane::new().failing_create(server_error()));

    let err = reconciler.provision(&spec(), None).await.unwrap_err();

    assert!(matches!(err, ReconcileError::CreateFailed { ref name, .. } if name == "kdevops-1"));
    let mock = reconciler.client();
    assert_eq!(mock.create_calls(), 1);
    assert_eq!(mock.get_calls(), 0);
    assert_eq!(mock.delete_calls(), 0);
}

#[rstest]
#[case::server_error(server_error())]
#[case::transport(ControlPlaneError::Transport("connection reset".to_string()))]
#[case::not_found(ControlPlaneError::NotFound { id: "mock-vm-0000".to_string() })]
#[tokio::test(start_paused = true)]
async fn test_read_failure_aborts_without_cleanup(#[case] failure: ControlPlaneError) {
    let reconciler = VmReconciler::new(
        MockControlPlane::new()
            .never_ready()
            .failing_get_on_poll(5, failure),
    );

    let err = reconciler.provision(&spec(), None).await.unwrap_err();

    match err {
        ReconcileError::ReadDuringProvisioningFailed { attempts, id, .. } => {
            assert_eq!(attempts, 5);
            assert!(reconciler.client().contains(&id));
        }
        other => panic!("expected read failure, got {other:?}"),
    }
    let mock = reconciler.client();
    assert_eq!(mock.get_calls(), 5);
    assert_eq!(mock.delete_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_memory_sent_in_megabytes() {
    let reconciler = VmReconciler::new(MockControlPlane::new());

    reconciler.provision(&spec(), None).await.unwrap();

    let requests = reconciler.client().created_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].memory_mb, 4096);
    assert_eq!(requests[0].vcpus, 4);
    assert_eq!(requests[0].root_disk_gb, 50);
    assert_eq!(requests[0].ssh_user.as_deref(), Some("kdevops"));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_spec_makes_no_calls() {
    let reconciler = VmReconciler::new(MockControlPlane::new());
    let mut bad = spec();
    bad.root_disk_gb = 0;

    let err = reconciler.provision(&bad, None).await.unwrap_err();

    assert!(matches!(err, ReconcileError::InvalidSpec { .. }));
    assert_eq!(reconciler.client().total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_without_cleanup() {
    let reconciler = VmReconciler::new(MockControlPlane::new().never_ready());
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let err = reconciler.provision(&spec(), Some(rx)).await.unwrap_err();

    match err {
        ReconcileError::Cancelled { attempts, id, .. } => {
            assert_eq!(attempts, 1);
            assert!(reconciler.client().contains(&id));
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(reconciler.client().delete_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_wait() {
    let reconciler = VmReconciler::new(MockControlPlane::new().never_ready());
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let _ = tx.send(true);
    });

    let err = reconciler.provision(&spec(), Some(rx)).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled { attempts: 11, .. }));
    assert_eq!(reconciler.client().get_calls(), 11);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_shutdown_sender_keeps_polling() {
    let reconciler = VmReconciler::new(MockControlPlane::new().ip_on_poll(3));
    let (tx, rx) = watch::channel(false);
    drop(tx);

    let provisioned = reconciler.provision(&spec(), Some(rx)).await.unwrap();
    assert_eq!(provisioned.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_custom_policy_budget() {
    let policy = ProvisionPolicy {
        poll_interval: Duration::from_millis(100),
        max_attempts: 10,
        progress_every: 3,
    };
    let reconciler =
        VmReconciler::new(MockControlPlane::new().never_ready()).with_provision_policy(policy);

    let err = reconciler.provision(&spec(), None).await.unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::ProvisioningTimeout { max_wait, .. } if max_wait == Duration::from_secs(1)
    ));
    assert_eq!(reconciler.client().get_calls(), 10);
}

#[tokio::test]
async fn test_refresh_not_found() {
    let reconciler = VmReconciler::new(MockControlPlane::new());

    let err = reconciler.refresh("gone").await.unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_refresh_clears_missing_ip() {
    let reconciler = VmReconciler::new(MockControlPlane::new().with_vm(VmInfo {
        id: "vm-a".to_string(),
        name: "kdevops-1".to_string(),
        state: "running".to_string(),
        vcpus: 4,
        memory_mb: 4096,
        ip_address: Some("192.168.122.50".to_string()),
    }));

    let first = reconciler.refresh("vm-a").await.unwrap();
    assert_eq!(first.ip_address.as_deref(), Some("192.168.122.50"));

    reconciler.client().set_ip("vm-a", Some(""));
    let second = reconciler.refresh("vm-a").await.unwrap();
    assert_eq!(second.ip_address, None);

    reconciler.client().set_ip("vm-a", None);
    let third = reconciler.refresh("vm-a").await.unwrap();
    assert_eq!(third.ip_address, None);
}

#[tokio::test]
async fn test_refresh_remote_error_is_not_not_found() {
    let reconciler = VmReconciler::new(
        MockControlPlane::new()
            .with_vm(VmInfo {
                id: "vm-a".to_string(),
                name: "kdevops-1".to_string(),
                state: "running".to_string(),
                vcpus: 1,
                memory_mb: 1024,
                ip_address: None,
            })
            .failing_get_on_poll(1, server_error()),
    );

    let err = reconciler.refresh("vm-a").await.unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Remote(ControlPlaneError::Status { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_deprovision_single_attempt() {
    let reconciler = VmReconciler::new(MockControlPlane::new().failing_delete(server_error()));

    let err = reconciler.deprovision("vm-a").await.unwrap_err();

    assert!(matches!(err, ReconcileError::Remote(_)));
    assert_eq!(reconciler.client().delete_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deprovision_after_provision() {
    let reconciler = VmReconciler::new(MockControlPlane::new());
    let provisioned = reconciler.provision(&spec(), None).await.unwrap();

    reconciler.deprovision(&provisioned.id).await.unwrap();

    assert!(!reconciler.client().contains(&provisioned.id));
    assert!(reconciler
        .refresh(&provisioned.id)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_update_makes_no_remote_calls() {
    let reconciler = VmReconciler::new(MockControlPlane::new());

    let same = reconciler.update(&spec(), &spec()).unwrap();
    assert_eq!(same.verdict, rcloud_reconcile::ChangeClass::NoChange);

    let mut bigger = spec();
    bigger.vcpus = 8;
    let err = reconciler.update(&spec(), &bigger).unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::ReplacementRequired { ref attributes }
            if attributes == &[rcloud_reconcile::Attribute::Vcpus]
    ));

    assert_eq!(reconciler.client().total_calls(), 0);
}

#[tokio::test]
async fn test_import_reads_remote_attributes() {
    let reconciler = VmReconciler::new(MockControlPlane::new().with_vm(VmInfo {
        id: "vm-a".to_string(),
        name: "imported".to_string(),
        state: "shutoff".to_string(),
        vcpus: 2,
        memory_mb: 2048,
        ip_address: None,
    }));

    let info = reconciler.import("vm-a").await.unwrap();
    assert_eq!(info.name, "imported");
    assert_eq!(info.memory_mb, 2048);

    assert!(reconciler.import("vm-b").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_start_stop_map_missing_vm_to_not_found() {
    let reconciler = VmReconciler::new(MockControlPlane::new().with_vm(VmInfo {
        id: "0b6c".to_string(),
        name: "kdevops-1".to_string(),
        state: "running".to_string(),
        vcpus: 2,
        memory_mb: 4096,
        ip_address: Some("192.168.122.10".to_string()),
    }));

    reconciler.stop("0b6c").await.unwrap();
    let observed = reconciler.refresh("0b6c").await.unwrap();
    assert_eq!(observed.state, "shutoff");
    assert!(!observed.is_ready());

    reconciler.start("0b6c").await.unwrap();
    assert_eq!(reconciler.get("0b6c").await.unwrap().state, "running");

    assert!(reconciler.start("gone").await.unwrap_err().is_not_found());
    assert!(reconciler.stop("gone").await.unwrap_err().is_not_found());
}
