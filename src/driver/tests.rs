//! Unit tests for the volume lifecycle controller.

use std::collections::BTreeMap;

use super::*;
use camino::Utf8Path;
use crate::host::{Filesystem, Host};
use crate::options::OptionError;
use crate::test_support::{
    BackendCall, BackendOp, FakeHost, HostCall, ScriptedBackend, server, volume,
};
use rstest::{fixture, rstest};

type TestDriver = VolumeDriver<ScriptedBackend, FakeHost>;

fn settings(use_protection: bool) -> DriverSettings {
    DriverSettings {
        mount_root: Utf8PathBuf::from("/mnt"),
        use_protection,
        action_timeout: None,
        labels: BTreeMap::from([(String::from(VOLUME_LABEL), String::new())]),
    }
}

fn defaults() -> OptionResolver {
    OptionResolver::new(BTreeMap::from([
        (String::from("fstype"), String::from("ext4")),
        (String::from("uid"), String::from("0")),
        (String::from("gid"), String::from("0")),
    ]))
}

fn driver_with(backend: &ScriptedBackend, host: &FakeHost, use_protection: bool) -> TestDriver {
    VolumeDriver::with_parts(
        backend.clone(),
        host.clone(),
        VolumeNamer::new("docker"),
        defaults(),
        settings(use_protection),
    )
}

fn opts(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

fn wait(command: &str) -> BackendCall {
    BackendCall::Wait {
        command: command.to_owned(),
    }
}

fn cloud() -> ScriptedBackend {
    ScriptedBackend::new().with_server(server(1, "worker-1", "fsn1"))
}

#[fixture]
fn backend() -> ScriptedBackend {
    cloud()
}

#[fixture]
fn host() -> FakeHost {
    FakeHost::new("worker-1")
}

#[rstest]
#[tokio::test]
async fn create_waits_attaches_and_formats_locally(backend: ScriptedBackend, host: FakeHost) {
    let driver = driver_with(&backend, &host, false);
    let report = driver
        .create("data", &opts(&[("size", "10")]))
        .await
        .expect("create succeeds");

    assert_eq!(
        backend.mutations(),
        vec![
            BackendCall::CreateVolume {
                name: String::from("docker-data"),
                size_gb: 10,
                location: String::from("fsn1"),
                format: None,
            },
            wait("create_volume"),
            BackendCall::Attach {
                volume_id: 1001,
                server_id: 1,
            },
            wait("attach_volume"),
        ]
    );
    assert_eq!(
        host.commands(),
        vec![String::from("mkfs.ext4 /dev/disk/by-id/scsi-0HC_Volume_1001")]
    );
    assert!(
        !host
            .calls()
            .iter()
            .any(|call| matches!(call, HostCall::Chown { .. }))
    );
    assert_eq!(report.name, "docker-data");
    assert_eq!(report.filesystem, Filesystem::Ext4);
    assert!(!report.formatted_remotely);
    assert_eq!(report.protection, ProtectionOutcome::NotRequested);
}

fn bounded_driver(backend: &ScriptedBackend, host: &FakeHost) -> TestDriver {
    VolumeDriver::with_parts(
        backend.clone(),
        host.clone(),
        VolumeNamer::new("docker"),
        defaults(),
        DriverSettings {
            action_timeout: Some(Duration::from_secs(60)),
            ..settings(true)
        },
    )
}

fn assert_single_bounded_deadline(waits: &[(String, Deadline)], commands: &[&str]) {
    let seen: Vec<_> = waits.iter().map(|(command, _)| command.as_str()).collect();
    assert_eq!(seen, commands);
    let Some((_, first)) = waits.first() else {
        panic!("no waits recorded");
    };
    assert!(first.is_bounded(), "{first:?}");
    assert!(waits.iter().all(|(_, deadline)| deadline == first), "{waits:?}");
}

#[rstest]
#[tokio::test]
async fn create_shares_one_deadline_across_its_waits(backend: ScriptedBackend, host: FakeHost) {
    let driver = bounded_driver(&backend, &host);
    driver
        .create("data", &opts(&[("size", "10")]))
        .await
        .expect("create succeeds");

    assert_single_bounded_deadline(
        &backend.wait_deadlines(),
        &["create_volume", "attach_volume", "change_protection"],
    );
}

#[tokio::test]
async fn remove_shares_one_deadline_across_its_waits() {
    let backend = cloud().with_volume(Volume {
        protected: true,
        server: Some(1),
        ..volume(42, "docker-data")
    });
    let host = FakeHost::new("worker-1");
    let driver = bounded_driver(&backend, &host);
    driver.remove("data").await.expect("remove succeeds");

    assert_single_bounded_deadline(
        &backend.wait_deadlines(),
        &["change_protection", "detach_volume"],
    );
}

#[rstest]
#[tokio::test]
async fn waits_are_unbounded_without_configured_timeout(backend: ScriptedBackend, host: FakeHost) {
    let driver = driver_with(&backend, &host, false);
    driver
        .create("data", &opts(&[("size", "10")]))
        .await
        .expect("create succeeds");

    let waits = backend.wait_deadlines();
    assert_eq!(waits.len(), 2);
    assert!(
        waits
            .iter()
            .all(|(_, deadline)| *deadline == Deadline::none()),
        "{waits:?}"
    );
}

#[rstest]
#[case("xfs", Filesystem::Xfs)]
#[case("ext4", Filesystem::Ext4)]
#[tokio::test]
async fn explicit_remote_formattable_fstype_skips_mkfs(
    backend: ScriptedBackend,
    host: FakeHost,
    #[case] fstype: &str,
    #[case] expected: Filesystem,
) {
    let driver = driver_with(&backend, &host, false);
    let report = driver
        .create("data", &opts(&[("size", "10"), ("fstype", fstype)]))
        .await
        .expect("create succeeds");

    assert!(report.formatted_remotely);
    assert!(host.commands().is_empty());
    assert!(backend.calls().contains(&BackendCall::CreateVolume {
        name: String::from("docker-data"),
        size_gb: 10,
        location: String::from("fsn1"),
        format: Some(expected),
    }));
}

#[rstest]
#[tokio::test]
async fn non_root_owner_is_applied_through_temporary_mount(
    backend: ScriptedBackend,
    host: FakeHost,
) {
    let driver = driver_with(&backend, &host, false);
    driver
        .create("data", &opts(&[("size", "10"), ("uid", "1000"), ("gid", "1000")]))
        .await
        .expect("create succeeds");

    assert!(host.calls().contains(&HostCall::Chown {
        path: Utf8PathBuf::from("/tmp/mnt-fake-1"),
        uid: 1000,
        gid: 1000,
    }));
    assert!(host.mounted_targets().is_empty());
}

#[rstest]
#[tokio::test]
async fn protection_failure_does_not_fail_create(backend: ScriptedBackend, host: FakeHost) {
    backend.fail_action("change_protection");
    let driver = driver_with(&backend, &host, true);
    let report = driver
        .create("data", &opts(&[("size", "10")]))
        .await
        .expect("create succeeds despite protection failure");

    assert!(matches!(report.protection, ProtectionOutcome::Failed(_)));
    assert_eq!(host.commands().len(), 1, "formatting still ran");
}

#[rstest]
#[tokio::test]
async fn protection_is_enabled_when_configured(backend: ScriptedBackend, host: FakeHost) {
    let driver = driver_with(&backend, &host, true);
    let report = driver
        .create("data", &opts(&[("size", "10")]))
        .await
        .expect("create succeeds");

    assert_eq!(report.protection, ProtectionOutcome::Enabled);
    assert!(
        backend
            .volume("docker-data")
            .is_some_and(|created| created.protected)
    );
}

#[rstest]
#[tokio::test]
async fn missing_size_is_rejected_before_any_remote_call(
    backend: ScriptedBackend,
    host: FakeHost,
) {
    let driver = driver_with(&backend, &host, false);
    let err = driver
        .create("data", &BTreeMap::new())
        .await
        .expect_err("size is required");

    assert!(matches!(
        err,
        DriverError::InvalidOption {
            source: OptionError::MissingSize,
            ..
        }
    ));
    assert!(backend.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn unsupported_options_are_reported(backend: ScriptedBackend, host: FakeHost) {
    let driver = driver_with(&backend, &host, false);
    let report = driver
        .create("data", &opts(&[("size", "10"), ("foo", "bar")]))
        .await
        .expect("create succeeds");
    assert_eq!(report.unsupported_options, vec![String::from("foo")]);
}

#[tokio::test]
async fn create_fails_when_host_is_not_a_cloud_server() {
    let backend = ScriptedBackend::new();
    let host = FakeHost::new("laptop");
    let driver = driver_with(&backend, &host, false);
    let err = driver
        .create("data", &opts(&[("size", "10")]))
        .await
        .expect_err("no server named laptop");

    assert!(matches!(
        err,
        DriverError::ServerResolution { ref hostname } if hostname == "laptop"
    ));
    assert!(backend.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_attach_wait_stops_create_before_formatting(
    backend: ScriptedBackend,
    host: FakeHost,
) {
    backend.fail_action("attach_volume");
    let driver = driver_with(&backend, &host, false);
    let err = driver
        .create("data", &opts(&[("size", "10")]))
        .await
        .expect_err("attach wait fails");

    assert!(matches!(
        err,
        DriverError::Remote {
            step: RemoteStep::WaitAttach,
            ..
        }
    ));
    assert!(host.commands().is_empty());
}

#[tokio::test]
async fn remove_unprotects_detaches_then_deletes() {
    let backend = ScriptedBackend::new().with_volume(Volume {
        protected: true,
        server: Some(1),
        ..volume(7, "docker-data")
    });
    let host = FakeHost::new("worker-1");
    let driver = driver_with(&backend, &host, false);
    driver.remove("data").await.expect("remove succeeds");

    assert_eq!(
        backend.mutations(),
        vec![
            BackendCall::ChangeProtection {
                volume_id: 7,
                delete: false,
            },
            wait("change_protection"),
            BackendCall::Detach { volume_id: 7 },
            wait("detach_volume"),
            BackendCall::Delete { volume_id: 7 },
        ]
    );
    assert!(backend.volume("docker-data").is_none());
}

#[tokio::test]
async fn remove_of_plain_volume_only_deletes() {
    let backend = ScriptedBackend::new().with_volume(volume(7, "docker-data"));
    let host = FakeHost::new("worker-1");
    let driver = driver_with(&backend, &host, false);
    driver.remove("data").await.expect("remove succeeds");
    assert_eq!(
        backend.mutations(),
        vec![BackendCall::Delete { volume_id: 7 }]
    );
}

#[tokio::test]
async fn remove_stops_when_protection_change_fails() {
    let backend = ScriptedBackend::new().with_volume(Volume {
        protected: true,
        server: Some(1),
        ..volume(7, "docker-data")
    });
    backend.fail_action("change_protection");
    let host = FakeHost::new("worker-1");
    let driver = driver_with(&backend, &host, false);
    let err = driver.remove("data").await.expect_err("wait fails");

    assert!(matches!(
        err,
        DriverError::Remote {
            step: RemoteStep::WaitUnprotect,
            ..
        }
    ));
    assert!(
        !backend
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::Detach { .. } | BackendCall::Delete { .. }))
    );
}

#[rstest]
#[tokio::test]
async fn remove_of_unknown_volume_is_not_found(backend: ScriptedBackend, host: FakeHost) {
    let driver = driver_with(&backend, &host, false);
    let err = driver.remove("ghost").await.expect_err("missing volume");
    assert!(matches!(err, DriverError::NotFound { ref volume } if volume == "docker-ghost"));
}

#[tokio::test]
async fn mount_attaches_unattached_volume_and_mounts() {
    let backend = cloud().with_volume(volume(7, "docker-data"));
    let host = FakeHost::new("worker-1");
    let driver = driver_with(&backend, &host, false);
    let mountpoint = driver.mount("data", "req-1").await.expect("mount succeeds");

    assert_eq!(mountpoint, Utf8PathBuf::from("/mnt/req-1"));
    assert_eq!(
        backend.mutations(),
        vec![
            BackendCall::Attach {
                volume_id: 7,
                server_id: 1,
            },
            wait("attach_volume"),
        ]
    );
    assert_eq!(host.mounted_targets(), vec![mountpoint.clone()]);
    assert_eq!(host.dirs(), vec![mountpoint]);
}

#[tokio::test]
async fn mount_moves_volume_from_another_server() {
    let backend = cloud()
        .with_server(server(2, "worker-2", "fsn1"))
        .with_volume(Volume {
            server: Some(2),
            ..volume(7, "docker-data")
        });
    let host = FakeHost::new("worker-1");
    let driver = driver_with(&backend, &host, false);
    driver.mount("data", "req-1").await.expect("mount succeeds");

    assert!(backend.calls().contains(&BackendCall::ServerById(2)));
    assert_eq!(
        backend.mutations(),
        vec![
            BackendCall::Detach { volume_id: 7 },
            wait("detach_volume"),
            BackendCall::Attach {
                volume_id: 7,
                server_id: 1,
            },
            wait("attach_volume"),
        ]
    );
    assert_eq!(
        backend.volume("docker-data").and_then(|moved| moved.server),
        Some(1)
    );
}

#[tokio::test]
async fn mount_of_locally_attached_volume_skips_attach() {
    let backend = cloud().with_volume(Volume {
        server: Some(1),
        ..volume(7, "docker-data")
    });
    let host = FakeHost::new("worker-1");
    let driver = driver_with(&backend, &host, false);
    driver.mount("data", "req-1").await.expect("mount succeeds");
    assert!(backend.mutations().is_empty());
}

#[tokio::test]
async fn mount_failure_on_every_filesystem_removes_mountpoint() {
    let backend = cloud().with_volume(Volume {
        server: Some(1),
        ..volume(7, "docker-data")
    });
    let host = FakeHost::new("worker-1");
    for filesystem in MOUNT_PRIORITY {
        host.fail_mount(filesystem);
    }
    let driver = driver_with(&backend, &host, false);
    let err = driver.mount("data", "req-1").await.expect_err("nothing mounts");

    let DriverError::Local {
        step: LocalStep::Mount,
        source: HostError::AllFilesystemsFailed { attempts, .. },
        ..
    } = &err
    else {
        panic!("expected aggregated mount failure, got {err:?}");
    };
    assert_eq!(attempts.len(), MOUNT_PRIORITY.len());
    assert!(host.dirs().is_empty());
    assert!(
        host.calls()
            .contains(&HostCall::RemoveDir(Utf8PathBuf::from("/mnt/req-1")))
    );
}

#[rstest]
#[case("")]
#[case(".")]
#[case("..")]
#[case("../etc")]
#[case("a/b")]
#[tokio::test]
async fn mount_rejects_ids_escaping_the_mount_root(#[case] id: &str) {
    let backend = cloud().with_volume(volume(7, "docker-data"));
    let host = FakeHost::new("worker-1");
    let driver = driver_with(&backend, &host, false);
    let err = driver.mount("data", id).await.expect_err("id rejected");

    assert!(matches!(err, DriverError::InvalidRequestId { .. }));
    assert!(backend.calls().is_empty());
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn unmount_detaches_volume_attached_here() {
    let backend = cloud().with_volume(volume(7, "docker-data"));
    let host = FakeHost::new("worker-1");
    let driver = driver_with(&backend, &host, false);
    driver.mount("data", "req-1").await.expect("mount succeeds");

    let report = driver
        .unmount("data", "req-1")
        .await
        .expect("unmount succeeds");

    assert_eq!(report.mountpoint, Utf8PathBuf::from("/mnt/req-1"));
    assert_eq!(report.detach, DetachOutcome::Detached);
    assert!(host.mounted_targets().is_empty());
    assert!(host.dirs().is_empty());
    assert_eq!(
        backend.volume("docker-data").and_then(|detached| detached.server),
        None
    );
}

fn seed_local_mount(host: &FakeHost) {
    host.add_mount("/dev/disk/by-id/scsi-0HC_Volume_7", "/mnt/req-1");
    host.create_dir_all(Utf8Path::new("/mnt/req-1"))
        .expect("fake host creates directories");
}

#[tokio::test]
async fn unmount_without_hostname_skips_detach() {
    let backend = cloud().with_volume(Volume {
        server: Some(1),
        ..volume(7, "docker-data")
    });
    let host = FakeHost::without_hostname();
    seed_local_mount(&host);
    let driver = driver_with(&backend, &host, false);

    let report = driver
        .unmount("data", "req-1")
        .await
        .expect("unmount succeeds without hostname");

    assert!(matches!(report.detach, DetachOutcome::Skipped(_)));
    assert!(backend.mutations().is_empty());
    assert!(host.mounted_targets().is_empty());
}

#[tokio::test]
async fn unmount_leaves_volumes_attached_elsewhere() {
    let backend = cloud()
        .with_server(server(2, "worker-2", "fsn1"))
        .with_volume(Volume {
            server: Some(2),
            ..volume(7, "docker-data")
        });
    let host = FakeHost::new("worker-1");
    seed_local_mount(&host);
    let driver = driver_with(&backend, &host, false);

    let report = driver
        .unmount("data", "req-1")
        .await
        .expect("unmount succeeds");

    assert_eq!(report.detach, DetachOutcome::NotAttachedHere);
    assert!(backend.mutations().is_empty());
}

#[tokio::test]
async fn unmount_failure_is_reported_as_local_error() {
    let backend = cloud().with_volume(volume(7, "docker-data"));
    let host = FakeHost::new("worker-1");
    let driver = driver_with(&backend, &host, false);
    let err = driver
        .unmount("data", "req-1")
        .await
        .expect_err("nothing is mounted");
    assert!(matches!(
        err,
        DriverError::Local {
            step: LocalStep::Unmount,
            ..
        }
    ));
}

#[tokio::test]
async fn get_reports_mountpoint_and_status() {
    let backend = cloud().with_volume(volume(7, "docker-data"));
    let host = FakeHost::new("worker-1");
    seed_local_mount(&host);
    let driver = driver_with(&backend, &host, false);

    let info = driver.get("data").await.expect("volume exists");
    assert_eq!(info.name, "data");
    assert_eq!(info.mountpoint, Some(Utf8PathBuf::from("/mnt/req-1")));
    assert_eq!(
        info.status.get("mounted"),
        Some(&serde_json::Value::Bool(true))
    );
    assert_eq!(
        driver.path("data").await.expect("volume exists"),
        Some(Utf8PathBuf::from("/mnt/req-1"))
    );
}

#[tokio::test]
async fn get_of_unmounted_volume_has_empty_status() {
    let backend = cloud().with_volume(volume(7, "docker-data"));
    let host = FakeHost::new("worker-1");
    let driver = driver_with(&backend, &host, false);

    let info = driver.get("data").await.expect("volume exists");
    assert_eq!(info.mountpoint, None);
    assert!(info.status.is_empty());
    assert_eq!(driver.path("data").await.expect("volume exists"), None);
}

#[tokio::test]
async fn list_only_reports_prefixed_volumes() {
    let backend = cloud()
        .with_volume(volume(7, "docker-data"))
        .with_volume(volume(8, "other-logs"))
        .with_volume(volume(9, "docker-cache"));
    let host = FakeHost::new("worker-1");
    seed_local_mount(&host);
    let driver = driver_with(&backend, &host, false);

    let listed = driver.list().await.expect("list succeeds");
    assert_eq!(
        listed,
        vec![
            VolumeSummary {
                name: String::from("data"),
                mountpoint: Some(Utf8PathBuf::from("/mnt/req-1")),
            },
            VolumeSummary {
                name: String::from("cache"),
                mountpoint: None,
            },
        ]
    );
}

#[rstest]
#[tokio::test]
async fn list_failure_names_the_phase(backend: ScriptedBackend, host: FakeHost) {
    backend.fail_on(BackendOp::ListVolumes);
    let driver = driver_with(&backend, &host, false);
    let err = driver.list().await.expect_err("listing fails");
    assert!(matches!(
        err,
        DriverError::Remote {
            step: RemoteStep::ListVolumes,
            ..
        }
    ));
}

#[rstest]
fn capabilities_are_global(backend: ScriptedBackend, host: FakeHost) {
    let driver = driver_with(&backend, &host, false);
    assert_eq!(driver.capabilities().scope, Scope::Global);
    assert_eq!(driver.capabilities().scope.as_str(), "global");
}
