//! Unit tests for the Hetzner wire types.

use super::types::{
    ActionEnvelope, ActionStatus, CreateVolumeBody, VolumeList, WireServer, WireVolume,
};
use super::*;
use crate::backend::{Server, Volume};
use rstest::rstest;
use serde_json::json;
use std::collections::BTreeMap;

fn wire_volume(linux_device: serde_json::Value) -> WireVolume {
    serde_json::from_value(json!({
        "id": 4711,
        "name": "docker-data",
        "size": 10,
        "created": "2024-05-01T10:00:00+00:00",
        "server": 42,
        "location": { "name": "fsn1", "city": "Falkenstein" },
        "protection": { "delete": true },
        "linux_device": linux_device,
        "labels": {},
        "status": "available"
    }))
    .expect("volume decodes")
}

#[test]
fn volume_conversion_keeps_identity_and_flags() {
    let volume = Volume::from(wire_volume(json!("/dev/disk/by-id/scsi-0HC_Volume_4711")));
    assert_eq!(volume.id, 4711);
    assert_eq!(volume.name, "docker-data");
    assert_eq!(volume.size_gb, 10);
    assert_eq!(volume.server, Some(42));
    assert_eq!(volume.location, "fsn1");
    assert!(volume.protected);
    assert_eq!(volume.created.to_rfc3339(), "2024-05-01T10:00:00+00:00");
}

#[rstest]
#[case(json!(null))]
#[case(json!(""))]
fn missing_device_falls_back_to_by_id_path(#[case] device: serde_json::Value) {
    let volume = Volume::from(wire_volume(device));
    assert_eq!(
        volume.linux_device.as_str(),
        "/dev/disk/by-id/scsi-0HC_Volume_4711"
    );
}

#[test]
fn server_conversion_reads_datacenter_location() {
    let wire: WireServer = serde_json::from_value(json!({
        "id": 7,
        "name": "worker-1",
        "datacenter": { "name": "fsn1-dc14", "location": { "name": "fsn1" } }
    }))
    .expect("server decodes");
    assert_eq!(
        Server::from(wire),
        Server {
            id: 7,
            name: String::from("worker-1"),
            location: String::from("fsn1"),
        }
    );
}

#[rstest]
#[case("running", ActionStatus::Running)]
#[case("success", ActionStatus::Success)]
#[case("error", ActionStatus::Error)]
#[case("queued", ActionStatus::Running)]
fn action_status_decodes_unknown_as_running(#[case] raw: &str, #[case] expected: ActionStatus) {
    let envelope: ActionEnvelope = serde_json::from_value(json!({
        "action": { "id": 1, "command": "attach_volume", "status": raw, "progress": 0, "error": null }
    }))
    .expect("action decodes");
    assert_eq!(envelope.action.status, expected);
}

#[test]
fn volume_list_without_meta_has_no_next_page() {
    let list: VolumeList = serde_json::from_value(json!({ "volumes": [] })).expect("list decodes");
    assert!(list.volumes.is_empty());
    assert_eq!(list.meta.pagination.next_page, None);
}

#[test]
fn create_body_omits_format_when_formatting_locally() {
    let labels = BTreeMap::from([(String::from(VOLUME_LABEL), String::new())]);
    let body = CreateVolumeBody {
        name: "docker-data",
        size: 10,
        location: "fsn1",
        labels: &labels,
        format: None,
        automount: false,
    };
    let value = serde_json::to_value(&body).expect("serialise");
    assert!(value.get("format").is_none());
    assert_eq!(value["labels"][VOLUME_LABEL], json!(""));
    assert_eq!(value["automount"], json!(false));
}

#[test]
fn urls_join_endpoint_and_path() {
    let backend = HetznerBackend::with_endpoint(
        "https://api.example.test/v1/",
        "token",
        Duration::from_millis(10),
    )
    .expect("client builds");
    assert_eq!(
        backend.url("/volumes/1"),
        "https://api.example.test/v1/volumes/1"
    );
}
