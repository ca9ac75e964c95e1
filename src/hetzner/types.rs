//! Wire types for the Hetzner Cloud API.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{ActionHandle, Server, Volume};

const DEVICE_BY_ID_PREFIX: &str = "/dev/disk/by-id/scsi-0HC_Volume_";

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiErrorBody {
    pub(super) error: ApiErrorDetail,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(super) struct ApiErrorDetail {
    #[serde(default)]
    pub(super) code: String,
    #[serde(default)]
    pub(super) message: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct NamedRef {
    pub(super) name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(super) struct Protection {
    #[serde(default)]
    pub(super) delete: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct WireVolume {
    pub(super) id: u64,
    pub(super) name: String,
    pub(super) size: u32,
    pub(super) created: DateTime<Utc>,
    pub(super) server: Option<u64>,
    pub(super) location: NamedRef,
    #[serde(default)]
    pub(super) protection: Protection,
    pub(super) linux_device: Option<String>,
}

impl From<WireVolume> for Volume {
    fn from(value: WireVolume) -> Self {
        let linux_device = value
            .linux_device
            .filter(|device| !device.is_empty())
            .map_or_else(
                || Utf8PathBuf::from(format!("{DEVICE_BY_ID_PREFIX}{}", value.id)),
                Utf8PathBuf::from,
            );
        Self {
            id: value.id,
            name: value.name,
            size_gb: value.size,
            created: value.created,
            server: value.server,
            location: value.location.name,
            protected: value.protection.delete,
            linux_device,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct WireDatacenter {
    pub(super) location: NamedRef,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct WireServer {
    pub(super) id: u64,
    pub(super) name: String,
    pub(super) datacenter: WireDatacenter,
}

impl From<WireServer> for Server {
    fn from(value: WireServer) -> Self {
        Self {
            id: value.id,
            name: value.name,
            location: value.datacenter.location.name,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub(super) enum ActionStatus {
    Success,
    Error,
    #[serde(other)]
    Running,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct WireAction {
    pub(super) id: u64,
    pub(super) command: String,
    pub(super) status: ActionStatus,
    pub(super) error: Option<ApiErrorDetail>,
}

impl From<&WireAction> for ActionHandle {
    fn from(value: &WireAction) -> Self {
        Self {
            id: value.id,
            command: value.command.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ActionEnvelope {
    pub(super) action: WireAction,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct VolumeCreateEnvelope {
    pub(super) volume: WireVolume,
    pub(super) action: WireAction,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(super) struct Pagination {
    pub(super) next_page: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(super) struct Meta {
    #[serde(default)]
    pub(super) pagination: Pagination,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct VolumeList {
    pub(super) volumes: Vec<WireVolume>,
    #[serde(default)]
    pub(super) meta: Meta,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ServerList {
    pub(super) servers: Vec<WireServer>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ServerEnvelope {
    pub(super) server: WireServer,
}

#[derive(Clone, Debug, Serialize)]
pub(super) struct CreateVolumeBody<'a> {
    pub(super) name: &'a str,
    pub(super) size: u32,
    pub(super) location: &'a str,
    pub(super) labels: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) format: Option<&'static str>,
    pub(super) automount: bool,
}

#[derive(Clone, Debug, Serialize)]
pub(super) struct AttachBody {
    pub(super) server: u64,
    pub(super) automount: bool,
}

#[derive(Clone, Debug, Serialize)]
pub(super) struct ProtectionBody {
    pub(super) delete: bool,
}

#[derive(Clone, Debug, Serialize)]
pub(super) struct EmptyBody {}
