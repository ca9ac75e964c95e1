//! Wire types of the Docker volume plugin protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::driver::{VolumeInfo, VolumeSummary};

/// Body of requests that only name a volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NameRequest {
    /// Logical volume name.
    pub name: String,
}

/// Body of `/VolumeDriver.Create`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    /// Logical volume name.
    pub name: String,
    /// Driver options; Docker sends `null` when none were given.
    #[serde(default)]
    pub opts: Option<BTreeMap<String, String>>,
}

/// Body of `/VolumeDriver.Mount` and `/VolumeDriver.Unmount`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MountRequest {
    /// Logical volume name.
    pub name: String,
    /// Caller-unique request identifier.
    #[serde(rename = "ID")]
    pub id: String,
}

/// Response carrying only an error message.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrResponse {
    /// Empty on success.
    pub err: String,
}

impl ErrResponse {
    pub(super) fn failed(message: impl Into<String>) -> Self {
        Self {
            err: message.into(),
        }
    }
}

/// Response of `/Plugin.Activate`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    /// Implemented plugin subsystems.
    pub implements: Vec<&'static str>,
}

/// Response of `/VolumeDriver.Path` and `/VolumeDriver.Mount`.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountpointResponse {
    /// Local mountpoint; empty when not mounted.
    pub mountpoint: String,
    /// Empty on success.
    pub err: String,
}

/// Volume description inside Get and List responses.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeBody {
    /// Logical volume name.
    pub name: String,
    /// Local mountpoint; omitted when not mounted.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
    /// RFC 3339 creation timestamp.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub created_at: String,
    /// Free-form status.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<String, serde_json::Value>,
}

impl From<VolumeInfo> for VolumeBody {
    fn from(info: VolumeInfo) -> Self {
        Self {
            name: info.name,
            mountpoint: info.mountpoint.map(String::from).unwrap_or_default(),
            created_at: info.created_at.to_rfc3339(),
            status: info.status,
        }
    }
}

impl From<VolumeSummary> for VolumeBody {
    fn from(summary: VolumeSummary) -> Self {
        Self {
            name: summary.name,
            mountpoint: summary.mountpoint.map(String::from).unwrap_or_default(),
            created_at: String::new(),
            status: BTreeMap::new(),
        }
    }
}

/// Response of `/VolumeDriver.Get`.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    /// The volume, absent on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeBody>,
    /// Empty on success.
    pub err: String,
}

/// Response of `/VolumeDriver.List`.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    /// Volumes owned by this driver.
    pub volumes: Vec<VolumeBody>,
    /// Empty on success.
    pub err: String,
}

/// Scope block of `/VolumeDriver.Capabilities`.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesBody {
    /// `global` or `local`.
    pub scope: &'static str,
}

/// Response of `/VolumeDriver.Capabilities`.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    /// Driver capabilities.
    pub capabilities: CapabilitiesBody,
}
