//! Values returned by lifecycle operations.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};

use crate::host::Filesystem;

/// Result of the best-effort protection step of Create.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProtectionOutcome {
    /// Protection is disabled in configuration.
    NotRequested,
    /// Protection was enabled.
    Enabled,
    /// Enabling protection failed; Create continued.
    Failed(String),
}

/// Summary of a successful Create.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateReport {
    /// Remote volume name.
    pub name: String,
    /// Device path of the attached volume.
    pub device: Utf8PathBuf,
    /// Filesystem on the volume.
    pub filesystem: Filesystem,
    /// Whether the filesystem was created by the control plane.
    pub formatted_remotely: bool,
    /// Outcome of the protection step.
    pub protection: ProtectionOutcome,
    /// Option keys that were ignored.
    pub unsupported_options: Vec<String>,
}

/// Whether Unmount detached the volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DetachOutcome {
    /// The volume was detached from this host.
    Detached,
    /// The volume was not attached to this host; nothing to detach.
    NotAttachedHere,
    /// Detach was skipped because this host could not be resolved.
    Skipped(String),
}

/// Summary of a successful Unmount.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnmountReport {
    /// Mountpoint that was released.
    pub mountpoint: Utf8PathBuf,
    /// Detach outcome.
    pub detach: DetachOutcome,
}

/// Volume details reported by Get.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeInfo {
    /// Logical (unprefixed) name.
    pub name: String,
    /// Local mountpoint, when mounted on this host.
    pub mountpoint: Option<Utf8PathBuf>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Free-form status; carries `mounted: true` when mounted.
    pub status: BTreeMap<String, serde_json::Value>,
}

/// Volume entry reported by List.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeSummary {
    /// Logical (unprefixed) name.
    pub name: String,
    /// Local mountpoint, when mounted on this host.
    pub mountpoint: Option<Utf8PathBuf>,
}

/// Visibility scope of volumes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
    /// Visible on every host of the cluster.
    Global,
    /// Visible on the creating host only.
    Local,
}

impl Scope {
    /// Protocol name of the scope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Local => "local",
        }
    }
}

/// Driver capabilities.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Capabilities {
    /// Volume scope.
    pub scope: Scope,
}
