//! Filesystems the driver knows how to create and mount.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Filesystem types supported on managed volumes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Filesystem {
    /// Fourth extended filesystem.
    Ext4,
    /// XFS.
    Xfs,
    /// Third extended filesystem.
    Ext3,
    /// Second extended filesystem.
    Ext2,
}

/// Order in which mounting attempts probe filesystem types.
pub const MOUNT_PRIORITY: [Filesystem; 4] = [
    Filesystem::Ext4,
    Filesystem::Xfs,
    Filesystem::Ext3,
    Filesystem::Ext2,
];

impl Filesystem {
    /// Kernel and `mkfs` name of the filesystem.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Ext3 => "ext3",
            Self::Ext2 => "ext2",
        }
    }

    /// Whether the control plane can format a new volume with this type.
    #[must_use]
    pub const fn is_remote_formattable(self) -> bool {
        matches!(self, Self::Ext4 | Self::Xfs)
    }

    /// Formatting utility invoked for local formatting.
    #[must_use]
    pub fn mkfs_program(self) -> String {
        format!("mkfs.{}", self.as_str())
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a filesystem name is not one of [`Filesystem`]'s variants.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unsupported filesystem '{0}' (expected ext4, xfs, ext3 or ext2)")]
pub struct UnknownFilesystem(pub String);

impl FromStr for Filesystem {
    type Err = UnknownFilesystem;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "ext4" => Ok(Self::Ext4),
            "xfs" => Ok(Self::Xfs),
            "ext3" => Ok(Self::Ext3),
            "ext2" => Ok(Self::Ext2),
            _ => Err(UnknownFilesystem(value.to_owned())),
        }
    }
}
