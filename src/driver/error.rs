//! Error types for the volume lifecycle controller.

use std::fmt;

use thiserror::Error;

use crate::host::HostError;
use crate::options::OptionError;

/// Control-plane phase that failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemoteStep {
    /// Fetching a volume by name.
    LookupVolume,
    /// Enumerating volumes.
    ListVolumes,
    /// Resolving a server.
    LookupServer,
    /// Issuing the create call.
    Create,
    /// Waiting for creation.
    WaitCreate,
    /// Issuing an attach call.
    Attach,
    /// Waiting for attachment.
    WaitAttach,
    /// Issuing a detach call.
    Detach,
    /// Waiting for detachment.
    WaitDetach,
    /// Disabling deletion protection.
    Unprotect,
    /// Waiting for protection to be disabled.
    WaitUnprotect,
    /// Deleting the volume.
    Delete,
}

impl fmt::Display for RemoteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LookupVolume => "looking up volume",
            Self::ListVolumes => "listing volumes",
            Self::LookupServer => "looking up server",
            Self::Create => "creating volume",
            Self::WaitCreate => "waiting for volume creation",
            Self::Attach => "attaching volume",
            Self::WaitAttach => "waiting for volume attachment",
            Self::Detach => "detaching volume",
            Self::WaitDetach => "waiting for volume detachment",
            Self::Unprotect => "disabling deletion protection",
            Self::WaitUnprotect => "waiting for protection change",
            Self::Delete => "deleting volume",
        })
    }
}

/// Local phase that failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LocalStep {
    /// Formatting the device.
    Format,
    /// Transferring ownership of the filesystem root.
    SetOwnership,
    /// Creating the mountpoint directory.
    CreateMountpoint,
    /// Mounting the device.
    Mount,
    /// Unmounting the mountpoint.
    Unmount,
    /// Removing the mountpoint directory.
    RemoveMountpoint,
    /// Reading the mount table.
    ReadMounts,
}

impl fmt::Display for LocalStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Format => "formatting",
            Self::SetOwnership => "setting ownership",
            Self::CreateMountpoint => "creating mountpoint",
            Self::Mount => "mounting",
            Self::Unmount => "unmounting",
            Self::RemoveMountpoint => "removing mountpoint",
            Self::ReadMounts => "reading local mounts",
        })
    }
}

/// Errors raised by lifecycle operations.
#[derive(Debug, Error)]
pub enum DriverError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    /// Raised when Create options fail validation.
    #[error("invalid options for volume {volume}: {source}")]
    InvalidOption {
        /// Remote volume name.
        volume: String,
        /// Validation failure.
        #[source]
        source: OptionError,
    },
    /// Raised when a mount request id could escape the mount root.
    #[error("invalid mount request id {id:?}")]
    InvalidRequestId {
        /// Identifier supplied by the caller.
        id: String,
    },
    /// Raised when the local hostname cannot be read.
    #[error("getting local hostname: {0}")]
    Hostname(#[source] HostError),
    /// Raised when no server carries this host's name.
    #[error("no cloud server named {hostname:?}; the hostname must equal the server name")]
    ServerResolution {
        /// Local hostname.
        hostname: String,
    },
    /// Raised when the volume does not exist remotely.
    #[error("volume {volume} not found")]
    NotFound {
        /// Remote volume name.
        volume: String,
    },
    /// Raised when a control-plane call or wait fails.
    #[error("{step} {volume}: {source}")]
    Remote {
        /// Failing phase.
        step: RemoteStep,
        /// Remote volume name (or host name for server lookups).
        volume: String,
        /// Provider-specific error.
        #[source]
        source: BackendError,
    },
    /// Raised when local device work fails.
    #[error("{step} {volume}: {source}")]
    Local {
        /// Failing phase.
        step: LocalStep,
        /// Remote volume name.
        volume: String,
        /// Host error.
        #[source]
        source: HostError,
    },
}

impl<BackendError> DriverError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    pub(super) fn remote(step: RemoteStep, volume: &str) -> impl FnOnce(BackendError) -> Self + '_ {
        move |source| Self::Remote {
            step,
            volume: volume.to_owned(),
            source,
        }
    }

    pub(super) fn local(step: LocalStep, volume: &str) -> impl FnOnce(HostError) -> Self + '_ {
        move |source| Self::Local {
            step,
            volume: volume.to_owned(),
            source,
        }
    }
}
