//! Errors raised by local host operations.

use camino::Utf8PathBuf;
use thiserror::Error;

use super::Filesystem;

/// One failed attempt of a mount-with-fallback sequence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountAttempt {
    /// Filesystem type passed to the kernel.
    pub filesystem: Filesystem,
    /// Failure reported for that type.
    pub message: String,
}

/// Errors raised by [`super::Host`] implementations and the mount manager.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostError {
    /// Raised when the local hostname cannot be read.
    #[error("failed to read hostname: {message}")]
    Hostname {
        /// Underlying error text.
        message: String,
    },
    /// Raised when a filesystem operation fails.
    #[error("I/O error at {path}: {message}")]
    Io {
        /// Path involved in the operation.
        path: Utf8PathBuf,
        /// Underlying error text.
        message: String,
    },
    /// Raised when a program cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error text.
        message: String,
    },
    /// Raised when a program exits unsuccessfully.
    #[error("{program} exited with status {status:?}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status, if the process exited normally.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when the kernel rejects a mount.
    #[error("failed to mount {device} at {target} as {filesystem}: {message}")]
    Mount {
        /// Source block device.
        device: Utf8PathBuf,
        /// Mountpoint.
        target: Utf8PathBuf,
        /// Filesystem type attempted.
        filesystem: Filesystem,
        /// Underlying error text.
        message: String,
    },
    /// Raised when the kernel rejects an unmount.
    #[error("failed to unmount {target}: {message}")]
    Unmount {
        /// Mountpoint.
        target: Utf8PathBuf,
        /// Underlying error text.
        message: String,
    },
    /// Raised when every candidate filesystem failed to mount.
    #[error("{device} could not be mounted with any filesystem: {}", render_attempts(.attempts))]
    AllFilesystemsFailed {
        /// Source block device.
        device: Utf8PathBuf,
        /// One entry per candidate, in attempt order.
        attempts: Vec<MountAttempt>,
    },
    /// Raised when ownership transfer is refused because data is present.
    #[error("refusing to change ownership of {path}: directory is not empty")]
    NotEmpty {
        /// Directory that holds unexpected entries.
        path: Utf8PathBuf,
    },
    /// Raised when `chown` fails.
    #[error("failed to chown {path} to {uid}:{gid}: {message}")]
    Chown {
        /// Path whose ownership was being changed.
        path: Utf8PathBuf,
        /// Requested owner.
        uid: u32,
        /// Requested group.
        gid: u32,
        /// Underlying error text.
        message: String,
    },
    /// Raised when a blocking host task panics or is cancelled.
    #[error("host task failed: {message}")]
    Task {
        /// Join error text.
        message: String,
    },
}

fn render_attempts(attempts: &[MountAttempt]) -> String {
    attempts
        .iter()
        .map(|attempt| format!("{}: {}", attempt.filesystem, attempt.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl HostError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
