//! Control-plane abstraction for block volumes, servers and actions.
//!
//! The driver talks to the remote control plane through three independent
//! capability traits so each can be substituted in tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::host::Filesystem;

/// Remote block volume as reported by the control plane.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Provider-assigned identifier.
    pub id: u64,
    /// Remote (prefixed) name.
    pub name: String,
    /// Size in GB.
    pub size_gb: u32,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Identifier of the server holding the attachment, if any.
    pub server: Option<u64>,
    /// Location the volume lives in.
    pub location: String,
    /// Whether deletion protection is enabled.
    pub protected: bool,
    /// Device path the volume appears under once attached.
    pub linux_device: Utf8PathBuf,
}

/// Remote server record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Server {
    /// Provider-assigned identifier.
    pub id: u64,
    /// Server name; matches the host's short hostname.
    pub name: String,
    /// Location the server runs in.
    pub location: String,
}

/// Handle for an asynchronous control-plane operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionHandle {
    /// Provider-assigned identifier.
    pub id: u64,
    /// Operation name, for example `attach_volume`.
    pub command: String,
}

/// Parameters for creating a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeCreate {
    /// Remote (prefixed) name.
    pub name: String,
    /// Size in GB.
    pub size_gb: u32,
    /// Location to create the volume in.
    pub location: String,
    /// Filesystem the control plane should format the volume with.
    pub format: Option<Filesystem>,
    /// Labels attached to the volume.
    pub labels: BTreeMap<String, String>,
}

/// Result of a create call: the new volume and the action to wait for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedVolume {
    /// Volume record as returned by the create call.
    pub volume: Volume,
    /// Creation action.
    pub action: ActionHandle,
}

/// Point in time after which action waits give up. `Deadline::none()` waits
/// indefinitely.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never expires.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// A deadline `timeout` from now. A timeout too large to represent
    /// never expires.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Whether this deadline can expire.
    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.0.is_some()
    }

    /// Derives a deadline from an optional timeout.
    #[must_use]
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or_else(Self::none, Self::after)
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.0.is_some_and(|instant| Instant::now() >= instant)
    }
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Carries the error type shared by the capability traits.
pub trait Backend: Send + Sync {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;
}

/// Volume operations on the control plane.
pub trait VolumeApi: Backend {
    /// Creates a volume, returning it together with its creation action.
    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeCreate,
    ) -> BackendFuture<'a, CreatedVolume, Self::Error>;

    /// Looks up a volume by its exact remote name.
    fn volume_by_name<'a>(&'a self, name: &'a str)
    -> BackendFuture<'a, Option<Volume>, Self::Error>;

    /// Enumerates every volume visible to the credential.
    fn list_volumes(&self) -> BackendFuture<'_, Vec<Volume>, Self::Error>;

    /// Attaches a volume to a server.
    fn attach_volume(
        &self,
        volume_id: u64,
        server_id: u64,
    ) -> BackendFuture<'_, ActionHandle, Self::Error>;

    /// Detaches a volume from whichever server holds it.
    fn detach_volume(&self, volume_id: u64) -> BackendFuture<'_, ActionHandle, Self::Error>;

    /// Enables or disables deletion protection.
    fn change_protection(
        &self,
        volume_id: u64,
        delete: bool,
    ) -> BackendFuture<'_, ActionHandle, Self::Error>;

    /// Deletes a detached, unprotected volume.
    fn delete_volume(&self, volume_id: u64) -> BackendFuture<'_, (), Self::Error>;
}

/// Server lookups on the control plane.
pub trait ServerApi: Backend {
    /// Looks up a server by its exact name.
    fn server_by_name<'a>(&'a self, name: &'a str)
    -> BackendFuture<'a, Option<Server>, Self::Error>;

    /// Fetches a server by identifier.
    fn server_by_id(&self, id: u64) -> BackendFuture<'_, Server, Self::Error>;
}

/// Blocks until an asynchronous action reaches a terminal state.
pub trait ActionWaiter: Backend {
    /// Resolves once `action` succeeds; returns the terminal error when it
    /// fails, or a timeout error once `deadline` passes.
    fn wait_for_action<'a>(
        &'a self,
        action: &'a ActionHandle,
        deadline: Deadline,
    ) -> BackendFuture<'a, (), Self::Error>;
}
