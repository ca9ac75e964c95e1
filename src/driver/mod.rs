//! Volume lifecycle controller.
//!
//! [`VolumeDriver`] sequences control-plane calls, action waits and local
//! device work for each lifecycle operation. Every remote mutation is awaited
//! to a terminal state before the next dependent step starts, and Create,
//! Remove, Mount and Unmount for the same volume name are serialised through
//! [`VolumeLocks`].

mod error;
mod locks;
mod types;

use std::collections::BTreeMap;
use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::{info, instrument, warn};

use crate::backend::{
    ActionHandle, ActionWaiter, Deadline, Server, ServerApi, Volume, VolumeApi, VolumeCreate,
};
use crate::config::DriverConfig;
use crate::hetzner::VOLUME_LABEL;
use crate::host::{Host, HostError, MOUNT_PRIORITY};
use crate::mount::MountManager;
use crate::naming::VolumeNamer;
use crate::options::{CreateOptions, OptionResolver};

pub use error::{DriverError, LocalStep, RemoteStep};
pub use locks::{VolumeGuard, VolumeLocks};
pub use types::{
    Capabilities, CreateReport, DetachOutcome, ProtectionOutcome, Scope, UnmountReport,
    VolumeInfo, VolumeSummary,
};

/// Process-wide settings consumed by the driver.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DriverSettings {
    /// Propagated mount root; mountpoints are `<root>/<request-id>`.
    pub mount_root: Utf8PathBuf,
    /// Enable deletion protection after Create.
    pub use_protection: bool,
    /// Deadline applied to the action waits of one request.
    pub action_timeout: Option<Duration>,
    /// Labels attached to created volumes.
    pub labels: BTreeMap<String, String>,
}

impl DriverSettings {
    /// Derives settings from configuration.
    #[must_use]
    pub fn from_config(config: &DriverConfig) -> Self {
        Self {
            mount_root: config.mount_root_path(),
            use_protection: config.use_protection,
            action_timeout: config.action_timeout(),
            labels: BTreeMap::from([(String::from(VOLUME_LABEL), String::new())]),
        }
    }
}

/// Coordinates the control plane and the local host for volume lifecycles.
#[derive(Debug)]
pub struct VolumeDriver<B, H> {
    backend: B,
    mounts: MountManager<H>,
    namer: VolumeNamer,
    options: OptionResolver,
    settings: DriverSettings,
    locks: VolumeLocks,
}

type DriverResult<T, B> = Result<T, DriverError<<B as crate::backend::Backend>::Error>>;

impl<B, H> VolumeDriver<B, H>
where
    B: VolumeApi + ServerApi + ActionWaiter,
    H: Host,
{
    /// Builds a driver from configuration.
    #[must_use]
    pub fn new(backend: B, host: H, config: &DriverConfig) -> Self {
        Self::with_parts(
            backend,
            host,
            VolumeNamer::new(config.name_prefix.trim()),
            OptionResolver::from_config(config),
            DriverSettings::from_config(config),
        )
    }

    /// Builds a driver from explicit parts.
    #[must_use]
    pub fn with_parts(
        backend: B,
        host: H,
        namer: VolumeNamer,
        options: OptionResolver,
        settings: DriverSettings,
    ) -> Self {
        Self {
            backend,
            mounts: MountManager::new(host),
            namer,
            options,
            settings,
            locks: VolumeLocks::new(),
        }
    }

    /// Borrows the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Creates, attaches and prepares a new volume.
    ///
    /// Enabling protection is best-effort and reported in the returned
    /// [`CreateReport`]. Steps that already succeeded are not rolled back
    /// when a later one fails.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] naming the failing phase.
    #[instrument(skip_all, fields(volume = %name))]
    pub async fn create(
        &self,
        name: &str,
        options: &BTreeMap<String, String>,
    ) -> DriverResult<CreateReport, B> {
        let remote = self.namer.prefixed(name);
        let parsed = CreateOptions::parse(&self.options, options).map_err(|source| {
            DriverError::InvalidOption {
                volume: remote.clone(),
                source,
            }
        })?;
        for key in &parsed.unsupported {
            warn!(option = %key, "unsupported driver option ignored");
        }

        let _guard = self.locks.acquire(&remote).await;
        let deadline = self.deadline();
        info!(%remote, size_gb = parsed.size_gb, "starting volume creation");

        let server = self.local_server().await?;
        let request = VolumeCreate {
            name: remote.clone(),
            size_gb: parsed.size_gb,
            location: server.location.clone(),
            format: parsed.remote_format,
            labels: self.settings.labels.clone(),
        };
        let created = self
            .backend
            .create_volume(&request)
            .await
            .map_err(DriverError::remote(RemoteStep::Create, &remote))?;
        self.wait(&created.action, RemoteStep::WaitCreate, &remote, deadline)
            .await?;
        info!(%remote, server = %server.name, "volume created; attaching");

        let attach = self
            .backend
            .attach_volume(created.volume.id, server.id)
            .await
            .map_err(DriverError::remote(RemoteStep::Attach, &remote))?;
        self.wait(&attach, RemoteStep::WaitAttach, &remote, deadline)
            .await?;
        info!(%remote, server = %server.name, "volume attached");

        let protection = self.protect(created.volume.id, deadline).await;
        let device = created.volume.linux_device.clone();
        let filesystem = parsed.filesystem;

        if parsed.remote_format.is_none() {
            info!(%remote, %filesystem, "formatting");
            let target = device.clone();
            self.blocking(LocalStep::Format, &remote, move |mounts| {
                mounts.mkfs(&target, filesystem)
            })
            .await?;
        }

        if parsed.needs_ownership() {
            let (uid, gid) = (parsed.uid, parsed.gid);
            info!(%remote, uid, gid, "setting ownership");
            let target = device.clone();
            self.blocking(LocalStep::SetOwnership, &remote, move |mounts| {
                mounts.set_ownership(&target, filesystem, uid, gid, None)
            })
            .await?;
        }

        info!(%remote, "volume ready");
        Ok(CreateReport {
            name: remote,
            device,
            filesystem,
            formatted_remotely: parsed.remote_format.is_some(),
            protection,
            unsupported_options: parsed.unsupported,
        })
    }

    /// Reports a volume and its local mountpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when the volume does not exist.
    #[instrument(skip_all, fields(volume = %name))]
    pub async fn get(&self, name: &str) -> DriverResult<VolumeInfo, B> {
        let remote = self.namer.prefixed(name);
        let volume = self.lookup_volume(&remote).await?;
        let device = volume.linux_device.clone();
        let mountpoint = self
            .blocking(LocalStep::ReadMounts, &remote, move |mounts| {
                mounts.mountpoint_of(&device)
            })
            .await?;

        let mut status = BTreeMap::new();
        if mountpoint.is_some() {
            status.insert(String::from("mounted"), serde_json::Value::Bool(true));
        }
        Ok(VolumeInfo {
            name: self.namer.unprefixed(&volume.name).to_owned(),
            mountpoint,
            created_at: volume.created,
            status,
        })
    }

    /// Lists the volumes carrying the configured prefix.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when enumeration or the mount table fails.
    #[instrument(skip_all)]
    pub async fn list(&self) -> DriverResult<Vec<VolumeSummary>, B> {
        let scope = format!("{}-*", self.namer.prefix());
        let volumes = self
            .backend
            .list_volumes()
            .await
            .map_err(DriverError::remote(RemoteStep::ListVolumes, &scope))?;

        let owned: Vec<(String, Utf8PathBuf)> = volumes
            .into_iter()
            .filter(|volume| self.namer.has_prefix(&volume.name))
            .map(|volume| {
                (
                    self.namer.unprefixed(&volume.name).to_owned(),
                    volume.linux_device,
                )
            })
            .collect();

        self.blocking(LocalStep::ReadMounts, &scope, move |mounts| {
            let table = mounts.mount_table()?;
            Ok(owned
                .into_iter()
                .map(|(name, device)| VolumeSummary {
                    mountpoint: mounts.lookup(&table, &device),
                    name,
                })
                .collect())
        })
        .await
    }

    /// Deletes a volume, first disabling protection and detaching as needed.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] for the first failing phase; later phases are
    /// not attempted.
    #[instrument(skip_all, fields(volume = %name))]
    pub async fn remove(&self, name: &str) -> DriverResult<(), B> {
        let remote = self.namer.prefixed(name);
        let _guard = self.locks.acquire(&remote).await;
        let deadline = self.deadline();
        let volume = self.lookup_volume(&remote).await?;
        info!(%remote, "starting volume removal");

        if volume.protected {
            info!(%remote, "disabling protection");
            let action = self
                .backend
                .change_protection(volume.id, false)
                .await
                .map_err(DriverError::remote(RemoteStep::Unprotect, &remote))?;
            self.wait(&action, RemoteStep::WaitUnprotect, &remote, deadline)
                .await?;
        }

        if let Some(server_id) = volume.server {
            info!(%remote, server_id, "detaching volume");
            self.detach(&volume, &remote, deadline).await?;
        }

        self.backend
            .delete_volume(volume.id)
            .await
            .map_err(DriverError::remote(RemoteStep::Delete, &remote))?;
        info!(%remote, "volume removed");
        Ok(())
    }

    /// Returns the local mountpoint of a volume, if mounted.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get`].
    pub async fn path(&self, name: &str) -> DriverResult<Option<Utf8PathBuf>, B> {
        Ok(self.get(name).await?.mountpoint)
    }

    /// Attaches a volume to this host and mounts it at
    /// `<mount root>/<request_id>`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when reconciliation or mounting fails. When no
    /// filesystem mounts, the mountpoint directory is removed before the
    /// aggregated error is returned.
    #[instrument(skip_all, fields(volume = %name, request = %request_id))]
    pub async fn mount(&self, name: &str, request_id: &str) -> DriverResult<Utf8PathBuf, B> {
        let mountpoint = self.mountpoint_for(request_id)?;
        let remote = self.namer.prefixed(name);
        let _guard = self.locks.acquire(&remote).await;
        let deadline = self.deadline();
        info!(%remote, %mountpoint, "received mount request");

        let volume = self.lookup_volume(&remote).await?;
        let server = self.local_server().await?;

        if volume.server != Some(server.id) {
            if let Some(other_id) = volume.server {
                let other = self
                    .backend
                    .server_by_id(other_id)
                    .await
                    .map_err(DriverError::remote(RemoteStep::LookupServer, &remote))?;
                info!(%remote, from = %other.name, "detaching volume from other server");
                self.detach(&volume, &remote, deadline).await?;
            }
            info!(%remote, to = %server.name, "attaching volume");
            let action = self
                .backend
                .attach_volume(volume.id, server.id)
                .await
                .map_err(DriverError::remote(RemoteStep::Attach, &remote))?;
            self.wait(&action, RemoteStep::WaitAttach, &remote, deadline)
                .await?;
        }

        let target = mountpoint.clone();
        self.blocking(LocalStep::CreateMountpoint, &remote, move |mounts| {
            mounts.create_dir_all(&target)
        })
        .await?;

        let device = volume.linux_device.clone();
        let target = mountpoint.clone();
        let mounted = self
            .blocking(LocalStep::Mount, &remote, move |mounts| {
                match mounts.mount_with_fallback(&device, &target, &MOUNT_PRIORITY) {
                    Ok(filesystem) => Ok(filesystem),
                    Err(err) => {
                        if let Err(cleanup) = mounts.remove_dir(&target) {
                            tracing::error!(%target, error = %cleanup, "failed removing mountpoint");
                        }
                        Err(err)
                    }
                }
            })
            .await?;

        info!(%remote, %mountpoint, filesystem = %mounted, "volume mounted");
        Ok(mountpoint)
    }

    /// Unmounts a volume, removes its mountpoint and detaches it when it is
    /// attached to this host.
    ///
    /// When this host cannot be resolved remotely the detach is skipped and
    /// the unmount still succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the volume lookup, unmount, directory
    /// removal or detach fails.
    #[instrument(skip_all, fields(volume = %name, request = %request_id))]
    pub async fn unmount(&self, name: &str, request_id: &str) -> DriverResult<UnmountReport, B> {
        let mountpoint = self.mountpoint_for(request_id)?;
        let remote = self.namer.prefixed(name);
        let _guard = self.locks.acquire(&remote).await;
        let deadline = self.deadline();
        info!(%remote, %mountpoint, "received unmount request");

        let volume = self.lookup_volume(&remote).await?;

        let target = mountpoint.clone();
        self.blocking(LocalStep::Unmount, &remote, move |mounts| {
            mounts.unmount(&target)
        })
        .await?;
        let target = mountpoint.clone();
        self.blocking(LocalStep::RemoveMountpoint, &remote, move |mounts| {
            mounts.remove_dir(&target)
        })
        .await?;
        info!(%remote, %mountpoint, "unmounted");

        let server = match self.local_server().await {
            Ok(server) => server,
            Err(err) => {
                warn!(%remote, error = %err, "cannot resolve this host; skipping detach");
                return Ok(UnmountReport {
                    mountpoint,
                    detach: DetachOutcome::Skipped(err.to_string()),
                });
            }
        };

        if volume.server != Some(server.id) {
            return Ok(UnmountReport {
                mountpoint,
                detach: DetachOutcome::NotAttachedHere,
            });
        }

        info!(%remote, "detaching volume");
        self.detach(&volume, &remote, deadline).await?;
        Ok(UnmountReport {
            mountpoint,
            detach: DetachOutcome::Detached,
        })
    }

    /// Reports cluster-wide volume scope.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Global,
        }
    }

    fn deadline(&self) -> Deadline {
        Deadline::from_timeout(self.settings.action_timeout)
    }

    fn mountpoint_for(&self, request_id: &str) -> DriverResult<Utf8PathBuf, B> {
        let valid = !request_id.is_empty()
            && request_id != "."
            && request_id != ".."
            && !request_id.contains(['/', '\0']);
        if !valid {
            return Err(DriverError::InvalidRequestId {
                id: request_id.to_owned(),
            });
        }
        Ok(self.settings.mount_root.join(request_id))
    }

    async fn lookup_volume(&self, remote: &str) -> DriverResult<Volume, B> {
        self.backend
            .volume_by_name(remote)
            .await
            .map_err(DriverError::remote(RemoteStep::LookupVolume, remote))?
            .ok_or_else(|| DriverError::NotFound {
                volume: remote.to_owned(),
            })
    }

    async fn local_server(&self) -> DriverResult<Server, B> {
        let hostname = self.mounts.hostname().map_err(DriverError::Hostname)?;
        if hostname.contains('.') {
            warn!(
                %hostname,
                "hostname contains a dot; it must be the short name matching the cloud server"
            );
        }
        let server = self
            .backend
            .server_by_name(&hostname)
            .await
            .map_err(DriverError::remote(RemoteStep::LookupServer, &hostname))?;
        server.ok_or(DriverError::ServerResolution { hostname })
    }

    async fn wait(
        &self,
        action: &ActionHandle,
        step: RemoteStep,
        remote: &str,
        deadline: Deadline,
    ) -> DriverResult<(), B> {
        self.backend
            .wait_for_action(action, deadline)
            .await
            .map_err(DriverError::remote(step, remote))
    }

    async fn detach(&self, volume: &Volume, remote: &str, deadline: Deadline) -> DriverResult<(), B> {
        let action = self
            .backend
            .detach_volume(volume.id)
            .await
            .map_err(DriverError::remote(RemoteStep::Detach, remote))?;
        self.wait(&action, RemoteStep::WaitDetach, remote, deadline)
            .await
    }

    async fn protect(&self, volume_id: u64, deadline: Deadline) -> ProtectionOutcome {
        if !self.settings.use_protection {
            return ProtectionOutcome::NotRequested;
        }
        let result = match self.backend.change_protection(volume_id, true).await {
            Ok(action) => self.backend.wait_for_action(&action, deadline).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => ProtectionOutcome::Enabled,
            Err(err) => {
                warn!(volume_id, error = %err, "enabling deletion protection failed; continuing");
                ProtectionOutcome::Failed(err.to_string())
            }
        }
    }

    async fn blocking<T, F>(&self, step: LocalStep, remote: &str, work: F) -> DriverResult<T, B>
    where
        F: FnOnce(&MountManager<H>) -> Result<T, HostError> + Send + 'static,
        T: Send + 'static,
    {
        let mounts = self.mounts.clone();
        tokio::task::spawn_blocking(move || work(&mounts))
            .await
            .map_err(|err| HostError::Task {
                message: err.to_string(),
            })
            .and_then(std::convert::identity)
            .map_err(DriverError::local(step, remote))
    }
}

#[cfg(test)]
mod tests;
