//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedBackend`] stands in for the control plane and [`FakeHost`] for
//! the local kernel. Both record every call so tests can assert ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{TimeZone, Utc};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::backend::{
    ActionHandle, ActionWaiter, Backend, BackendFuture, CreatedVolume, Deadline, Server,
    ServerApi, Volume, VolumeApi, VolumeCreate,
};
use crate::host::{
    CommandOutput, DirEntryInfo, Filesystem, Host, HostError, MountEntry, MountTable,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds a server record.
#[must_use]
pub fn server(id: u64, name: &str, location: &str) -> Server {
    Server {
        id,
        name: name.to_owned(),
        location: location.to_owned(),
    }
}

/// Builds an unattached, unprotected volume record with the by-id device
/// path the control plane reports.
#[must_use]
pub fn volume(id: u64, name: &str) -> Volume {
    Volume {
        id,
        name: name.to_owned(),
        size_gb: 10,
        created: Utc
            .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
            .single()
            .unwrap_or_default(),
        server: None,
        location: String::from("fsn1"),
        protected: false,
        linux_device: Utf8PathBuf::from(format!("/dev/disk/by-id/scsi-0HC_Volume_{id}")),
    }
}

/// Control-plane operations that can be scripted to fail.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum BackendOp {
    /// `create_volume`.
    CreateVolume,
    /// `volume_by_name`.
    VolumeByName,
    /// `list_volumes`.
    ListVolumes,
    /// `attach_volume`.
    Attach,
    /// `detach_volume`.
    Detach,
    /// `change_protection`.
    ChangeProtection,
    /// `delete_volume`.
    Delete,
    /// `server_by_name`.
    ServerByName,
    /// `server_by_id`.
    ServerById,
}

/// A call recorded by [`ScriptedBackend`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendCall {
    /// Volume creation.
    CreateVolume {
        /// Requested name.
        name: String,
        /// Requested size.
        size_gb: u32,
        /// Requested location.
        location: String,
        /// Requested remote format.
        format: Option<Filesystem>,
    },
    /// Volume lookup by name.
    VolumeByName(String),
    /// Volume enumeration.
    ListVolumes,
    /// Attachment.
    Attach {
        /// Volume identifier.
        volume_id: u64,
        /// Server identifier.
        server_id: u64,
    },
    /// Detachment.
    Detach {
        /// Volume identifier.
        volume_id: u64,
    },
    /// Protection change.
    ChangeProtection {
        /// Volume identifier.
        volume_id: u64,
        /// Requested protection flag.
        delete: bool,
    },
    /// Deletion.
    Delete {
        /// Volume identifier.
        volume_id: u64,
    },
    /// Server lookup by name.
    ServerByName(String),
    /// Server lookup by identifier.
    ServerById(u64),
    /// Action wait.
    Wait {
        /// Action command being awaited.
        command: String,
    },
}

/// Errors produced by [`ScriptedBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedBackendError {
    /// Raised for operations scripted to fail.
    #[error("scripted {0:?} failure")]
    Injected(BackendOp),
    /// Raised when an action scripted to fail is awaited.
    #[error("action {0} failed")]
    ActionFailed(String),
    /// Raised for unknown identifiers.
    #[error("{0} not found")]
    NotFound(String),
    /// Raised when the request would be rejected by the real control plane.
    #[error("rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Default)]
struct BackendState {
    volumes: Vec<Volume>,
    servers: Vec<Server>,
    calls: Vec<BackendCall>,
    failing_ops: BTreeSet<BackendOp>,
    failing_actions: BTreeSet<String>,
    deadlines: Vec<(String, Deadline)>,
    next_id: u64,
}

impl BackendState {
    fn record(&mut self, call: BackendCall, op: BackendOp) -> Result<(), ScriptedBackendError> {
        self.calls.push(call);
        if self.failing_ops.contains(&op) {
            return Err(ScriptedBackendError::Injected(op));
        }
        Ok(())
    }

    fn action(&mut self, command: &str) -> ActionHandle {
        self.next_id += 1;
        ActionHandle {
            id: self.next_id,
            command: command.to_owned(),
        }
    }

    fn volume_mut(&mut self, id: u64) -> Result<&mut Volume, ScriptedBackendError> {
        self.volumes
            .iter_mut()
            .find(|volume| volume.id == id)
            .ok_or_else(|| ScriptedBackendError::NotFound(format!("volume {id}")))
    }
}

/// In-memory control plane that applies mutations immediately and records
/// every call.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<BackendState>>,
}

impl ScriptedBackend {
    /// Creates an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        let backend = Self::default();
        lock(&backend.state).next_id = 1000;
        backend
    }

    /// Seeds a server.
    #[must_use]
    pub fn with_server(self, server: Server) -> Self {
        lock(&self.state).servers.push(server);
        self
    }

    /// Seeds a volume.
    #[must_use]
    pub fn with_volume(self, volume: Volume) -> Self {
        lock(&self.state).volumes.push(volume);
        self
    }

    /// Makes every call of `op` fail.
    pub fn fail_on(&self, op: BackendOp) {
        lock(&self.state).failing_ops.insert(op);
    }

    /// Makes waits on actions with `command` fail terminally.
    pub fn fail_action(&self, command: &str) {
        lock(&self.state).failing_actions.insert(command.to_owned());
    }

    /// Snapshot of recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.state).calls.clone()
    }

    /// Deadlines handed to action waits, in order, keyed by action command.
    #[must_use]
    pub fn wait_deadlines(&self) -> Vec<(String, Deadline)> {
        lock(&self.state).deadlines.clone()
    }

    /// Recorded calls that mutate remote state or wait, without lookups.
    #[must_use]
    pub fn mutations(&self) -> Vec<BackendCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                !matches!(
                    call,
                    BackendCall::VolumeByName(_)
                        | BackendCall::ListVolumes
                        | BackendCall::ServerByName(_)
                        | BackendCall::ServerById(_)
                )
            })
            .collect()
    }

    /// Current state of a volume by name.
    #[must_use]
    pub fn volume(&self, name: &str) -> Option<Volume> {
        lock(&self.state)
            .volumes
            .iter()
            .find(|volume| volume.name == name)
            .cloned()
    }
}

impl Backend for ScriptedBackend {
    type Error = ScriptedBackendError;
}

impl VolumeApi for ScriptedBackend {
    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeCreate,
    ) -> BackendFuture<'a, CreatedVolume, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(
                BackendCall::CreateVolume {
                    name: request.name.clone(),
                    size_gb: request.size_gb,
                    location: request.location.clone(),
                    format: request.format,
                },
                BackendOp::CreateVolume,
            )?;
            let action = state.action("create_volume");
            let created = Volume {
                size_gb: request.size_gb,
                location: request.location.clone(),
                ..volume(action.id, &request.name)
            };
            state.volumes.push(created.clone());
            Ok(CreatedVolume {
                volume: created,
                action,
            })
        })
    }

    fn volume_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Option<Volume>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(
                BackendCall::VolumeByName(name.to_owned()),
                BackendOp::VolumeByName,
            )?;
            Ok(state
                .volumes
                .iter()
                .find(|volume| volume.name == name)
                .cloned())
        })
    }

    fn list_volumes(&self) -> BackendFuture<'_, Vec<Volume>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(BackendCall::ListVolumes, BackendOp::ListVolumes)?;
            Ok(state.volumes.clone())
        })
    }

    fn attach_volume(
        &self,
        volume_id: u64,
        server_id: u64,
    ) -> BackendFuture<'_, ActionHandle, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(
                BackendCall::Attach {
                    volume_id,
                    server_id,
                },
                BackendOp::Attach,
            )?;
            let volume = state.volume_mut(volume_id)?;
            if volume.server.is_some() {
                return Err(ScriptedBackendError::Rejected(format!(
                    "volume {volume_id} is already attached"
                )));
            }
            volume.server = Some(server_id);
            Ok(state.action("attach_volume"))
        })
    }

    fn detach_volume(&self, volume_id: u64) -> BackendFuture<'_, ActionHandle, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(BackendCall::Detach { volume_id }, BackendOp::Detach)?;
            let volume = state.volume_mut(volume_id)?;
            if volume.protected {
                return Err(ScriptedBackendError::Rejected(format!(
                    "volume {volume_id} is protected"
                )));
            }
            volume.server = None;
            Ok(state.action("detach_volume"))
        })
    }

    fn change_protection(
        &self,
        volume_id: u64,
        delete: bool,
    ) -> BackendFuture<'_, ActionHandle, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(
                BackendCall::ChangeProtection { volume_id, delete },
                BackendOp::ChangeProtection,
            )?;
            state.volume_mut(volume_id)?.protected = delete;
            Ok(state.action("change_protection"))
        })
    }

    fn delete_volume(&self, volume_id: u64) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(BackendCall::Delete { volume_id }, BackendOp::Delete)?;
            let volume = state.volume_mut(volume_id)?;
            if volume.protected || volume.server.is_some() {
                return Err(ScriptedBackendError::Rejected(format!(
                    "volume {volume_id} is protected or attached"
                )));
            }
            state.volumes.retain(|candidate| candidate.id != volume_id);
            Ok(())
        })
    }
}

impl ServerApi for ScriptedBackend {
    fn server_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Option<Server>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(
                BackendCall::ServerByName(name.to_owned()),
                BackendOp::ServerByName,
            )?;
            Ok(state
                .servers
                .iter()
                .find(|server| server.name == name)
                .cloned())
        })
    }

    fn server_by_id(&self, id: u64) -> BackendFuture<'_, Server, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(BackendCall::ServerById(id), BackendOp::ServerById)?;
            state
                .servers
                .iter()
                .find(|server| server.id == id)
                .cloned()
                .ok_or_else(|| ScriptedBackendError::NotFound(format!("server {id}")))
        })
    }
}

impl ActionWaiter for ScriptedBackend {
    fn wait_for_action<'a>(
        &'a self,
        action: &'a ActionHandle,
        deadline: Deadline,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(BackendCall::Wait {
                command: action.command.clone(),
            });
            state.deadlines.push((action.command.clone(), deadline));
            if state.failing_actions.contains(&action.command) {
                return Err(ScriptedBackendError::ActionFailed(action.command.clone()));
            }
            Ok(())
        })
    }
}

/// A call recorded by [`FakeHost`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostCall {
    /// Hostname lookup.
    Hostname,
    /// Mount attempt.
    Mount {
        /// Source device.
        device: Utf8PathBuf,
        /// Mountpoint.
        target: Utf8PathBuf,
        /// Filesystem attempted.
        filesystem: Filesystem,
    },
    /// Unmount.
    Unmount(Utf8PathBuf),
    /// Ownership change.
    Chown {
        /// Path changed.
        path: Utf8PathBuf,
        /// Owner.
        uid: u32,
        /// Group.
        gid: u32,
    },
    /// Directory creation.
    CreateDirAll(Utf8PathBuf),
    /// Directory removal.
    RemoveDir(Utf8PathBuf),
    /// Temporary directory creation.
    CreateTempDir(Utf8PathBuf),
    /// External command.
    Run {
        /// Program name.
        program: String,
        /// Arguments, lossily converted.
        args: Vec<String>,
    },
}

#[derive(Debug, Default)]
struct HostState {
    hostname: Option<String>,
    calls: Vec<HostCall>,
    failing_filesystems: BTreeSet<String>,
    fail_chown: bool,
    fail_unmount: bool,
    fail_remove_dir: bool,
    mkfs_failure: Option<String>,
    mounts: Vec<MountEntry>,
    dirs: BTreeSet<Utf8PathBuf>,
    device_entries: BTreeMap<Utf8PathBuf, Vec<DirEntryInfo>>,
    canonical: BTreeMap<Utf8PathBuf, Utf8PathBuf>,
    temp_counter: u32,
}

/// In-memory host that records calls and keeps a simulated mount table.
///
/// Mounting a device exposes its seeded entries (by default a single
/// `lost+found` directory) at the target.
#[derive(Clone, Debug, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    /// Creates a host named `hostname`.
    #[must_use]
    pub fn new(hostname: &str) -> Self {
        let host = Self::default();
        lock(&host.state).hostname = Some(hostname.to_owned());
        host
    }

    /// Creates a host whose hostname lookup fails.
    #[must_use]
    pub fn without_hostname() -> Self {
        Self::default()
    }

    /// Makes mounts with `filesystem` fail.
    pub fn fail_mount(&self, filesystem: Filesystem) {
        lock(&self.state)
            .failing_filesystems
            .insert(filesystem.as_str().to_owned());
    }

    /// Makes every `chown` fail.
    pub fn fail_chown(&self) {
        lock(&self.state).fail_chown = true;
    }

    /// Makes every unmount fail.
    pub fn fail_unmount(&self) {
        lock(&self.state).fail_unmount = true;
    }

    /// Makes every directory removal fail.
    pub fn fail_remove_dir(&self) {
        lock(&self.state).fail_remove_dir = true;
    }

    /// Makes `mkfs.*` exit with status 1 and `stderr`.
    pub fn fail_mkfs(&self, stderr: &str) {
        lock(&self.state).mkfs_failure = Some(stderr.to_owned());
    }

    /// Seeds an existing mount.
    pub fn add_mount(&self, source: &str, target: &str) {
        lock(&self.state).mounts.push(MountEntry {
            source: source.to_owned(),
            target: Utf8PathBuf::from(target),
            fstype: String::from("ext4"),
        });
    }

    /// Seeds the entries exposed when `device` is mounted.
    pub fn set_device_entries(&self, device: &str, entries: Vec<DirEntryInfo>) {
        lock(&self.state)
            .device_entries
            .insert(Utf8PathBuf::from(device), entries);
    }

    /// Seeds a symlink resolution.
    pub fn add_canonical(&self, path: &str, canonical: &str) {
        lock(&self.state)
            .canonical
            .insert(Utf8PathBuf::from(path), Utf8PathBuf::from(canonical));
    }

    /// Snapshot of recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.state).calls.clone()
    }

    /// Directories that currently exist.
    #[must_use]
    pub fn dirs(&self) -> Vec<Utf8PathBuf> {
        lock(&self.state).dirs.iter().cloned().collect()
    }

    /// Current mount targets.
    #[must_use]
    pub fn mounted_targets(&self) -> Vec<Utf8PathBuf> {
        lock(&self.state)
            .mounts
            .iter()
            .map(|entry| entry.target.clone())
            .collect()
    }

    /// Programs run so far, rendered as `program arg...`.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Run { program, args } => {
                    let mut parts = vec![program];
                    parts.extend(args);
                    Some(parts.join(" "))
                }
                _ => None,
            })
            .collect()
    }
}

fn lost_and_found() -> Vec<DirEntryInfo> {
    vec![DirEntryInfo {
        name: String::from("lost+found"),
        is_dir: true,
    }]
}

impl Host for FakeHost {
    fn hostname(&self) -> Result<String, HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Hostname);
        state.hostname.clone().ok_or_else(|| HostError::Hostname {
            message: String::from("hostname unavailable"),
        })
    }

    fn mount(
        &self,
        device: &Utf8Path,
        target: &Utf8Path,
        filesystem: Filesystem,
        _options: Option<&str>,
    ) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            filesystem,
        });
        if state.failing_filesystems.contains(filesystem.as_str()) {
            return Err(HostError::Mount {
                device: device.to_path_buf(),
                target: target.to_path_buf(),
                filesystem,
                message: String::from("wrong fs type"),
            });
        }
        state.mounts.push(MountEntry {
            source: device.as_str().to_owned(),
            target: target.to_path_buf(),
            fstype: filesystem.as_str().to_owned(),
        });
        Ok(())
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Unmount(target.to_path_buf()));
        if state.fail_unmount {
            return Err(HostError::Unmount {
                target: target.to_path_buf(),
                message: String::from("device busy"),
            });
        }
        let before = state.mounts.len();
        state.mounts.retain(|entry| entry.target != target);
        if state.mounts.len() == before {
            return Err(HostError::Unmount {
                target: target.to_path_buf(),
                message: String::from("not mounted"),
            });
        }
        Ok(())
    }

    fn chown(&self, path: &Utf8Path, uid: u32, gid: u32) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Chown {
            path: path.to_path_buf(),
            uid,
            gid,
        });
        if state.fail_chown {
            return Err(HostError::Chown {
                path: path.to_path_buf(),
                uid,
                gid,
                message: String::from("operation not permitted"),
            });
        }
        Ok(())
    }

    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::CreateDirAll(path.to_path_buf()));
        state.dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn remove_dir(&self, path: &Utf8Path) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::RemoveDir(path.to_path_buf()));
        if state.fail_remove_dir || !state.dirs.remove(path) {
            return Err(HostError::Io {
                path: path.to_path_buf(),
                message: String::from("cannot remove directory"),
            });
        }
        Ok(())
    }

    fn create_temp_dir(&self) -> Result<Utf8PathBuf, HostError> {
        let mut state = lock(&self.state);
        state.temp_counter += 1;
        let path = Utf8PathBuf::from(format!("/tmp/mnt-fake-{}", state.temp_counter));
        state.calls.push(HostCall::CreateTempDir(path.clone()));
        state.dirs.insert(path.clone());
        Ok(path)
    }

    fn read_dir(&self, path: &Utf8Path) -> Result<Vec<DirEntryInfo>, HostError> {
        let state = lock(&self.state);
        let mounted = state
            .mounts
            .iter()
            .rev()
            .find(|entry| entry.target == path)
            .map(|entry| Utf8PathBuf::from(&entry.source));
        Ok(mounted.map_or_else(Vec::new, |device| {
            state
                .device_entries
                .get(&device)
                .cloned()
                .unwrap_or_else(lost_and_found)
        }))
    }

    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, HostError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Run {
            program: program.to_owned(),
            args: args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
        });
        let failure = state
            .mkfs_failure
            .clone()
            .filter(|_| program.starts_with("mkfs."));
        Ok(failure.map_or_else(
            || CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            },
            |stderr| CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr,
            },
        ))
    }

    fn mount_table(&self) -> Result<MountTable, HostError> {
        Ok(MountTable::new(lock(&self.state).mounts.clone()))
    }

    fn canonicalize(&self, path: &Utf8Path) -> Result<Utf8PathBuf, HostError> {
        lock(&self.state)
            .canonical
            .get(path)
            .cloned()
            .ok_or_else(|| HostError::Io {
                path: path.to_path_buf(),
                message: String::from("no such file or directory"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets `pairs` and removes `cleared` while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)], cleared: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len() + cleared.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in cleared {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
