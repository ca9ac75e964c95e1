//! Local mount manager: formatting, mount fallback and ownership transfer.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{error, info};

use crate::host::{Filesystem, Host, HostError, MountAttempt, MountTable};

/// The only entry tolerated on a filesystem root before ownership transfer.
const LOST_AND_FOUND: &str = "lost+found";

/// Performs device-level work on the local host.
#[derive(Clone, Debug)]
pub struct MountManager<H> {
    host: H,
}

impl<H: Host> MountManager<H> {
    /// Wraps a host implementation.
    #[must_use]
    pub const fn new(host: H) -> Self {
        Self { host }
    }

    /// Borrows the underlying host.
    #[must_use]
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Formats `device` with `filesystem`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Spawn`] when the formatter cannot be started and
    /// [`HostError::CommandFailure`] carrying its stderr when it fails.
    pub fn mkfs(&self, device: &Utf8Path, filesystem: Filesystem) -> Result<(), HostError> {
        let program = filesystem.mkfs_program();
        let output = self
            .host
            .run(&program, &[OsString::from(device.as_str())])?;
        if output.is_success() {
            return Ok(());
        }
        error!(%device, %program, stderr = %output.stderr.trim(), "mkfs failed");
        Err(HostError::CommandFailure {
            program,
            status: output.code,
            stderr: output.stderr.trim().to_owned(),
        })
    }

    /// Mounts `device` at `target`, trying each candidate in order and
    /// stopping at the first success.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::AllFilesystemsFailed`] with one attempt per
    /// candidate when none mounts.
    pub fn mount_with_fallback(
        &self,
        device: &Utf8Path,
        target: &Utf8Path,
        candidates: &[Filesystem],
    ) -> Result<Filesystem, HostError> {
        let mut attempts = Vec::with_capacity(candidates.len());
        for &filesystem in candidates {
            match self.host.mount(device, target, filesystem, None) {
                Ok(()) => return Ok(filesystem),
                Err(err) => attempts.push(MountAttempt {
                    filesystem,
                    message: err.to_string(),
                }),
            }
        }
        Err(HostError::AllFilesystemsFailed {
            device: device.to_path_buf(),
            attempts,
        })
    }

    /// Mounts `device` at a private temporary directory, hands its root to
    /// `uid:gid`, then unmounts it again.
    ///
    /// The temporary mount never outlives this call: when the ownership
    /// change fails the unmount still runs before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the mount error when the device cannot be mounted, the
    /// ownership error when the root cannot be handed over, or the unmount
    /// error when the final unmount fails.
    pub fn set_ownership(
        &self,
        device: &Utf8Path,
        filesystem: Filesystem,
        uid: u32,
        gid: u32,
        options: Option<&str>,
    ) -> Result<(), HostError> {
        let scratch = self.host.create_temp_dir()?;

        if let Err(err) = self.host.mount(device, &scratch, filesystem, options) {
            self.discard_scratch(&scratch);
            return Err(err);
        }

        let chowned = self.chown_if_empty(&scratch, uid, gid);
        let unmounted = self.host.unmount(&scratch);

        match (chowned, unmounted) {
            (Err(chown_err), Ok(())) => {
                self.discard_scratch(&scratch);
                Err(chown_err)
            }
            (Err(chown_err), Err(unmount_err)) => {
                error!(%scratch, error = %unmount_err, "failed unmounting after chown error");
                Err(chown_err)
            }
            (Ok(()), Err(unmount_err)) => Err(unmount_err),
            (Ok(()), Ok(())) => {
                self.discard_scratch(&scratch);
                Ok(())
            }
        }
    }

    /// Hands `dir` to `uid:gid` unless it holds anything besides a
    /// `lost+found` directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotEmpty`] when other entries exist, leaving
    /// ownership untouched, or the host error from listing or `chown`.
    pub fn chown_if_empty(&self, dir: &Utf8Path, uid: u32, gid: u32) -> Result<(), HostError> {
        let entries = self.host.read_dir(dir)?;
        if entries
            .iter()
            .any(|entry| !(entry.is_dir && entry.name == LOST_AND_FOUND))
        {
            return Err(HostError::NotEmpty {
                path: dir.to_path_buf(),
            });
        }
        self.host.chown(dir, uid, gid)?;
        info!(%dir, uid, gid, "changed ownership of volume root");
        Ok(())
    }

    /// Looks up where `device` is mounted, matching either the path as given
    /// or its canonical form.
    ///
    /// # Errors
    ///
    /// Returns the host error when the mount table cannot be read.
    pub fn mountpoint_of(&self, device: &Utf8Path) -> Result<Option<Utf8PathBuf>, HostError> {
        let table = self.host.mount_table()?;
        Ok(self.lookup(&table, device))
    }

    /// Resolves `device` against an already captured mount table.
    #[must_use]
    pub fn lookup(&self, table: &MountTable, device: &Utf8Path) -> Option<Utf8PathBuf> {
        if let Some(found) = table.mountpoint_of(device) {
            return Some(found.to_path_buf());
        }
        let canonical = self.host.canonicalize(device).ok()?;
        table.mountpoint_of(&canonical).map(Utf8Path::to_path_buf)
    }

    /// Reads the current mount table.
    ///
    /// # Errors
    ///
    /// Returns the host error when the table cannot be read.
    pub fn mount_table(&self) -> Result<MountTable, HostError> {
        self.host.mount_table()
    }

    /// Unmounts `target`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Unmount`] on failure.
    pub fn unmount(&self, target: &Utf8Path) -> Result<(), HostError> {
        self.host.unmount(target)
    }

    /// Creates `path` and its parents.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure.
    pub fn create_dir_all(&self, path: &Utf8Path) -> Result<(), HostError> {
        self.host.create_dir_all(path)
    }

    /// Removes the empty directory `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure.
    pub fn remove_dir(&self, path: &Utf8Path) -> Result<(), HostError> {
        self.host.remove_dir(path)
    }

    /// Short hostname of this machine.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Hostname`] on failure.
    pub fn hostname(&self) -> Result<String, HostError> {
        self.host.hostname()
    }

    fn discard_scratch(&self, scratch: &Utf8Path) {
        if let Err(err) = self.host.remove_dir(scratch) {
            error!(%scratch, error = %err, "failed removing temporary mountpoint");
        }
    }
}
