//! Local host operations: mounting, ownership, directories and processes.
//!
//! [`Host`] is the seam between the mount manager and the kernel. The
//! production implementation is [`LinuxHost`]; tests substitute
//! [`crate::test_support::FakeHost`].

mod error;
mod filesystem;
mod table;

use std::ffi::OsString;
use std::io;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use nix::mount::{MsFlags, MntFlags};
use uuid::Uuid;

pub use error::{HostError, MountAttempt};
pub use filesystem::{Filesystem, MOUNT_PRIORITY, UnknownFilesystem};
pub use table::{MountEntry, MountTable};

const MOUNT_TABLE_DIR: &str = "/proc/self";
const MOUNT_TABLE_FILE: &str = "mounts";

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Name and kind of a directory entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirEntryInfo {
    /// Entry name without its parent path.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Abstraction over the local operating system.
///
/// Every method blocks; async callers run them on the blocking pool.
pub trait Host: Clone + Send + Sync + 'static {
    /// Returns the short hostname of this machine.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Hostname`] when the name cannot be read.
    fn hostname(&self) -> Result<String, HostError>;

    /// Mounts `device` at `target` as `filesystem`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Mount`] when the kernel rejects the mount.
    fn mount(
        &self,
        device: &Utf8Path,
        target: &Utf8Path,
        filesystem: Filesystem,
        options: Option<&str>,
    ) -> Result<(), HostError>;

    /// Unmounts whatever is mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Unmount`] when the kernel rejects the unmount.
    fn unmount(&self, target: &Utf8Path) -> Result<(), HostError>;

    /// Changes ownership of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Chown`] on failure.
    fn chown(&self, path: &Utf8Path, uid: u32, gid: u32) -> Result<(), HostError>;

    /// Creates `path` and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure.
    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), HostError>;

    /// Removes the empty directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure, including when the directory
    /// is not empty.
    fn remove_dir(&self, path: &Utf8Path) -> Result<(), HostError>;

    /// Creates a fresh private directory under the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure.
    fn create_temp_dir(&self) -> Result<Utf8PathBuf, HostError>;

    /// Lists the entries of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure.
    fn read_dir(&self, path: &Utf8Path) -> Result<Vec<DirEntryInfo>, HostError>;

    /// Runs `program` to completion, capturing its output.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Spawn`] when the program cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, HostError>;

    /// Reads the current mount table.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] when the table cannot be read.
    fn mount_table(&self) -> Result<MountTable, HostError>;

    /// Resolves symlinks in `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] when the path does not resolve.
    fn canonicalize(&self, path: &Utf8Path) -> Result<Utf8PathBuf, HostError>;
}

/// Real host backed by Linux syscalls and `/proc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinuxHost;

impl LinuxHost {
    fn open_parent(path: &Utf8Path) -> Result<(Dir, &str), HostError> {
        let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
        let name = path.file_name().ok_or_else(|| HostError::Io {
            path: path.to_path_buf(),
            message: String::from("path has no final component"),
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| HostError::io(parent, &err))?;
        Ok((dir, name))
    }
}

impl Host for LinuxHost {
    fn hostname(&self) -> Result<String, HostError> {
        let raw = nix::unistd::gethostname().map_err(|err| HostError::Hostname {
            message: err.to_string(),
        })?;
        raw.into_string().map_err(|raw_name| HostError::Hostname {
            message: format!("hostname {raw_name:?} is not valid UTF-8"),
        })
    }

    fn mount(
        &self,
        device: &Utf8Path,
        target: &Utf8Path,
        filesystem: Filesystem,
        options: Option<&str>,
    ) -> Result<(), HostError> {
        nix::mount::mount(
            Some(device.as_std_path()),
            target.as_std_path(),
            Some(filesystem.as_str()),
            MsFlags::empty(),
            options,
        )
        .map_err(|err| HostError::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            filesystem,
            message: err.to_string(),
        })
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), HostError> {
        nix::mount::umount2(target.as_std_path(), MntFlags::empty()).map_err(|err| {
            HostError::Unmount {
                target: target.to_path_buf(),
                message: err.to_string(),
            }
        })
    }

    fn chown(&self, path: &Utf8Path, uid: u32, gid: u32) -> Result<(), HostError> {
        std::os::unix::fs::chown(path.as_std_path(), Some(uid), Some(gid)).map_err(|err| {
            HostError::Chown {
                path: path.to_path_buf(),
                uid,
                gid,
                message: err.to_string(),
            }
        })
    }

    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), HostError> {
        Dir::create_ambient_dir_all(path, ambient_authority())
            .map_err(|err| HostError::io(path, &err))
    }

    fn remove_dir(&self, path: &Utf8Path) -> Result<(), HostError> {
        let (dir, name) = Self::open_parent(path)?;
        dir.remove_dir(name).map_err(|err| HostError::io(path, &err))
    }

    fn create_temp_dir(&self) -> Result<Utf8PathBuf, HostError> {
        let base = Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|path| {
            HostError::Io {
                path: Utf8PathBuf::from(path.to_string_lossy().into_owned()),
                message: String::from("temporary directory is not valid UTF-8"),
            }
        })?;
        let dir = Dir::open_ambient_dir(&base, ambient_authority())
            .map_err(|err| HostError::io(&base, &err))?;
        let name = format!("mnt-{}", Uuid::new_v4().simple());
        dir.create_dir(&name)
            .map_err(|err| HostError::io(base.join(&name), &err))?;
        Ok(base.join(name))
    }

    fn read_dir(&self, path: &Utf8Path) -> Result<Vec<DirEntryInfo>, HostError> {
        let dir = Dir::open_ambient_dir(path, ambient_authority())
            .map_err(|err| HostError::io(path, &err))?;
        let entries = dir.entries().map_err(|err| HostError::io(path, &err))?;
        entries
            .map(|entry| {
                let entry = entry.map_err(|err| HostError::io(path, &err))?;
                let name = entry.file_name().map_err(|err| HostError::io(path, &err))?;
                let is_dir = entry
                    .file_type()
                    .map_err(|err| HostError::io(path.join(&name), &err))?
                    .is_dir();
                Ok(DirEntryInfo { name, is_dir })
            })
            .collect()
    }

    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, HostError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| HostError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn mount_table(&self) -> Result<MountTable, HostError> {
        let path = Utf8Path::new(MOUNT_TABLE_DIR).join(MOUNT_TABLE_FILE);
        let dir = Dir::open_ambient_dir(MOUNT_TABLE_DIR, ambient_authority())
            .map_err(|err| HostError::io(MOUNT_TABLE_DIR, &err))?;
        let contents = dir
            .read_to_string(MOUNT_TABLE_FILE)
            .map_err(|err| HostError::io(&path, &err))?;
        Ok(MountTable::parse(&contents))
    }

    fn canonicalize(&self, path: &Utf8Path) -> Result<Utf8PathBuf, HostError> {
        path.canonicalize_utf8().map_err(|err: io::Error| HostError::io(path, &err))
    }
}
