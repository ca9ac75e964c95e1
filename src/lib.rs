//! Docker volume plugin backed by Hetzner Cloud block storage.
//!
//! [`driver::VolumeDriver`] exposes remote volumes as local mounts: it
//! creates, attaches, formats, mounts, unmounts, detaches and deletes them
//! by sequencing control-plane calls ([`backend`], implemented for Hetzner
//! in [`hetzner`]) with device work on this host ([`host`], [`mount`]).
//! [`plugin`] serves the Docker volume plugin protocol on top.

pub mod backend;
pub mod config;
pub mod driver;
pub mod hetzner;
pub mod host;
pub mod mount;
pub mod naming;
pub mod options;
pub mod plugin;
pub mod test_support;

pub use backend::{ActionWaiter, Backend, Deadline, ServerApi, VolumeApi};
pub use config::{ConfigError, DriverConfig};
pub use driver::{DriverError, DriverSettings, VolumeDriver};
pub use hetzner::{HetznerBackend, HetznerError};
pub use host::{Filesystem, Host, HostError, LinuxHost};
pub use plugin::{PluginError, VolumePlugin};
