//! Per-request option resolution with process-wide fallbacks.

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

use crate::config::DriverConfig;
use crate::host::Filesystem;

/// Option keys understood by Create.
pub const SUPPORTED_OPTIONS: [&str; 4] = ["size", "fstype", "uid", "gid"];

/// Resolves an option from the request first, then from process defaults.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OptionResolver {
    defaults: BTreeMap<String, String>,
}

impl OptionResolver {
    /// Builds a resolver from explicit default values.
    #[must_use]
    pub const fn new(defaults: BTreeMap<String, String>) -> Self {
        Self { defaults }
    }

    /// Derives defaults from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &DriverConfig) -> Self {
        let mut defaults = BTreeMap::new();
        defaults.insert(String::from("prefix"), config.name_prefix.trim().to_owned());
        defaults.insert(String::from("fstype"), config.default_fstype.trim().to_owned());
        defaults.insert(String::from("uid"), config.default_uid.to_string());
        defaults.insert(String::from("gid"), config.default_gid.to_string());
        if let Some(size) = config.default_size_gb {
            defaults.insert(String::from("size"), size.to_string());
        }
        Self { defaults }
    }

    /// Returns the request value for `key` when present, otherwise the
    /// process default.
    #[must_use]
    pub fn resolve<'a>(&'a self, key: &str, options: &'a BTreeMap<String, String>) -> Option<&'a str> {
        options
            .get(key)
            .or_else(|| self.defaults.get(key))
            .map(String::as_str)
    }
}

/// Validated Create parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateOptions {
    /// Volume size in GB.
    pub size_gb: u32,
    /// Filesystem the volume ends up with.
    pub filesystem: Filesystem,
    /// Set when the control plane formats the volume at creation time.
    pub remote_format: Option<Filesystem>,
    /// Owner applied to the filesystem root.
    pub uid: u32,
    /// Group applied to the filesystem root.
    pub gid: u32,
    /// Option keys that were ignored.
    pub unsupported: Vec<String>,
}

impl CreateOptions {
    /// Resolves and validates the options of a Create request.
    ///
    /// Only an explicit per-request `fstype` of a remotely formattable type
    /// asks the control plane to format; otherwise the device is formatted
    /// locally with the resolved type.
    ///
    /// # Errors
    ///
    /// Returns an [`OptionError`] when `size` is missing or malformed, when
    /// `fstype` is unsupported, or when `uid`/`gid` are not unsigned integers.
    pub fn parse(
        resolver: &OptionResolver,
        options: &BTreeMap<String, String>,
    ) -> Result<Self, OptionError> {
        let unsupported = options
            .keys()
            .filter(|key| !SUPPORTED_OPTIONS.contains(&key.as_str()))
            .cloned()
            .collect();

        let raw_size = resolver
            .resolve("size", options)
            .ok_or(OptionError::MissingSize)?;
        let size_gb = raw_size
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| OptionError::InvalidSize(raw_size.to_owned()))?;

        let raw_fs = resolver
            .resolve("fstype", options)
            .unwrap_or(Filesystem::Ext4.as_str());
        let filesystem = Filesystem::from_str(raw_fs.trim())
            .map_err(|_| OptionError::UnsupportedFilesystem(raw_fs.to_owned()))?;
        let remote_format = options
            .contains_key("fstype")
            .then_some(filesystem)
            .filter(|fs| fs.is_remote_formattable());

        let uid = parse_id(resolver, options, "uid")?;
        let gid = parse_id(resolver, options, "gid")?;

        Ok(Self {
            size_gb,
            filesystem,
            remote_format,
            uid,
            gid,
            unsupported,
        })
    }

    /// Whether ownership must be transferred after formatting.
    #[must_use]
    pub const fn needs_ownership(&self) -> bool {
        self.uid != 0 || self.gid != 0
    }
}

fn parse_id(
    resolver: &OptionResolver,
    options: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<u32, OptionError> {
    let Some(raw) = resolver.resolve(key, options) else {
        return Ok(0);
    };
    raw.trim()
        .parse::<u32>()
        .map_err(|_| OptionError::InvalidId {
            key,
            value: raw.to_owned(),
        })
}

/// Validation failures for Create options.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OptionError {
    /// No `size` in the request and no process default.
    #[error("size is required: pass -o size=<GB> or configure a default size")]
    MissingSize,
    /// `size` is not a positive integer.
    #[error("size {0:?} is not a positive integer number of GB")]
    InvalidSize(String),
    /// `fstype` is not a supported filesystem.
    #[error("unsupported fstype {0:?} (expected ext4, xfs, ext3 or ext2)")]
    UnsupportedFilesystem(String),
    /// `uid` or `gid` is not an unsigned integer.
    #[error("{key} {value:?} is not an unsigned integer")]
    InvalidId {
        /// Offending option key.
        key: &'static str,
        /// Raw value supplied.
        value: String,
    },
}
