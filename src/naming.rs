//! Mapping between logical volume names and remote volume names.

/// Maximum length of a remote volume name, in characters.
pub const MAX_NAME_LEN: usize = 64;

/// Applies and strips the configured namespace prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeNamer {
    prefix: String,
}

impl VolumeNamer {
    /// Creates a namer for `prefix` (without the trailing `-`).
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns `<prefix>-<logical>` truncated to [`MAX_NAME_LEN`] characters.
    #[must_use]
    pub fn prefixed(&self, logical: &str) -> String {
        format!("{}-{logical}", self.prefix)
            .chars()
            .take(MAX_NAME_LEN)
            .collect()
    }

    /// Whether `remote` lives in this namer's namespace.
    #[must_use]
    pub fn has_prefix(&self, remote: &str) -> bool {
        self.strip(remote).is_some()
    }

    /// Strips the `<prefix>-` marker. Names outside the namespace are
    /// returned unchanged.
    #[must_use]
    pub fn unprefixed<'a>(&self, remote: &'a str) -> &'a str {
        self.strip(remote).unwrap_or(remote)
    }

    fn strip<'a>(&self, remote: &'a str) -> Option<&'a str> {
        remote
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
    }
}
