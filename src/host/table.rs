//! Parsing of the kernel mount table.

use camino::{Utf8Path, Utf8PathBuf};

/// A single row of the kernel mount table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountEntry {
    /// Mounted source, usually a block device path.
    pub source: String,
    /// Mountpoint.
    pub target: Utf8PathBuf,
    /// Filesystem type reported by the kernel.
    pub fstype: String,
}

/// Snapshot of the mounts visible to this process.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Builds a table from pre-parsed entries.
    #[must_use]
    pub const fn new(entries: Vec<MountEntry>) -> Self {
        Self { entries }
    }

    /// Parses `/proc/self/mounts` formatted text. Lines with fewer than three
    /// fields are skipped.
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let target = fields.next()?;
                let fstype = fields.next()?;
                Some(MountEntry {
                    source: unescape(source),
                    target: Utf8PathBuf::from(unescape(target)),
                    fstype: fstype.to_owned(),
                })
            })
            .collect();
        Self { entries }
    }

    /// All entries in kernel order.
    #[must_use]
    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// First mountpoint whose source equals `device`.
    #[must_use]
    pub fn mountpoint_of(&self, device: &Utf8Path) -> Option<&Utf8Path> {
        self.entries
            .iter()
            .find(|entry| entry.source == device.as_str())
            .map(|entry| entry.target.as_path())
    }
}

/// Decodes the `\ooo` octal escapes the kernel uses for whitespace and
/// backslashes in mount table fields.
fn unescape(field: &str) -> String {
    let mut decoded = Vec::with_capacity(field.len());
    let mut rest = field.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'\\' {
            if let Some(value) = octal_prefix(tail) {
                decoded.push(value);
                rest = tail.get(3..).unwrap_or_default();
                continue;
            }
        }
        decoded.push(byte);
        rest = tail;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn octal_prefix(bytes: &[u8]) -> Option<u8> {
    let digits = bytes.get(..3)?;
    if !digits.iter().all(|digit| (b'0'..=b'7').contains(digit)) {
        return None;
    }
    let value = digits
        .iter()
        .fold(0_u32, |acc, digit| acc * 8 + u32::from(digit - b'0'));
    u8::try_from(value).ok()
}
