//! Mountpoint to block device resolution.
//!
//! Scans the mount table for the first entry whose target is exactly the
//! requested mountpoint and canonicalizes its source. Only devices under
//! `/dev/` are accepted: the bare name left after stripping that prefix is
//! what hotplug events get matched against later.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Device namespace every watched block device must live in.
pub const DEVICE_PREFIX: &str = "/dev/";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("could not read mount table {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not find --mountpoint={mountpoint} in {table}")]
    NotMounted { mountpoint: String, table: PathBuf },

    #[error("could not canonicalize mount source {source_path}: {source}")]
    Canonicalize {
        source_path: String,
        #[source]
        source: io::Error,
    },

    #[error("block device {0} does not start with /dev/, cannot match with hotplug events later")]
    OutsideDeviceNamespace(PathBuf),
}

/// One line of the live mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
}

impl MountEntry {
    /// Parse a mount table line. Only the first two whitespace-delimited
    /// fields are looked at.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let source = fields.next()?;
        let target = fields.next()?;
        Some(Self {
            source: source.to_string(),
            target: target.to_string(),
        })
    }
}

/// A block device known to reside under [`DEVICE_PREFIX`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    path: PathBuf,
}

impl BlockDevice {
    /// Validate a canonical device path.
    pub fn from_canonical(path: PathBuf) -> Result<Self, ResolveError> {
        let valid = path
            .to_str()
            .and_then(|p| p.strip_prefix(DEVICE_PREFIX))
            .is_some_and(|name| !name.is_empty());
        if !valid {
            return Err(ResolveError::OutsideDeviceNamespace(path));
        }
        Ok(Self { path })
    }

    /// Full canonical path, e.g. `/dev/sdb1`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Device name with the `/dev/` prefix stripped, e.g. `sdb1`.
    pub fn name(&self) -> &str {
        // from_canonical guarantees a UTF-8 path carrying the prefix
        self.path
            .to_str()
            .and_then(|p| p.strip_prefix(DEVICE_PREFIX))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for BlockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Find the mount source for `mountpoint` in an already opened table.
///
/// The first line whose target equals `mountpoint` wins; there is no
/// prefix or longest-match logic.
pub fn find_mount_source<R: BufRead>(table: R, mountpoint: &str) -> io::Result<Option<String>> {
    for line in table.lines() {
        let line = line?;
        if let Some(entry) = MountEntry::parse(&line) {
            if entry.target == mountpoint {
                return Ok(Some(entry.source));
            }
        }
    }
    Ok(None)
}

/// Resolve `mountpoint` into the block device mounted there, using the mount
/// table at `table_path`.
pub fn resolve_mountpoint(table_path: &Path, mountpoint: &str) -> Result<BlockDevice, ResolveError> {
    log::info!("Finding block device mounted at {}", mountpoint);

    let table_error = |source| ResolveError::Table {
        path: table_path.to_path_buf(),
        source,
    };
    let file = File::open(table_path).map_err(table_error)?;
    let source = find_mount_source(BufReader::new(file), mountpoint)
        .map_err(table_error)?
        .ok_or_else(|| ResolveError::NotMounted {
            mountpoint: mountpoint.to_string(),
            table: table_path.to_path_buf(),
        })?;

    log::info!("Canonicalizing path {}", source);
    let canonical = std::fs::canonicalize(&source).map_err(|e| ResolveError::Canonicalize {
        source_path: source.clone(),
        source: e,
    })?;

    BlockDevice::from_canonical(canonical)
}
