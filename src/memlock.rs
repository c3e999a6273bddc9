//! Pinning of file-backed memory mappings.
//!
//! Once the root file system is gone, every page fault on a file-backed
//! mapping (our executable, libc, the X11 and D-Bus code paths) would hit a
//! device that no longer exists. Locking those mappings into RAM up front
//! keeps the code needed to show the message and reboot resident.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PinError {
    #[error("could not read {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid entry in {path}, could not interpret \"{value}\" as hex")]
    BadAddress { path: PathBuf, value: String },

    #[error("invalid entry in {path}, address range \"{range}\" is empty or inverted")]
    InvalidRange { path: PathBuf, range: String },
}

/// Why a mapped-memory table row could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionParseError {
    /// An address is not valid hex.
    BadHex(String),
    /// Start is not below end.
    InvalidRange(String),
}

/// One row of the process's mapped-memory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub permissions: String,
    pub backing_path: Option<PathBuf>,
}

impl MemoryRegion {
    /// Parse one line in `start-end perms offset dev inode pathname` format
    /// (see proc(5)).
    ///
    /// Returns `Ok(None)` for rows that are not file-backed mappings. Fails
    /// when an address is not valid hex or the range is not `start < end`.
    pub fn parse(line: &str) -> Result<Option<Self>, RegionParseError> {
        let mut fields = line.split_whitespace();
        let (Some(range), Some(perms), Some(_offset), Some(_dev), Some(_inode)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Ok(None);
        };
        // The pathname may itself contain spaces
        let pathname = fields.collect::<Vec<_>>().join(" ");
        if pathname.is_empty() {
            return Ok(None);
        }

        let Some((start, end)) = range.split_once('-') else {
            return Err(RegionParseError::BadHex(range.to_string()));
        };
        let hex = |value: &str| {
            u64::from_str_radix(value, 16).map_err(|_| RegionParseError::BadHex(value.to_string()))
        };
        let (start, end) = (hex(start)?, hex(end)?);
        if start >= end {
            return Err(RegionParseError::InvalidRange(range.to_string()));
        }

        Ok(Some(Self {
            start,
            end,
            permissions: perms.to_string(),
            backing_path: Some(PathBuf::from(pathname)),
        }))
    }

    /// Size of the mapping in bytes.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Only mappings of real files with some access are worth locking.
    /// Pseudo paths like `[heap]` and the `---p` guard gaps are skipped.
    pub fn is_pinnable(&self) -> bool {
        let file_backed = self
            .backing_path
            .as_deref()
            .is_some_and(|p| p.is_absolute());
        let accessible = !self.permissions.is_empty() && !self.permissions.starts_with("---");
        file_backed && accessible
    }
}

/// Read and parse a mapped-memory table, keeping only pinnable regions.
pub fn read_regions(path: &Path) -> Result<Vec<MemoryRegion>, PinError> {
    let content = fs::read_to_string(path).map_err(|source| PinError::Table {
        path: path.to_path_buf(),
        source,
    })?;

    let mut regions = Vec::new();
    for line in content.lines() {
        match MemoryRegion::parse(line) {
            Ok(Some(region)) if region.is_pinnable() => regions.push(region),
            Ok(_) => {}
            Err(RegionParseError::BadHex(value)) => {
                return Err(PinError::BadAddress {
                    path: path.to_path_buf(),
                    value,
                })
            }
            Err(RegionParseError::InvalidRange(range)) => {
                return Err(PinError::InvalidRange {
                    path: path.to_path_buf(),
                    range,
                })
            }
        }
    }
    Ok(regions)
}

/// Locks address ranges into physical memory.
pub trait MemoryLocker {
    fn lock(&mut self, start: u64, len: u64) -> io::Result<()>;
}

/// `mlock(2)` on the calling process.
pub struct Mlock;

impl MemoryLocker for Mlock {
    fn lock(&mut self, start: u64, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        // SAFETY: mlock only changes paging behaviour of the range; it never
        // dereferences it, and unmapped ranges are rejected with ENOMEM.
        let ret = unsafe { libc::mlock(start as usize as *const libc::c_void, len) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Outcome of a pinning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinReport {
    /// Total size of all regions locked.
    pub locked_bytes: u64,
    /// Whether the pass stopped early on a failed lock.
    pub incomplete: bool,
}

/// Lock `regions` in order, stopping at the first failure.
///
/// A failed lock is not an error: partial pinning beats none, and nothing
/// here may keep the message from being shown.
pub fn pin_regions<L: MemoryLocker>(regions: &[MemoryRegion], locker: &mut L) -> PinReport {
    let mut report = PinReport::default();
    for region in regions {
        if let Err(e) = locker.lock(region.start, region.size()) {
            let path = region
                .backing_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            log::warn!(
                "mlock({:#x}, {}) (for \"{}\"): {}",
                region.start,
                region.size(),
                path,
                e
            );
            log::warn!(
                "Not all files could be locked into memory. Verify RLIMIT_MEMLOCK is set to \
                 RLIMIT_INFINITY (check ulimit -l)."
            );
            report.incomplete = true;
            break;
        }
        report.locked_bytes += region.size();
    }
    report
}

/// Lock every file-backed mapping listed in `maps_table` into memory.
pub fn pin_mapped_files<L: MemoryLocker>(maps_table: &Path, locker: &mut L) -> Result<PinReport, PinError> {
    let regions = read_regions(maps_table)?;
    let report = pin_regions(&regions, locker);
    log::info!("mlocked {} bytes", report.locked_bytes);
    Ok(report)
}
