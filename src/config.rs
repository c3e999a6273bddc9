//! Configuration for root-vanished.
//!
//! The user-facing knobs come from the command line; everything else is a
//! fixed tunable with a default that matches the kernel and X11 behaviour
//! the monitor was written against.

use std::path::PathBuf;
use std::time::Duration;

/// Kernel's view of the mount table.
pub const DEFAULT_MOUNT_TABLE: &str = "/proc/mounts";

/// Our own mapped-memory table.
pub const DEFAULT_MAPS_TABLE: &str = "/proc/self/maps";

/// How often to try grabbing the keyboard before giving up.
pub const DEFAULT_GRAB_ATTEMPTS: u32 = 10_000;

/// Pause between two keyboard grab attempts.
pub const DEFAULT_GRAB_DELAY: Duration = Duration::from_micros(50);

/// Key presses earlier than this after the message appeared are residue of
/// the keyboard grab, not a confirmation.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// root-vanished configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Mountpoint to resolve into the block device to watch.
    pub mountpoint: String,
    /// Reboot once the user pressed a key.
    pub reboot: bool,
    /// Seconds after which to reboot anyway when the keyboard cannot be
    /// grabbed. Negative means never.
    pub reboot_fallback_seconds: i64,
    /// Mount table to scan.
    pub mount_table: PathBuf,
    /// Mapped-memory table to pin from.
    pub maps_table: PathBuf,
    pub grab_attempts: u32,
    pub grab_delay: Duration,
    pub debounce: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mountpoint: "/".to_string(),
            reboot: false,
            reboot_fallback_seconds: -1,
            mount_table: PathBuf::from(DEFAULT_MOUNT_TABLE),
            maps_table: PathBuf::from(DEFAULT_MAPS_TABLE),
            grab_attempts: DEFAULT_GRAB_ATTEMPTS,
            grab_delay: DEFAULT_GRAB_DELAY,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

impl Config {
    /// Build a configuration from the command line values, keeping the
    /// default tunables.
    pub fn new(mountpoint: impl Into<String>, reboot: bool, reboot_fallback_seconds: i64) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            reboot,
            reboot_fallback_seconds,
            ..Self::default()
        }
    }

    /// Delay before rebooting when the keyboard grab failed, if configured.
    pub fn fallback_delay(&self) -> Option<Duration> {
        u64::try_from(self.reboot_fallback_seconds)
            .ok()
            .map(Duration::from_secs)
    }

    /// Log the effective configuration.
    pub fn log(&self) {
        log::info!("Configuration:");
        log::info!("  mountpoint: {}", self.mountpoint);
        log::info!("  reboot: {}", self.reboot);
        match self.fallback_delay() {
            Some(delay) => log::info!("  reboot fallback: after {}s", delay.as_secs()),
            None => log::info!("  reboot fallback: never"),
        }
    }
}
