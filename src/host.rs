//! The system the controller runs on.
//!
//! [`Host`] is the seam between the fail-safe sequencing and the real
//! kernel, X11 and D-Bus resources. [`LinuxHost`] wires up the real ones.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::config::Config;
use crate::display::{MessageDisplay, X11Display};
use crate::hotplug::{DatagramSource, UeventSocket};
use crate::memlock::{self, Mlock, PinReport};
use crate::mounts::{self, BlockDevice};
use crate::reboot::{RebootHandle, RebootTrigger};

/// Everything the controller acquires from the outside world.
pub trait Host {
    type Hotplug: DatagramSource;
    type Display: MessageDisplay;
    type Reboot: RebootTrigger;

    /// Map the configured mountpoint to its block device.
    fn resolve_mountpoint(&mut self, config: &Config) -> Result<BlockDevice>;

    /// Lock file-backed mappings into memory, best effort.
    fn pin_memory(&mut self, config: &Config) -> Result<PinReport>;

    fn prepare_reboot(&mut self) -> Result<Self::Reboot>;

    /// Set up the message display without showing it yet.
    fn open_display(&mut self, config: &Config) -> Result<Self::Display>;

    fn open_hotplug(&mut self) -> Result<Self::Hotplug>;

    fn now(&self) -> Instant;

    fn sleep(&mut self, duration: Duration);
}

/// The real thing: procfs, netlink, X11 and logind.
pub struct LinuxHost;

impl Host for LinuxHost {
    type Hotplug = UeventSocket;
    type Display = X11Display;
    type Reboot = RebootHandle;

    fn resolve_mountpoint(&mut self, config: &Config) -> Result<BlockDevice> {
        Ok(mounts::resolve_mountpoint(&config.mount_table, &config.mountpoint)?)
    }

    fn pin_memory(&mut self, config: &Config) -> Result<PinReport> {
        Ok(memlock::pin_mapped_files(&config.maps_table, &mut Mlock)?)
    }

    fn prepare_reboot(&mut self) -> Result<RebootHandle> {
        RebootHandle::prepare()
    }

    fn open_display(&mut self, config: &Config) -> Result<X11Display> {
        X11Display::open(config.reboot)
    }

    fn open_hotplug(&mut self) -> Result<UeventSocket> {
        UeventSocket::open().context("Could not listen for hotplug events")
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
