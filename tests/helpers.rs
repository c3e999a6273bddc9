//! Shared test doubles for root-vanished tests.
//!
//! `FakeHost` plays back a scripted mount table, hotplug datagrams and
//! display events against a manual clock, and records what the controller
//! did through a shared [`Probe`].
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use root_vanished::config::Config;
use root_vanished::display::{DisplayEvent, MessageDisplay};
use root_vanished::host::Host;
use root_vanished::hotplug::{DatagramSource, HotplugError};
use root_vanished::memlock::{self, MemoryLocker, MemoryRegion, PinReport};
use root_vanished::mounts::{self, BlockDevice, ResolveError};
use root_vanished::reboot::RebootTrigger;

/// Everything the fakes observed, shared with the test body.
#[derive(Default)]
pub struct Probe {
    /// Manual clock, as an offset from the test's start.
    pub clock: Cell<Duration>,
    pub shown_at: Cell<Option<Duration>>,
    pub grab_attempts: Cell<u32>,
    pub paints: Cell<u32>,
    pub raises: Cell<u32>,
    pub sleeps: RefCell<Vec<Duration>>,
    pub reboots: RefCell<Vec<Duration>>,
    pub datagrams_left: Cell<usize>,
    pub hotplug_closed: Cell<bool>,
}

impl Probe {
    pub fn now(&self) -> Duration {
        self.clock.get()
    }

    pub fn reboot_count(&self) -> usize {
        self.reboots.borrow().len()
    }
}

/// Hotplug datagrams played back in order.
pub struct ScriptedHotplug {
    datagrams: VecDeque<Vec<u8>>,
    probe: Rc<Probe>,
}

impl ScriptedHotplug {
    pub fn new(datagrams: &[&str], probe: Rc<Probe>) -> Self {
        probe.datagrams_left.set(datagrams.len());
        Self {
            datagrams: datagrams
                .iter()
                .map(|d| {
                    let mut bytes = d.as_bytes().to_vec();
                    bytes.push(0);
                    bytes
                })
                .collect(),
            probe,
        }
    }
}

impl DatagramSource for ScriptedHotplug {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<usize, HotplugError> {
        let Some(datagram) = self.datagrams.pop_front() else {
            return Err(HotplugError::Recv(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "script exhausted",
            )));
        };
        self.probe.datagrams_left.set(self.datagrams.len());
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }
}

impl Drop for ScriptedHotplug {
    fn drop(&mut self) {
        self.probe.hotplug_closed.set(true);
    }
}

/// Display events, each delivered at a fixed delay after the message was
/// shown. Once the script runs out, the display reports itself closed.
pub struct FakeDisplay {
    events: VecDeque<(Duration, DisplayEvent)>,
    grab_succeeds: bool,
    probe: Rc<Probe>,
}

impl MessageDisplay for FakeDisplay {
    fn show_message(&mut self) -> Result<()> {
        self.probe.shown_at.set(Some(self.probe.now()));
        self.probe.raises.set(self.probe.raises.get() + 1);
        self.paint()
    }

    fn paint(&mut self) -> Result<()> {
        self.probe.paints.set(self.probe.paints.get() + 1);
        Ok(())
    }

    fn keep_on_top(&mut self) -> Result<()> {
        self.probe.raises.set(self.probe.raises.get() + 1);
        Ok(())
    }

    fn try_grab_keyboard(&mut self) -> Result<bool> {
        self.probe.grab_attempts.set(self.probe.grab_attempts.get() + 1);
        Ok(self.grab_succeeds)
    }

    fn wait_for_event(&mut self) -> Result<Option<DisplayEvent>> {
        let Some((after, event)) = self.events.pop_front() else {
            return Ok(None);
        };
        let Some(shown_at) = self.probe.shown_at.get() else {
            bail!("event requested before the message was shown");
        };
        let at = shown_at + after;
        if at > self.probe.now() {
            self.probe.clock.set(at);
        }
        Ok(Some(event))
    }
}

pub struct RecordingReboot {
    probe: Rc<Probe>,
}

impl RebootTrigger for RecordingReboot {
    fn invoke(&mut self) -> Result<()> {
        self.probe.reboots.borrow_mut().push(self.probe.now());
        Ok(())
    }
}

/// Locker that succeeds for every region except those starting at one of
/// the `failing` addresses, and remembers what it was asked to lock.
#[derive(Default)]
pub struct FakeLocker {
    pub failing: Vec<u64>,
    pub attempted: Vec<u64>,
}

impl MemoryLocker for FakeLocker {
    fn lock(&mut self, start: u64, _len: u64) -> io::Result<()> {
        self.attempted.push(start);
        if self.failing.contains(&start) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        Ok(())
    }
}

pub fn region(start: u64, end: u64, path: &str) -> MemoryRegion {
    MemoryRegion {
        start,
        end,
        permissions: "r-xp".to_string(),
        backing_path: Some(PathBuf::from(path)),
    }
}

pub fn device(name: &str) -> BlockDevice {
    BlockDevice::from_canonical(PathBuf::from(format!("/dev/{name}"))).expect("valid device")
}

pub struct FakeHost {
    pub mount_table: String,
    pub regions: Vec<MemoryRegion>,
    pub datagrams: Vec<String>,
    pub events: Vec<(Duration, DisplayEvent)>,
    pub grab_succeeds: bool,
    pub probe: Rc<Probe>,
    start: Instant,
}

impl FakeHost {
    pub fn new(mount_table: &str, datagrams: &[&str]) -> Self {
        Self {
            mount_table: mount_table.to_string(),
            regions: vec![region(0x1000, 0x3000, "/usr/bin/root-vanished")],
            datagrams: datagrams.iter().map(|d| d.to_string()).collect(),
            events: Vec::new(),
            grab_succeeds: true,
            probe: Rc::new(Probe::default()),
            start: Instant::now(),
        }
    }

    pub fn with_events(mut self, events: Vec<(Duration, DisplayEvent)>) -> Self {
        self.events = events;
        self
    }

    pub fn with_failing_grab(mut self) -> Self {
        self.grab_succeeds = false;
        self
    }
}

impl Host for FakeHost {
    type Hotplug = ScriptedHotplug;
    type Display = FakeDisplay;
    type Reboot = RecordingReboot;

    fn resolve_mountpoint(&mut self, config: &Config) -> Result<BlockDevice> {
        // Same lookup as the real resolver, minus canonicalization: the
        // scripted devices do not exist on the test machine.
        let source = mounts::find_mount_source(self.mount_table.as_bytes(), &config.mountpoint)?
            .ok_or_else(|| ResolveError::NotMounted {
                mountpoint: config.mountpoint.clone(),
                table: PathBuf::from("<script>"),
            })?;
        Ok(BlockDevice::from_canonical(PathBuf::from(source))?)
    }

    fn pin_memory(&mut self, _config: &Config) -> Result<PinReport> {
        Ok(memlock::pin_regions(&self.regions, &mut FakeLocker::default()))
    }

    fn prepare_reboot(&mut self) -> Result<RecordingReboot> {
        Ok(RecordingReboot {
            probe: Rc::clone(&self.probe),
        })
    }

    fn open_display(&mut self, _config: &Config) -> Result<FakeDisplay> {
        Ok(FakeDisplay {
            events: std::mem::take(&mut self.events).into(),
            grab_succeeds: self.grab_succeeds,
            probe: Rc::clone(&self.probe),
        })
    }

    fn open_hotplug(&mut self) -> Result<ScriptedHotplug> {
        let datagrams: Vec<&str> = self.datagrams.iter().map(String::as_str).collect();
        Ok(ScriptedHotplug::new(&datagrams, Rc::clone(&self.probe)))
    }

    fn now(&self) -> Instant {
        self.start + self.probe.now()
    }

    fn sleep(&mut self, duration: Duration) {
        self.probe.clock.set(self.probe.now() + duration);
        self.probe.sleeps.borrow_mut().push(duration);
    }
}

/// Config with a small keyboard grab budget so failing grabs stay cheap.
pub fn test_config(reboot: bool, reboot_fallback_seconds: i64) -> Config {
    let mut config = Config::new("/", reboot, reboot_fallback_seconds);
    config.grab_attempts = 3;
    config
}
