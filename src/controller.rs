//! Fail-safe sequencing.
//!
//! Resolve the device, pin memory, prepare the reboot, block until the
//! device is removed, then show the message and react to input. Every step
//! runs on the calling thread and every setup failure is fatal.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::display::{DisplayEvent, MessageDisplay};
use crate::host::Host;
use crate::hotplug;
use crate::reboot::RebootTrigger;

/// Where the controller is. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailsafeState {
    Idle,
    Armed,
    DeviceResolved,
    MemoryPinned,
    RebootPrepared,
    WaitingForRemoval,
    DeviceRemoved,
    DisplayShown,
    ListeningForInput,
    Rebooting,
    Terminal,
}

/// How [`FailsafeController::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The reboot request went out.
    Rebooted,
    /// The display connection went away while waiting for input.
    DisplayClosed,
}

pub struct FailsafeController<H: Host> {
    config: Config,
    host: H,
    state: FailsafeState,
    history: Vec<FailsafeState>,
}

impl<H: Host> FailsafeController<H> {
    pub fn new(config: Config, host: H) -> Self {
        Self {
            config,
            host,
            state: FailsafeState::Idle,
            history: vec![FailsafeState::Idle],
        }
    }

    pub fn state(&self) -> FailsafeState {
        self.state
    }

    /// Every state visited so far, in order.
    pub fn history(&self) -> &[FailsafeState] {
        &self.history
    }

    /// Run the whole sequence.
    ///
    /// Blocks until the watched device is removed; after that, only returns
    /// once a reboot was requested or the display went away.
    pub fn run(&mut self) -> Result<Outcome> {
        self.config.log();
        self.advance(FailsafeState::Armed);

        let device = self.host.resolve_mountpoint(&self.config)?;
        log::info!(
            "Resolved mountpoint \"{}\" to block device \"{}\"",
            self.config.mountpoint,
            device.name()
        );
        self.advance(FailsafeState::DeviceResolved);

        self.host
            .pin_memory(&self.config)
            .context("Could not pin mapped files into memory")?;
        self.advance(FailsafeState::MemoryPinned);

        let mut reboot = if self.config.reboot {
            let handle = self.host.prepare_reboot()?;
            self.advance(FailsafeState::RebootPrepared);
            Some(handle)
        } else {
            None
        };

        let mut display = self.host.open_display(&self.config)?;

        {
            let mut channel = self.host.open_hotplug()?;
            self.advance(FailsafeState::WaitingForRemoval);
            let event = hotplug::wait_for_removal(&mut channel, &device)?;
            log::info!("Block device {} was removed ({})", device, event.raw_line);
        }
        self.advance(FailsafeState::DeviceRemoved);

        self.respond(&mut display, reboot.as_mut())
    }

    /// Show the message and run the input/timeout decision loop.
    fn respond(
        &mut self,
        display: &mut H::Display,
        mut reboot: Option<&mut H::Reboot>,
    ) -> Result<Outcome> {
        display.show_message().context("Could not show message")?;
        let shown_at = self.host.now();
        self.advance(FailsafeState::DisplayShown);

        if let Some(trigger) = reboot.as_deref_mut() {
            if !self.grab_keyboard(display)? {
                match self.config.fallback_delay() {
                    Some(delay) => {
                        log::warn!(
                            "Could not grab keyboard. Will reboot in {} seconds.",
                            delay.as_secs()
                        );
                        self.host.sleep(delay);
                        log::warn!("Rebooting, {} seconds passed", delay.as_secs());
                        return self.reboot(trigger);
                    }
                    None => {
                        log::warn!(
                            "Could not grab keyboard and no --reboot_fallback_seconds given. \
                             Will not reboot."
                        );
                        reboot = None;
                    }
                }
            }
        }

        self.advance(FailsafeState::ListeningForInput);
        while let Some(event) = display.wait_for_event()? {
            match event {
                DisplayEvent::KeyPress => {
                    let Some(trigger) = reboot.as_deref_mut() else {
                        continue;
                    };
                    let elapsed = self.host.now().saturating_duration_since(shown_at);
                    if elapsed < self.config.debounce {
                        log::debug!("Ignoring key press {:?} after showing the message", elapsed);
                        continue;
                    }
                    return self.reboot(trigger);
                }
                DisplayEvent::Redraw => display.paint()?,
                DisplayEvent::VisibilityChanged { unobscured: false } => display.keep_on_top()?,
                DisplayEvent::Error(msg) => log::warn!("{}", msg),
                DisplayEvent::VisibilityChanged { unobscured: true } | DisplayEvent::Other => {}
            }
        }

        log::info!("Display connection closed");
        Ok(Outcome::DisplayClosed)
    }

    /// Bounded retry: the window manager or a screen locker may hold the
    /// keyboard for a moment.
    fn grab_keyboard(&mut self, display: &mut H::Display) -> Result<bool> {
        for _ in 0..self.config.grab_attempts {
            if display.try_grab_keyboard()? {
                return Ok(true);
            }
            self.host.sleep(self.config.grab_delay);
        }
        Ok(false)
    }

    fn reboot(&mut self, trigger: &mut H::Reboot) -> Result<Outcome> {
        self.advance(FailsafeState::Rebooting);
        trigger.invoke()?;
        self.advance(FailsafeState::Terminal);
        Ok(Outcome::Rebooted)
    }

    fn advance(&mut self, next: FailsafeState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        log::debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }
}
