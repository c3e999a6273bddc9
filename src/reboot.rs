//! Reboot through systemd-logind.
//!
//! The bus connection and the request are set up while the root file system
//! is still around. Invoking the reboot later only writes the prepared
//! message to the already open socket.

use anyhow::{bail, Context, Result};
use zbus::blocking::Connection;
use zbus::Message;

const LOGIN1_DESTINATION: &str = "org.freedesktop.login1";
const LOGIN1_PATH: &str = "/org/freedesktop/login1";
const LOGIN1_INTERFACE: &str = "org.freedesktop.login1.Manager";

/// Something that can reboot the machine once preparation is done.
pub trait RebootTrigger {
    /// Issue the reboot request. No further negotiation happens here.
    fn invoke(&mut self) -> Result<()>;
}

/// A prepared `org.freedesktop.login1.Manager.Reboot(true)` call.
pub struct RebootHandle {
    conn: Connection,
    request: Option<Message>,
}

impl RebootHandle {
    /// Connect to the system bus and build the reboot request.
    pub fn prepare() -> Result<Self> {
        let conn = Connection::system().context("Could not connect to system dbus (for --reboot)")?;

        // The argument asks logind to interactively authorize the reboot
        // if policy requires it.
        let request = Message::method(
            None::<&str>,
            Some(LOGIN1_DESTINATION),
            LOGIN1_PATH,
            Some(LOGIN1_INTERFACE),
            "Reboot",
            &(true,),
        )
        .context("Could not build logind Reboot request")?;

        Ok(Self {
            conn,
            request: Some(request),
        })
    }
}

impl RebootTrigger for RebootHandle {
    fn invoke(&mut self) -> Result<()> {
        let Some(request) = self.request.take() else {
            bail!("Reboot was already requested");
        };
        self.conn
            .send_message(request)
            .context("Could not send logind Reboot request")?;
        Ok(())
    }
}
