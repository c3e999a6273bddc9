//! The screen that takes over once the root file system is gone.
//!
//! The controller only needs a narrow capability: show the message, keep it
//! on top, grab the keyboard and hand out input/redraw events. How the
//! message is drawn is up to the implementation.

mod text;
mod x11;

use anyhow::Result;

pub use text::{encode_ucs2, message_lines, Rgb};
pub use x11::X11Display;

/// What the display reports back to the input loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    KeyPress,
    /// (Part of) the window needs to be painted again.
    Redraw,
    VisibilityChanged { unobscured: bool },
    /// The display server reported an error for one of our requests.
    Error(String),
    Other,
}

pub trait MessageDisplay {
    /// Make the fullscreen message visible, on top of everything.
    fn show_message(&mut self) -> Result<()>;

    /// Paint the message again.
    fn paint(&mut self) -> Result<()>;

    /// Raise the message above all other windows.
    fn keep_on_top(&mut self) -> Result<()>;

    /// Try once to grab the keyboard exclusively.
    fn try_grab_keyboard(&mut self) -> Result<bool>;

    /// Block until the next event. `None` once the display connection is
    /// gone.
    fn wait_for_event(&mut self) -> Result<Option<DisplayEvent>>;
}
