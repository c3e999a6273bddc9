//! X11 fullscreen message window.
//!
//! Everything that needs the file system (connecting, fonts, colours) happens
//! in [`X11Display::open`]. The message is rendered once into a pixmap that
//! is tiled across the screen on every paint.

use std::io;

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::errors::{ConnectionError, ReplyError};
use x11rb::protocol::xproto::{
    AtomEnum, ChangeGCAux, Char2b, ConfigureWindowAux, ConnectionExt as _, CreateGCAux,
    CreateWindowAux, EventMask, Font, Gcontext, GrabMode, GrabStatus, Pixmap, PropMode,
    Rectangle, Screen, StackMode, Visibility, Window, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::text::{encode_ucs2, message_lines, Rgb};
use super::{DisplayEvent, MessageDisplay};

const WINDOW_NAME: &str = "root-vanished";
const FONT_PATTERN: &str = "-misc-fixed-bold-r-normal--18-*-iso10646-1";
const BACKGROUND: &str = "#0000A8";
const FOREGROUND: &str = "#FFFFFE";

const MESSAGE_WIDTH: u16 = 1024;
const TEXT_X: i16 = 20;

pub struct X11Display {
    conn: RustConnection,
    root: Window,
    window: Window,
    pixmap: Pixmap,
    gc: Gcontext,
    screen_width: u16,
    screen_height: u16,
    message_width: u16,
    message_height: u16,
}

impl X11Display {
    /// Connect to the default display and prepare the (still unmapped)
    /// message window.
    pub fn open(reboot_enabled: bool) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("Cannot open display")?;
        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .cloned()
            .with_context(|| format!("X11 screen {} does not exist", screen_num))?;

        let background = colorpixel(&conn, &screen, BACKGROUND)?;
        let foreground = colorpixel(&conn, &screen, FOREGROUND)?;

        let window = conn.generate_id()?;
        let events = EventMask::EXPOSURE
            | EventMask::KEY_PRESS
            | EventMask::KEY_RELEASE
            | EventMask::VISIBILITY_CHANGE
            | EventMask::STRUCTURE_NOTIFY;
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            screen.root,
            0,
            0,
            screen.width_in_pixels,
            screen.height_in_pixels,
            0,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::new()
                .background_pixel(background)
                .override_redirect(1)
                .event_mask(events),
        )?;
        conn.change_property8(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            WINDOW_NAME.as_bytes(),
        )?;

        let (font, font_height) = open_font(&conn, FONT_PATTERN)?;
        let message_height = 2 * (font_height + 8);

        let pixmap = conn.generate_id()?;
        conn.create_pixmap(screen.root_depth, pixmap, window, MESSAGE_WIDTH, message_height)?;
        let gc = conn.generate_id()?;
        conn.create_gc(gc, pixmap, &CreateGCAux::new().font(font).foreground(background))?;
        conn.poly_fill_rectangle(
            pixmap,
            gc,
            &[Rectangle {
                x: 0,
                y: 0,
                width: MESSAGE_WIDTH,
                height: message_height,
            }],
        )?;
        conn.change_gc(gc, &ChangeGCAux::new().foreground(foreground).background(background))?;

        let line_height = i16::try_from(font_height + 2).context("X11 font too large")?;
        for (i, line) in message_lines(reboot_enabled).into_iter().enumerate() {
            let text: Vec<Char2b> = encode_ucs2(line)
                .into_iter()
                .map(|[byte1, byte2]| Char2b { byte1, byte2 })
                .collect();
            // y is the font baseline
            let baseline = line_height * (i as i16 + 1);
            conn.image_text16(pixmap, gc, TEXT_X, baseline, &text)?;
        }

        // Make sure the window is fully set up before the root goes away
        conn.sync().context("X11 setup failed")?;

        Ok(Self {
            conn,
            root: screen.root,
            window,
            pixmap,
            gc,
            screen_width: screen.width_in_pixels,
            screen_height: screen.height_in_pixels,
            message_width: MESSAGE_WIDTH,
            message_height,
        })
    }
}

impl MessageDisplay for X11Display {
    fn show_message(&mut self) -> Result<()> {
        self.conn.map_window(self.window)?;
        self.keep_on_top()?;
        self.paint()
    }

    fn paint(&mut self) -> Result<()> {
        let screen = (self.screen_width, self.screen_height);
        let tile = (self.message_width, self.message_height);
        for (x, y) in tile_origins(screen, tile) {
            self.conn.copy_area(
                self.pixmap,
                self.window,
                self.gc,
                0,
                0,
                x,
                y,
                self.message_width,
                self.message_height,
            )?;
        }
        self.conn.flush()?;
        Ok(())
    }

    fn keep_on_top(&mut self) -> Result<()> {
        self.conn.configure_window(
            self.window,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn try_grab_keyboard(&mut self) -> Result<bool> {
        let cookie = self.conn.grab_keyboard(
            true,
            self.root,
            x11rb::CURRENT_TIME,
            GrabMode::ASYNC,
            GrabMode::ASYNC,
        )?;
        match cookie.reply() {
            Ok(reply) => Ok(reply.status == GrabStatus::SUCCESS),
            Err(ReplyError::X11Error(_)) => Ok(false),
            Err(e) => Err(e).context("Lost connection to X11 display"),
        }
    }

    fn wait_for_event(&mut self) -> Result<Option<DisplayEvent>> {
        let event = match self.conn.wait_for_event() {
            Ok(event) => event,
            Err(ConnectionError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(e) => return Err(e).context("Lost connection to X11 display"),
        };

        Ok(Some(match event {
            Event::KeyPress(_) => DisplayEvent::KeyPress,
            Event::Expose(_) => DisplayEvent::Redraw,
            Event::VisibilityNotify(ev) => DisplayEvent::VisibilityChanged {
                unobscured: ev.state == Visibility::UNOBSCURED,
            },
            Event::Error(e) => DisplayEvent::Error(format!(
                "X11 error {:?} received for sequence {:#x}",
                e.error_kind, e.sequence
            )),
            _ => DisplayEvent::Other,
        }))
    }
}

/// Top-left corners of the message tiles covering the screen. X11
/// coordinates are signed 16 bit, so tiling stops where they would wrap.
fn tile_origins(screen: (u16, u16), tile: (u16, u16)) -> impl Iterator<Item = (i16, i16)> {
    let axis = |len: u16, step: u16| {
        (0..len)
            .step_by(usize::from(step.max(1)))
            .map_while(|v| i16::try_from(v).ok())
    };
    axis(screen.0, tile.0).flat_map(move |x| axis(screen.1, tile.1).map(move |y| (x, y)))
}

/// Resolve a `#RRGGBB` colour to a pixel value for `screen`.
fn colorpixel(conn: &RustConnection, screen: &Screen, hex: &str) -> Result<u32> {
    let color = Rgb::from_hex(hex).with_context(|| format!("Invalid colour \"{}\"", hex))?;
    // True colour needs no roundtrip to the server
    if screen.root_depth == 24 || screen.root_depth == 32 {
        return Ok(color.truecolor_pixel());
    }
    let (r, g, b) = color.to_rgb16();
    let reply = conn
        .alloc_color(screen.default_colormap, r, g, b)?
        .reply()
        .context("Could not allocate X11 color")?;
    Ok(reply.pixel)
}

/// Open a core font and return it together with its height in pixels.
fn open_font(conn: &RustConnection, pattern: &str) -> Result<(Font, u16)> {
    let font = conn.generate_id()?;
    conn.open_font(font, pattern.as_bytes())?
        .check()
        .with_context(|| format!("Could not open X11 font by pattern \"{}\"", pattern))?;
    let info = conn
        .query_font(font)?
        .reply()
        .with_context(|| format!("Could not query X11 font \"{}\"", pattern))?;
    let height = i32::from(info.font_ascent) + i32::from(info.font_descent);
    let height = u16::try_from(height)
        .with_context(|| format!("X11 font \"{}\" reports height {}", pattern, height))?;
    Ok((font, height))
}
