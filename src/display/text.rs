//! Message text and colours.

/// First line, always shown.
pub const VANISHED_MESSAGE: &str =
    "The root file system vanished. This live operating system cannot be used anymore.";

/// Second line, only when a key press reboots.
pub const REBOOT_HINT: &str = "Press any key to reboot.";

/// Lines to draw, top to bottom.
pub fn message_lines(reboot_enabled: bool) -> Vec<&'static str> {
    let mut lines = vec![VANISHED_MESSAGE];
    if reboot_enabled {
        lines.push(REBOOT_HINT);
    }
    lines
}

/// Encode `text` as big-endian UCS-2 for 16-bit X11 text requests.
/// Characters outside the basic multilingual plane become `?`.
pub fn encode_ucs2(text: &str) -> Vec<[u8; 2]> {
    text.chars()
        .map(|c| u16::try_from(u32::from(c)).unwrap_or(u16::from(b'?')).to_be_bytes())
        .collect()
}

/// An 8-bit-per-channel colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Parse `#RRGGBB`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        if digits.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    /// Pixel value on a 24 or 32 bit true colour visual.
    pub fn truecolor_pixel(self) -> u32 {
        0xFF << 24 | u32::from(self.r) << 16 | u32::from(self.g) << 8 | u32::from(self.b)
    }

    /// Channels scaled to 16 bit, as colormap allocation wants them.
    pub fn to_rgb16(self) -> (u16, u16, u16) {
        let scale = |c: u8| (u32::from(c) * 65535 / 255) as u16;
        (scale(self.r), scale(self.g), scale(self.b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reboot_hint_only_with_reboot() {
        assert_eq!(message_lines(false), vec![VANISHED_MESSAGE]);
        assert_eq!(message_lines(true), vec![VANISHED_MESSAGE, REBOOT_HINT]);
    }

    #[test]
    fn test_encode_ucs2() {
        assert_eq!(encode_ucs2("Aä"), vec![[0x00, 0x41], [0x00, 0xe4]]);
        assert_eq!(encode_ucs2("€"), vec![[0x20, 0xac]]);
        assert_eq!(encode_ucs2("🙂"), vec![[0x00, b'?']]);
    }

    #[test]
    fn test_parse_colours() {
        let blue = Rgb::from_hex("#0000A8").unwrap();
        assert_eq!(blue, Rgb { r: 0, g: 0, b: 0xa8 });
        assert_eq!(blue.truecolor_pixel(), 0xFF0000A8);
        assert_eq!(Rgb::from_hex("#FFFFFE").unwrap().to_rgb16(), (65535, 65535, 65278));
    }

    #[test]
    fn test_parse_bad_colours() {
        assert_eq!(Rgb::from_hex("0000A8"), None);
        assert_eq!(Rgb::from_hex("#00A8"), None);
        assert_eq!(Rgb::from_hex("#zz00A8"), None);
    }
}
