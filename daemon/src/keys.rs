/// Symbolic key names → Windows virtual-key codes.
///
/// Supported names (case-insensitive):
/// - Modifiers: `Ctrl`/`Control`, `Shift`, `Alt`, `Win`/`Windows`.
/// - Function keys `F1`–`F12`.
/// - Navigation and editing keys: `Esc`/`Escape`, `Tab`, `Enter`/`Return`, `Space`,
///   `Backspace`, `Delete`/`Del`, `Insert`/`Ins`, `Home`, `End`, `PageUp`/`PgUp`,
///   `PageDown`/`PgDn`, `Up`, `Down`, `Left`, `Right`.
/// - A single ASCII letter `A`–`Z` or digit `0`–`9`, mapped to its uppercase character code.
use std::fmt;

use crate::error::KeyError;

/// A Windows virtual-key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCode(pub u8);

impl KeyCode {
    pub const CONTROL: KeyCode = KeyCode(0x11);
    pub const SHIFT: KeyCode = KeyCode(0x10);
    /// VK_MENU
    pub const ALT: KeyCode = KeyCode(0x12);
    /// VK_LWIN
    pub const WIN: KeyCode = KeyCode(0x5B);

    pub fn vk(self) -> u16 {
        self.0 as u16
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Resolves one key name. Surrounding whitespace is the caller's business.
pub fn resolve(name: &str) -> Result<KeyCode, KeyError> {
    let vk = match name.to_ascii_uppercase().as_str() {
        "CTRL" | "CONTROL" => 0x11,
        "SHIFT" => 0x10,
        "ALT" => 0x12,
        "WIN" | "WINDOWS" => 0x5B,

        "F1" => 0x70,
        "F2" => 0x71,
        "F3" => 0x72,
        "F4" => 0x73,
        "F5" => 0x74,
        "F6" => 0x75,
        "F7" => 0x76,
        "F8" => 0x77,
        "F9" => 0x78,
        "F10" => 0x79,
        "F11" => 0x7A,
        "F12" => 0x7B,

        "ESC" | "ESCAPE" => 0x1B,
        "TAB" => 0x09,
        "ENTER" | "RETURN" => 0x0D,
        "SPACE" => 0x20,
        "BACKSPACE" => 0x08,
        "DELETE" | "DEL" => 0x2E,
        "INSERT" | "INS" => 0x2D,
        "HOME" => 0x24,
        "END" => 0x23,
        "PAGEUP" | "PGUP" => 0x21,
        "PAGEDOWN" | "PGDN" => 0x22,
        "UP" => 0x26,
        "DOWN" => 0x28,
        "LEFT" => 0x25,
        "RIGHT" => 0x27,

        s if s.len() == 1 => match s.as_bytes()[0] {
            // 'A'=0x41…'Z'=0x5A; '0'=0x30…'9'=0x39 match the VK codes exactly.
            c @ (b'A'..=b'Z' | b'0'..=b'9') => c,
            _ => return Err(KeyError::UnknownKey(name.to_string())),
        },
        _ => return Err(KeyError::UnknownKey(name.to_string())),
    };
    Ok(KeyCode(vk))
}
