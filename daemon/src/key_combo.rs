/// Key-combo synthesis: "Ctrl+Shift+T" → down Ctrl, down Shift, down T, up T, up Shift, up Ctrl.
///
/// Every segment is resolved before anything is injected, so a combo with one bad
/// key name presses nothing at all.  Injection is fire-and-forget: there is no
/// signal that the focused application actually received the input.
use tracing::debug;

use crate::error::KeyError;
use crate::keys::{self, KeyCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    Down,
    Up,
}

/// One synthetic keyboard event. Always flagged as an extended key when injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub code: KeyCode,
    pub direction: KeyDirection,
}

/// The OS keyboard-input injection primitive.
pub trait KeyInjector: Send + Sync {
    /// Injects `strokes` in order.
    fn inject(&self, strokes: &[KeyStroke]);
}

/// Splits `combo` on `+`, trims each segment, drops empty segments and resolves the rest.
pub fn parse_combo(combo: &str) -> Result<Vec<KeyCode>, KeyError> {
    let codes = combo
        .split('+')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(keys::resolve)
        .collect::<Result<Vec<_>, _>>()?;

    if codes.is_empty() {
        return Err(KeyError::EmptyCombo);
    }
    Ok(codes)
}

/// Downs in input order, then ups in strict reverse order.
pub fn stroke_sequence(codes: &[KeyCode]) -> Vec<KeyStroke> {
    let downs = codes.iter().map(|&code| KeyStroke { code, direction: KeyDirection::Down });
    let ups = codes.iter().rev().map(|&code| KeyStroke { code, direction: KeyDirection::Up });
    downs.chain(ups).collect()
}

/// Parses `combo` and, only if every key resolves, injects the full press/release sequence.
pub fn press<K: KeyInjector + ?Sized>(injector: &K, combo: &str) -> Result<Vec<KeyCode>, KeyError> {
    let codes = parse_combo(combo)?;
    let strokes = stroke_sequence(&codes);
    debug!(combo, strokes = strokes.len(), "Injecting key combo");
    injector.inject(&strokes);
    Ok(codes)
}

// ── Windows implementation ────────────────────────────────────────────────────

/// Injects strokes with a single `SendInput` call so no physical input can
/// interleave with the synthetic sequence.
///
/// On non-Windows platforms injection logs a warning and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendInputInjector;

impl KeyInjector for SendInputInjector {
    fn inject(&self, strokes: &[KeyStroke]) {
        #[cfg(windows)]
        imp::send(strokes);

        #[cfg(not(windows))]
        tracing::warn!(strokes = strokes.len(), "Keyboard injection is not supported on this platform");
    }
}

#[cfg(windows)]
mod imp {
    use std::mem;

    use tracing::warn;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYEVENTF_EXTENDEDKEY,
        KEYEVENTF_KEYUP, VIRTUAL_KEY,
    };

    use super::{KeyDirection, KeyStroke};

    fn to_input(stroke: &KeyStroke) -> INPUT {
        let flags = match stroke.direction {
            KeyDirection::Down => KEYEVENTF_EXTENDEDKEY,
            KeyDirection::Up => KEYEVENTF_EXTENDEDKEY | KEYEVENTF_KEYUP,
        };
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(stroke.code.vk()),
                    wScan: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    pub fn send(strokes: &[KeyStroke]) {
        let inputs: Vec<INPUT> = strokes.iter().map(to_input).collect();
        // SendInput returns the number of events it inserted; fewer means UIPI blocked us.
        let sent = unsafe { SendInput(&inputs, mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            warn!(sent, expected = inputs.len(), "SendInput inserted fewer events than requested");
        }
    }
}
