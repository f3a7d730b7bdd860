use evdev::{Device, InputEventKind, Key as EvKey};
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::detector::{Key, KeyInput};
use super::source::KeySource;
use crate::error::{DeviceError, Result, ScanError};

/// Keyboard-wedge scanner read straight from its evdev node.
///
/// The device is grabbed while attached so its keystrokes do not also reach
/// the focused window.
pub struct WedgeKeySource {
    path: String,
    cancel: Option<CancellationToken>,
}

impl WedgeKeySource {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cancel: None,
        }
    }

    fn open(&self) -> Result<Device> {
        let mut device = Device::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => ScanError::Device(DeviceError::PermissionDenied {
                device: self.path.clone(),
            }),
            _ => ScanError::Device(DeviceError::Unavailable {
                device: self.path.clone(),
                details: e.to_string(),
            }),
        })?;

        device.grab().map_err(|e| {
            ScanError::Device(DeviceError::Unavailable {
                device: self.path.clone(),
                details: format!("failed to grab: {}", e),
            })
        })?;

        info!(
            "Wedge scanner opened: {} ({})",
            self.path,
            device.name().unwrap_or("Unknown")
        );
        Ok(device)
    }
}

/// Modifier state carried across reads
#[derive(Debug, Default)]
struct Modifiers {
    left_shift: bool,
    right_shift: bool,
    caps_lock: bool,
}

impl Modifiers {
    fn capital(&self) -> bool {
        (self.left_shift || self.right_shift) != self.caps_lock
    }
}

/// Translate one key press; `None` for keys that only change modifier state
fn translate(key: EvKey, value: i32, modifiers: &mut Modifiers) -> Option<Key> {
    match key {
        EvKey::KEY_LEFTSHIFT => {
            modifiers.left_shift = value != 0;
            return None;
        }
        EvKey::KEY_RIGHTSHIFT => {
            modifiers.right_shift = value != 0;
            return None;
        }
        EvKey::KEY_CAPSLOCK => {
            if value == 1 {
                modifiers.caps_lock = !modifiers.caps_lock;
            }
            return None;
        }
        _ => {}
    }

    // presses only, not releases or autorepeat
    if value != 1 {
        return None;
    }

    match key {
        EvKey::KEY_ENTER | EvKey::KEY_KPENTER => Some(Key::Enter),
        EvKey::KEY_ESC => Some(Key::Escape),
        _ => Some(key_to_char(key, modifiers.capital()).map_or(Key::Other, Key::Char)),
    }
}

fn key_to_char(key: EvKey, capital: bool) -> Option<char> {
    let [lower, upper] = match key {
        EvKey::KEY_1 => ['1', '!'],
        EvKey::KEY_2 => ['2', '@'],
        EvKey::KEY_3 => ['3', '#'],
        EvKey::KEY_4 => ['4', '$'],
        EvKey::KEY_5 => ['5', '%'],
        EvKey::KEY_6 => ['6', '^'],
        EvKey::KEY_7 => ['7', '&'],
        EvKey::KEY_8 => ['8', '*'],
        EvKey::KEY_9 => ['9', '('],
        EvKey::KEY_0 => ['0', ')'],
        EvKey::KEY_KP1 => ['1', '1'],
        EvKey::KEY_KP2 => ['2', '2'],
        EvKey::KEY_KP3 => ['3', '3'],
        EvKey::KEY_KP4 => ['4', '4'],
        EvKey::KEY_KP5 => ['5', '5'],
        EvKey::KEY_KP6 => ['6', '6'],
        EvKey::KEY_KP7 => ['7', '7'],
        EvKey::KEY_KP8 => ['8', '8'],
        EvKey::KEY_KP9 => ['9', '9'],
        EvKey::KEY_KP0 => ['0', '0'],
        EvKey::KEY_A => ['a', 'A'],
        EvKey::KEY_B => ['b', 'B'],
        EvKey::KEY_C => ['c', 'C'],
        EvKey::KEY_D => ['d', 'D'],
        EvKey::KEY_E => ['e', 'E'],
        EvKey::KEY_F => ['f', 'F'],
        EvKey::KEY_G => ['g', 'G'],
        EvKey::KEY_H => ['h', 'H'],
        EvKey::KEY_I => ['i', 'I'],
        EvKey::KEY_J => ['j', 'J'],
        EvKey::KEY_K => ['k', 'K'],
        EvKey::KEY_L => ['l', 'L'],
        EvKey::KEY_M => ['m', 'M'],
        EvKey::KEY_N => ['n', 'N'],
        EvKey::KEY_O => ['o', 'O'],
        EvKey::KEY_P => ['p', 'P'],
        EvKey::KEY_Q => ['q', 'Q'],
        EvKey::KEY_R => ['r', 'R'],
        EvKey::KEY_S => ['s', 'S'],
        EvKey::KEY_T => ['t', 'T'],
        EvKey::KEY_U => ['u', 'U'],
        EvKey::KEY_V => ['v', 'V'],
        EvKey::KEY_W => ['w', 'W'],
        EvKey::KEY_X => ['x', 'X'],
        EvKey::KEY_Y => ['y', 'Y'],
        EvKey::KEY_Z => ['z', 'Z'],
        EvKey::KEY_MINUS => ['-', '_'],
        EvKey::KEY_EQUAL => ['=', '+'],
        EvKey::KEY_DOT => ['.', '>'],
        EvKey::KEY_COMMA => [',', '<'],
        EvKey::KEY_SLASH => ['/', '?'],
        EvKey::KEY_SPACE => [' ', ' '],
        _ => return None,
    };

    Some(if capital { upper } else { lower })
}

impl KeySource for WedgeKeySource {
    fn name(&self) -> &'static str {
        "wedge"
    }

    fn attach(&mut self, keys: mpsc::UnboundedSender<KeyInput>) -> Result<()> {
        self.detach();
        let mut device = self.open()?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let path = self.path.clone();
        self.cancel = Some(cancel);

        // fetch_events blocks until the scanner sends something, so a detach
        // takes effect on the next read
        task::spawn_blocking(move || {
            let mut modifiers = Modifiers::default();
            let mut consecutive_errors = 0;
            const MAX_CONSECUTIVE_ERRORS: u32 = 5;

            'read: while !token.is_cancelled() {
                let events = match device.fetch_events() {
                    Ok(events) => {
                        consecutive_errors = 0;
                        events
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            error!("Giving up on wedge scanner {}: {}", path, e);
                            break;
                        }
                        warn!("Error reading from wedge scanner {}: {}", path, e);
                        continue;
                    }
                };

                for event in events {
                    if token.is_cancelled() {
                        break 'read;
                    }
                    if let InputEventKind::Key(key) = event.kind() {
                        if let Some(key) = translate(key, event.value(), &mut modifiers) {
                            if keys.send(KeyInput::new(key)).is_err() {
                                break 'read;
                            }
                        }
                    }
                }
            }

            if let Err(e) = device.ungrab() {
                debug!("Failed to release wedge scanner {}: {}", path, e);
            }
            debug!("Wedge scanner reader for {} exited", path);
        });

        Ok(())
    }

    fn detach(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

impl Drop for WedgeKeySource {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_and_caps_lock() {
        let mut modifiers = Modifiers::default();

        assert_eq!(translate(EvKey::KEY_A, 1, &mut modifiers), Some(Key::Char('a')));
        assert_eq!(translate(EvKey::KEY_LEFTSHIFT, 1, &mut modifiers), None);
        assert_eq!(translate(EvKey::KEY_A, 1, &mut modifiers), Some(Key::Char('A')));
        assert_eq!(translate(EvKey::KEY_1, 1, &mut modifiers), Some(Key::Char('!')));
        assert_eq!(translate(EvKey::KEY_LEFTSHIFT, 0, &mut modifiers), None);

        translate(EvKey::KEY_CAPSLOCK, 1, &mut modifiers);
        translate(EvKey::KEY_CAPSLOCK, 0, &mut modifiers);
        assert_eq!(translate(EvKey::KEY_B, 1, &mut modifiers), Some(Key::Char('B')));
    }

    #[test]
    fn test_releases_and_specials() {
        let mut modifiers = Modifiers::default();
        assert_eq!(translate(EvKey::KEY_7, 0, &mut modifiers), None);
        assert_eq!(translate(EvKey::KEY_7, 2, &mut modifiers), None);
        assert_eq!(translate(EvKey::KEY_ENTER, 1, &mut modifiers), Some(Key::Enter));
        assert_eq!(translate(EvKey::KEY_KPENTER, 1, &mut modifiers), Some(Key::Enter));
        assert_eq!(translate(EvKey::KEY_ESC, 1, &mut modifiers), Some(Key::Escape));
        assert_eq!(translate(EvKey::KEY_F1, 1, &mut modifiers), Some(Key::Other));
    }
}
