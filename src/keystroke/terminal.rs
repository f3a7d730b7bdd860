use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::detector::{Key, KeyInput};
use super::source::KeySource;
use crate::error::{Result, ScanError};

/// Reads keys from the controlling terminal in raw mode.
///
/// Raw mode swallows Ctrl-C, so the source cancels `interrupt` when it sees one.
pub struct TerminalKeySource {
    interrupt: CancellationToken,
    cancel: Option<CancellationToken>,
}

impl TerminalKeySource {
    pub fn new(interrupt: CancellationToken) -> Self {
        Self {
            interrupt,
            cancel: None,
        }
    }
}

fn map_key(code: KeyCode) -> Key {
    match code {
        KeyCode::Char(ch) => Key::Char(ch),
        KeyCode::Enter => Key::Enter,
        KeyCode::Esc => Key::Escape,
        _ => Key::Other,
    }
}

impl KeySource for TerminalKeySource {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn attach(&mut self, keys: mpsc::UnboundedSender<KeyInput>) -> Result<()> {
        self.detach();

        enable_raw_mode().map_err(|e| {
            ScanError::component(
                "terminal".to_string(),
                format!("Failed to enable raw mode: {}", e),
            )
        })?;
        debug!("Raw mode enabled");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interrupt = self.interrupt.clone();
        self.cancel = Some(cancel);

        task::spawn_blocking(move || {
            while !token.is_cancelled() {
                match event::poll(Duration::from_millis(50)) {
                    Ok(true) => {
                        let key_event = match event::read() {
                            Ok(Event::Key(key_event)) if key_event.kind == KeyEventKind::Press => {
                                key_event
                            }
                            Ok(_) => continue,
                            Err(e) => {
                                warn!("Error reading terminal event: {}", e);
                                continue;
                            }
                        };

                        if key_event.modifiers.contains(KeyModifiers::CONTROL)
                            && key_event.code == KeyCode::Char('c')
                        {
                            info!("Ctrl-C pressed - requesting shutdown");
                            interrupt.cancel();
                            break;
                        }

                        if keys.send(KeyInput::new(map_key(key_event.code))).is_err() {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for terminal events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }
        });

        Ok(())
    }

    fn detach(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
            // the poll loop restores the terminal too, but it may be mid-poll
            let _ = disable_raw_mode();
        }
    }
}

impl Drop for TerminalKeySource {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(map_key(KeyCode::Char('7')), Key::Char('7'));
        assert_eq!(map_key(KeyCode::Enter), Key::Enter);
        assert_eq!(map_key(KeyCode::Esc), Key::Escape);
        assert_eq!(map_key(KeyCode::Tab), Key::Other);
    }

    #[test]
    fn test_detach_without_attach() {
        let mut source = TerminalKeySource::new(CancellationToken::new());
        source.detach();
        assert!(source.cancel.is_none());
    }
}
