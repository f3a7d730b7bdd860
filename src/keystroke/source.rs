use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::detector::{FocusTarget, Key, KeyInput};
use crate::error::Result;

/// Where keystrokes come from.
///
/// A source is attached to exactly one detector at a time and must stop
/// delivering keys once detached.
pub trait KeySource: Send {
    fn name(&self) -> &'static str;

    /// Begin delivering keys into `keys`
    fn attach(&mut self, keys: mpsc::UnboundedSender<KeyInput>) -> Result<()>;

    /// Stop delivering keys; safe to call when not attached
    fn detach(&mut self);
}

type SharedSender = Arc<Mutex<Option<mpsc::UnboundedSender<KeyInput>>>>;

/// Key source fed by hand through a [`KeyFeeder`]
#[derive(Default)]
pub struct ChannelKeySource {
    sender: SharedSender,
}

impl ChannelKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for typing into this source
    pub fn feeder(&self) -> KeyFeeder {
        KeyFeeder {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl KeySource for ChannelKeySource {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn attach(&mut self, keys: mpsc::UnboundedSender<KeyInput>) -> Result<()> {
        *self.sender.lock() = Some(keys);
        Ok(())
    }

    fn detach(&mut self) {
        self.sender.lock().take();
    }
}

/// Sends keys into a [`ChannelKeySource`]
#[derive(Clone)]
pub struct KeyFeeder {
    sender: SharedSender,
}

impl KeyFeeder {
    /// Deliver one key; false when the source is not attached
    pub fn send(&self, input: KeyInput) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(input).is_ok(),
            None => false,
        }
    }

    pub fn key(&self, key: Key) -> bool {
        self.send(KeyInput::new(key))
    }

    /// Type every character of `text` at once, without Enter
    pub fn type_str(&self, text: &str, focus: FocusTarget) -> bool {
        text.chars()
            .all(|ch| self.send(KeyInput::focused(Key::Char(ch), focus)))
    }

    pub fn is_attached(&self) -> bool {
        self.sender.lock().is_some()
    }
}
