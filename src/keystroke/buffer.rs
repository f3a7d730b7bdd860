use std::time::Duration;
use tokio::time::Instant;

/// How a finished run of keystrokes was typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstClass {
    /// Fast enough to come from a keyboard-wedge scanner
    Scanner,
    /// Typed by hand, or too short to tell
    Human,
}

/// Classify a run of keystrokes by the mean interval between the retained timestamps.
///
/// A run counts as a scanner burst when the mean interval is strictly below
/// `threshold` and at least `min_length` characters were typed. Fewer than two
/// timestamps carry no interval and always classify as human.
pub fn classify_burst(
    timestamps: &[Instant],
    length: usize,
    min_length: usize,
    threshold: Duration,
) -> BurstClass {
    let (first, last) = match (timestamps.first(), timestamps.last()) {
        (Some(first), Some(last)) if timestamps.len() >= 2 => (*first, *last),
        _ => return BurstClass::Human,
    };

    if length < min_length {
        return BurstClass::Human;
    }

    let span = last.saturating_duration_since(first);
    let mean = span / (timestamps.len() as u32 - 1);

    if mean < threshold {
        BurstClass::Scanner
    } else {
        BurstClass::Human
    }
}

/// Characters typed since the last reset, with their arrival times.
///
/// Only the trimmed text is stored: leading whitespace is skipped and trailing
/// whitespace is held back until another character follows it.
#[derive(Debug, Clone)]
pub struct KeystrokeBuffer {
    characters: String,
    /// Whitespace after the last stored character
    pending: String,
    /// Length of the trimmed text, counting characters past the cap
    trimmed: usize,
    typed: usize,
    timestamps: Vec<Instant>,
    since: Option<Instant>,
    max_length: usize,
    window: usize,
}

impl KeystrokeBuffer {
    /// `max_length` caps the stored characters, `window` the retained timestamps
    pub fn new(max_length: usize, window: usize) -> Self {
        Self {
            characters: String::new(),
            pending: String::new(),
            trimmed: 0,
            typed: 0,
            timestamps: Vec::with_capacity(window),
            since: None,
            max_length,
            window: window.max(2),
        }
    }

    /// Append a keystroke. Trimmed text past `max_length` is counted but not stored.
    pub fn push(&mut self, ch: char, now: Instant) {
        self.typed += 1;
        if ch.is_whitespace() {
            if self.trimmed > 0 {
                self.pending.push(ch);
            }
        } else {
            self.trimmed += self.pending.chars().count() + 1;
            if self.trimmed <= self.max_length {
                self.characters.push_str(&self.pending);
                self.characters.push(ch);
            }
            self.pending.clear();
        }

        if self.timestamps.len() == self.window {
            self.timestamps.remove(0);
        }
        self.timestamps.push(now);
        self.since.get_or_insert(now);
    }

    pub fn is_empty(&self) -> bool {
        self.typed == 0
    }

    /// Stored characters, trimmed
    pub fn as_str(&self) -> &str {
        &self.characters
    }

    /// Number of keystrokes since the last reset, including dropped ones
    pub fn typed(&self) -> usize {
        self.typed
    }

    /// Length of the trimmed text, including characters dropped at the cap
    pub fn trimmed_len(&self) -> usize {
        self.trimmed
    }

    /// The trimmed text is longer than `max_length`
    pub fn overflowed(&self) -> bool {
        self.trimmed > self.max_length
    }

    pub fn timestamps(&self) -> &[Instant] {
        &self.timestamps
    }

    /// Arrival time of the first keystroke in the buffer
    pub fn since(&self) -> Option<Instant> {
        self.since
    }

    pub fn reset(&mut self) {
        self.characters.clear();
        self.pending.clear();
        self.trimmed = 0;
        self.typed = 0;
        self.timestamps.clear();
        self.since = None;
    }

    /// Hand out the stored characters and reset
    pub fn take(&mut self) -> String {
        let text = std::mem::take(&mut self.characters);
        self.reset();
        text
    }
}
