//! Synthesizes keyboard and mouse input against the OS input API.
//!
//! An [`InputSink`] posts key downs/ups and mouse clicks. The Windows sink
//! injects via `SendInput` with Set-1 scancodes and tags every event with
//! [`injectmark::KDRV_MARK`] so the hook layer can ignore our own output.
//! A [`MockSink`] records emitted events for the engine's test suites.
#![warn(missing_docs)]
#![warn(unsafe_op_in_unsafe_fn)]

use keyspec::{Key, MouseButton};

mod error;
#[cfg(windows)]
mod win;

pub use error::{Error, Result};
pub use keydrive_protocol::SendMode;
#[cfg(windows)]
pub use win::WinSink;

/// Posts synthesized input events to the operating system.
///
/// Implementations must not block beyond the OS call itself; the executor
/// calls these from its tick task with no locks held.
pub trait InputSink: Send + Sync {
    /// Post a key-down event.
    fn key_down(&self, key: Key) -> Result<()>;
    /// Post a key-up event.
    fn key_up(&self, key: Key) -> Result<()>;
    /// Post a button-down event.
    fn button_down(&self, button: MouseButton) -> Result<()>;
    /// Post a button-up event.
    fn button_up(&self, button: MouseButton) -> Result<()>;

    /// Post a down-then-up pair for `key`.
    fn tap(&self, key: Key) -> Result<()> {
        if let Some(button) = key.mouse_button() {
            return self.click(button);
        }
        self.key_down(key)?;
        self.key_up(key)
    }

    /// Post `key` wrapped in a held shift, for stationary-mode presses.
    fn tap_with_shift(&self, key: Key) -> Result<()> {
        self.key_down(Key::Shift)?;
        let tapped = self.tap(key);
        // Always release shift, even if the inner tap failed.
        let released = self.key_up(Key::Shift);
        tapped.and(released)
    }

    /// Post a click (down-then-up) of `button`.
    fn click(&self, button: MouseButton) -> Result<()> {
        self.button_down(button)?;
        self.button_up(button)
    }
}

/// Sink that drops all input, logging at trace level.
///
/// Used on platforms without an injection backend and by dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl InputSink for NoopSink {
    fn key_down(&self, key: Key) -> Result<()> {
        tracing::trace!(%key, "noop_key_down");
        Ok(())
    }
    fn key_up(&self, key: Key) -> Result<()> {
        tracing::trace!(%key, "noop_key_up");
        Ok(())
    }
    fn button_down(&self, button: MouseButton) -> Result<()> {
        tracing::trace!(%button, "noop_button_down");
        Ok(())
    }
    fn button_up(&self, button: MouseButton) -> Result<()> {
        tracing::trace!(%button, "noop_button_up");
        Ok(())
    }
}

/// One event recorded by [`MockSink`].
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    /// Key pressed.
    Down(Key),
    /// Key released.
    Up(Key),
    /// Button pressed.
    ButtonDown(MouseButton),
    /// Button released.
    ButtonUp(MouseButton),
}

/// Recording sink for tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct MockSink {
    events: std::sync::Arc<parking_lot::Mutex<Vec<SinkEvent>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything posted so far, in order.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Keys for which a full down+up pair was posted, in completion order.
    pub fn taps(&self) -> Vec<Key> {
        let events = self.events.lock();
        let mut taps = Vec::new();
        for pair in events.windows(2) {
            if let [SinkEvent::Down(a), SinkEvent::Up(b)] = pair
                && a == b
            {
                taps.push(*a);
            }
        }
        taps
    }

    /// Drop all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl InputSink for MockSink {
    fn key_down(&self, key: Key) -> Result<()> {
        self.events.lock().push(SinkEvent::Down(key));
        Ok(())
    }
    fn key_up(&self, key: Key) -> Result<()> {
        self.events.lock().push(SinkEvent::Up(key));
        Ok(())
    }
    fn button_down(&self, button: MouseButton) -> Result<()> {
        self.events.lock().push(SinkEvent::ButtonDown(button));
        Ok(())
    }
    fn button_up(&self, button: MouseButton) -> Result<()> {
        self.events.lock().push(SinkEvent::ButtonUp(button));
        Ok(())
    }
}
