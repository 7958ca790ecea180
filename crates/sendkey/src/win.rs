//! Windows `SendInput` sink.
//!
//! Injects scancode-based keyboard events and button events at the system
//! input queue. Scancode injection is used instead of virtual keys since
//! games commonly read scancodes. Every event carries
//! [`injectmark::KDRV_MARK`] in `dwExtraInfo`.

use parking_lot::Mutex;
use tracing::{trace, warn};
use windows::{
    Win32::{
        Foundation::HWND,
        UI::{
            Input::KeyboardAndMouse::{
                INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
                KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, KEYEVENTF_SCANCODE, MOUSE_EVENT_FLAGS,
                MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN,
                MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEINPUT,
                SendInput, VIRTUAL_KEY,
            },
            WindowsAndMessaging::{FindWindowW, GetForegroundWindow, SetForegroundWindow},
        },
    },
    core::HSTRING,
};

use keyspec::{Key, MouseButton};

use crate::{Error, InputSink, Result, SendMode};

/// Sink backed by Win32 `SendInput`.
pub struct WinSink {
    mode: SendMode,
    /// Cached target window handle for `SendMode::Control`.
    target: Mutex<Option<HWND>>,
}

// HWND is a raw handle; sharing it across threads is fine.
unsafe impl Send for WinSink {}
unsafe impl Sync for WinSink {}

impl WinSink {
    /// Create a sink for the given delivery mode.
    pub fn new(mode: SendMode) -> Self {
        Self {
            mode,
            target: Mutex::new(None),
        }
    }

    /// Best-effort focus of the control-mode target before injecting.
    fn ensure_target_focused(&self) {
        let SendMode::Control { window_title } = &self.mode else {
            return;
        };
        let mut cached = self.target.lock();
        if cached.is_none() {
            match unsafe { FindWindowW(None, &HSTRING::from(window_title.as_str())) } {
                Ok(hwnd) => *cached = Some(hwnd),
                Err(_) => {
                    warn!(title = %window_title, "target_window_not_found_falling_back_to_direct");
                    return;
                }
            }
        }
        if let Some(hwnd) = *cached {
            let foreground = unsafe { GetForegroundWindow() };
            if foreground != hwnd && !unsafe { SetForegroundWindow(hwnd) }.as_bool() {
                trace!("set_foreground_window_refused");
            }
        }
    }

    fn send(&self, inputs: &[INPUT]) -> Result<()> {
        self.ensure_target_focused();
        let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            let err = windows::core::Error::from_win32();
            return Err(Error::Injection(err.message()));
        }
        Ok(())
    }

    fn key_input(key: Key, up: bool) -> Result<INPUT> {
        let (scan, extended) = key.scancode().ok_or(Error::UnsupportedKey(key))?;
        let mut flags = KEYEVENTF_SCANCODE;
        if extended {
            flags |= KEYEVENTF_EXTENDEDKEY;
        }
        if up {
            flags |= KEYEVENTF_KEYUP;
        }
        Ok(INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(0),
                    wScan: scan,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: injectmark::KDRV_MARK,
                },
            },
        })
    }

    fn button_input(button: MouseButton, up: bool) -> INPUT {
        let flags: MOUSE_EVENT_FLAGS = match (button, up) {
            (MouseButton::Left, false) => MOUSEEVENTF_LEFTDOWN,
            (MouseButton::Left, true) => MOUSEEVENTF_LEFTUP,
            (MouseButton::Right, false) => MOUSEEVENTF_RIGHTDOWN,
            (MouseButton::Right, true) => MOUSEEVENTF_RIGHTUP,
            (MouseButton::Middle, false) => MOUSEEVENTF_MIDDLEDOWN,
            (MouseButton::Middle, true) => MOUSEEVENTF_MIDDLEUP,
        };
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx: 0,
                    dy: 0,
                    mouseData: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: injectmark::KDRV_MARK,
                },
            },
        }
    }
}

impl InputSink for WinSink {
    fn key_down(&self, key: Key) -> Result<()> {
        trace!(%key, "key_down");
        self.send(&[Self::key_input(key, false)?])
    }

    fn key_up(&self, key: Key) -> Result<()> {
        trace!(%key, "key_up");
        self.send(&[Self::key_input(key, true)?])
    }

    fn button_down(&self, button: MouseButton) -> Result<()> {
        trace!(%button, "button_down");
        self.send(&[Self::button_input(button, false)])
    }

    fn button_up(&self, button: MouseButton) -> Result<()> {
        trace!(%button, "button_up");
        self.send(&[Self::button_input(button, true)])
    }

    fn tap(&self, key: Key) -> Result<()> {
        // Post the pair in one SendInput call so nothing interleaves
        // between down and up.
        if let Some(button) = key.mouse_button() {
            return self.click(button);
        }
        trace!(%key, "tap");
        self.send(&[Self::key_input(key, false)?, Self::key_input(key, true)?])
    }

    fn click(&self, button: MouseButton) -> Result<()> {
        trace!(%button, "click");
        self.send(&[
            Self::button_input(button, false),
            Self::button_input(button, true),
        ])
    }
}
