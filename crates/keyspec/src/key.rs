use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::MouseButton;

/// Error returned when a key name cannot be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown key identifier: {0:?}")]
pub struct ParseKeyError(pub String);

/// A canonical key identifier.
///
/// Covers the keyboard names the executor and hook layer accept plus the
/// three pseudo-mouse names. The canonical rendering is lowercase
/// (`Key::Rbutton` displays as `"rbutton"`); parsing accepts the alias
/// spellings used by profiles (`right_mouse`, `esc`, `return`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Key {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Digit0, Digit1, Digit2, Digit3, Digit4,
    Digit5, Digit6, Digit7, Digit8, Digit9,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    Space, Tab, Enter, Shift, Ctrl, Alt, Escape,
    Up, Down, Left, Right,
    LButton, RButton, MButton,
}

impl Key {
    /// The canonical lowercase name for this key.
    pub fn name(self) -> &'static str {
        use Key::*;
        match self {
            A => "a", B => "b", C => "c", D => "d", E => "e", F => "f",
            G => "g", H => "h", I => "i", J => "j", K => "k", L => "l",
            M => "m", N => "n", O => "o", P => "p", Q => "q", R => "r",
            S => "s", T => "t", U => "u", V => "v", W => "w", X => "x",
            Y => "y", Z => "z",
            Digit0 => "0", Digit1 => "1", Digit2 => "2", Digit3 => "3",
            Digit4 => "4", Digit5 => "5", Digit6 => "6", Digit7 => "7",
            Digit8 => "8", Digit9 => "9",
            F1 => "f1", F2 => "f2", F3 => "f3", F4 => "f4", F5 => "f5",
            F6 => "f6", F7 => "f7", F8 => "f8", F9 => "f9", F10 => "f10",
            F11 => "f11", F12 => "f12",
            Space => "space", Tab => "tab", Enter => "enter",
            Shift => "shift", Ctrl => "ctrl", Alt => "alt",
            Escape => "escape",
            Up => "up", Down => "down", Left => "left", Right => "right",
            LButton => "lbutton", RButton => "rbutton", MButton => "mbutton",
        }
    }

    /// Parse a key name, folding case and collapsing aliases.
    pub fn parse(s: &str) -> Result<Key, ParseKeyError> {
        use Key::*;
        let folded = s.trim().to_ascii_lowercase();
        let key = match folded.as_str() {
            "a" => A, "b" => B, "c" => C, "d" => D, "e" => E, "f" => F,
            "g" => G, "h" => H, "i" => I, "j" => J, "k" => K, "l" => L,
            "m" => M, "n" => N, "o" => O, "p" => P, "q" => Q, "r" => R,
            "s" => S, "t" => T, "u" => U, "v" => V, "w" => W, "x" => X,
            "y" => Y, "z" => Z,
            "0" => Digit0, "1" => Digit1, "2" => Digit2, "3" => Digit3,
            "4" => Digit4, "5" => Digit5, "6" => Digit6, "7" => Digit7,
            "8" => Digit8, "9" => Digit9,
            "f1" => F1, "f2" => F2, "f3" => F3, "f4" => F4, "f5" => F5,
            "f6" => F6, "f7" => F7, "f8" => F8, "f9" => F9, "f10" => F10,
            "f11" => F11, "f12" => F12,
            "space" | "spacebar" | "space_bar" => Space,
            "tab" => Tab,
            "enter" | "return" => Enter,
            "shift" => Shift,
            "ctrl" | "control" => Ctrl,
            "alt" => Alt,
            "escape" | "esc" => Escape,
            "up" | "uparrow" | "up_arrow" => Up,
            "down" | "downarrow" | "down_arrow" => Down,
            "left" | "leftarrow" | "left_arrow" => Left,
            "right" | "rightarrow" | "right_arrow" => Right,
            "lbutton" | "left_mouse" | "leftmouse" | "mouse_left" | "leftclick" => LButton,
            "rbutton" | "right_mouse" | "rightmouse" | "mouse_right" | "rightclick" => RButton,
            "mbutton" | "middle_mouse" | "middlemouse" | "mouse_middle" => MButton,
            _ => return Err(ParseKeyError(s.to_string())),
        };
        Ok(key)
    }

    /// True for the pseudo-mouse names.
    pub fn is_mouse(self) -> bool {
        matches!(self, Key::LButton | Key::RButton | Key::MButton)
    }

    /// The mouse button for a pseudo-mouse key, if any.
    pub fn mouse_button(self) -> Option<MouseButton> {
        match self {
            Key::LButton => Some(MouseButton::Left),
            Key::RButton => Some(MouseButton::Right),
            Key::MButton => Some(MouseButton::Middle),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Key {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::parse(s)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Key::parse(&s).map_err(serde::de::Error::custom)
    }
}
