//! Windows virtual-key and Set-1 scancode tables.
//!
//! Scancode injection is more reliable for games than virtual-key
//! injection, so the SendInput sink asks for `scancode()`; the low-level
//! hook reports virtual keys, so the hook layer resolves with `from_vk()`.

use crate::Key;

impl Key {
    /// US keyboard Set-1 scancode plus the extended-key flag, for keyboard
    /// keys. Mouse pseudo-keys have no scancode.
    pub fn scancode(self) -> Option<(u16, bool)> {
        use Key::*;
        let (code, ext) = match self {
            A => (0x1E, false), B => (0x30, false), C => (0x2E, false),
            D => (0x20, false), E => (0x12, false), F => (0x21, false),
            G => (0x22, false), H => (0x23, false), I => (0x17, false),
            J => (0x24, false), K => (0x25, false), L => (0x26, false),
            M => (0x32, false), N => (0x31, false), O => (0x18, false),
            P => (0x19, false), Q => (0x10, false), R => (0x13, false),
            S => (0x1F, false), T => (0x14, false), U => (0x16, false),
            V => (0x2F, false), W => (0x11, false), X => (0x2D, false),
            Y => (0x15, false), Z => (0x2C, false),
            Digit1 => (0x02, false), Digit2 => (0x03, false),
            Digit3 => (0x04, false), Digit4 => (0x05, false),
            Digit5 => (0x06, false), Digit6 => (0x07, false),
            Digit7 => (0x08, false), Digit8 => (0x09, false),
            Digit9 => (0x0A, false), Digit0 => (0x0B, false),
            F1 => (0x3B, false), F2 => (0x3C, false), F3 => (0x3D, false),
            F4 => (0x3E, false), F5 => (0x3F, false), F6 => (0x40, false),
            F7 => (0x41, false), F8 => (0x42, false), F9 => (0x43, false),
            F10 => (0x44, false), F11 => (0x57, false), F12 => (0x58, false),
            Space => (0x39, false), Tab => (0x0F, false),
            Enter => (0x1C, false), Shift => (0x2A, false),
            Ctrl => (0x1D, false), Alt => (0x38, false),
            Escape => (0x01, false),
            Up => (0x48, true), Down => (0x50, true),
            Left => (0x4B, true), Right => (0x4D, true),
            LButton | RButton | MButton => return None,
        };
        Some((code, ext))
    }

    /// The Windows virtual-key code for this key.
    pub fn vk(self) -> u16 {
        use Key::*;
        match self {
            A => 0x41, B => 0x42, C => 0x43, D => 0x44, E => 0x45,
            F => 0x46, G => 0x47, H => 0x48, I => 0x49, J => 0x4A,
            K => 0x4B, L => 0x4C, M => 0x4D, N => 0x4E, O => 0x4F,
            P => 0x50, Q => 0x51, R => 0x52, S => 0x53, T => 0x54,
            U => 0x55, V => 0x56, W => 0x57, X => 0x58, Y => 0x59,
            Z => 0x5A,
            Digit0 => 0x30, Digit1 => 0x31, Digit2 => 0x32, Digit3 => 0x33,
            Digit4 => 0x34, Digit5 => 0x35, Digit6 => 0x36, Digit7 => 0x37,
            Digit8 => 0x38, Digit9 => 0x39,
            F1 => 0x70, F2 => 0x71, F3 => 0x72, F4 => 0x73, F5 => 0x74,
            F6 => 0x75, F7 => 0x76, F8 => 0x77, F9 => 0x78, F10 => 0x79,
            F11 => 0x7A, F12 => 0x7B,
            Space => 0x20, Tab => 0x09, Enter => 0x0D, Shift => 0x10,
            Ctrl => 0x11, Alt => 0x12, Escape => 0x1B,
            Left => 0x25, Up => 0x26, Right => 0x27, Down => 0x28,
            LButton => 0x01, RButton => 0x02, MButton => 0x04,
        }
    }

    /// Resolve a Windows virtual-key code reported by the low-level hook.
    ///
    /// The left/right modifier variants collapse onto the generic key.
    pub fn from_vk(vk: u32) -> Option<Key> {
        use Key::*;
        let key = match vk {
            0x41..=0x5A => match vk - 0x41 {
                0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F, 6 => G,
                7 => H, 8 => I, 9 => J, 10 => K, 11 => L, 12 => M, 13 => N,
                14 => O, 15 => P, 16 => Q, 17 => R, 18 => S, 19 => T,
                20 => U, 21 => V, 22 => W, 23 => X, 24 => Y, _ => Z,
            },
            0x30 => Digit0, 0x31 => Digit1, 0x32 => Digit2, 0x33 => Digit3,
            0x34 => Digit4, 0x35 => Digit5, 0x36 => Digit6, 0x37 => Digit7,
            0x38 => Digit8, 0x39 => Digit9,
            0x70 => F1, 0x71 => F2, 0x72 => F3, 0x73 => F4, 0x74 => F5,
            0x75 => F6, 0x76 => F7, 0x77 => F8, 0x78 => F9, 0x79 => F10,
            0x7A => F11, 0x7B => F12,
            0x20 => Space, 0x09 => Tab, 0x0D => Enter, 0x1B => Escape,
            0x10 | 0xA0 | 0xA1 => Shift,
            0x11 | 0xA2 | 0xA3 => Ctrl,
            0x12 | 0xA4 | 0xA5 => Alt,
            0x25 => Left, 0x26 => Up, 0x27 => Right, 0x28 => Down,
            0x01 => LButton, 0x02 => RButton, 0x04 => MButton,
            _ => return None,
        };
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_roundtrip() {
        for k in [
            Key::A, Key::Z, Key::Digit0, Key::Digit9, Key::F1, Key::F12,
            Key::Space, Key::Enter, Key::Escape, Key::Up, Key::RButton,
        ] {
            assert_eq!(Key::from_vk(k.vk() as u32), Some(k));
        }
    }

    #[test]
    fn modifier_sides_collapse() {
        assert_eq!(Key::from_vk(0xA0), Some(Key::Shift));
        assert_eq!(Key::from_vk(0xA1), Some(Key::Shift));
        assert_eq!(Key::from_vk(0xA3), Some(Key::Ctrl));
        assert_eq!(Key::from_vk(0xA5), Some(Key::Alt));
    }

    #[test]
    fn arrows_are_extended() {
        for k in [Key::Up, Key::Down, Key::Left, Key::Right] {
            let (_, ext) = k.scancode().unwrap();
            assert!(ext);
        }
        assert!(!Key::Q.scancode().unwrap().1);
    }

    #[test]
    fn mouse_keys_have_no_scancode() {
        assert!(Key::LButton.scancode().is_none());
        assert!(Key::MButton.scancode().is_none());
    }
}
