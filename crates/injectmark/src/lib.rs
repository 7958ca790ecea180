//! Shared marker for events injected by this process.
//!
//! Injected input carries this value in the `dwExtraInfo` field so the
//! low-level hook can ignore our own output.

/// 'kdrv' in ASCII bytes: 0x6b 0x64 0x72 0x76 -> 1801745014
pub const KDRV_MARK: usize = 1_801_745_014;
