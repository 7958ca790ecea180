use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the macro controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacroState {
    /// Nothing armed; only the root lifecycle hotkey is registered.
    Stopped,
    /// Configuration applied, hooks registered, scheduler parked.
    Ready,
    /// Scheduler firing, executor draining all queues.
    Running,
    /// Executor manually paused (emergency queue still drains), scheduler
    /// frozen.
    Paused,
}

impl fmt::Display for MacroState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MacroState::Stopped => "stopped",
            MacroState::Ready => "ready",
            MacroState::Running => "running",
            MacroState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// The legal `(from, to)` transition pairs.
pub const VALID_TRANSITIONS: &[(MacroState, MacroState)] = &[
    (MacroState::Stopped, MacroState::Ready),
    (MacroState::Ready, MacroState::Running),
    (MacroState::Ready, MacroState::Stopped),
    (MacroState::Running, MacroState::Paused),
    (MacroState::Running, MacroState::Stopped),
    (MacroState::Paused, MacroState::Running),
    (MacroState::Paused, MacroState::Stopped),
];

impl MacroState {
    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(self, to: MacroState) -> bool {
        VALID_TRANSITIONS.contains(&(self, to))
    }
}
