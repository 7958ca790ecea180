use std::{fmt, sync::Arc};

use thiserror::Error;

use keyspec::Key;

use crate::{ConfigSnapshot, MacroState};

/// Edge of the special-key pause bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseEdge {
    /// First special key went down.
    Start,
    /// Last special key came up.
    End,
}

impl fmt::Display for PauseEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PauseEdge::Start => "start",
            PauseEdge::End => "end",
        })
    }
}

/// Topic keys for bus subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Topic {
    StateChanged,
    StateRejected,
    ConfigApplied,
    SchedulerPauseRequested,
    SchedulerResumeRequested,
    InterceptKeyDown,
    SpecialKeyDown,
    SpecialKeyUp,
    SpecialKeyPause,
    ManagedKeyDown,
    ManagedKeyComplete,
    MonitorKeyDown,
    MonitorKeyUp,
    Hotkey,
    HandlerError,
    CoreError,
}

impl Topic {
    /// The wire/name form of the topic.
    pub fn name(self) -> &'static str {
        match self {
            Topic::StateChanged => "state:changed",
            Topic::StateRejected => "state:rejected",
            Topic::ConfigApplied => "config:applied",
            Topic::SchedulerPauseRequested => "scheduler:pause_requested",
            Topic::SchedulerResumeRequested => "scheduler:resume_requested",
            Topic::InterceptKeyDown => "intercept_key_down",
            Topic::SpecialKeyDown => "special_key_down",
            Topic::SpecialKeyUp => "special_key_up",
            Topic::SpecialKeyPause => "special_key_pause",
            Topic::ManagedKeyDown => "managed_key_down",
            Topic::ManagedKeyComplete => "managed_key_complete",
            Topic::MonitorKeyDown => "monitor_key_down",
            Topic::MonitorKeyUp => "monitor_key_up",
            Topic::Hotkey => "hotkey",
            Topic::HandlerError => "core:handler_error",
            Topic::CoreError => "core:error",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed event published on the bus. Each variant maps to exactly one
/// [`Topic`].
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Lifecycle transition committed.
    StateChanged {
        /// State before the transition.
        old: MacroState,
        /// State after the transition.
        new: MacroState,
    },
    /// Lifecycle transition refused.
    StateRejected {
        /// Current state at the time of the request.
        current: MacroState,
        /// The state that was requested.
        requested: MacroState,
    },
    /// A configuration snapshot was applied whole.
    ConfigApplied(Arc<ConfigSnapshot>),
    /// Soft request to freeze periodic skill firing.
    SchedulerPauseRequested,
    /// Soft request to resume periodic skill firing.
    SchedulerResumeRequested,
    /// An Intercept-mode key was consumed.
    InterceptKeyDown(Key),
    /// A Special-mode key went down (not consumed).
    SpecialKeyDown(Key),
    /// A Special-mode key came up.
    SpecialKeyUp(Key),
    /// First-down / last-up bracket over the whole special-key set.
    SpecialKeyPause(PauseEdge),
    /// A managed (Priority-mode) key activated.
    ManagedKeyDown(Key),
    /// The managed sequence for a key finished executing.
    ManagedKeyComplete(Key),
    /// A Monitor-mode key transitioned to held.
    MonitorKeyDown(Key),
    /// A Monitor-mode key transitioned to released.
    MonitorKeyUp(Key),
    /// A named system hotkey fired.
    Hotkey(String),
    /// One or more bus handlers failed during a publish.
    HandlerError {
        /// Topic whose handlers failed.
        topic: Topic,
        /// Aggregated failure description.
        cause: String,
    },
    /// A component-local failure (executor action, scheduler callback,
    /// hook registration) surfaced as an event.
    CoreError {
        /// Which component failed.
        context: String,
        /// Failure description.
        cause: String,
    },
}

impl BusEvent {
    /// The topic this event publishes on.
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::StateChanged { .. } => Topic::StateChanged,
            BusEvent::StateRejected { .. } => Topic::StateRejected,
            BusEvent::ConfigApplied(_) => Topic::ConfigApplied,
            BusEvent::SchedulerPauseRequested => Topic::SchedulerPauseRequested,
            BusEvent::SchedulerResumeRequested => Topic::SchedulerResumeRequested,
            BusEvent::InterceptKeyDown(_) => Topic::InterceptKeyDown,
            BusEvent::SpecialKeyDown(_) => Topic::SpecialKeyDown,
            BusEvent::SpecialKeyUp(_) => Topic::SpecialKeyUp,
            BusEvent::SpecialKeyPause(_) => Topic::SpecialKeyPause,
            BusEvent::ManagedKeyDown(_) => Topic::ManagedKeyDown,
            BusEvent::ManagedKeyComplete(_) => Topic::ManagedKeyComplete,
            BusEvent::MonitorKeyDown(_) => Topic::MonitorKeyDown,
            BusEvent::MonitorKeyUp(_) => Topic::MonitorKeyUp,
            BusEvent::Hotkey(_) => Topic::Hotkey,
            BusEvent::HandlerError { .. } => Topic::HandlerError,
            BusEvent::CoreError { .. } => Topic::CoreError,
        }
    }

    /// Parse a `topic:payload` notify string produced by an executor
    /// `Notify` action (e.g. `managed_key_complete:e`).
    pub fn parse_notify(s: &str) -> Result<BusEvent, ParseNotifyError> {
        if let Some(key) = s.strip_prefix("managed_key_complete:") {
            let key = Key::parse(key).map_err(|_| ParseNotifyError(s.to_string()))?;
            return Ok(BusEvent::ManagedKeyComplete(key));
        }
        if let Some(key) = s.strip_prefix("managed_key_down:") {
            let key = Key::parse(key).map_err(|_| ParseNotifyError(s.to_string()))?;
            return Ok(BusEvent::ManagedKeyDown(key));
        }
        if let Some(edge) = s.strip_prefix("special_key_pause:") {
            return match edge {
                "start" => Ok(BusEvent::SpecialKeyPause(PauseEdge::Start)),
                "end" => Ok(BusEvent::SpecialKeyPause(PauseEdge::End)),
                _ => Err(ParseNotifyError(s.to_string())),
            };
        }
        if let Some(name) = s.strip_prefix("hotkey:") {
            return Ok(BusEvent::Hotkey(name.to_string()));
        }
        match s {
            "scheduler:pause_requested" => Ok(BusEvent::SchedulerPauseRequested),
            "scheduler:resume_requested" => Ok(BusEvent::SchedulerResumeRequested),
            _ => Err(ParseNotifyError(s.to_string())),
        }
    }
}

/// A notify payload that did not match any known topic grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized notify payload: {0:?}")]
pub struct ParseNotifyError(pub String);
