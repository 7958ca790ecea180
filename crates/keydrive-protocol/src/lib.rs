//! Shared types for the keydrive workspace.
//!
//! This crate defines the data the components exchange: executor actions
//! and priorities, the lifecycle state machine, the bus event catalog, and
//! the configuration snapshot consumed on state transitions.
#![warn(missing_docs)]

mod action;
mod config;
mod event;
mod state;

pub use action::{Action, ParseSequenceError, Priority, SequenceId, Step};
pub use config::{
    ConfigSnapshot, ExecuteCondition, ManagedKeySpec, ProbeSpec, SendMode, SkillSpec,
    StationaryMode, StationaryVariant, SystemKeys, TriggerMode,
};
pub use event::{BusEvent, ParseNotifyError, PauseEdge, Topic};
pub use state::{MacroState, VALID_TRANSITIONS};
