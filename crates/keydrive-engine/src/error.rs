use std::result::Result as StdResult;

use thiserror::Error;

use keydrive_protocol::MacroState;

/// Convenient result type for the engine crate.
pub type Result<T> = StdResult<T, Error>;

/// Unified error type for the keydrive engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The requested lifecycle transition is not legal from the current
    /// state.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// State at the time of the request.
        from: MacroState,
        /// Requested state.
        to: MacroState,
    },

    /// A key identifier in the configuration did not resolve.
    #[error("unknown key identifier: {0}")]
    UnknownKey(String),

    /// The hook layer refused a registration.
    #[error(transparent)]
    Hook(#[from] keyhook::Error),

    /// A scheduler task id is already present.
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    /// The engine is shutting down; no further operations are accepted.
    #[error("shutdown in progress")]
    Shutdown,
}

impl Error {
    /// Numeric code for the public API surface.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidTransition { .. } => 1,
            Error::UnknownKey(_) => 2,
            Error::Hook(_) => 3,
            Error::DuplicateTask(_) => 4,
            Error::Shutdown => 5,
        }
    }
}
