use thiserror::Error;

/// Convenient result type for the keyhook crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the hook subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The OS refused to install the low-level hook.
    #[error("hook installation failed: {0}")]
    Install(String),

    /// The hook thread did not report readiness.
    #[error("hook thread failed to start")]
    ThreadStart,
}
