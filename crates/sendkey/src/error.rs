use keyspec::Key;
use thiserror::Error;

/// Convenient result type for the sendkey crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced when input injection fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The OS refused the injection call.
    #[error("input injection rejected by the OS: {0}")]
    Injection(String),

    /// The key has no representation on this backend.
    #[error("key {0} cannot be injected on this backend")]
    UnsupportedKey(Key),
}
