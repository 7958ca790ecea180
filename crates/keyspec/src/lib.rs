//! keyspec: canonical key identifiers for the keydrive workspace.
//!
//! - [`Key`]: enum over the keyboard names and pseudo-mouse names the engine
//!   accepts. Parsing folds case and the common alias spellings
//!   (`right_mouse` == `rbutton`, `esc` == `escape`, ...).
//! - [`MouseButton`]: the three mouse buttons, convertible from the
//!   pseudo-mouse keys.
//! - Scancode helpers: `Key::scancode` returns the US Set-1 scancode used by
//!   the SendInput sink, with the extended-key flag where required.
#![warn(missing_docs)]

mod button;
mod key;
mod scancode;

pub use button::MouseButton;
pub use key::{Key, ParseKeyError};
