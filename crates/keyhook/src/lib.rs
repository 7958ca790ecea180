//! Low-level key hook subsystem.
//!
//! A [`Manager`] owns the per-key registrations (one of five
//! [`HookMode`]s), classifies every raw keystroke through a pure policy,
//! and forwards the resulting [`HookEvent`]s over a channel to the engine.
//! The swallow decision is returned synchronously to the OS tap, which must
//! answer within its latency budget.
//!
//! Events injected by this process (tagged with [`injectmark::KDRV_MARK`]
//! or carrying the OS injected flag) bypass classification entirely, so the
//! executor's own output can never re-trigger a hook.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, trace};

use keyspec::Key;

mod error;
mod policy;
#[cfg(windows)]
mod sys;

pub use error::{Error, Result};
#[cfg(windows)]
pub use sys::HookBackend;

/// Interception mode for a registered key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookMode {
    /// Swallow the keystroke and report it as a system-hotkey press.
    Intercept,
    /// Swallow the keystroke; the engine rewrites it into a delayed press
    /// of a target key on the emergency queue.
    Priority,
    /// Let the keystroke through; bracket the held period with pause
    /// events so skills stand down while the key is held.
    Special,
    /// Let the keystroke through; report held/released state edges.
    Monitor,
    /// Swallow the keystroke and report nothing.
    Block,
}

/// Direction of a raw key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEdge {
    /// Key (or button) went down.
    Down,
    /// Key (or button) came up.
    Up,
}

/// A raw event as seen by the OS tap, before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// The key, canonicalized.
    pub key: Key,
    /// Down or up.
    pub edge: KeyEdge,
    /// True when the event was synthesized (by us or anyone else).
    pub injected: bool,
}

/// A classified event forwarded to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// An Intercept-mode key was consumed.
    InterceptDown(Key),
    /// A Priority-mode key activated (already consumed).
    ManagedDown(Key),
    /// A Special-mode key went down.
    SpecialDown(Key),
    /// A Special-mode key came up.
    SpecialUp(Key),
    /// The first Special key went down while none was held.
    SpecialPauseStart,
    /// The last held Special key was released.
    SpecialPauseEnd,
    /// A Monitor-mode key transitioned to held.
    MonitorDown(Key),
    /// A Monitor-mode key transitioned to released.
    MonitorUp(Key),
}

#[derive(Default)]
struct Inner {
    registrations: HashMap<Key, HookMode>,
    /// Keys currently physically held, for auto-repeat debounce and
    /// Monitor edge detection.
    held: HashSet<Key>,
    /// Subset of `held` registered in Special mode.
    special_held: HashSet<Key>,
}

/// Registration table plus classification entry point.
///
/// Cloning shares the underlying table; the OS backend and the engine hold
/// clones of the same manager.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Mutex<Inner>>,
    root: Key,
    tx: Sender<HookEvent>,
}

impl Manager {
    /// Create a manager whose `root` lifecycle key survives
    /// [`Manager::clear_all`]. The root key starts registered in
    /// Intercept mode.
    pub fn new(root: Key, tx: Sender<HookEvent>) -> Self {
        let mut inner = Inner::default();
        inner.registrations.insert(root, HookMode::Intercept);
        Self {
            inner: Arc::new(Mutex::new(inner)),
            root,
            tx,
        }
    }

    /// The protected lifecycle key.
    pub fn root_key(&self) -> Key {
        self.root
    }

    /// Register `key` in `mode`. Re-registering replaces the previous
    /// mode; registering the identical `(key, mode)` pair is a no-op.
    /// The whole replace happens under one lock acquisition, so competing
    /// registrars serialize and the last writer wins.
    pub fn register(&self, key: Key, mode: HookMode) {
        let mut inner = self.inner.lock();
        match inner.registrations.insert(key, mode) {
            Some(prev) if prev == mode => {
                trace!(%key, ?mode, "hook_register_noop");
            }
            Some(prev) => {
                debug!(%key, ?prev, ?mode, "hook_reregistered");
            }
            None => {
                debug!(%key, ?mode, "hook_registered");
            }
        }
    }

    /// Remove the registration for `key`, if any.
    pub fn unregister(&self, key: Key) {
        let mut inner = self.inner.lock();
        if inner.registrations.remove(&key).is_some() {
            debug!(%key, "hook_unregistered");
        }
    }

    /// Remove every registration except the root lifecycle key.
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock();
        let root = self.root;
        inner.registrations.retain(|key, _| *key == root);
        inner.special_held.clear();
        debug!("hooks_cleared_root_retained");
    }

    /// Current mode for `key`, if registered.
    pub fn mode_of(&self, key: Key) -> Option<HookMode> {
        self.inner.lock().registrations.get(&key).copied()
    }

    /// Number of active registrations (root included).
    pub fn len(&self) -> usize {
        self.inner.lock().registrations.len()
    }

    /// True when only the root key remains.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Classify a raw event, emit the resulting events, and return whether
    /// the OS tap should swallow the keystroke.
    ///
    /// Injected events bypass classification and are never swallowed.
    pub fn process(&self, raw: RawEvent) -> bool {
        if raw.injected {
            trace!(key = %raw.key, "ignoring_synthetic_event");
            return false;
        }

        let decision = {
            let mut inner = self.inner.lock();
            let mode = inner.registrations.get(&raw.key).copied();

            let is_transition = match raw.edge {
                KeyEdge::Down => inner.held.insert(raw.key),
                KeyEdge::Up => inner.held.remove(&raw.key),
            };

            let (special_first, special_last) = if mode == Some(HookMode::Special) {
                match raw.edge {
                    KeyEdge::Down if is_transition => {
                        let first = inner.special_held.is_empty();
                        inner.special_held.insert(raw.key);
                        (first, false)
                    }
                    KeyEdge::Up if is_transition => {
                        inner.special_held.remove(&raw.key);
                        (false, inner.special_held.is_empty())
                    }
                    _ => (false, false),
                }
            } else {
                (false, false)
            };

            policy::classify(
                raw.key,
                mode,
                raw.edge,
                is_transition,
                special_first,
                special_last,
            )
        };

        for event in &decision.events {
            if self.tx.send(*event).is_err() {
                trace!("hook_event_receiver_gone");
                break;
            }
        }
        decision.swallow
    }
}
