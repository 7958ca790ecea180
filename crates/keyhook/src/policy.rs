//! Pure classification of raw key events against a registration mode.
//!
//! The swallow answer has to be produced inside the OS tap callback, so the
//! whole decision is a table-driven function over booleans the caller
//! computes under its lock.

use keyspec::Key;

use crate::{HookEvent, HookMode, KeyEdge};

/// Outcome of classifying one raw event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Decision {
    /// Whether the OS tap must drop the original keystroke.
    pub swallow: bool,
    /// Events to forward to the engine, in order.
    pub events: Vec<HookEvent>,
}

/// Classify one event.
///
/// `is_transition` is true for the first down of a held key and for an up
/// of a key that was down (auto-repeat downs and spurious ups are false).
/// `special_first` / `special_last` are the edges of the whole special-key
/// set, computed by the caller.
pub(crate) fn classify(
    key: Key,
    mode: Option<HookMode>,
    edge: KeyEdge,
    is_transition: bool,
    special_first: bool,
    special_last: bool,
) -> Decision {
    let Some(mode) = mode else {
        return Decision::default();
    };

    let mut decision = Decision::default();
    match mode {
        HookMode::Intercept => {
            decision.swallow = true;
            if edge == KeyEdge::Down && is_transition {
                decision.events.push(HookEvent::InterceptDown(key));
            }
        }
        HookMode::Priority => {
            decision.swallow = true;
            if edge == KeyEdge::Down && is_transition {
                decision.events.push(HookEvent::ManagedDown(key));
            }
        }
        HookMode::Special => {
            if is_transition {
                match edge {
                    KeyEdge::Down => {
                        if special_first {
                            decision.events.push(HookEvent::SpecialPauseStart);
                        }
                        decision.events.push(HookEvent::SpecialDown(key));
                    }
                    KeyEdge::Up => {
                        decision.events.push(HookEvent::SpecialUp(key));
                        if special_last {
                            decision.events.push(HookEvent::SpecialPauseEnd);
                        }
                    }
                }
            }
        }
        HookMode::Monitor => {
            if is_transition {
                let event = match edge {
                    KeyEdge::Down => HookEvent::MonitorDown(key),
                    KeyEdge::Up => HookEvent::MonitorUp(key),
                };
                decision.events.push(event);
            }
        }
        HookMode::Block => {
            decision.swallow = true;
        }
    }
    decision
}
