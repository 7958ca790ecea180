use serde::{Deserialize, Serialize};
use thiserror::Error;

use keyspec::{Key, MouseButton, ParseKeyError};

/// Identifier for an in-flight de-duplicated sequence.
pub type SequenceId = String;

/// Priority lane an [`Action`] is queued on.
///
/// The executor drains `Emergency` before anything else and serves
/// `High`/`Normal`/`Low` in strict order when not paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Survival lane: drains even while everything else is paused.
    Emergency,
    /// High-value skills.
    High,
    /// Regular skills.
    Normal,
    /// Utility actions.
    Low,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 4] = [
        Priority::Emergency,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Queue index (0 = emergency .. 3 = low).
    pub fn index(self) -> usize {
        match self {
            Priority::Emergency => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

/// One entry of a [`Action::Sequence`].
///
/// Sequence-internal delays are synchronous: the whole sequence executes
/// within a single executor tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Tap a key (down then up).
    Press(Key),
    /// Wait in place for the given milliseconds.
    Delay(u64),
}

/// A unit of work processed by the priority executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Tap `key` (down then up), subject to force-move and stationary-mode
    /// substitution at execution time.
    Press(Key),
    /// Press `key` down and leave it held.
    Hold(Key),
    /// Release a previously held `key`.
    Release(Key),
    /// Execute `steps` atomically within one tick.
    Sequence(Vec<Step>),
    /// Click a mouse button (down then up).
    MouseClick(MouseButton),
    /// Asynchronous delay: installs a deadline instead of sleeping. While
    /// the deadline is pending only the emergency queue drains.
    Delay(u64),
    /// Publish `topic:payload` on the event bus; no input side effect.
    Notify(String),
    /// Remove `SequenceId` from the in-flight de-dup set.
    Cleanup(SequenceId),
}

/// Error produced when a key-or-sequence spec cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseSequenceError {
    /// The spec was empty after trimming.
    #[error("empty key sequence")]
    Empty,
    /// A `delayN` entry had a non-numeric count.
    #[error("bad delay entry: {0:?}")]
    BadDelay(String),
    /// A key name did not resolve.
    #[error(transparent)]
    BadKey(#[from] ParseKeyError),
}

impl Action {
    /// Parse a profile key spec: a single key name, a `delayN` wait, or a
    /// comma-separated sequence such as `delay50,q,lbutton`.
    pub fn from_key_spec(spec: &str) -> Result<Action, ParseSequenceError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ParseSequenceError::Empty);
        }
        if spec.contains(',') {
            return Ok(Action::Sequence(parse_steps(spec)?));
        }
        if let Some(ms) = parse_delay(spec)? {
            return Ok(Action::Delay(ms));
        }
        Ok(Action::Press(Key::parse(spec)?))
    }
}

fn parse_steps(spec: &str) -> Result<Vec<Step>, ParseSequenceError> {
    let mut steps = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(ms) = parse_delay(part)? {
            steps.push(Step::Delay(ms));
        } else {
            steps.push(Step::Press(Key::parse(part)?));
        }
    }
    if steps.is_empty() {
        return Err(ParseSequenceError::Empty);
    }
    Ok(steps)
}

/// Both profile spellings are accepted: `delay50` and `delay=50`.
fn parse_delay(part: &str) -> Result<Option<u64>, ParseSequenceError> {
    let lower = part.to_ascii_lowercase();
    let Some(rest) = lower.strip_prefix("delay") else {
        return Ok(None);
    };
    let digits = rest.strip_prefix('=').unwrap_or(rest);
    digits
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ParseSequenceError::BadDelay(part.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_key_is_press() {
        assert_eq!(Action::from_key_spec("q").unwrap(), Action::Press(Key::Q));
        assert_eq!(
            Action::from_key_spec("RButton").unwrap(),
            Action::Press(Key::RButton)
        );
    }

    #[test]
    fn lone_delay_is_async() {
        assert_eq!(Action::from_key_spec("delay50").unwrap(), Action::Delay(50));
        assert_eq!(Action::from_key_spec("delay=80").unwrap(), Action::Delay(80));
    }

    #[test]
    fn comma_spec_is_sequence() {
        assert_eq!(
            Action::from_key_spec("delay50,q,lbutton").unwrap(),
            Action::Sequence(vec![
                Step::Delay(50),
                Step::Press(Key::Q),
                Step::Press(Key::LButton),
            ])
        );
    }

    #[test]
    fn sequence_tolerates_whitespace_and_blanks() {
        assert_eq!(
            Action::from_key_spec(" q , ,delay100, w ").unwrap(),
            Action::Sequence(vec![
                Step::Press(Key::Q),
                Step::Delay(100),
                Step::Press(Key::W),
            ])
        );
    }

    #[test]
    fn bad_specs_error() {
        assert!(Action::from_key_spec("").is_err());
        assert!(Action::from_key_spec("delayxx").is_err());
        assert!(Action::from_key_spec("q,nosuchkey").is_err());
    }

    #[test]
    fn priority_index_order() {
        let indices: Vec<usize> = Priority::ALL.iter().map(|p| p.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
}
