use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use keyspec::Key;

use crate::{Action, ParseSequenceError, Priority};

/// How injected input reaches the target application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    /// Inject at the system input queue; the focused window receives it.
    #[default]
    Direct,
    /// Deliver to a specific window, identified by title.
    Control {
        /// Title of the target window.
        window_title: String,
    },
}

/// Rewrite rule for a managed (Priority-mode) key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedKeySpec {
    /// Key synthesized in place of the intercepted one.
    pub target_key: Key,
    /// Pre- and post-delay around the synthesized press, in milliseconds.
    pub delay_ms: u64,
}

/// Variant of stationary ("fire in place") mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StationaryVariant {
    /// Stationary mode does not alter presses.
    #[default]
    Off,
    /// Every press is wrapped in a held shift.
    ShiftModifier,
}

/// Stationary-mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StationaryMode {
    /// Whether the mode starts active.
    #[serde(default)]
    pub active: bool,
    /// Behavior when active.
    #[serde(default)]
    pub variant: StationaryVariant,
}

/// How a skill decides to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Fire on a fixed interval.
    Timer,
    /// Fire when the detection layer reports the cooldown ready.
    Cooldown,
    /// Held down while Running, released while Paused/Stopped.
    Hold,
}

/// Gating condition evaluated before a skill fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteCondition {
    /// No gating.
    #[default]
    Always,
    /// Fire only while the tracked buff is absent.
    BuffLimit,
    /// Fire the main key while the resource holds, the alternate key
    /// otherwise.
    Resource,
}

/// Screen-probe parameters for cooldown/condition detection. The core
/// carries these for the detection layer; it never interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProbeSpec {
    /// Probe x coordinate.
    pub x: i32,
    /// Probe y coordinate.
    pub y: i32,
    /// Probe square size in pixels.
    #[serde(default)]
    pub size: u32,
    /// Color tolerance.
    #[serde(default)]
    pub tolerance: u32,
}

/// One configured skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSpec {
    /// Unique skill id; doubles as the scheduler task id.
    pub id: String,
    /// Key name, `delayN`, or comma sequence (`delay50,q`).
    pub keys: String,
    /// Alternate spec fired when a resource condition fails.
    #[serde(default)]
    pub alt_keys: Option<String>,
    /// Firing discipline.
    pub trigger: TriggerMode,
    /// Interval for timer skills and poll cadence for cooldown skills.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Gating condition.
    #[serde(default)]
    pub execute_condition: ExecuteCondition,
    /// Queue the skill's actions land on.
    #[serde(default = "default_skill_priority")]
    pub priority: Priority,
    /// Disabled skills are ignored wholesale.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Detection parameters for cooldown probing (decision-layer data).
    #[serde(default)]
    pub cooldown_probe: Option<ProbeSpec>,
    /// Detection parameters for the execute condition (decision-layer data).
    #[serde(default)]
    pub condition_probe: Option<ProbeSpec>,
}

impl SkillSpec {
    /// Parse the main key spec into an executor action.
    pub fn action(&self) -> Result<Action, ParseSequenceError> {
        Action::from_key_spec(&self.keys)
    }

    /// Parse the alternate key spec, if one is configured and non-empty.
    pub fn alt_action(&self) -> Result<Option<Action>, ParseSequenceError> {
        match self.alt_keys.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(spec) => Action::from_key_spec(spec).map(Some),
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_skill_priority() -> Priority {
    Priority::Normal
}

fn default_true() -> bool {
    true
}

/// The reserved system hotkeys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemKeys {
    /// Lifecycle start/stop key; never unregistered.
    #[serde(default = "default_root_key")]
    pub root: Key,
    /// Optional reroll toggle.
    #[serde(default = "default_reroll_key")]
    pub reroll: Option<Key>,
    /// Optional pathfinding toggle.
    #[serde(default = "default_pathfind_key")]
    pub pathfind: Option<Key>,
    /// Optional run/pause toggle.
    #[serde(default = "default_run_pause_key")]
    pub run_pause: Option<Key>,
}

impl Default for SystemKeys {
    fn default() -> Self {
        Self {
            root: default_root_key(),
            reroll: default_reroll_key(),
            pathfind: default_pathfind_key(),
            run_pause: default_run_pause_key(),
        }
    }
}

fn default_root_key() -> Key {
    Key::F8
}
fn default_reroll_key() -> Option<Key> {
    Some(Key::F7)
}
fn default_pathfind_key() -> Option<Key> {
    Some(Key::F9)
}
fn default_run_pause_key() -> Option<Key> {
    Some(Key::Z)
}

/// The whole configuration, consumed atomically on lifecycle transitions.
///
/// Snapshots are immutable once built; the engine publishes a new `Arc`
/// rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigSnapshot {
    /// Press of this key qualifies as emergency (HP potion).
    pub emergency_hp_key: Option<Key>,
    /// Press of this key qualifies as emergency (MP potion).
    pub emergency_mp_key: Option<Key>,
    /// Keys registered in Special mode.
    pub special_keys: Vec<Key>,
    /// Keys registered in Priority mode, with their rewrite rules.
    pub managed_keys: BTreeMap<Key, ManagedKeySpec>,
    /// Key registered in Monitor mode; while held, presses are substituted.
    pub force_move_key: Option<Key>,
    /// Replacement executed in place of any press while force-move is held.
    pub force_move_replacement_key: Option<Key>,
    /// Key registered in Intercept mode that toggles stationary mode.
    pub stationary_toggle_key: Option<Key>,
    /// Stationary-mode behavior.
    pub stationary_mode: StationaryMode,
    /// Input delivery mechanism.
    pub send_mode: SendMode,
    /// Reserved system hotkeys.
    pub system_keys: SystemKeys,
    /// Configured skills.
    pub skills: Vec<SkillSpec>,
}

impl ConfigSnapshot {
    /// True when `key` is one of the cached emergency keys.
    pub fn is_emergency_key(&self, key: Key) -> bool {
        self.emergency_hp_key == Some(key) || self.emergency_mp_key == Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ConfigSnapshot::default();
        assert_eq!(cfg.system_keys.root, Key::F8);
        assert_eq!(cfg.system_keys.run_pause, Some(Key::Z));
        assert!(cfg.skills.is_empty());
        assert!(!cfg.is_emergency_key(Key::Digit1));
    }

    #[test]
    fn emergency_keys_match() {
        let cfg = ConfigSnapshot {
            emergency_hp_key: Some(Key::Digit1),
            emergency_mp_key: Some(Key::Digit2),
            ..Default::default()
        };
        assert!(cfg.is_emergency_key(Key::Digit1));
        assert!(cfg.is_emergency_key(Key::Digit2));
        assert!(!cfg.is_emergency_key(Key::Digit3));
    }

    #[test]
    fn skill_spec_actions_parse() {
        let skill = SkillSpec {
            id: "frenzy".into(),
            keys: "delay50,q".into(),
            alt_keys: Some("w".into()),
            trigger: TriggerMode::Timer,
            interval_ms: 500,
            execute_condition: ExecuteCondition::Resource,
            priority: Priority::High,
            enabled: true,
            cooldown_probe: None,
            condition_probe: None,
        };
        assert!(matches!(skill.action().unwrap(), Action::Sequence(_)));
        assert!(matches!(
            skill.alt_action().unwrap(),
            Some(Action::Press(Key::W))
        ));
    }
}
