//! Drives configured skills against the scheduler and executor.
//!
//! Timer skills become periodic tasks that enqueue their press or sequence.
//! Cooldown skills poll an injected [`ConditionSource`] (the detection
//! layer's boolean view) at their interval and enqueue only when ready.
//! Hold skills are pressed once when the macro starts running and released
//! when it pauses or stops; they never cycle through the queues.
//!
//! Resource-conditioned skills fire their main key only after the resource
//! check holds for two consecutive samples (a sliding window, so one noisy
//! frame cannot trigger), and fall back to the alternate key immediately
//! when the check fails.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use keydrive_protocol::{Action, ConfigSnapshot, ExecuteCondition, SkillSpec, TriggerMode};
use keyspec::Key;
use sendkey::InputSink;

use crate::{Error, Result, executor::Executor, scheduler::Scheduler};

/// Samples the resource check must hold before a main key fires.
const CONDITION_WINDOW: usize = 2;

/// Push-model boolean inputs from the detection layer.
///
/// The core never inspects pixels; whatever HSV matching or template work
/// happens upstream lands here as plain booleans.
pub trait ConditionSource: Send + Sync {
    /// Whether the skill's cooldown reads as ready.
    fn cooldown_ready(&self, _skill_id: &str) -> bool {
        true
    }
    /// Whether the skill's execute condition currently holds.
    fn condition_met(&self, _skill_id: &str) -> bool {
        true
    }
}

/// Condition source that always reports ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl ConditionSource for AlwaysReady {}

struct DriverState {
    task_ids: Vec<String>,
    hold_keys: Vec<Key>,
    held: HashSet<Key>,
}

/// Owns the per-skill scheduling and hold lifecycle.
#[derive(Clone)]
pub struct SkillDriver {
    executor: Executor,
    scheduler: Scheduler,
    sink: Arc<dyn InputSink>,
    conditions: Arc<dyn ConditionSource>,
    state: Arc<Mutex<DriverState>>,
}

impl SkillDriver {
    /// Create a driver enqueueing through `executor` and scheduling on
    /// `scheduler`. Holds post directly through `sink`.
    pub fn new(
        executor: Executor,
        scheduler: Scheduler,
        sink: Arc<dyn InputSink>,
        conditions: Arc<dyn ConditionSource>,
    ) -> Self {
        Self {
            executor,
            scheduler,
            sink,
            conditions,
            state: Arc::new(Mutex::new(DriverState {
                task_ids: Vec::new(),
                hold_keys: Vec::new(),
                held: HashSet::new(),
            })),
        }
    }

    /// Install scheduler tasks for every enabled skill in the snapshot,
    /// replacing whatever was installed before. Fails without partial
    /// state when a key spec does not parse.
    pub fn install(&self, snapshot: &ConfigSnapshot) -> Result<()> {
        // Validate every spec before touching the scheduler.
        let mut planned: Vec<(SkillSpec, Action, Option<Action>)> = Vec::new();
        let mut hold_keys = Vec::new();
        for skill in snapshot.skills.iter().filter(|s| s.enabled) {
            let action = skill
                .action()
                .map_err(|_| Error::UnknownKey(skill.keys.clone()))?;
            let alt = skill
                .alt_action()
                .map_err(|_| Error::UnknownKey(skill.alt_keys.clone().unwrap_or_default()))?;
            if skill.trigger == TriggerMode::Hold {
                match action {
                    Action::Press(key) => hold_keys.push(key),
                    _ => {
                        warn!(skill = %skill.id, "hold_skill_needs_a_single_key_skipping");
                    }
                }
                continue;
            }
            planned.push((skill.clone(), action, alt));
        }

        self.uninstall();

        let mut state = self.state.lock();
        state.hold_keys = hold_keys;
        for (skill, action, alt) in planned {
            let task_id = format!("skill:{}", skill.id);
            let runtime = SkillRuntime {
                executor: self.executor.clone(),
                conditions: self.conditions.clone(),
                skill,
                action,
                alt,
                samples: Mutex::new(VecDeque::new()),
            };
            let runtime = Arc::new(runtime);
            let result = match runtime.skill.trigger {
                TriggerMode::Timer => {
                    let rt = runtime.clone();
                    self.scheduler
                        .add(&task_id, runtime.skill.interval_ms, move || rt.fire(), false)
                }
                TriggerMode::Cooldown => {
                    let rt = runtime.clone();
                    self.scheduler.add(
                        &task_id,
                        runtime.skill.interval_ms,
                        move || rt.poll_cooldown(),
                        false,
                    )
                }
                TriggerMode::Hold => unreachable!("hold skills filtered above"),
            };
            match result {
                Ok(()) => state.task_ids.push(task_id),
                // install() removed our previous tasks, so a duplicate here
                // means two skills share an id; keep the first.
                Err(e) => warn!(%task_id, error = %e, "skill_task_not_added"),
            }
        }
        debug!(tasks = state.task_ids.len(), holds = state.hold_keys.len(), "skills_installed");
        Ok(())
    }

    /// Remove every installed task and release held keys.
    pub fn uninstall(&self) {
        let task_ids = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.task_ids)
        };
        for task_id in task_ids {
            self.scheduler.remove(&task_id);
        }
        self.release_holds();
    }

    /// Press all configured hold keys that are not already down.
    pub fn apply_holds(&self) {
        let mut state = self.state.lock();
        let to_press: Vec<Key> = state
            .hold_keys
            .iter()
            .copied()
            .filter(|k| !state.held.contains(k))
            .collect();
        for key in to_press {
            trace!(%key, "hold_key_down");
            if let Err(e) = self.sink.key_down(key) {
                warn!(%key, error = %e, "hold_key_down_failed");
                continue;
            }
            state.held.insert(key);
        }
    }

    /// Release everything currently held.
    pub fn release_holds(&self) {
        let mut state = self.state.lock();
        for key in state.held.drain() {
            trace!(%key, "hold_key_up");
            if let Err(e) = self.sink.key_up(key) {
                warn!(%key, error = %e, "hold_key_up_failed");
            }
        }
    }
}

/// Per-skill context captured by the scheduler callbacks.
struct SkillRuntime {
    executor: Executor,
    conditions: Arc<dyn ConditionSource>,
    skill: SkillSpec,
    action: Action,
    alt: Option<Action>,
    samples: Mutex<VecDeque<bool>>,
}

impl SkillRuntime {
    fn poll_cooldown(&self) {
        if self.conditions.cooldown_ready(&self.skill.id) {
            self.fire();
        }
    }

    fn fire(&self) {
        match self.skill.execute_condition {
            ExecuteCondition::Always => self.enqueue(self.action.clone()),
            ExecuteCondition::BuffLimit => {
                // Fire only while the tracked buff is absent.
                if !self.conditions.condition_met(&self.skill.id) {
                    self.enqueue(self.action.clone());
                }
            }
            ExecuteCondition::Resource => {
                let sample = self.conditions.condition_met(&self.skill.id);
                if !sample {
                    self.samples.lock().clear();
                    if let Some(alt) = &self.alt {
                        self.enqueue(alt.clone());
                    }
                    return;
                }
                let settled = {
                    let mut samples = self.samples.lock();
                    samples.push_back(sample);
                    if samples.len() > CONDITION_WINDOW {
                        samples.pop_front();
                    }
                    samples.len() == CONDITION_WINDOW
                };
                if settled {
                    self.enqueue(self.action.clone());
                }
            }
        }
    }

    fn enqueue(&self, action: Action) {
        if matches!(action, Action::Sequence(_)) {
            // Sequences de-duplicate on the skill id: a sequence still in
            // flight swallows this firing entirely.
            if !self.executor.try_begin_sequence(&self.skill.id) {
                trace!(skill = %self.skill.id, "sequence_in_flight_dropped");
                return;
            }
            self.executor.enqueue(self.skill.priority, action);
            self.executor
                .enqueue(self.skill.priority, Action::Cleanup(self.skill.id.clone()));
            return;
        }
        self.executor.enqueue(self.skill.priority, action);
    }
}
