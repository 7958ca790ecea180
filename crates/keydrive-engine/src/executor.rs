//! Priority input executor.
//!
//! Four FIFO queues (emergency/high/normal/low) drained on a fixed tick.
//! Each tick selects at most one action:
//!
//! 1. while an asynchronous delay is pending, the non-emergency queues are
//!    cleared and nothing executes (this is what stops skill presses from
//!    piling up behind a managed-key pre-delay);
//! 2. the emergency queue always goes first;
//! 3. under manual pause only the emergency queue drains;
//! 4. under special pause only emergency-qualifying presses (the cached
//!    HP/MP keys) leave the lower queues;
//! 5. otherwise high, then normal, then low, strictly in that order.
//!
//! The queue lock is never held across a sink call.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use eventbus::Bus;
use keydrive_protocol::{Action, BusEvent, Priority, StationaryVariant, Step};
use keyspec::Key;
use sendkey::InputSink;

use crate::clock::Clock;

/// Executor tick interval in milliseconds.
pub const TICK_MS: u64 = 20;

/// Upper bound for one synchronous delay step inside a sequence. Sequences
/// are atomic within a tick, so their internal waits must stay short.
const SEQUENCE_STEP_DELAY_CAP_MS: u64 = 50;

/// Counters exposed by [`Executor::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorStats {
    /// Enqueued actions per priority lane (emergency..low).
    pub enqueued: [u64; 4],
    /// Actions executed.
    pub processed: u64,
    /// Actions dropped because the OS input call failed.
    pub failed: u64,
}

struct State {
    queues: [VecDeque<Action>; 4],
    manual_paused: bool,
    special_paused: bool,
    delay_until: Option<u64>,
    active_sequences: HashSet<String>,
    emergency_keys: HashSet<Key>,
    force_move_active: bool,
    force_move_replacement: Option<Key>,
    stationary_active: bool,
    stationary_variant: StationaryVariant,
    stats: ExecutorStats,
}

impl State {
    fn new() -> Self {
        Self {
            queues: Default::default(),
            manual_paused: false,
            special_paused: false,
            delay_until: None,
            active_sequences: HashSet::new(),
            emergency_keys: HashSet::new(),
            force_move_active: false,
            force_move_replacement: None,
            stationary_active: false,
            stationary_variant: StationaryVariant::Off,
            stats: ExecutorStats::default(),
        }
    }
}

/// The priority-scheduled input executor (C4).
///
/// Cloning shares the queues; `enqueue` is safe from any thread, while the
/// tick task is the only consumer.
#[derive(Clone)]
pub struct Executor {
    state: Arc<Mutex<State>>,
    sink: Arc<dyn InputSink>,
    bus: Bus,
    clock: Clock,
}

impl Executor {
    /// Create an executor posting through `sink` and publishing notify and
    /// error events on `bus`.
    pub fn new(sink: Arc<dyn InputSink>, bus: Bus, clock: Clock) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new())),
            sink,
            bus,
            clock,
        }
    }

    /// Spawn the fixed-tick drain loop.
    pub fn spawn_ticker(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let executor = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_millis(TICK_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        trace!("executor_ticker_cancelled");
                        return;
                    }
                    _ = ticker.tick() => executor.tick().await,
                }
            }
        })
    }

    /// Append an action to a priority lane. O(1), callable from any thread.
    pub fn enqueue(&self, priority: Priority, action: Action) {
        let mut s = self.state.lock();
        s.stats.enqueued[priority.index()] += 1;
        s.queues[priority.index()].push_back(action);
    }

    /// Drop everything queued on one lane.
    pub fn clear(&self, priority: Priority) {
        self.state.lock().queues[priority.index()].clear();
    }

    /// Drop everything queued on the high/normal/low lanes.
    pub fn clear_non_emergency(&self) {
        let mut s = self.state.lock();
        for queue in &mut s.queues[1..] {
            queue.clear();
        }
    }

    /// Drop everything queued on every lane.
    pub fn clear_all(&self) {
        let mut s = self.state.lock();
        for queue in &mut s.queues {
            queue.clear();
        }
    }

    /// Engage manual pause: only the emergency lane drains.
    pub fn pause_manual(&self) {
        self.state.lock().manual_paused = true;
    }

    /// Release manual pause.
    pub fn resume_manual(&self) {
        self.state.lock().manual_paused = false;
    }

    /// Set the special-key pause flag (held Special key somewhere).
    pub fn set_special_paused(&self, paused: bool) {
        self.state.lock().special_paused = paused;
    }

    /// Current special-pause state.
    pub fn special_paused(&self) -> bool {
        self.state.lock().special_paused
    }

    /// Engage or release force-move substitution.
    pub fn set_force_move(&self, active: bool) {
        self.state.lock().force_move_active = active;
    }

    /// Current force-move state.
    pub fn force_move_active(&self) -> bool {
        self.state.lock().force_move_active
    }

    /// Key substituted for every press while force-move is held.
    pub fn set_force_move_replacement(&self, key: Option<Key>) {
        self.state.lock().force_move_replacement = key;
    }

    /// Set stationary mode and its variant.
    pub fn set_stationary(&self, active: bool, variant: StationaryVariant) {
        let mut s = self.state.lock();
        s.stationary_active = active;
        s.stationary_variant = variant;
    }

    /// Current stationary state.
    pub fn stationary_active(&self) -> bool {
        self.state.lock().stationary_active
    }

    /// Update the key set consulted by the emergency filter.
    pub fn cache_emergency_keys(&self, hp: Option<Key>, mp: Option<Key>) {
        let mut s = self.state.lock();
        s.emergency_keys.clear();
        s.emergency_keys.extend(hp);
        s.emergency_keys.extend(mp);
    }

    /// Atomically claim a de-dup id. Returns false when the id is already
    /// in flight, in which case the caller must drop its sequence.
    pub fn try_begin_sequence(&self, id: &str) -> bool {
        self.state.lock().active_sequences.insert(id.to_string())
    }

    /// Whether a de-dup id is currently in flight.
    pub fn sequence_active(&self, id: &str) -> bool {
        self.state.lock().active_sequences.contains(id)
    }

    /// Counters snapshot.
    pub fn stats(&self) -> ExecutorStats {
        self.state.lock().stats
    }

    /// Total actions queued across all lanes.
    pub fn queued_total(&self) -> usize {
        self.state.lock().queues.iter().map(VecDeque::len).sum()
    }

    /// Run one tick: select at most one action and execute it.
    pub async fn tick(&self) {
        let Some(action) = self.select_action() else {
            return;
        };
        self.execute(action).await;
        self.state.lock().stats.processed += 1;
    }

    fn select_action(&self) -> Option<Action> {
        let mut s = self.state.lock();
        let now = self.clock.now_ms();

        if let Some(deadline) = s.delay_until {
            if now < deadline {
                for queue in &mut s.queues[1..] {
                    queue.clear();
                }
                return None;
            }
            s.delay_until = None;
        }

        if let Some(action) = s.queues[0].pop_front() {
            return Some(action);
        }
        if s.manual_paused {
            return None;
        }
        if s.special_paused {
            let emergency = s.emergency_keys.clone();
            for queue in &mut s.queues[1..] {
                let hit = queue.iter().position(|action| match action {
                    Action::Press(key) => emergency.contains(key),
                    _ => false,
                });
                if let Some(index) = hit {
                    return queue.remove(index);
                }
            }
            return None;
        }
        for queue in &mut s.queues[1..] {
            if let Some(action) = queue.pop_front() {
                return Some(action);
            }
        }
        None
    }

    async fn execute(&self, action: Action) {
        trace!(?action, "execute");
        match action {
            Action::Press(key) => self.press(key),
            Action::Hold(key) => {
                let result = match key.mouse_button() {
                    Some(button) => self.sink.button_down(button),
                    None => self.sink.key_down(key),
                };
                self.report("hold", result);
            }
            Action::Release(key) => {
                let result = match key.mouse_button() {
                    Some(button) => self.sink.button_up(button),
                    None => self.sink.key_up(key),
                };
                self.report("release", result);
            }
            Action::Sequence(steps) => {
                for step in steps {
                    match step {
                        Step::Press(key) => self.press(key),
                        Step::Delay(ms) => {
                            // Synchronous by design: the sequence is atomic
                            // within this tick.
                            let ms = ms.min(SEQUENCE_STEP_DELAY_CAP_MS);
                            time::sleep(Duration::from_millis(ms)).await;
                        }
                    }
                }
            }
            Action::MouseClick(button) => {
                let result = self.sink.click(button);
                self.report("mouse_click", result);
            }
            Action::Delay(ms) => {
                let mut s = self.state.lock();
                s.delay_until = Some(self.clock.now_ms() + ms);
            }
            Action::Notify(payload) => match BusEvent::parse_notify(&payload) {
                Ok(event) => self.bus.publish(event),
                Err(e) => {
                    warn!(%payload, "unparseable_notify_action");
                    self.bus.publish(BusEvent::CoreError {
                        context: "executor".into(),
                        cause: e.to_string(),
                    });
                }
            },
            Action::Cleanup(id) => {
                self.state.lock().active_sequences.remove(&id);
            }
        }
    }

    /// Execute a press with force-move / stationary substitution. The
    /// substitution is observable at the sink but never rewrites queued
    /// actions.
    fn press(&self, key: Key) {
        let (key, with_shift) = {
            let s = self.state.lock();
            if s.force_move_active {
                match s.force_move_replacement {
                    Some(replacement) => (replacement, false),
                    None => (key, false),
                }
            } else if s.stationary_active
                && s.stationary_variant == StationaryVariant::ShiftModifier
            {
                (key, true)
            } else {
                (key, false)
            }
        };
        let result = if with_shift {
            self.sink.tap_with_shift(key)
        } else {
            self.sink.tap(key)
        };
        self.report("press", result);
    }

    fn report(&self, what: &str, result: sendkey::Result<()>) {
        if let Err(e) = result {
            warn!(%what, error = %e, "input_call_failed_action_dropped");
            self.state.lock().stats.failed += 1;
            self.bus.publish(BusEvent::CoreError {
                context: format!("executor:{what}"),
                cause: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sendkey::{MockSink, SinkEvent};

    fn executor() -> (Executor, MockSink, Clock) {
        let sink = MockSink::new();
        let clock = Clock::manual(0);
        let bus = Bus::unbridged();
        let exec = Executor::new(Arc::new(sink.clone()), bus, clock.clone());
        (exec, sink, clock)
    }

    #[tokio::test]
    async fn emergency_preempts_everything() {
        let (exec, sink, _clock) = executor();
        exec.enqueue(Priority::Normal, Action::Press(Key::Q));
        exec.enqueue(Priority::High, Action::Press(Key::W));
        exec.enqueue(Priority::Emergency, Action::Press(Key::Digit1));

        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::Digit1]);

        exec.tick().await;
        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::Digit1, Key::W, Key::Q]);
    }

    #[tokio::test]
    async fn fifo_within_a_lane() {
        let (exec, sink, _clock) = executor();
        for key in [Key::A, Key::B, Key::C] {
            exec.enqueue(Priority::Normal, Action::Press(key));
        }
        for _ in 0..3 {
            exec.tick().await;
        }
        assert_eq!(sink.taps(), vec![Key::A, Key::B, Key::C]);
    }

    #[tokio::test]
    async fn manual_pause_drains_emergency_only() {
        let (exec, sink, _clock) = executor();
        exec.pause_manual();
        exec.enqueue(Priority::Emergency, Action::Press(Key::Digit1));
        exec.enqueue(Priority::Normal, Action::Press(Key::Q));

        exec.tick().await;
        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::Digit1]);
        assert_eq!(exec.queued_total(), 1);

        exec.resume_manual();
        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::Digit1, Key::Q]);
    }

    #[tokio::test]
    async fn special_pause_filters_to_emergency_presses() {
        let (exec, sink, _clock) = executor();
        exec.cache_emergency_keys(Some(Key::Digit1), Some(Key::Digit2));
        exec.set_special_paused(true);
        exec.enqueue(Priority::High, Action::Press(Key::Q));
        exec.enqueue(Priority::Normal, Action::Press(Key::Digit1));

        // The potion press leaves the normal lane; the skill press stays.
        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::Digit1]);
        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::Digit1]);
        assert_eq!(exec.queued_total(), 1);

        exec.set_special_paused(false);
        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::Digit1, Key::Q]);
    }

    #[tokio::test]
    async fn pending_delay_blocks_and_clears_lower_lanes() {
        let (exec, sink, clock) = executor();
        exec.enqueue(Priority::Emergency, Action::Delay(50));
        exec.enqueue(Priority::Emergency, Action::Press(Key::Shift));
        exec.enqueue(Priority::Normal, Action::Press(Key::Q));

        // Tick 1 installs the deadline without sleeping.
        exec.tick().await;
        assert!(sink.taps().is_empty());

        // While pending: nothing executes and the normal lane is wiped.
        clock.advance(20);
        exec.tick().await;
        assert!(sink.taps().is_empty());
        assert_eq!(exec.queued_total(), 1);

        // After expiry the emergency press lands.
        clock.advance(40);
        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::Shift]);
    }

    #[tokio::test]
    async fn dedup_ids_claim_once_and_release_on_cleanup() {
        let (exec, _sink, _clock) = executor();
        assert!(exec.try_begin_sequence("e"));
        assert!(!exec.try_begin_sequence("e"));
        assert!(exec.sequence_active("e"));

        exec.enqueue(Priority::Emergency, Action::Cleanup("e".into()));
        exec.tick().await;
        assert!(!exec.sequence_active("e"));
        assert!(exec.try_begin_sequence("e"));
    }

    #[tokio::test]
    async fn force_move_substitutes_every_press() {
        let (exec, sink, _clock) = executor();
        exec.set_force_move_replacement(Some(Key::F));
        exec.set_force_move(true);
        exec.enqueue(Priority::Normal, Action::Press(Key::Q));
        exec.enqueue(Priority::Normal, Action::Press(Key::W));

        exec.tick().await;
        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::F, Key::F]);

        exec.set_force_move(false);
        exec.enqueue(Priority::Normal, Action::Press(Key::Q));
        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::F, Key::F, Key::Q]);
    }

    #[tokio::test]
    async fn stationary_shift_variant_wraps_presses() {
        let (exec, sink, _clock) = executor();
        exec.set_stationary(true, StationaryVariant::ShiftModifier);
        exec.enqueue(Priority::Normal, Action::Press(Key::Digit2));
        exec.tick().await;
        assert_eq!(
            sink.events(),
            vec![
                SinkEvent::Down(Key::Shift),
                SinkEvent::Down(Key::Digit2),
                SinkEvent::Up(Key::Digit2),
                SinkEvent::Up(Key::Shift),
            ]
        );
    }

    #[tokio::test]
    async fn sequences_run_atomically_within_one_tick() {
        let (exec, sink, _clock) = executor();
        exec.enqueue(
            Priority::Normal,
            Action::Sequence(vec![
                Step::Press(Key::Q),
                Step::Delay(5),
                Step::Press(Key::W),
            ]),
        );
        exec.enqueue(Priority::Normal, Action::Press(Key::E));

        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::Q, Key::W]);
        exec.tick().await;
        assert_eq!(sink.taps(), vec![Key::Q, Key::W, Key::E]);
    }

    #[tokio::test]
    async fn hold_and_release_emit_single_edges() {
        let (exec, sink, _clock) = executor();
        exec.enqueue(Priority::Normal, Action::Hold(Key::Shift));
        exec.enqueue(Priority::Normal, Action::Release(Key::Shift));
        exec.tick().await;
        exec.tick().await;
        assert_eq!(
            sink.events(),
            vec![SinkEvent::Down(Key::Shift), SinkEvent::Up(Key::Shift)]
        );
    }

    #[tokio::test]
    async fn notify_publishes_on_the_bus() {
        let sink = MockSink::new();
        let clock = Clock::manual(0);
        let bus = Bus::unbridged();
        let exec = Executor::new(Arc::new(sink), bus.clone(), clock);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe(keydrive_protocol::Topic::ManagedKeyComplete, move |e| {
            seen2.lock().push(e.clone());
        });

        exec.enqueue(
            Priority::Emergency,
            Action::Notify("managed_key_complete:e".into()),
        );
        exec.tick().await;
        assert_eq!(
            seen.lock().as_slice(),
            [BusEvent::ManagedKeyComplete(Key::E)]
        );
    }

    #[tokio::test]
    async fn bad_notify_surfaces_a_core_error() {
        let sink = MockSink::new();
        let bus = Bus::unbridged();
        let exec = Executor::new(Arc::new(sink), bus.clone(), Clock::manual(0));

        let errors = Arc::new(Mutex::new(0u32));
        let errors2 = errors.clone();
        bus.subscribe(keydrive_protocol::Topic::CoreError, move |_| {
            *errors2.lock() += 1;
        });

        exec.enqueue(Priority::Normal, Action::Notify("not_a_topic".into()));
        exec.tick().await;
        assert_eq!(*errors.lock(), 1);
    }

    #[tokio::test]
    async fn stats_count_enqueues_and_processing() {
        let (exec, _sink, _clock) = executor();
        exec.enqueue(Priority::Emergency, Action::Press(Key::Digit1));
        exec.enqueue(Priority::Normal, Action::Press(Key::Q));
        exec.enqueue(Priority::Normal, Action::Press(Key::W));
        exec.tick().await;
        exec.tick().await;

        let stats = exec.stats();
        assert_eq!(stats.enqueued, [1, 0, 2, 0]);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn mouse_press_taps_as_click() {
        let (exec, sink, _clock) = executor();
        exec.enqueue(Priority::Normal, Action::Press(Key::LButton));
        exec.tick().await;
        assert_eq!(
            sink.events(),
            vec![
                SinkEvent::ButtonDown(keyspec::MouseButton::Left),
                SinkEvent::ButtonUp(keyspec::MouseButton::Left),
            ]
        );
    }
}
