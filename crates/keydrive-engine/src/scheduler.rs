//! Periodic task scheduler.
//!
//! A min-heap keyed by next-fire time, drained by a single driver task
//! that sleeps until the earliest deadline or a wake notification
//! (add/remove/pause all wake it). Stale heap entries are skipped lazily
//! via a per-task generation stamp, so remove/update never rebuild the
//! heap on the hot path.
//!
//! Pausing freezes firing without losing tasks; on resume every deadline
//! is translated by the paused duration, so a 500 ms pause shifts the
//! whole schedule by 500 ms instead of producing a catch-up burst.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{sync::Notify, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use eventbus::Bus;
use keydrive_protocol::BusEvent;

use crate::{Error, Result, clock::Clock};

/// Sleep used when no task is scheduled; a wake notification cuts it short.
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

type TaskCallback = Arc<dyn Fn() + Send + Sync>;

struct Entry {
    interval_ms: u64,
    callback: TaskCallback,
    one_shot: bool,
    enabled: bool,
    generation: u64,
    next_fire_ms: u64,
}

/// Status snapshot for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatus {
    /// Configured interval (or one-shot delay).
    pub interval_ms: u64,
    /// Milliseconds until the next fire, zero if overdue.
    pub next_fire_in_ms: u64,
    /// Whether the task is armed.
    pub enabled: bool,
}

struct SchedState {
    tasks: HashMap<String, Entry>,
    heap: BinaryHeap<Reverse<(u64, u64, String)>>,
    paused: bool,
    paused_at_ms: Option<u64>,
    next_generation: u64,
}

impl SchedState {
    fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            heap: BinaryHeap::new(),
            paused: false,
            paused_at_ms: None,
            next_generation: 0,
        }
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Drop stale heap heads and return the earliest live deadline.
    fn next_deadline(&mut self) -> Option<u64> {
        while let Some(Reverse((fire, generation, id))) = self.heap.peek() {
            let live = self
                .tasks
                .get(id)
                .is_some_and(|e| e.generation == *generation && e.enabled);
            if live {
                return Some(*fire);
            }
            let _ = self.heap.pop();
        }
        None
    }

    fn rebuild_heap(&mut self) {
        self.heap = self
            .tasks
            .iter()
            .filter(|(_, e)| e.enabled)
            .map(|(id, e)| Reverse((e.next_fire_ms, e.generation, id.clone())))
            .collect();
    }
}

/// The periodic skill scheduler (C5).
#[derive(Clone)]
pub struct Scheduler {
    state: Arc<Mutex<SchedState>>,
    clock: Clock,
    bus: Bus,
    wake: Arc<Notify>,
}

impl Scheduler {
    /// Create a scheduler; callback failures surface on `bus`.
    pub fn new(clock: Clock, bus: Bus) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedState::new())),
            clock,
            bus,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Add a periodic task. Fails when `task_id` is already present.
    pub fn add<F>(
        &self,
        task_id: &str,
        interval_ms: u64,
        callback: F,
        start_immediately: bool,
    ) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.insert(task_id, interval_ms, Arc::new(callback), start_immediately, false)
    }

    /// Add a task that fires once after `delay_ms` and is then discarded.
    pub fn add_one_shot<F>(&self, task_id: &str, delay_ms: u64, callback: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.insert(task_id, delay_ms, Arc::new(callback), false, true)
    }

    fn insert(
        &self,
        task_id: &str,
        interval_ms: u64,
        callback: TaskCallback,
        start_immediately: bool,
        one_shot: bool,
    ) -> Result<()> {
        let mut s = self.state.lock();
        if s.tasks.contains_key(task_id) {
            return Err(Error::DuplicateTask(task_id.to_string()));
        }
        let now = self.clock.now_ms();
        let next_fire_ms = if start_immediately {
            now
        } else {
            now + interval_ms
        };
        let generation = s.bump_generation();
        s.tasks.insert(
            task_id.to_string(),
            Entry {
                interval_ms,
                callback,
                one_shot,
                enabled: true,
                generation,
                next_fire_ms,
            },
        );
        s.heap
            .push(Reverse((next_fire_ms, generation, task_id.to_string())));
        drop(s);
        trace!(task_id, interval_ms, one_shot, "task_added");
        self.wake.notify_one();
        Ok(())
    }

    /// Remove a task. Returns whether it existed.
    pub fn remove(&self, task_id: &str) -> bool {
        let removed = self.state.lock().tasks.remove(task_id).is_some();
        if removed {
            trace!(task_id, "task_removed");
            self.wake.notify_one();
        }
        removed
    }

    /// Change a task's interval; the next fire uses the new interval from
    /// now. Returns whether the task existed.
    pub fn update_interval(&self, task_id: &str, new_ms: u64) -> bool {
        let mut s = self.state.lock();
        let now = self.clock.now_ms();
        let generation = s.bump_generation();
        let Some(entry) = s.tasks.get_mut(task_id) else {
            return false;
        };
        entry.interval_ms = new_ms;
        entry.next_fire_ms = now + new_ms;
        entry.generation = generation;
        let next = entry.next_fire_ms;
        s.heap.push(Reverse((next, generation, task_id.to_string())));
        drop(s);
        self.wake.notify_one();
        true
    }

    /// Park or re-arm one task. Re-arming schedules the next fire a full
    /// interval from now. Returns whether the task existed.
    pub fn set_task_enabled(&self, task_id: &str, enabled: bool) -> bool {
        let mut s = self.state.lock();
        let now = self.clock.now_ms();
        let generation = s.bump_generation();
        let Some(entry) = s.tasks.get_mut(task_id) else {
            return false;
        };
        entry.enabled = enabled;
        if enabled {
            entry.next_fire_ms = now + entry.interval_ms;
            entry.generation = generation;
            let next = entry.next_fire_ms;
            s.heap.push(Reverse((next, generation, task_id.to_string())));
        }
        drop(s);
        self.wake.notify_one();
        true
    }

    /// Freeze firing without losing tasks. Idempotent.
    pub fn pause(&self) {
        let mut s = self.state.lock();
        if !s.paused {
            s.paused = true;
            s.paused_at_ms = Some(self.clock.now_ms());
            debug!("scheduler_paused");
        }
    }

    /// Unfreeze. Every pending deadline is shifted by the paused duration
    /// so no burst fires.
    pub fn resume(&self) {
        let mut s = self.state.lock();
        if !s.paused {
            return;
        }
        s.paused = false;
        let paused_for = s
            .paused_at_ms
            .take()
            .map(|at| self.clock.now_ms().saturating_sub(at))
            .unwrap_or(0);
        for entry in s.tasks.values_mut() {
            entry.next_fire_ms += paused_for;
        }
        s.rebuild_heap();
        drop(s);
        debug!(paused_for, "scheduler_resumed");
        self.wake.notify_one();
    }

    /// Whether firing is currently frozen.
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Drop every task.
    pub fn clear(&self) {
        let mut s = self.state.lock();
        s.tasks.clear();
        s.heap.clear();
        drop(s);
        self.wake.notify_one();
    }

    /// Status for one task.
    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        let s = self.state.lock();
        let now = self.clock.now_ms();
        s.tasks.get(task_id).map(|e| TaskStatus {
            interval_ms: e.interval_ms,
            next_fire_in_ms: e.next_fire_ms.saturating_sub(now),
            enabled: e.enabled,
        })
    }

    /// Pop and invoke every due task. Returns how many callbacks ran.
    ///
    /// Callbacks run outside the scheduler lock; a panicking callback is
    /// isolated, reported as a `core:error` event, and its task stays
    /// scheduled.
    pub fn fire_due(&self) -> usize {
        let mut due: Vec<(String, TaskCallback)> = Vec::new();
        {
            let mut s = self.state.lock();
            if s.paused {
                return 0;
            }
            let now = self.clock.now_ms();
            loop {
                match s.next_deadline() {
                    Some(fire) if fire <= now => {}
                    _ => break,
                }
                let Some(Reverse((_, generation, id))) = s.heap.pop() else {
                    break;
                };
                let Some(entry) = s.tasks.get(&id) else {
                    continue;
                };
                if entry.generation != generation || !entry.enabled {
                    continue;
                }
                let callback = entry.callback.clone();
                if entry.one_shot {
                    s.tasks.remove(&id);
                } else {
                    let interval = entry.interval_ms;
                    let generation = s.bump_generation();
                    if let Some(entry) = s.tasks.get_mut(&id) {
                        entry.next_fire_ms = now + interval;
                        entry.generation = generation;
                    }
                    s.heap.push(Reverse((now + interval, generation, id.clone())));
                }
                due.push((id, callback));
            }
        }

        for (id, callback) in &due {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback())) {
                let cause = panic_message(panic);
                warn!(task_id = %id, %cause, "scheduler_callback_failed");
                self.bus.publish(BusEvent::CoreError {
                    context: format!("scheduler:{id}"),
                    cause,
                });
            }
        }
        due.len()
    }

    /// Spawn the driver loop: sleep until the earliest deadline or a wake,
    /// then fire everything due.
    pub fn spawn_driver(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let mut s = scheduler.state.lock();
                    if s.paused { None } else { s.next_deadline() }
                };
                let sleep_for = match deadline {
                    Some(fire) => {
                        let now = scheduler.clock.now_ms();
                        Duration::from_millis(fire.saturating_sub(now))
                    }
                    None => IDLE_SLEEP,
                };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        trace!("scheduler_driver_cancelled");
                        return;
                    }
                    _ = scheduler.wake.notified() => {}
                    _ = time::sleep(sleep_for) => {
                        scheduler.fire_due();
                    }
                }
            }
        })
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler() -> (Scheduler, Clock, Bus) {
        let clock = Clock::manual(0);
        let bus = Bus::unbridged();
        (Scheduler::new(clock.clone(), bus.clone()), clock, bus)
    }

    fn counter_task(sched: &Scheduler, id: &str, interval: u64) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        sched
            .add(id, interval, move || {
                c.fetch_add(1, Ordering::SeqCst);
            }, false)
            .unwrap();
        count
    }

    #[test]
    fn fires_on_interval_boundaries() {
        let (sched, clock, _bus) = scheduler();
        let count = counter_task(&sched, "t", 100);

        assert_eq!(sched.fire_due(), 0);
        clock.advance(99);
        assert_eq!(sched.fire_due(), 0);
        clock.advance(1);
        assert_eq!(sched.fire_due(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Rescheduled a full interval out.
        clock.advance(100);
        assert_eq!(sched.fire_due(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn start_immediately_fires_right_away() {
        let (sched, _clock, _bus) = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        sched
            .add("now", 100, move || {
                c.fetch_add(1, Ordering::SeqCst);
            }, true)
            .unwrap();
        assert_eq!(sched.fire_due(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_ids_are_refused() {
        let (sched, _clock, _bus) = scheduler();
        sched.add("t", 100, || {}, false).unwrap();
        let err = sched.add("t", 100, || {}, false).unwrap_err();
        assert_eq!(err, Error::DuplicateTask("t".into()));
        assert_eq!(err.code(), 4);
    }

    #[test]
    fn removed_tasks_never_fire() {
        let (sched, clock, _bus) = scheduler();
        let count = counter_task(&sched, "t", 50);
        assert!(sched.remove("t"));
        assert!(!sched.remove("t"));
        clock.advance(500);
        assert_eq!(sched.fire_due(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn update_interval_reschedules_from_now() {
        let (sched, clock, _bus) = scheduler();
        let count = counter_task(&sched, "t", 100);
        clock.advance(90);
        assert!(sched.update_interval("t", 500));

        // Old deadline (t=100) is stale now.
        clock.advance(20);
        assert_eq!(sched.fire_due(), 0);

        clock.advance(480); // t = 590 == 90 + 500
        assert_eq!(sched.fire_due(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sched.status("t").unwrap().interval_ms, 500);
    }

    #[test]
    fn pause_translates_deadlines_on_resume() {
        let (sched, clock, _bus) = scheduler();
        let count = counter_task(&sched, "t", 200); // next fire at t=200

        clock.advance(100);
        sched.pause();
        assert!(sched.is_paused());

        // Nothing fires while paused, however long it lasts.
        clock.advance(500);
        assert_eq!(sched.fire_due(), 0);

        sched.resume();
        // Deadline moved from 200 to 700; no catch-up burst at t=600.
        assert_eq!(sched.fire_due(), 0);
        assert_eq!(sched.status("t").unwrap().next_fire_in_ms, 100);

        clock.advance(100);
        assert_eq!(sched.fire_due(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_shot_fires_once_and_disappears() {
        let (sched, clock, _bus) = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        sched
            .add_one_shot("once", 50, move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        clock.advance(50);
        assert_eq!(sched.fire_due(), 1);
        assert!(sched.status("once").is_none());

        clock.advance(500);
        assert_eq!(sched.fire_due(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_callback_is_isolated_and_stays_scheduled() {
        let (sched, clock, bus) = scheduler();
        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        bus.subscribe(keydrive_protocol::Topic::CoreError, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        sched.add("bad", 100, || panic!("detector offline"), false).unwrap();
        let count = counter_task(&sched, "good", 100);

        clock.advance(100);
        assert_eq!(sched.fire_due(), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The failing task is still scheduled.
        clock.advance(100);
        assert_eq!(sched.fire_due(), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disabled_tasks_park_until_reenabled() {
        let (sched, clock, _bus) = scheduler();
        let count = counter_task(&sched, "t", 100);

        assert!(sched.set_task_enabled("t", false));
        clock.advance(300);
        assert_eq!(sched.fire_due(), 0);
        assert!(!sched.status("t").unwrap().enabled);

        assert!(sched.set_task_enabled("t", true));
        assert_eq!(sched.fire_due(), 0); // re-armed a full interval out
        clock.advance(100);
        assert_eq!(sched.fire_due(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn firing_interval_is_monotone() {
        let (sched, clock, _bus) = scheduler();
        let fired_at = Arc::new(Mutex::new(Vec::new()));
        let f = fired_at.clone();
        let c = clock.clone();
        sched
            .add("t", 100, move || f.lock().push(c.now_ms()), false)
            .unwrap();

        // Drive with a coarse 20 ms tick, like the real driver under load.
        for _ in 0..50 {
            clock.advance(20);
            sched.fire_due();
        }
        let fired = fired_at.lock();
        assert!(fired.len() >= 4);
        for pair in fired.windows(2) {
            assert!(pair[1] - pair[0] >= 100);
            assert!(pair[1] - pair[0] <= 120);
        }
    }
}
