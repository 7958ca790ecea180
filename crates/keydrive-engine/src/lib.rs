//! keydrive Engine
//!
//! Coordinates the core of the game-automation assistant:
//! - a priority input executor draining four queues against the OS input API
//! - a periodic skill scheduler on a monotonic clock
//! - the low-level hook subsystem's event stream
//! - the four-state macro lifecycle (Stopped/Ready/Running/Paused)
//!
//! Construct an [`Engine`], feed it a configuration snapshot, call
//! [`Engine::start`] inside a tokio runtime, and drive the lifecycle with
//! [`Engine::transition`] (or let the registered system hotkeys do it).
//!
//! A single coordinator thread owns every write to the executor's pause
//! flags and the managed-key de-dup set: it drains the hook event channel
//! and the bus's bridged topics, so hook callbacks stay short and
//! cross-thread flag races cannot occur.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

mod clock;
mod error;
mod executor;
mod scheduler;
mod skills;

pub use clock::Clock;
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorStats, TICK_MS};
pub use scheduler::{Scheduler, TaskStatus};
pub use skills::{AlwaysReady, ConditionSource, SkillDriver};

use eventbus::Bus;
use keydrive_protocol::{
    Action, BusEvent, ConfigSnapshot, MacroState, PauseEdge, Priority, Topic,
};
use keyhook::{HookEvent, HookMode, Manager};
use keyspec::Key;
use sendkey::InputSink;

struct EngineInner {
    bus: Bus,
    clock: Clock,
    executor: Executor,
    scheduler: Scheduler,
    skills: SkillDriver,
    hooks: Manager,
    state: Mutex<MacroState>,
    config: RwLock<Arc<ConfigSnapshot>>,
    cancel: CancellationToken,
    started: AtomicBool,
    hook_rx: Mutex<Option<Receiver<HookEvent>>>,
    bridged_rx: Mutex<Option<Receiver<BusEvent>>>,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
    coordinator: Mutex<Option<thread::JoinHandle<()>>>,
}

/// The macro controller (C6). Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine with the system clock and an always-ready
    /// condition source.
    pub fn new(sink: Arc<dyn InputSink>, config: ConfigSnapshot) -> Self {
        Self::with_parts(sink, Arc::new(AlwaysReady), Clock::system(), config)
    }

    /// Create an engine from explicit parts (tests inject a manual clock
    /// and a scripted condition source here).
    pub fn with_parts(
        sink: Arc<dyn InputSink>,
        conditions: Arc<dyn ConditionSource>,
        clock: Clock,
        config: ConfigSnapshot,
    ) -> Self {
        // Topics that mutate executor/scheduler state are marshaled onto
        // the coordinator; everything else delivers on the publisher.
        let (bus, bridged_rx) = Bus::new([
            Topic::SchedulerPauseRequested,
            Topic::SchedulerResumeRequested,
            Topic::ManagedKeyComplete,
        ]);
        let executor = Executor::new(sink.clone(), bus.clone(), clock.clone());
        let scheduler = Scheduler::new(clock.clone(), bus.clone());
        let skills = SkillDriver::new(executor.clone(), scheduler.clone(), sink, conditions);

        let (hook_tx, hook_rx) = unbounded();
        let hooks = Manager::new(config.system_keys.root, hook_tx);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        Self {
            inner: Arc::new(EngineInner {
                bus,
                clock,
                executor,
                scheduler,
                skills,
                hooks,
                state: Mutex::new(MacroState::Stopped),
                config: RwLock::new(Arc::new(config)),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                hook_rx: Mutex::new(Some(hook_rx)),
                bridged_rx: Mutex::new(Some(bridged_rx)),
                shutdown_tx,
                shutdown_rx,
                coordinator: Mutex::new(None),
            }),
        }
    }

    /// Spawn the executor ticker, the scheduler driver, and the
    /// coordinator thread. Must be called inside a tokio runtime; calling
    /// twice is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.executor.spawn_ticker(self.inner.cancel.clone());
        let _ = self.inner.scheduler.spawn_driver(self.inner.cancel.clone());

        let hook_rx = self.inner.hook_rx.lock().take();
        let bridged_rx = self.inner.bridged_rx.lock().take();
        if let (Some(hook_rx), Some(bridged_rx)) = (hook_rx, bridged_rx) {
            let engine = self.clone();
            let shutdown_rx = self.inner.shutdown_rx.clone();
            let handle = thread::Builder::new()
                .name("kd-coordinator".into())
                .spawn(move || engine.run_coordinator(hook_rx, bridged_rx, shutdown_rx));
            match handle {
                Ok(handle) => *self.inner.coordinator.lock() = Some(handle),
                Err(e) => warn!(error = %e, "coordinator_thread_spawn_failed"),
            }
        }
        debug!("engine_started");
    }

    /// Broadcast cancellation: transition to Stopped, stop the runtime
    /// tasks, and join the coordinator.
    pub fn shutdown(&self) {
        let _ = self.transition(MacroState::Stopped);
        self.inner.cancel.cancel();
        let _ = self.inner.shutdown_tx.send(());
        if let Some(handle) = self.inner.coordinator.lock().take() {
            let _ = handle.join();
        }
        info!("engine_shutdown_complete");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MacroState {
        *self.inner.state.lock()
    }

    /// Handle to the bus, for subscriptions and decision-layer publishes.
    pub fn bus(&self) -> Bus {
        self.inner.bus.clone()
    }

    /// The engine's monotonic clock.
    pub fn clock(&self) -> Clock {
        self.inner.clock.clone()
    }

    /// Handle to the hook manager. The OS backend and tests feed raw
    /// events through it.
    pub fn hook_manager(&self) -> Manager {
        self.inner.hooks.clone()
    }

    /// Handle to the scheduler, for decision-layer task registration.
    pub fn scheduler(&self) -> Scheduler {
        self.inner.scheduler.clone()
    }

    /// Executor counters.
    pub fn stats(&self) -> ExecutorStats {
        self.inner.executor.stats()
    }

    /// Enqueue an action from the decision layer.
    pub fn enqueue(&self, priority: Priority, action: Action) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        self.inner.executor.enqueue(priority, action);
        Ok(())
    }

    /// Replace the stored configuration. The new snapshot is consumed
    /// whole on the next entry to Ready; nothing is applied piecemeal.
    pub fn set_config(&self, config: ConfigSnapshot) {
        *self.inner.config.write() = Arc::new(config);
        debug!("config_snapshot_replaced");
    }

    fn config(&self) -> Arc<ConfigSnapshot> {
        self.inner.config.read().clone()
    }

    /// Request a lifecycle transition. Illegal transitions are refused
    /// with the state unchanged and a `state:rejected` event.
    pub fn transition(&self, to: MacroState) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let mut state = self.inner.state.lock();
        let from = *state;
        if !from.can_transition_to(to) {
            drop(state);
            warn!(%from, %to, "transition_refused");
            self.inner.bus.publish(BusEvent::StateRejected {
                current: from,
                requested: to,
            });
            return Err(Error::InvalidTransition { from, to });
        }
        *state = to;
        if let Err(e) = self.on_enter(to, from) {
            *state = from;
            drop(state);
            warn!(%from, %to, error = %e, "transition_entry_failed");
            self.inner.bus.publish(BusEvent::StateRejected {
                current: from,
                requested: to,
            });
            return Err(e);
        }
        drop(state);
        info!(%from, %to, "state_changed");
        self.inner.bus.publish(BusEvent::StateChanged { old: from, new: to });
        Ok(())
    }

    fn on_enter(&self, to: MacroState, from: MacroState) -> Result<()> {
        match to {
            MacroState::Ready => self.enter_ready(),
            MacroState::Running => {
                trace!(%from, "enter_running");
                self.inner.executor.resume_manual();
                self.inner.scheduler.resume();
                self.inner.skills.apply_holds();
                Ok(())
            }
            MacroState::Paused => {
                self.inner.skills.release_holds();
                self.inner.executor.pause_manual();
                self.inner.scheduler.pause();
                Ok(())
            }
            MacroState::Stopped => {
                self.inner.hooks.clear_all();
                self.inner.skills.uninstall();
                self.inner.scheduler.pause();
                self.inner.executor.clear_all();
                self.inner.executor.pause_manual();
                self.inner.executor.set_special_paused(false);
                self.inner.executor.set_force_move(false);
                Ok(())
            }
        }
    }

    /// Apply the configuration snapshot whole: skills first (they validate
    /// the key specs), then executor caches, then hook registrations.
    fn enter_ready(&self) -> Result<()> {
        let cfg = self.config();

        self.inner.skills.install(&cfg)?;

        let executor = &self.inner.executor;
        executor.cache_emergency_keys(cfg.emergency_hp_key, cfg.emergency_mp_key);
        let replacement = cfg
            .force_move_replacement_key
            .or(cfg.force_move_key.map(|_| Key::F));
        executor.set_force_move_replacement(replacement);
        executor.set_force_move(false);
        executor.set_stationary(cfg.stationary_mode.active, cfg.stationary_mode.variant);
        executor.clear_all();
        executor.pause_manual();

        self.inner.scheduler.pause();
        self.register_hooks(&cfg);
        self.inner.bus.publish(BusEvent::ConfigApplied(cfg));
        Ok(())
    }

    fn register_hooks(&self, cfg: &ConfigSnapshot) {
        let hooks = &self.inner.hooks;
        let system = [
            cfg.system_keys.reroll,
            cfg.system_keys.pathfind,
            cfg.system_keys.run_pause,
        ];
        for key in system.into_iter().flatten() {
            hooks.register(key, HookMode::Intercept);
        }
        if let Some(key) = cfg.stationary_toggle_key {
            hooks.register(key, HookMode::Intercept);
        }
        for key in &cfg.special_keys {
            hooks.register(*key, HookMode::Special);
        }
        for key in cfg.managed_keys.keys() {
            hooks.register(*key, HookMode::Priority);
        }
        if let Some(key) = cfg.force_move_key {
            hooks.register(key, HookMode::Monitor);
        }
    }

    fn run_coordinator(
        &self,
        hook_rx: Receiver<HookEvent>,
        bridged_rx: Receiver<BusEvent>,
        shutdown_rx: Receiver<()>,
    ) {
        debug!("coordinator_started");
        loop {
            crossbeam_channel::select! {
                recv(shutdown_rx) -> _ => break,
                recv(hook_rx) -> msg => match msg {
                    Ok(event) => self.on_hook_event(event),
                    Err(_) => break,
                },
                recv(bridged_rx) -> msg => match msg {
                    Ok(event) => self.on_bridged_event(event),
                    Err(_) => break,
                },
            }
        }
        debug!("coordinator_exited");
    }

    fn on_hook_event(&self, event: HookEvent) {
        trace!(?event, "hook_event");
        let bus = &self.inner.bus;
        match event {
            HookEvent::InterceptDown(key) => self.on_intercept(key),
            HookEvent::ManagedDown(key) => self.on_managed_down(key),
            HookEvent::SpecialDown(key) => bus.publish(BusEvent::SpecialKeyDown(key)),
            HookEvent::SpecialUp(key) => bus.publish(BusEvent::SpecialKeyUp(key)),
            HookEvent::SpecialPauseStart => {
                self.inner.executor.set_special_paused(true);
                bus.publish(BusEvent::SpecialKeyPause(PauseEdge::Start));
                bus.publish(BusEvent::SchedulerPauseRequested);
            }
            HookEvent::SpecialPauseEnd => {
                self.inner.executor.set_special_paused(false);
                bus.publish(BusEvent::SpecialKeyPause(PauseEdge::End));
                bus.publish(BusEvent::SchedulerResumeRequested);
            }
            HookEvent::MonitorDown(key) => {
                if self.config().force_move_key == Some(key) {
                    self.inner.executor.set_force_move(true);
                }
                bus.publish(BusEvent::MonitorKeyDown(key));
            }
            HookEvent::MonitorUp(key) => {
                if self.config().force_move_key == Some(key) {
                    self.inner.executor.set_force_move(false);
                }
                bus.publish(BusEvent::MonitorKeyUp(key));
            }
        }
    }

    fn on_intercept(&self, key: Key) {
        let bus = &self.inner.bus;
        bus.publish(BusEvent::InterceptKeyDown(key));

        let cfg = self.config();
        if key == cfg.system_keys.root {
            bus.publish(BusEvent::Hotkey(key.name().to_string()));
            let target = if self.state() == MacroState::Stopped {
                MacroState::Ready
            } else {
                MacroState::Stopped
            };
            let _ = self.transition(target);
        } else if cfg.system_keys.run_pause == Some(key) {
            bus.publish(BusEvent::Hotkey(key.name().to_string()));
            let target = match self.state() {
                MacroState::Ready | MacroState::Paused => Some(MacroState::Running),
                MacroState::Running => Some(MacroState::Paused),
                MacroState::Stopped => None,
            };
            if let Some(target) = target {
                let _ = self.transition(target);
            }
        } else if cfg.system_keys.reroll == Some(key) || cfg.system_keys.pathfind == Some(key) {
            // Decision-layer concerns; the event is the whole contract.
            bus.publish(BusEvent::Hotkey(key.name().to_string()));
        } else if cfg.stationary_toggle_key == Some(key) {
            let active = !self.inner.executor.stationary_active();
            self.inner
                .executor
                .set_stationary(active, cfg.stationary_mode.variant);
            debug!(active, "stationary_mode_toggled");
        }
    }

    /// Managed key activation: de-dup, clear the skill spillover, then
    /// enqueue the rewritten sequence on the emergency lane. The clear
    /// happens before the enqueue.
    fn on_managed_down(&self, key: Key) {
        let cfg = self.config();
        let Some(spec) = cfg.managed_keys.get(&key) else {
            warn!(%key, "managed_key_without_config");
            return;
        };
        let executor = &self.inner.executor;
        if !executor.try_begin_sequence(key.name()) {
            trace!(%key, "managed_key_deduplicated");
            return;
        }

        executor.clear_non_emergency();
        executor.enqueue(Priority::Emergency, Action::Delay(spec.delay_ms));
        executor.enqueue(Priority::Emergency, Action::Press(spec.target_key));
        executor.enqueue(Priority::Emergency, Action::Delay(spec.delay_ms));
        executor.enqueue(
            Priority::Emergency,
            Action::Notify(format!("managed_key_complete:{key}")),
        );
        executor.enqueue(Priority::Emergency, Action::Cleanup(key.name().to_string()));

        self.inner.bus.publish(BusEvent::ManagedKeyDown(key));
        self.inner.bus.publish(BusEvent::SchedulerPauseRequested);
    }

    fn on_bridged_event(&self, event: BusEvent) {
        trace!(?event, "bridged_event");
        match &event {
            BusEvent::SchedulerPauseRequested => self.inner.scheduler.pause(),
            BusEvent::SchedulerResumeRequested => {
                // Scheduler pause is soft: resume only while actually
                // running and no special key is still held.
                if self.state() == MacroState::Running && !self.inner.executor.special_paused() {
                    self.inner.scheduler.resume();
                }
            }
            BusEvent::ManagedKeyComplete(_) => {
                self.inner.bus.publish(BusEvent::SchedulerResumeRequested);
            }
            _ => {}
        }
        self.inner.bus.deliver_now(event);
    }
}
