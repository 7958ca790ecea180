use std::{collections::BTreeMap, sync::Arc, time::Duration};

use parking_lot::Mutex;

use keydrive_engine::Engine;
use keydrive_protocol::{
    Action, BusEvent, ConfigSnapshot, MacroState, ManagedKeySpec, Priority, SkillSpec,
    StationaryMode, StationaryVariant, Topic, TriggerMode,
};
use keyhook::{KeyEdge, RawEvent};
use keyspec::Key;
use sendkey::{MockSink, SinkEvent};

/// Long enough for the coordinator and a few executor ticks to settle.
const SETTLE: Duration = Duration::from_millis(120);

fn test_config() -> ConfigSnapshot {
    let mut managed = BTreeMap::new();
    managed.insert(
        Key::E,
        ManagedKeySpec {
            target_key: Key::Shift,
            delay_ms: 50,
        },
    );
    ConfigSnapshot {
        emergency_hp_key: Some(Key::Digit1),
        emergency_mp_key: Some(Key::Digit2),
        special_keys: vec![Key::Space],
        managed_keys: managed,
        force_move_key: Some(Key::A),
        force_move_replacement_key: Some(Key::F),
        stationary_toggle_key: Some(Key::X),
        stationary_mode: StationaryMode {
            active: false,
            variant: StationaryVariant::ShiftModifier,
        },
        ..Default::default()
    }
}

fn start_engine(config: ConfigSnapshot) -> (Engine, MockSink) {
    let sink = MockSink::new();
    let engine = Engine::new(Arc::new(sink.clone()), config);
    engine.start();
    (engine, sink)
}

fn watch(engine: &Engine, topic: Topic) -> Arc<Mutex<Vec<BusEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    engine.bus().subscribe(topic, move |e| {
        seen2.lock().push(e.clone());
    });
    seen
}

fn user_key(engine: &Engine, key: Key, edge: KeyEdge) -> bool {
    engine.hook_manager().process(RawEvent {
        key,
        edge,
        injected: false,
    })
}

async fn settle() {
    tokio::time::sleep(SETTLE).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn emergency_lane_survives_manual_pause() {
    let (engine, sink) = start_engine(test_config());
    engine.transition(MacroState::Ready).unwrap();
    engine.transition(MacroState::Running).unwrap();
    engine.transition(MacroState::Paused).unwrap();

    engine
        .enqueue(Priority::Emergency, Action::Press(Key::Digit1))
        .unwrap();
    engine.enqueue(Priority::Normal, Action::Press(Key::Q)).unwrap();
    settle().await;

    assert_eq!(sink.taps(), vec![Key::Digit1]);

    engine.transition(MacroState::Running).unwrap();
    settle().await;
    assert_eq!(sink.taps(), vec![Key::Digit1, Key::Q]);

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn managed_key_clears_lower_lanes_and_rewrites() {
    let (engine, sink) = start_engine(test_config());
    let managed_down = watch(&engine, Topic::ManagedKeyDown);
    let managed_complete = watch(&engine, Topic::ManagedKeyComplete);

    // Armed but not yet running: the lower lanes hold still while the
    // emergency lane (and the managed rewrite) stay live.
    engine.transition(MacroState::Ready).unwrap();

    // Skill spillover pending in the lower lanes.
    engine.enqueue(Priority::High, Action::Press(Key::Q)).unwrap();
    engine.enqueue(Priority::Normal, Action::Press(Key::Digit3)).unwrap();

    // User presses the managed dodge key.
    assert!(user_key(&engine, Key::E, KeyEdge::Down));
    assert!(user_key(&engine, Key::E, KeyEdge::Up));

    // Pre-delay + press + post-delay + notify + cleanup: ~100ms of delays.
    tokio::time::sleep(Duration::from_millis(400)).await;

    // Only the rewritten target landed.
    assert_eq!(sink.taps(), vec![Key::Shift]);
    assert_eq!(managed_down.lock().as_slice(), [BusEvent::ManagedKeyDown(Key::E)]);
    assert_eq!(
        managed_complete.lock().as_slice(),
        [BusEvent::ManagedKeyComplete(Key::E)]
    );

    // The spillover was cleared: running drains nothing further.
    engine.transition(MacroState::Running).unwrap();
    settle().await;
    assert_eq!(sink.taps(), vec![Key::Shift]);

    // The de-dup id was released: a fresh press re-arms.
    assert!(user_key(&engine, Key::E, KeyEdge::Down));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(sink.taps(), vec![Key::Shift, Key::Shift]);

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn managed_key_burst_enqueues_once() {
    let (engine, sink) = start_engine(test_config());
    let managed_down = watch(&engine, Topic::ManagedKeyDown);

    engine.transition(MacroState::Ready).unwrap();
    engine.transition(MacroState::Running).unwrap();

    // Burst: three presses while the first sequence is still in flight.
    for _ in 0..3 {
        user_key(&engine, Key::E, KeyEdge::Down);
        user_key(&engine, Key::E, KeyEdge::Up);
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(sink.taps(), vec![Key::Shift]);
    assert_eq!(managed_down.lock().len(), 1);

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn special_key_filters_skills_but_not_potions() {
    let (engine, sink) = start_engine(test_config());
    let pauses = watch(&engine, Topic::SpecialKeyPause);

    engine.transition(MacroState::Ready).unwrap();

    // Hold the special key while still armed (queues paused), then queue
    // a skill press and a potion press, then run.
    assert!(!user_key(&engine, Key::Space, KeyEdge::Down));
    settle().await;
    engine.enqueue(Priority::High, Action::Press(Key::Q)).unwrap();
    engine
        .enqueue(Priority::Emergency, Action::Press(Key::Digit1))
        .unwrap();
    engine.transition(MacroState::Running).unwrap();
    settle().await;

    // The potion fires; the skill stays queued while space is held.
    assert_eq!(sink.taps(), vec![Key::Digit1]);

    assert!(!user_key(&engine, Key::Space, KeyEdge::Up));
    settle().await;
    assert_eq!(sink.taps(), vec![Key::Digit1, Key::Q]);

    let pauses = pauses.lock();
    assert_eq!(pauses.len(), 2, "one start and one end edge: {pauses:?}");

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn injected_events_never_reenter_the_hooks() {
    let (engine, _sink) = start_engine(test_config());
    let managed_down = watch(&engine, Topic::ManagedKeyDown);

    engine.transition(MacroState::Ready).unwrap();
    engine.transition(MacroState::Running).unwrap();

    // The executor's own output arrives at the tap with the injected mark.
    let swallowed = engine.hook_manager().process(RawEvent {
        key: Key::E,
        edge: KeyEdge::Down,
        injected: true,
    });
    settle().await;

    assert!(!swallowed);
    assert!(managed_down.lock().is_empty());

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn timer_skill_fires_through_the_whole_stack() {
    let mut config = test_config();
    config.skills = vec![SkillSpec {
        id: "poke".into(),
        keys: "q".into(),
        alt_keys: None,
        trigger: TriggerMode::Timer,
        interval_ms: 100,
        execute_condition: Default::default(),
        priority: Priority::Normal,
        enabled: true,
        cooldown_probe: None,
        condition_probe: None,
    }];
    let (engine, sink) = start_engine(config);

    engine.transition(MacroState::Ready).unwrap();
    engine.transition(MacroState::Running).unwrap();
    tokio::time::sleep(Duration::from_millis(450)).await;
    engine.transition(MacroState::Paused).unwrap();

    let fired = sink.taps().len();
    assert!(fired >= 2, "expected repeated firings, got {fired}");

    // Paused: the scheduler freezes, nothing more fires.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.taps().len(), fired);

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn force_move_substitution_follows_the_monitored_key() {
    let (engine, sink) = start_engine(test_config());

    engine.transition(MacroState::Ready).unwrap();
    engine.transition(MacroState::Running).unwrap();

    assert!(!user_key(&engine, Key::A, KeyEdge::Down));
    settle().await;
    engine.enqueue(Priority::Normal, Action::Press(Key::Q)).unwrap();
    settle().await;
    assert_eq!(sink.taps(), vec![Key::F]);

    assert!(!user_key(&engine, Key::A, KeyEdge::Up));
    settle().await;
    engine.enqueue(Priority::Normal, Action::Press(Key::Q)).unwrap();
    settle().await;
    assert_eq!(sink.taps(), vec![Key::F, Key::Q]);

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn stationary_toggle_key_wraps_presses_in_shift() {
    let (engine, sink) = start_engine(test_config());

    engine.transition(MacroState::Ready).unwrap();
    engine.transition(MacroState::Running).unwrap();

    assert!(user_key(&engine, Key::X, KeyEdge::Down));
    user_key(&engine, Key::X, KeyEdge::Up);
    settle().await;

    engine.enqueue(Priority::Normal, Action::Press(Key::Digit2)).unwrap();
    settle().await;
    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::Down(Key::Shift),
            SinkEvent::Down(Key::Digit2),
            SinkEvent::Up(Key::Digit2),
            SinkEvent::Up(Key::Shift),
        ]
    );

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn lifecycle_hotkeys_drive_the_state_machine() {
    let (engine, _sink) = start_engine(test_config());
    let changes = watch(&engine, Topic::StateChanged);

    // F8 arms, Z runs, Z pauses, F8 stops.
    user_key(&engine, Key::F8, KeyEdge::Down);
    user_key(&engine, Key::F8, KeyEdge::Up);
    settle().await;
    assert_eq!(engine.state(), MacroState::Ready);

    user_key(&engine, Key::Z, KeyEdge::Down);
    user_key(&engine, Key::Z, KeyEdge::Up);
    settle().await;
    assert_eq!(engine.state(), MacroState::Running);

    user_key(&engine, Key::Z, KeyEdge::Down);
    user_key(&engine, Key::Z, KeyEdge::Up);
    settle().await;
    assert_eq!(engine.state(), MacroState::Paused);

    user_key(&engine, Key::F8, KeyEdge::Down);
    settle().await;
    assert_eq!(engine.state(), MacroState::Stopped);

    // Dynamic hooks are gone, the root key remains.
    assert_eq!(engine.hook_manager().len(), 1);

    // Every observed transition was legal.
    for event in changes.lock().iter() {
        let BusEvent::StateChanged { old, new } = event else {
            panic!("unexpected event {event:?}");
        };
        assert!(old.can_transition_to(*new), "{old} -> {new}");
    }

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_transitions_are_refused_and_reported() {
    let (engine, _sink) = start_engine(test_config());
    let rejected = watch(&engine, Topic::StateRejected);

    let err = engine.transition(MacroState::Paused).unwrap_err();
    assert_eq!(err.code(), 1);
    assert_eq!(engine.state(), MacroState::Stopped);

    settle().await;
    assert_eq!(
        rejected.lock().as_slice(),
        [BusEvent::StateRejected {
            current: MacroState::Stopped,
            requested: MacroState::Paused,
        }]
    );

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduler_pause_requests_pause_skills_but_not_potions() {
    let mut config = test_config();
    config.skills = vec![SkillSpec {
        id: "poke".into(),
        keys: "q".into(),
        alt_keys: None,
        trigger: TriggerMode::Timer,
        interval_ms: 80,
        execute_condition: Default::default(),
        priority: Priority::Normal,
        enabled: true,
        cooldown_probe: None,
        condition_probe: None,
    }];
    let (engine, sink) = start_engine(config);

    engine.transition(MacroState::Ready).unwrap();
    engine.transition(MacroState::Running).unwrap();

    // Decision layer requests a pause (resource threshold crossing).
    engine.bus().publish(BusEvent::SchedulerPauseRequested);
    settle().await;
    sink.clear();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(sink.taps().is_empty(), "skills must not fire while paused");

    // Emergency enqueues still drain.
    engine
        .enqueue(Priority::Emergency, Action::Press(Key::Digit1))
        .unwrap();
    settle().await;
    assert_eq!(sink.taps(), vec![Key::Digit1]);

    engine.bus().publish(BusEvent::SchedulerResumeRequested);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(sink.taps().len() > 1, "skills resume after the request");

    engine.shutdown();
}
