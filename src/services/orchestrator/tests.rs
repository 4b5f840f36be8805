//! Tests for the sorting orchestrator

use super::*;
use crate::domain::types::{MotionOutcome, Sensor, Slot, UserId};
use crate::infra::clock::StopSignal;
use crate::io::camera::{ScriptedClassifier, SimCamera};
use crate::io::events::{create_event_channel, SorterEvent};
use crate::io::gpio::share;
use crate::io::ledger::MemoryLedger;
use crate::io::sim::SimRig;
use tokio::sync::mpsc;

/// Test harness that keeps the event receiver and rig handles alive
struct TestOrchestrator {
    orch: Orchestrator,
    rig: SimRig,
    ledger: MemoryLedger,
    session: SessionHandle,
    metrics: Arc<Metrics>,
    events: mpsc::UnboundedReceiver<SorterEvent>,
}

impl std::ops::Deref for TestOrchestrator {
    type Target = Orchestrator;
    fn deref(&self) -> &Self::Target {
        &self.orch
    }
}

impl std::ops::DerefMut for TestOrchestrator {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.orch
    }
}

impl TestOrchestrator {
    fn statuses(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|e| match e {
                SorterEvent::Status { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    fn drain(&mut self) -> Vec<SorterEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn present(&self) {
        self.rig.present_item(millis(500), millis(1500), 2.0);
    }

    fn cycle(&mut self) -> SortCycle {
        match self.orch.tick().unwrap() {
            Tick::Cycle(cycle) => *cycle,
            other => panic!("expected a sort cycle, got {other:?}"),
        }
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn user() -> UserId {
    UserId("u-1".to_string())
}

fn create_test_orchestrator(camera: SimCamera, classifier: ScriptedClassifier) -> TestOrchestrator {
    create_with_ledger(camera, classifier, MemoryLedger::new())
}

fn create_with_ledger(camera: SimCamera, classifier: ScriptedClassifier, ledger: MemoryLedger) -> TestOrchestrator {
    let config = Config::default();
    let rig = SimRig::standard();
    let hw = Hardware::new(share(Box::new(rig.gpio())), Arc::new(rig.clock(false)), StopSignal::new(), &config);
    let (sink, events) = create_event_channel();
    let session = SessionHandle::new();
    session.login(user(), None, 0);
    let metrics = Arc::new(Metrics::new());

    let collaborators = Collaborators {
        camera: Box::new(camera),
        classifier: Box::new(classifier),
        ledger: Box::new(ledger.clone()),
        sink: Box::new(sink),
    };
    let orch = Orchestrator::new(&config, hw, collaborators, session.clone(), metrics.clone());
    TestOrchestrator { orch, rig, ledger, session, metrics, events }
}

fn labelled(label: &str) -> TestOrchestrator {
    create_test_orchestrator(SimCamera::connected(), ScriptedClassifier::once([Some(label)]))
}

#[test]
fn test_plastic_happy_path() {
    let mut t = labelled("plastic_bottle");
    t.present();

    let cycle = t.cycle();
    assert!(cycle.succeeded());
    assert_eq!(cycle.slot, Some(Slot::Plastic));
    assert_eq!(cycle.attempts, 1);
    assert!(cycle.ejected);
    assert_eq!(cycle.points, Some(3));
    assert!(cycle.home_attempted && cycle.home_succeeded);
    assert_eq!(cycle.failure, None);

    assert_eq!(t.ledger.entries(), vec![(user(), Slot::Plastic, 3)]);
    let stats = t.session.stats().unwrap();
    assert_eq!((stats.plastic, stats.total_points), (1, 3));

    let machine = t.machine();
    assert_eq!(machine.state, SorterState::Ready);
    assert_eq!(machine.position, Position::Home);
    assert_eq!(machine.cycles, 1);
    assert_eq!(machine.last_slot, Some(Slot::Plastic));
    assert!(t.rig.all_relays_off());
    assert_eq!(t.rig.items_ejected(), 1);
    assert!(t.rig.is_triggered(Sensor::Glass));
}

#[test]
fn test_happy_path_event_order() {
    let mut t = labelled("plastic_bottle");
    t.present();
    t.cycle();

    let events = t.drain();
    let states: Vec<SorterState> = events
        .iter()
        .filter_map(|e| match e {
            SorterEvent::State { state } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        [
            SorterState::AwaitingItem,
            SorterState::Classifying,
            SorterState::Positioning,
            SorterState::Ejecting,
            SorterState::ReportingPoints,
            SorterState::ReturningHome,
            SorterState::Ready,
        ]
    );

    let sorted_at = events.iter().position(|e| matches!(e, SorterEvent::ItemSorted { .. })).unwrap();
    assert_eq!(events[sorted_at], SorterEvent::ItemSorted { slot: Slot::Plastic, points: 3 });
    let ejecting_at =
        events.iter().position(|e| *e == SorterEvent::State { state: SorterState::Ejecting }).unwrap();
    assert!(ejecting_at < sorted_at);

    let last_status = events.iter().rev().find_map(|e| match e {
        SorterEvent::Status { message } => Some(message.as_str()),
        _ => None,
    });
    assert_eq!(last_status, Some(status::READY));
}

#[test]
fn test_glass_skips_motion_and_return() {
    let mut t = labelled("glass_bottle");
    t.present();

    let cycle = t.cycle();
    assert_eq!(cycle.points, Some(5));
    assert!(!cycle.home_attempted);
    assert_eq!(cycle.attempts, 0);
    assert_eq!(t.hardware().actuators.motion_commands(), 0);
    assert_eq!(t.ledger.entries(), vec![(user(), Slot::Glass, 5)]);
    assert!(!t.drain().contains(&SorterEvent::State { state: SorterState::ReturningHome }));
}

#[test]
fn test_can_end_limit_counts_as_reached() {
    let mut t = labelled("can");
    t.rig.override_sensor(Sensor::Can, Some(false));
    t.present();

    let cycle = t.cycle();
    assert_eq!(cycle.positioning, Some(MotionOutcome::Reached));
    assert_eq!(cycle.points, Some(2));
    assert_eq!(t.ledger.entries(), vec![(user(), Slot::Can, 2)]);
    assert!(cycle.home_succeeded);
}

#[test]
fn test_plastic_blocked_earns_nothing() {
    let mut t = labelled("plastic");
    t.rig.override_sensor(Sensor::Plastic, Some(false));
    t.present();

    let cycle = t.cycle();
    assert_eq!(cycle.positioning, Some(MotionOutcome::BlockedByLimit));
    assert_eq!(cycle.failure, Some(SortError::SafetyInterlock(Slot::Plastic)));
    assert!(!cycle.ejected);
    assert!(!cycle.home_attempted);
    assert_eq!(cycle.points, None);
    assert!(t.ledger.entries().is_empty());
    assert_eq!(t.session.stats().unwrap(), Default::default());
    assert_eq!(t.machine().position, Position::EndLimit);
    assert_eq!(t.machine().state, SorterState::Ready);
    assert!(t.statuses().contains(&status::POSITIONING_FAILED.to_string()));
    assert!(t.rig.item_present());
}

#[test]
fn test_plastic_timeout_earns_nothing() {
    let mut t = labelled("plastic");
    t.rig.override_sensor(Sensor::Plastic, Some(false));
    t.rig.override_sensor(Sensor::EndLimit, Some(false));
    t.present();

    let cycle = t.cycle();
    assert_eq!(cycle.positioning, Some(MotionOutcome::TimedOut));
    assert_eq!(cycle.attempts, 3);
    assert_eq!(cycle.failure, Some(SortError::SensorTimeout("positioning")));
    assert!(t.ledger.entries().is_empty());
    assert_eq!(t.machine().position, Position::Unknown);
}

#[test]
fn test_points_reported_iff_reached() {
    let scenarios: [(&str, Option<Sensor>); 5] = [
        ("plastic_bottle", None),
        ("plastic_bottle", Some(Sensor::Plastic)),
        ("can", None),
        ("can", Some(Sensor::Can)),
        ("glass_bottle", None),
    ];
    for (label, dead_sensor) in scenarios {
        let mut t = labelled(label);
        if let Some(sensor) = dead_sensor {
            t.rig.override_sensor(sensor, Some(false));
        }
        t.present();
        let cycle = t.cycle();
        let reached = cycle.positioning == Some(MotionOutcome::Reached);
        assert_eq!(!t.ledger.entries().is_empty(), reached, "{label} / {dead_sensor:?}");
        assert_eq!(cycle.ejected, reached);
        assert_eq!(cycle.succeeded(), reached);
    }
}

#[test]
fn test_unreached_cycle_reports_no_points() {
    let mut t = labelled("can");
    let mut cycle = SortCycle::new();
    cycle.slot = Some(Slot::Can);
    cycle.positioning = Some(MotionOutcome::TimedOut);

    t.orch.report_points(&mut cycle, 2);
    assert_eq!(cycle.points, None);
    assert!(t.ledger.entries().is_empty());
    assert_eq!(t.session.stats().unwrap(), Default::default());
}

#[test]
fn test_glass_after_blocked_seek_rehomes_first() {
    let mut t = create_test_orchestrator(
        SimCamera::connected(),
        ScriptedClassifier::once([Some("plastic"), Some("glass")]),
    );
    t.rig.override_sensor(Sensor::Plastic, Some(false));
    t.present();
    t.cycle();
    assert_eq!(t.machine().position, Position::EndLimit);
    assert!(t.rig.is_triggered(Sensor::EndLimit));

    t.rig.override_sensor(Sensor::Plastic, None);
    t.present();
    let cycle = t.cycle();
    assert!(cycle.succeeded());
    assert!(cycle.ejected);
    assert!(t.rig.is_triggered(Sensor::Glass));
    assert_eq!(t.machine().position, Position::Home);
    assert_eq!(t.ledger.entries(), vec![(user(), Slot::Glass, 5)]);
    assert_eq!(t.rig.energize_count(crate::infra::config::PinConfig::default().conveyor_reverse), 1);
}

#[test]
fn test_seek_skipped_when_home_unreachable() {
    let mut t = labelled("glass");
    t.rig.set_position(crate::io::sim::RigLayout::default().can_at);
    t.rig.override_sensor(Sensor::HomeLimit, Some(false));
    t.rig.override_sensor(Sensor::Glass, Some(false));
    t.present();

    let cycle = t.cycle();
    assert_eq!(cycle.failure, Some(SortError::SensorTimeout("home return")));
    assert!(cycle.positioning.is_none());
    assert!(!cycle.ejected);
    assert!(t.ledger.entries().is_empty());
    assert_eq!(t.machine().state, SorterState::Ready);
    assert_eq!(t.metrics.report().home_failures, 1);
    assert!(t.statuses().contains(&status::HOME_FAILED.to_string()));
    assert!(t.rig.all_relays_off());
}

#[test]
fn test_run_homes_at_startup() {
    let mut t = labelled("can");
    t.rig.set_position(crate::io::sim::RigLayout::default().can_at);
    let stop = t.hardware().stop.clone();
    t.rig.stop_at(Duration::from_secs(10), stop);

    t.orch.run();

    assert!(t.rig.is_triggered(Sensor::Glass));
    assert_eq!(t.machine().position, Position::Home);
    assert!(t.rig.all_relays_off());
}

#[test]
fn test_unknown_label_skips_cycle() {
    let mut t = labelled("banana");
    t.present();

    let cycle = t.cycle();
    assert_eq!(cycle.failure, Some(SortError::ClassificationMiss(Some("banana".to_string()))));
    assert_eq!(cycle.slot, None);
    assert!(cycle.positioning.is_none());
    assert!(t.ledger.entries().is_empty());
    assert_eq!(t.machine().state, SorterState::Ready);
    assert!(t.statuses().contains(&status::unknown_label("banana")));
    assert_eq!(t.metrics.report().classification_misses, 1);
}

#[test]
fn test_no_label_backs_off() {
    let mut t = create_test_orchestrator(SimCamera::connected(), ScriptedClassifier::once::<_, String>([None]));
    t.present();

    let before = t.rig.now();
    let cycle = t.cycle();
    assert_eq!(cycle.failure, Some(SortError::ClassificationMiss(None)));
    assert!(t.statuses().contains(&status::DETECTION_FAILED.to_string()));
    // Gate (door at 1.5 s + settle) plus the classification backoff
    assert!(t.rig.now() - before >= millis(1500 + 400 + 200));
    assert_eq!(t.hardware().actuators.motion_commands(), 0);
}

#[test]
fn test_camera_read_failure_releases_and_reconnects() {
    let mut t = create_test_orchestrator(
        SimCamera::connected().fail_reads(1),
        ScriptedClassifier::cycling(["can"]),
    );
    t.present();

    let cycle = t.cycle();
    assert!(matches!(cycle.failure, Some(SortError::HardwareUnavailable(_))));
    assert!(t.statuses().contains(&status::CAMERA_ERROR.to_string()));
    assert_eq!(t.metrics.report().camera_faults, 1);

    // Camera released: four quiet retries, reconnect on the fifth
    for _ in 0..4 {
        assert!(matches!(t.tick().unwrap(), Tick::CameraUnavailable));
    }
    assert_eq!(t.metrics.report().camera_reconnects, 0);
    assert!(matches!(t.tick().unwrap(), Tick::CameraUnavailable));
    assert_eq!(t.metrics.report().camera_reconnects, 1);
    assert!(t.statuses().contains(&status::CAMERA_RECONNECTING.to_string()));

    t.present();
    let cycle = t.cycle();
    assert_eq!(cycle.points, Some(2));
}

#[test]
fn test_camera_reconnect_retries_after_failed_open() {
    let mut t = create_test_orchestrator(SimCamera::new().fail_opens(1), ScriptedClassifier::cycling(["can"]));

    for _ in 0..5 {
        assert!(matches!(t.tick().unwrap(), Tick::CameraUnavailable));
    }
    // First reconnect failed; the counter restarts
    for _ in 0..5 {
        assert!(matches!(t.tick().unwrap(), Tick::CameraUnavailable));
    }
    assert_eq!(t.metrics.report().camera_reconnects, 2);
    // Ten ticks at the 1 s retry interval each
    assert!(t.rig.now() >= Duration::from_secs(10));
}

#[test]
fn test_no_user_polls_without_hardware_io() {
    let mut t = labelled("can");
    t.session.logout();

    assert!(matches!(t.tick().unwrap(), Tick::NoUser));
    assert!(matches!(t.tick().unwrap(), Tick::NoUser));
    assert_eq!(t.machine().state, SorterState::WaitingForUser);
    assert_eq!(t.rig.now(), Duration::from_secs(2));
    let prompts = t.statuses().iter().filter(|m| *m == status::WAITING_FOR_LOGIN).count();
    assert_eq!(prompts, 1);
}

#[test]
fn test_logout_mid_session_keeps_stats_out() {
    let mut t = labelled("can");
    t.present();
    t.cycle();
    let summary = t.session.logout().unwrap();
    assert_eq!(summary.stats.can, 1);
    assert_eq!(summary.stats.total_points, 2);
    assert!(matches!(t.tick().unwrap(), Tick::NoUser));
}

#[test]
fn test_ledger_failure_does_not_block_cycle() {
    let mut t = create_with_ledger(
        SimCamera::connected(),
        ScriptedClassifier::once([Some("can")]),
        MemoryLedger::failing(),
    );
    t.present();
    let cycle = t.cycle();
    assert_eq!(cycle.points, Some(2));
    assert_eq!(t.machine().state, SorterState::Ready);
    assert_eq!(t.session.stats().unwrap().can, 1);
}

#[test]
fn test_gpio_fault_recovers_to_ready() {
    let mut t = labelled("plastic");
    t.rig.fail_pin(crate::infra::config::PinConfig::default().ir_plastic);
    t.present();

    let err = t.tick().unwrap_err();
    assert!(matches!(err, SortError::Gpio(_)));
    t.orch.on_fault(&err);
    assert_eq!(t.machine().state, SorterState::Ready);
    assert_eq!(t.machine().position, Position::Unknown);
    assert!(t.rig.all_relays_off());
}

#[test]
fn test_run_exits_on_stop_with_outputs_off() {
    let mut t = create_test_orchestrator(
        SimCamera::connected(),
        ScriptedClassifier::cycling(["plastic_bottle", "glass_bottle", "can"]),
    );
    t.rig.auto_feed(Duration::from_secs(2), 2.0);
    let stop = t.hardware().stop.clone();
    t.rig.stop_at(Duration::from_secs(120), stop);
    let mut state_rx = t.subscribe();

    t.orch.run();

    assert!(t.rig.all_relays_off());
    assert_eq!(t.machine().state, SorterState::Stopped);
    assert_eq!(state_rx.borrow_and_update().state, SorterState::Stopped);
    assert!(t.machine().cycles >= 3);
    let stats = t.session.stats().unwrap();
    assert!(stats.plastic >= 1 && stats.glass >= 1 && stats.can >= 1);
    assert_eq!(t.ledger.entries().len() as u32, stats.items());
    assert_eq!(t.statuses().last().map(String::as_str), Some(status::STOPPED));
}
