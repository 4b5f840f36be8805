//! Sorting orchestrator
//!
//! Runs on a dedicated worker thread and owns all hardware I/O. One tick is
//! either a login poll, a camera reconnect attempt, or a full sort cycle:
//!
//! ```text
//! AwaitingItem → Classifying → Positioning → Ejecting → ReportingPoints
//!              → ReturningHome → Ready
//! ```
//!
//! Failures route straight to `Ready`. Only the stop flag ends the loop.

#[cfg(test)]
mod tests;

use crate::domain::cycle::{MachineState, SortCycle, SorterState};
use crate::domain::types::{PointsTable, Position};
use crate::error::SortError;
use crate::infra::config::{Config, OrchestratorConfig};
use crate::infra::metrics::Metrics;
use crate::io::camera::{Classifier, FrameSource};
use crate::io::events::{status, StatusSink};
use crate::io::hardware::Hardware;
use crate::io::ledger::PointsLedger;
use crate::services::gate_monitor::GateMonitor;
use crate::services::homing::Homer;
use crate::services::positioning::Positioner;
use crate::services::pusher::PusherSequencer;
use crate::services::session::SessionHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What one call to `tick` did
#[derive(Debug)]
pub enum Tick {
    /// Nobody logged in; slept one poll interval
    NoUser,
    /// Camera missing; possibly attempted a reconnect
    CameraUnavailable,
    /// A sort cycle ran (successfully or not)
    Cycle(Box<SortCycle>),
}

/// External collaborators the orchestrator drives
pub struct Collaborators {
    pub camera: Box<dyn FrameSource>,
    pub classifier: Box<dyn Classifier>,
    pub ledger: Box<dyn PointsLedger>,
    pub sink: Box<dyn StatusSink>,
}

pub struct Orchestrator {
    hw: Hardware,
    positioner: Positioner,
    homer: Homer,
    pusher: PusherSequencer,
    gate: GateMonitor,
    camera: Box<dyn FrameSource>,
    classifier: Box<dyn Classifier>,
    ledger: Box<dyn PointsLedger>,
    sink: Box<dyn StatusSink>,
    session: SessionHandle,
    points: PointsTable,
    config: OrchestratorConfig,
    metrics: Arc<Metrics>,
    machine: MachineState,
    state_tx: watch::Sender<MachineState>,
    /// Consecutive ticks without a camera
    camera_failures: u32,
    /// "Waiting for login" already shown for the current logout period
    login_prompted: bool,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        hw: Hardware,
        collaborators: Collaborators,
        session: SessionHandle,
        metrics: Arc<Metrics>,
    ) -> Self {
        let machine = MachineState::default();
        let (state_tx, _) = watch::channel(machine);
        Self {
            hw,
            positioner: Positioner::new(config.positioning().clone()),
            homer: Homer::new(config.homing().clone()),
            pusher: PusherSequencer::new(config.pusher().clone()),
            gate: GateMonitor::new(config.gate().clone(), metrics.clone()),
            camera: collaborators.camera,
            classifier: collaborators.classifier,
            ledger: collaborators.ledger,
            sink: collaborators.sink,
            session,
            points: *config.points(),
            config: config.orchestrator().clone(),
            metrics,
            machine,
            state_tx,
            camera_failures: 0,
            login_prompted: false,
        }
    }

    /// Watch the published machine state
    pub fn subscribe(&self) -> watch::Receiver<MachineState> {
        self.state_tx.subscribe()
    }

    pub fn machine(&self) -> MachineState {
        self.machine
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hw
    }

    fn publish(&mut self) {
        self.machine.conveyor = self.hw.actuators.conveyor_state();
        self.machine.pusher = self.hw.actuators.pusher_state();
        self.state_tx.send_replace(self.machine);
    }

    /// Move to `next`, notifying listeners on change
    fn set_state(&mut self, next: SorterState) {
        let current = self.machine.state;
        if current == next {
            self.publish();
            return;
        }
        if !current.can_transition_to(next) {
            warn!(from = current.as_str(), to = next.as_str(), "unexpected_transition");
        }
        debug!(from = current.as_str(), to = next.as_str(), "state_transition");
        self.machine.state = next;
        self.sink.state_changed(next);
        self.publish();
    }

    /// Run until the stop flag is raised. Outputs are de-energized on entry
    /// and on exit.
    pub fn run(&mut self) {
        info!(backend = self.hw.backend(), "sorter_started");
        self.hw.safe_off();
        if !self.camera.is_open() && !self.camera.open() {
            warn!("camera_unavailable_at_start");
        }
        match self.ensure_home() {
            Ok(true) | Err(SortError::Stopped) => {}
            Ok(false) => warn!("home_not_reached_at_start"),
            Err(e) => self.on_fault(&e),
        }

        loop {
            match self.tick() {
                Ok(_) => {}
                Err(SortError::Stopped) => break,
                Err(e) => {
                    self.on_fault(&e);
                    if self.hw.sleep_checked(self.config.error_backoff(), self.config.error_backoff()).is_err() {
                        break;
                    }
                }
            }
        }

        self.hw.safe_off();
        self.camera.release();
        self.set_state(SorterState::Stopped);
        self.sink.notify(status::STOPPED);
        info!(cycles = self.machine.cycles, "sorter_stopped");
    }

    #[cold]
    fn on_fault(&mut self, e: &SortError) {
        error!(error = %e, kind = e.kind(), state = self.machine.state.as_str(), "sort_fault");
        if matches!(e, SortError::Gpio(_)) {
            self.metrics.record_gpio_fault();
        }
        self.hw.safe_off();
        self.machine.position = Position::Unknown;
        self.sink.notify(status::HARDWARE_ERROR);
        self.set_state(SorterState::Ready);
    }

    /// One pass of the worker loop
    pub fn tick(&mut self) -> Result<Tick, SortError> {
        self.hw.check_stop()?;

        if self.session.current_user().is_none() {
            self.set_state(SorterState::WaitingForUser);
            if !self.login_prompted {
                self.sink.notify(status::WAITING_FOR_LOGIN);
                self.login_prompted = true;
            }
            self.hw.sleep_checked(self.config.no_user_poll(), self.config.no_user_poll())?;
            return Ok(Tick::NoUser);
        }
        self.login_prompted = false;

        if !self.camera.is_open() {
            self.camera_failures += 1;
            if self.camera_failures >= self.config.camera_max_failures {
                self.sink.notify(status::CAMERA_RECONNECTING);
                self.metrics.record_camera_reconnect();
                self.camera_failures = 0;
                let opened = self.camera.open();
                info!(opened, "camera_reconnect");
            }
            if !self.camera.is_open() {
                self.sink.notify(status::CAMERA_MISSING);
            }
            self.hw.sleep_checked(self.config.camera_retry_interval(), self.config.camera_retry_interval())?;
            return Ok(Tick::CameraUnavailable);
        }
        self.camera_failures = 0;

        let cycle = self.run_cycle()?;
        Ok(Tick::Cycle(Box::new(cycle)))
    }

    /// Wait for an item and carry it through to its slot
    pub fn run_cycle(&mut self) -> Result<SortCycle, SortError> {
        let started = self.hw.now();
        let mut cycle = SortCycle::new();

        self.set_state(SorterState::AwaitingItem);
        self.gate.await_presentation(&mut self.hw, &*self.sink)?;

        self.set_state(SorterState::Classifying);
        self.classify(&mut cycle)?;
        let Some(slot) = cycle.slot else {
            return Ok(self.finish(cycle, started));
        };
        let points = self.points.points(slot);

        if !self.ensure_home()? {
            warn!(cycle = %cycle.id, slot = %slot, "positioning_skipped_not_home");
            self.sink.notify(status::POSITIONING_FAILED);
            cycle.failure = Some(SortError::SensorTimeout("home return"));
            self.set_state(SorterState::Ready);
            return Ok(self.finish(cycle, started));
        }

        self.set_state(SorterState::Positioning);
        let report = self.positioner.seek(&mut self.hw, slot)?;
        self.metrics.record_seek(report.outcome, report.attempts);
        self.machine.position = report.position;
        cycle.positioning = Some(report.outcome);
        cycle.attempts = report.attempts;

        if !cycle.succeeded() {
            warn!(cycle = %cycle.id, slot = %slot, outcome = report.outcome.as_str(), "positioning_failed");
            self.sink.notify(status::POSITIONING_FAILED);
            cycle.failure = SortError::from_outcome(report.outcome, slot);
            self.set_state(SorterState::Ready);
            return Ok(self.finish(cycle, started));
        }

        self.set_state(SorterState::Ejecting);
        self.sink.notify(status::PUSHING);
        self.pusher.push(&mut self.hw)?;
        cycle.ejected = true;

        self.set_state(SorterState::ReportingPoints);
        self.report_points(&mut cycle, points);

        if slot.is_home() {
            self.machine.position = Position::Home;
        } else {
            self.set_state(SorterState::ReturningHome);
            self.sink.notify(status::RETURNING_HOME);
            cycle.home_attempted = true;
            cycle.home_succeeded = self.homer.go_home(&mut self.hw)?;
            if cycle.home_succeeded {
                self.machine.position = Position::Home;
            } else {
                self.machine.position = Position::Unknown;
                self.metrics.record_home_failure();
                self.sink.notify(status::HOME_FAILED);
            }
        }

        self.set_state(SorterState::Ready);
        self.sink.notify(status::READY);
        Ok(self.finish(cycle, started))
    }

    /// Seeks start from HOME. Anything else (startup, a failed seek, a
    /// fault) is driven back first. Returns false when HOME was not seen.
    fn ensure_home(&mut self) -> Result<bool, SortError> {
        if self.machine.position == Position::Home {
            return Ok(true);
        }
        debug!(from = ?self.machine.position, "rehoming");
        let reached = self.homer.go_home(&mut self.hw)?;
        if reached {
            self.machine.position = Position::Home;
        } else {
            self.metrics.record_home_failure();
            self.sink.notify(status::HOME_FAILED);
        }
        self.publish();
        Ok(reached)
    }

    /// Capture and label a frame. Misses leave `cycle.slot` empty and the
    /// state at `Ready`.
    fn classify(&mut self, cycle: &mut SortCycle) -> Result<(), SortError> {
        let Some(frame) = self.camera.read_frame() else {
            self.metrics.record_camera_fault();
            self.sink.notify(status::CAMERA_ERROR);
            self.camera.release();
            cycle.failure = Some(SortError::HardwareUnavailable("camera read failed".to_string()));
            self.set_state(SorterState::Ready);
            return self.hw.sleep_checked(self.config.camera_fault_backoff(), self.config.camera_fault_backoff());
        };

        let Some(label) = self.classifier.classify(&frame) else {
            self.metrics.record_classification_miss();
            self.sink.notify(status::DETECTION_FAILED);
            cycle.failure = Some(SortError::ClassificationMiss(None));
            self.set_state(SorterState::Ready);
            return self
                .hw
                .sleep_checked(self.config.classification_backoff(), self.config.classification_backoff());
        };

        let slot = label.slot();
        cycle.label = Some(label.clone());
        match slot {
            Some(slot) => {
                info!(cycle = %cycle.id, label = %label, slot = %slot, "item_classified");
                self.sink.notify(&status::detected(&label.0, self.points.points(slot)));
                cycle.slot = Some(slot);
            }
            None => {
                self.metrics.record_classification_miss();
                warn!(cycle = %cycle.id, label = %label, "unknown_label");
                self.sink.notify(&status::unknown_label(&label.0));
                cycle.failure = Some(SortError::ClassificationMiss(Some(label.0)));
                self.set_state(SorterState::Ready);
            }
        }
        Ok(())
    }

    /// Credit the session and hand the points to the ledger
    fn report_points(&mut self, cycle: &mut SortCycle, points: u32) {
        let Some(slot) = cycle.slot.filter(|_| cycle.succeeded()) else { return };
        let Some(user) = self.session.record(slot, points) else {
            warn!(cycle = %cycle.id, slot = %slot, "session_ended_before_points");
            return;
        };

        cycle.points = Some(points);
        self.metrics.record_sorted(slot, points);
        self.sink.item_sorted(slot, points);
        self.sink.notify(status::SENDING_POINTS);
        if let Err(e) = self.ledger.submit(&user, slot, points) {
            warn!(cycle = %cycle.id, user = %user, slot = %slot, points, error = %e, "ledger_submit_failed");
        }
    }

    fn finish(&mut self, cycle: SortCycle, started: Duration) -> SortCycle {
        let duration_ms = (self.hw.now() - started).as_millis() as u64;
        self.metrics.record_cycle(duration_ms);
        self.machine.cycles += 1;
        if cycle.ejected {
            self.machine.last_slot = cycle.slot;
        }
        self.publish();
        info!(
            cycle = %cycle.id,
            slot = cycle.slot.map(|s| s.as_str()).unwrap_or("none"),
            outcome = cycle.positioning.map(|o| o.as_str()).unwrap_or("none"),
            points = cycle.points.unwrap_or(0),
            failure = cycle.failure.as_ref().map(|f| f.kind()).unwrap_or("none"),
            duration_ms,
            "cycle_finished"
        );
        cycle
    }
}
