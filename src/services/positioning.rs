//! Positioning state machine: drive the conveyor to a slot
//!
//! Position is only ever known from sensor edges. GLASS is HOME, so it needs
//! no motion. CAN sits on the END limit, so either the CAN sensor or END
//! counts as arrival. Every other slot is sought in timed bursts where END is
//! a hard interlock that is never retried.

use crate::domain::types::{ConveyorCommand, MotionOutcome, Position, Sensor, Slot};
use crate::error::SortError;
use crate::infra::config::PositioningConfig;
use crate::io::hardware::Hardware;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekReport {
    pub outcome: MotionOutcome,
    /// Attempts started (0 when no motion was needed)
    pub attempts: u32,
    /// Retry pauses taken after timed-out attempts
    pub pauses: u32,
    /// Where the mechanism is believed to be afterwards
    pub position: Position,
}

pub struct Positioner {
    config: PositioningConfig,
}

impl Positioner {
    pub fn new(config: PositioningConfig) -> Self {
        Self { config }
    }

    /// Drive to `slot`. Stops the conveyor on every exit path.
    pub fn seek(&self, hw: &mut Hardware, slot: Slot) -> Result<SeekReport, SortError> {
        let result = match slot {
            Slot::Glass => self.seek_glass(hw),
            Slot::Can => self.seek_can(hw),
            Slot::Plastic => self.seek_bounded(hw, slot),
        };

        match &result {
            Ok(report) => info!(
                slot = %slot,
                outcome = report.outcome.as_str(),
                attempts = report.attempts,
                "seek_finished"
            ),
            Err(e) => {
                warn!(slot = %slot, error = %e, "seek_aborted");
                if !matches!(e, SortError::Stopped) {
                    hw.safe_off();
                }
            }
        }
        result
    }

    fn seek_glass(&self, hw: &mut Hardware) -> Result<SeekReport, SortError> {
        hw.actuators.conveyor(ConveyorCommand::Stop)?;
        Ok(SeekReport { outcome: MotionOutcome::Reached, attempts: 0, pauses: 0, position: Position::Home })
    }

    fn seek_can(&self, hw: &mut Hardware) -> Result<SeekReport, SortError> {
        let mut attempts = 0;
        loop {
            hw.check_stop()?;
            let at_can = hw.sensors.read(Sensor::Can)?;
            let at_end = hw.sensors.read(Sensor::EndLimit)?;
            if at_can || at_end {
                hw.actuators.conveyor(ConveyorCommand::Stop)?;
                debug!(at_can, at_end, "seek_can_arrived");
                let position = if at_can { Position::Slot(Slot::Can) } else { Position::EndLimit };
                return Ok(SeekReport { outcome: MotionOutcome::Reached, attempts, pauses: 0, position });
            }
            if hw.actuators.conveyor_state() != ConveyorCommand::Forward {
                hw.actuators.conveyor(ConveyorCommand::Forward)?;
                attempts = 1;
            }
            hw.clock.sleep(self.config.can_poll_interval());
        }
    }

    fn seek_bounded(&self, hw: &mut Hardware, slot: Slot) -> Result<SeekReport, SortError> {
        let mut pauses = 0;
        for attempt in 1..=self.config.max_attempts {
            let outcome = self.attempt(hw, slot.sensor())?;
            hw.actuators.conveyor(ConveyorCommand::Stop)?;

            match outcome {
                MotionOutcome::Reached => {
                    return Ok(SeekReport { outcome, attempts: attempt, pauses, position: Position::Slot(slot) });
                }
                MotionOutcome::BlockedByLimit => {
                    warn!(slot = %slot, attempt, "seek_blocked_by_end_limit");
                    return Ok(SeekReport { outcome, attempts: attempt, pauses, position: Position::EndLimit });
                }
                MotionOutcome::TimedOut => {
                    warn!(slot = %slot, attempt, max_attempts = self.config.max_attempts, "seek_attempt_timeout");
                    // The motor stays off for at least one dwell before the next burst
                    let pause = self.config.retry_pause().max(self.config.min_dwell());
                    hw.sleep_checked(pause, self.config.poll_interval())?;
                    pauses += 1;
                }
            }
        }

        Ok(SeekReport {
            outcome: MotionOutcome::TimedOut,
            attempts: self.config.max_attempts,
            pauses,
            position: Position::Unknown,
        })
    }

    /// One timed burst toward `target`. END is read first on every poll and
    /// wins over the target. A target already under the sensor is reached
    /// without energizing the motor.
    fn attempt(&self, hw: &mut Hardware, target: Sensor) -> Result<MotionOutcome, SortError> {
        hw.check_stop()?;
        if hw.sensors.read(Sensor::EndLimit)? {
            return Ok(MotionOutcome::BlockedByLimit);
        }
        if hw.sensors.read(target)? {
            return Ok(MotionOutcome::Reached);
        }

        let start = hw.now();
        hw.actuators.conveyor(ConveyorCommand::Forward)?;

        loop {
            hw.check_stop()?;
            if hw.sensors.read(Sensor::EndLimit)? {
                return Ok(MotionOutcome::BlockedByLimit);
            }
            if hw.sensors.read(target)? {
                return Ok(MotionOutcome::Reached);
            }
            if hw.now() - start >= self.config.attempt_timeout() {
                return Ok(MotionOutcome::TimedOut);
            }
            hw.clock.sleep(self.config.poll_interval());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::StopSignal;
    use crate::infra::config::{Config, PinConfig};
    use crate::io::gpio::share;
    use crate::io::sim::{RigLayout, SimRig};
    use std::sync::Arc;
    use std::time::Duration;

    fn rig_hw() -> (SimRig, Hardware) {
        let rig = SimRig::standard();
        let hw = Hardware::new(
            share(Box::new(rig.gpio())),
            Arc::new(rig.clock(false)),
            StopSignal::new(),
            &Config::default(),
        );
        (rig, hw)
    }

    fn positioner() -> Positioner {
        Positioner::new(PositioningConfig::default())
    }

    #[test]
    fn test_glass_needs_no_motion() {
        let (rig, mut hw) = rig_hw();
        let report = positioner().seek(&mut hw, Slot::Glass).unwrap();
        assert_eq!(report.outcome, MotionOutcome::Reached);
        assert_eq!(report.attempts, 0);
        assert_eq!(report.position, Position::Home);
        assert_eq!(hw.actuators.motion_commands(), 0);
        assert_eq!(rig.energize_count(PinConfig::default().conveyor_forward), 0);
        assert_eq!(rig.now(), Duration::ZERO);
    }

    #[test]
    fn test_glass_stops_a_moving_conveyor() {
        let (rig, mut hw) = rig_hw();
        hw.actuators.conveyor(ConveyorCommand::Reverse).unwrap();
        positioner().seek(&mut hw, Slot::Glass).unwrap();
        assert!(rig.all_relays_off());
    }

    #[test]
    fn test_plastic_reached_in_one_burst() {
        let (rig, mut hw) = rig_hw();
        let report = positioner().seek(&mut hw, Slot::Plastic).unwrap();
        assert_eq!(report.outcome, MotionOutcome::Reached);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.pauses, 0);
        assert_eq!(report.position, Position::Slot(Slot::Plastic));
        assert_eq!(hw.actuators.motion_commands(), 1);
        assert!(rig.is_triggered(Sensor::Plastic));
        assert!(rig.all_relays_off());
    }

    #[test]
    fn test_plastic_end_limit_is_not_retried() {
        let (rig, mut hw) = rig_hw();
        // Plastic sensor dead: travel runs into END on the first attempt
        rig.override_sensor(Sensor::Plastic, Some(false));
        let report = positioner().seek(&mut hw, Slot::Plastic).unwrap();
        assert_eq!(report.outcome, MotionOutcome::BlockedByLimit);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.pauses, 0);
        assert_eq!(hw.actuators.motion_commands(), 1);
        assert!(rig.all_relays_off());
    }

    #[test]
    fn test_plastic_end_asserted_before_motion() {
        let (rig, mut hw) = rig_hw();
        rig.override_sensor(Sensor::EndLimit, Some(true));
        rig.override_sensor(Sensor::Plastic, Some(true));
        let report = positioner().seek(&mut hw, Slot::Plastic).unwrap();
        assert_eq!(report.outcome, MotionOutcome::BlockedByLimit);
        assert_eq!(hw.actuators.motion_commands(), 0);
    }

    #[test]
    fn test_plastic_end_wins_over_target() {
        // Plastic sensor sits on the END limit; one poll step carries the
        // conveyor from clear of both into both
        let layout = RigLayout {
            plastic_at: RigLayout::default().end_at,
            sensor_width: Duration::from_millis(20),
            ..RigLayout::default()
        };
        let rig = SimRig::new(PinConfig::default(), layout);
        let mut hw = Hardware::new(
            share(Box::new(rig.gpio())),
            Arc::new(rig.clock(false)),
            StopSignal::new(),
            &Config::default(),
        );
        rig.set_position(layout.end_at - Duration::from_millis(100));
        let report = positioner().seek(&mut hw, Slot::Plastic).unwrap();
        assert_eq!(report.outcome, MotionOutcome::BlockedByLimit);
        assert_eq!(report.attempts, 1);
        assert!(rig.is_triggered(Sensor::Plastic));
        assert!(rig.all_relays_off());
    }

    #[test]
    fn test_plastic_already_at_target_is_reached() {
        let (rig, mut hw) = rig_hw();
        rig.set_position(RigLayout::default().plastic_at);
        let report = positioner().seek(&mut hw, Slot::Plastic).unwrap();
        assert_eq!(report.outcome, MotionOutcome::Reached);
        assert_eq!(report.position, Position::Slot(Slot::Plastic));
        assert_eq!(hw.actuators.motion_commands(), 0);
        assert_eq!(rig.position(), RigLayout::default().plastic_at);

        // A second seek from the same spot succeeds too
        let again = positioner().seek(&mut hw, Slot::Plastic).unwrap();
        assert_eq!(again.outcome, MotionOutcome::Reached);
        assert!(rig.all_relays_off());
    }

    #[test]
    fn test_plastic_target_entered_early_in_burst() {
        let (rig, mut hw) = rig_hw();
        // Sensor window opens 100 ms into the burst and closes well inside one dwell
        let layout = RigLayout::default();
        rig.set_position(layout.plastic_at - layout.sensor_width / 2 - Duration::from_millis(100));
        let report = positioner().seek(&mut hw, Slot::Plastic).unwrap();
        assert_eq!(report.outcome, MotionOutcome::Reached);
        assert_eq!(report.attempts, 1);
        assert!(rig.is_triggered(Sensor::Plastic));
        assert!(rig.now() < Duration::from_millis(250));
    }

    #[test]
    fn test_plastic_timeout_exhausts_attempts() {
        let (rig, mut hw) = rig_hw();
        rig.override_sensor(Sensor::Plastic, Some(false));
        rig.override_sensor(Sensor::EndLimit, Some(false));
        let report = positioner().seek(&mut hw, Slot::Plastic).unwrap();
        assert_eq!(report.outcome, MotionOutcome::TimedOut);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.pauses, 3);
        assert_eq!(report.position, Position::Unknown);
        assert_eq!(hw.actuators.motion_commands(), 3);
        // Three 12 s attempts plus three 300 ms pauses
        assert!(rig.now() >= Duration::from_millis(3 * 12_000 + 3 * 300));
        assert!(rig.all_relays_off());
    }

    #[test]
    fn test_can_reached_at_can_sensor() {
        let (rig, mut hw) = rig_hw();
        let report = positioner().seek(&mut hw, Slot::Can).unwrap();
        assert_eq!(report.outcome, MotionOutcome::Reached);
        assert_eq!(report.position, Position::Slot(Slot::Can));
        assert!(rig.is_triggered(Sensor::Can));
        assert!(!rig.is_triggered(Sensor::EndLimit));
    }

    #[test]
    fn test_can_accepts_end_limit() {
        let (rig, mut hw) = rig_hw();
        rig.override_sensor(Sensor::Can, Some(false));
        let report = positioner().seek(&mut hw, Slot::Can).unwrap();
        assert_eq!(report.outcome, MotionOutcome::Reached);
        assert_eq!(report.position, Position::EndLimit);
        assert!(rig.all_relays_off());
    }

    #[test]
    fn test_can_terminates_within_bounded_polls() {
        let (rig, mut hw) = rig_hw();
        rig.override_sensor(Sensor::Can, Some(false));
        positioner().seek(&mut hw, Slot::Can).unwrap();
        // END sits 5.4 s out; one poll interval plus debounce of slack
        assert!(rig.now() < RigLayout::default().end_at + Duration::from_millis(100));
    }

    #[test]
    fn test_stop_flag_aborts_seek() {
        let (rig, mut hw) = rig_hw();
        rig.override_sensor(Sensor::Plastic, Some(false));
        rig.override_sensor(Sensor::EndLimit, Some(false));
        rig.stop_at(Duration::from_secs(1), hw.stop.clone());
        assert_eq!(positioner().seek(&mut hw, Slot::Plastic), Err(SortError::Stopped));
        assert!(rig.all_relays_off());
        assert!(rig.now() < Duration::from_millis(1100));
    }

    #[test]
    fn test_gpio_fault_stops_conveyor() {
        let (rig, mut hw) = rig_hw();
        rig.fail_pin(PinConfig::default().ir_plastic);
        assert!(matches!(positioner().seek(&mut hw, Slot::Plastic), Err(SortError::Gpio(_))));
        assert!(rig.all_relays_off());
    }
}
