//! Return-home sequencer
//!
//! Reverse in a single timed pass until the HOME limit or the GLASS sensor
//! fires. Either counts as home. There are no retries.

use crate::domain::types::{ConveyorCommand, Sensor};
use crate::error::SortError;
use crate::infra::config::HomingConfig;
use crate::io::hardware::Hardware;
use tracing::{info, warn};

pub struct Homer {
    config: HomingConfig,
}

impl Homer {
    pub fn new(config: HomingConfig) -> Self {
        Self { config }
    }

    fn at_home(hw: &mut Hardware) -> Result<bool, SortError> {
        Ok(hw.sensors.read(Sensor::HomeLimit)? || hw.sensors.read(Sensor::Glass)?)
    }

    /// Returns `Ok(false)` when the timeout expires before home is seen
    pub fn go_home(&self, hw: &mut Hardware) -> Result<bool, SortError> {
        let result = self.run(hw);
        if let Err(e) = &result {
            warn!(error = %e, "home_aborted");
            if !matches!(e, SortError::Stopped) {
                hw.safe_off();
            }
        }
        result
    }

    fn run(&self, hw: &mut Hardware) -> Result<bool, SortError> {
        hw.check_stop()?;
        if Self::at_home(hw)? {
            hw.actuators.conveyor(ConveyorCommand::Stop)?;
            return Ok(true);
        }

        let start = hw.now();
        hw.actuators.conveyor(ConveyorCommand::Reverse)?;

        loop {
            hw.check_stop()?;
            let elapsed = hw.now() - start;
            if elapsed >= self.config.min_dwell() && Self::at_home(hw)? {
                hw.actuators.conveyor(ConveyorCommand::Stop)?;
                info!(elapsed_ms = elapsed.as_millis() as u64, "home_reached");
                return Ok(true);
            }
            if elapsed >= self.config.timeout() {
                hw.actuators.conveyor(ConveyorCommand::Stop)?;
                warn!(timeout_ms = self.config.timeout_ms, "home_timeout");
                return Ok(false);
            }
            hw.clock.sleep(self.config.poll_interval());
        }
    }
}
