//! Pusher sequencer: open-loop down/up stroke
//!
//! Nothing confirms the pusher reached either extreme; the stroke is purely
//! timed. The up phase runs longer than the down phase to guarantee
//! retraction.

use crate::domain::types::PusherCommand;
use crate::error::SortError;
use crate::infra::config::PusherConfig;
use crate::io::hardware::Hardware;
use tracing::{debug, warn};

pub struct PusherSequencer {
    config: PusherConfig,
}

impl PusherSequencer {
    pub fn new(config: PusherConfig) -> Self {
        Self { config }
    }

    pub fn push(&self, hw: &mut Hardware) -> Result<(), SortError> {
        let result = self.stroke(hw);
        if let Err(e) = &result {
            warn!(error = %e, "push_aborted");
            if !matches!(e, SortError::Stopped) {
                hw.safe_off();
            }
        }
        result
    }

    fn stroke(&self, hw: &mut Hardware) -> Result<(), SortError> {
        let slice = self.config.poll_interval();

        hw.check_stop()?;
        hw.actuators.pusher(PusherCommand::Down)?;
        hw.sleep_checked(self.config.down(), slice)?;
        hw.actuators.pusher(PusherCommand::Stop)?;

        hw.sleep_checked(self.config.pause(), slice)?;

        hw.actuators.pusher(PusherCommand::Up)?;
        hw.sleep_checked(self.config.up(), slice)?;
        hw.actuators.pusher(PusherCommand::Stop)?;

        debug!("push_complete");
        Ok(())
    }
}
