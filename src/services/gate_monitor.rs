//! Gate monitor: decides when an item has been presented
//!
//! Door opens, door closes, then the rangefinder must see something inside
//! the near-field threshold. A rangefinder fault reads as "no object" and the
//! poll simply continues.

use crate::domain::types::Sensor;
use crate::error::SortError;
use crate::infra::config::GateConfig;
use crate::infra::metrics::Metrics;
use crate::io::events::{status, StatusSink};
use crate::io::hardware::Hardware;
use std::sync::Arc;
use tracing::{debug, info};

pub struct GateMonitor {
    config: GateConfig,
    metrics: Arc<Metrics>,
}

impl GateMonitor {
    pub fn new(config: GateConfig, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics }
    }

    /// Block until an item sits against the scan window, then settle
    pub fn await_presentation(&self, hw: &mut Hardware, sink: &dyn StatusSink) -> Result<f64, SortError> {
        sink.notify(status::WAITING_FOR_DOOR);
        self.wait_door(hw, false)?;

        sink.notify(status::DOOR_OPEN);
        self.wait_door(hw, true)?;

        sink.notify(status::DOOR_CLOSED);
        let distance = self.wait_object(hw)?;

        info!(distance_cm = distance, "item_presented");
        sink.notify(status::OBJECT_DETECTED);
        hw.sleep_checked(self.config.settle(), self.config.poll_interval())?;
        Ok(distance)
    }

    /// Poll until the door reads closed (`true`) or open (`false`)
    fn wait_door(&self, hw: &mut Hardware, closed: bool) -> Result<(), SortError> {
        loop {
            hw.check_stop()?;
            if hw.sensors.read(Sensor::Door)? == closed {
                return Ok(());
            }
            hw.clock.sleep(self.config.poll_interval());
        }
    }

    fn wait_object(&self, hw: &mut Hardware) -> Result<f64, SortError> {
        loop {
            hw.check_stop()?;
            match hw.sensors.measure_distance() {
                Ok(cm) if cm < self.config.presence_threshold_cm => return Ok(cm),
                Ok(_) => {}
                Err(e) => {
                    self.metrics.record_rangefinder_fault();
                    debug!(error = %e, "rangefinder_no_reading");
                }
            }
            hw.clock.sleep(self.config.poll_interval());
        }
    }
}
