//! The machine's I/O bundle handed to the sequencers
//!
//! Every sequencer takes `&mut Hardware`, so only one of them can drive the
//! conveyor at a time.

use crate::error::SortError;
use crate::infra::clock::{Clock, StopSignal};
use crate::infra::config::Config;
use crate::io::actuators::ActuatorDriver;
use crate::io::gpio::SharedGpio;
use crate::io::sensors::SensorGateway;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct Hardware {
    pub sensors: SensorGateway,
    pub actuators: ActuatorDriver,
    pub clock: Arc<dyn Clock>,
    pub stop: StopSignal,
    backend: &'static str,
}

impl Hardware {
    pub fn new(gpio: SharedGpio, clock: Arc<dyn Clock>, stop: StopSignal, config: &Config) -> Self {
        let backend = gpio.lock().name();
        Self {
            sensors: SensorGateway::new(
                gpio.clone(),
                clock.clone(),
                config.pins().clone(),
                config.sensors().clone(),
            ),
            actuators: ActuatorDriver::new(gpio, config.pins().clone()),
            clock,
            stop,
            backend,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    #[inline]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// De-energize everything and report `Stopped` once the stop flag is up
    pub fn check_stop(&mut self) -> Result<(), SortError> {
        if self.stop.is_stopped() {
            self.safe_off();
            return Err(SortError::Stopped);
        }
        Ok(())
    }

    /// Sleep in `slice`-sized steps, checking the stop flag between them
    pub fn sleep_checked(&mut self, total: Duration, slice: Duration) -> Result<(), SortError> {
        let start = self.clock.now();
        loop {
            self.check_stop()?;
            let elapsed = self.clock.now() - start;
            if elapsed >= total {
                return Ok(());
            }
            let step = if slice.is_zero() { total - elapsed } else { slice.min(total - elapsed) };
            self.clock.sleep(step);
        }
    }

    /// Best-effort all-off; failures are logged
    pub fn safe_off(&mut self) {
        if let Err(e) = self.actuators.all_off() {
            warn!(error = %e, "all_off_failed");
        }
    }
}
