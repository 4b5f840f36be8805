//! Sensor gateway: debounced digital inputs and the ultrasonic rangefinder
//!
//! All inputs are wired with pull-ups, so a sensor is "triggered" when its
//! pin reads low. Readings are poll-based; nothing here uses interrupts.

use crate::domain::types::Sensor;
use crate::infra::clock::Clock;
use crate::infra::config::{PinConfig, SensorConfig};
use crate::io::gpio::{GpioError, Level, SharedGpio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const SPEED_OF_SOUND_CM_S: f64 = 34300.0;

/// Distance reported by `distance_or_sentinel` when no echo could be timed
pub const NO_ECHO_SENTINEL_CM: f64 = 999.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangeError {
    #[error("echo did not rise within {0:?}")]
    EchoTimeout(Duration),

    #[error(transparent)]
    Gpio(#[from] GpioError),
}

pub struct SensorGateway {
    gpio: SharedGpio,
    clock: Arc<dyn Clock>,
    pins: PinConfig,
    config: SensorConfig,
    /// Last debounced state per sensor
    stable: [Option<bool>; 6],
}

impl SensorGateway {
    pub fn new(gpio: SharedGpio, clock: Arc<dyn Clock>, pins: PinConfig, config: SensorConfig) -> Self {
        Self { gpio, clock, pins, config, stable: [None; 6] }
    }

    fn raw(&self, sensor: Sensor) -> Result<bool, GpioError> {
        let level = self.gpio.lock().read(self.pins.sensor_pin(sensor))?;
        Ok(level.is_low())
    }

    /// Debounced read: the reported state only changes once
    /// `debounce_samples` consecutive samples agree.
    pub fn read(&mut self, sensor: Sensor) -> Result<bool, GpioError> {
        let first = self.raw(sensor)?;
        let mut agreed = true;
        for _ in 1..self.config.debounce_samples {
            self.clock.sleep(self.config.debounce_interval());
            if self.raw(sensor)? != first {
                agreed = false;
                break;
            }
        }

        let slot = &mut self.stable[sensor.index()];
        match (agreed, *slot) {
            (true, _) | (false, None) => {
                *slot = Some(first);
                Ok(first)
            }
            (false, Some(previous)) => Ok(previous),
        }
    }

    /// Snapshot of every sensor (undebounced), for diagnostics
    pub fn snapshot(&self) -> Result<[(Sensor, bool); 6], GpioError> {
        let mut out = [(Sensor::Glass, false); 6];
        for (i, sensor) in Sensor::ALL.into_iter().enumerate() {
            out[i] = (sensor, self.raw(sensor)?);
        }
        Ok(out)
    }

    /// One rangefinder round trip in centimeters
    ///
    /// The echo must rise within the echo timeout. A pulse that is still
    /// high when the timeout expires is measured up to that point.
    pub fn measure_distance(&mut self) -> Result<f64, RangeError> {
        let timeout = self.config.echo_timeout();
        let trig = self.pins.trig;
        let echo = self.pins.echo;

        self.gpio.lock().write(trig, Level::Low)?;
        self.clock.sleep(self.config.trigger_settle());

        self.gpio.lock().write(trig, Level::High)?;
        let pulse_start = self.clock.now();
        while self.clock.now() - pulse_start < self.config.trigger_pulse() {
            self.clock.spin();
        }
        self.gpio.lock().write(trig, Level::Low)?;

        let wait_start = self.clock.now();
        while self.gpio.lock().read(echo)?.is_low() {
            if self.clock.now() - wait_start > timeout {
                return Err(RangeError::EchoTimeout(timeout));
            }
            self.clock.spin();
        }

        let rise = self.clock.now();
        while self.gpio.lock().read(echo)?.is_high() {
            if self.clock.now() - rise > timeout {
                break;
            }
            self.clock.spin();
        }

        let elapsed = self.clock.now() - rise;
        Ok(elapsed.as_secs_f64() * SPEED_OF_SOUND_CM_S / 2.0)
    }

    /// Fail-open variant for diagnostics: any fault reads as "far away"
    pub fn distance_or_sentinel(&mut self) -> f64 {
        match self.measure_distance() {
            Ok(cm) => cm,
            Err(e) => {
                warn!(error = %e, "rangefinder_fault");
                NO_ECHO_SENTINEL_CM
            }
        }
    }
}
