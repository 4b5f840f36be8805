//! GPIO backend abstraction
//!
//! The sensor gateway and actuator driver only see `GpioBackend`. The real
//! Raspberry Pi backend lives behind the `rpi` feature; tests and simulation
//! mode use `io::sim::SimGpio`.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Electrical level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    #[inline]
    pub fn is_low(self) -> bool {
        matches!(self, Level::Low)
    }

    #[inline]
    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpioError {
    #[error("gpio init failed: {0}")]
    Init(String),

    #[error("pin {0} not configured")]
    UnknownPin(u8),

    #[error("pin {pin} io error: {message}")]
    Io { pin: u8, message: String },
}

/// Pin-level access to the machine's I/O
///
/// Pins are identified by BCM number. Implementations configure their
/// inputs (pull-up) and outputs up front.
pub trait GpioBackend {
    fn read(&mut self, pin: u8) -> Result<Level, GpioError>;

    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Backend shared between the sort worker and shutdown cleanup
pub type SharedGpio = Arc<Mutex<Box<dyn GpioBackend + Send>>>;

pub fn share(backend: Box<dyn GpioBackend + Send>) -> SharedGpio {
    Arc::new(Mutex::new(backend))
}
