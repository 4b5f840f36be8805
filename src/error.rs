//! Error taxonomy for the sort worker
//!
//! Nothing here is fatal to the process. Every variant except `Stopped`
//! degrades to "return to Ready and poll again".

use crate::domain::types::{MotionOutcome, Slot};
use crate::io::gpio::GpioError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SortError {
    /// Echo, positioning, or home-return time budget exceeded
    #[error("sensor timeout during {0}")]
    SensorTimeout(&'static str),

    /// END limit reached while seeking a non-CAN slot
    #[error("END limit reached while seeking {0}")]
    SafetyInterlock(Slot),

    /// Camera or GPIO subsystem absent
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// No label, or a label outside the known slot set
    #[error("classification miss ({})", .0.as_deref().unwrap_or("no label"))]
    ClassificationMiss(Option<String>),

    /// GPIO backend fault while reading or writing a pin
    #[error(transparent)]
    Gpio(#[from] GpioError),

    /// Global stop flag observed
    #[error("stop requested")]
    Stopped,
}

impl SortError {
    /// Map a failed positioning outcome to its error kind
    pub fn from_outcome(outcome: MotionOutcome, slot: Slot) -> Option<Self> {
        match outcome {
            MotionOutcome::Reached => None,
            MotionOutcome::BlockedByLimit => Some(SortError::SafetyInterlock(slot)),
            MotionOutcome::TimedOut => Some(SortError::SensorTimeout("positioning")),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SortError::SensorTimeout(_) => "sensor_timeout",
            SortError::SafetyInterlock(_) => "safety_interlock",
            SortError::HardwareUnavailable(_) => "hardware_unavailable",
            SortError::ClassificationMiss(_) => "classification_miss",
            SortError::Gpio(_) => "gpio",
            SortError::Stopped => "stopped",
        }
    }
}
