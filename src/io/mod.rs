//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `gpio` - Pin-level backend trait shared by real and simulated rigs
//! - `rpi` - Raspberry Pi GPIO via rppal (feature `rpi`)
//! - `sim` - Virtual-time conveyor rig for tests and dry runs
//! - `sensors` - Debounced IR/limit inputs and the ultrasonic rangefinder
//! - `actuators` - Conveyor and pusher relay pairs
//! - `hardware` - Bundle of sensors, actuators, clock, and stop flag
//! - `backend` - Chooses the GPIO backend at startup
//! - `camera` - Frame source and classifier seams
//! - `ledger` - HTTP points backend and its async worker
//! - `events` - Status notifications for the front end
//! - `prometheus` - Prometheus metrics and status HTTP endpoint

pub mod actuators;
pub mod backend;
pub mod camera;
pub mod events;
pub mod gpio;
pub mod hardware;
pub mod ledger;
pub mod prometheus;
#[cfg(feature = "rpi")]
pub mod rpi;
pub mod sensors;
pub mod sim;

// Re-export commonly used types
pub use backend::{open_backend, Backend};
pub use events::{create_event_channel, EventSender, SorterEvent, StatusSink};
pub use gpio::{share, GpioBackend, GpioError, Level, SharedGpio};
pub use hardware::Hardware;
pub use ledger::{create_ledger_worker, LedgerClient, LedgerQueue, LedgerWorker, MemoryLedger, PointsLedger};
pub use sim::SimRig;
