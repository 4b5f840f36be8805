//! Services - sequencing logic and session state
//!
//! This module contains the core sequencing services:
//! - `positioning` - Drives the conveyor until the target slot is under the pusher
//! - `homing` - Returns the conveyor to the glass/home position
//! - `pusher` - Down-pause-up ejection stroke
//! - `gate_monitor` - Door cycle and rangefinder presence check
//! - `session` - Logged-in operator and per-session counters
//! - `orchestrator` - Sort worker loop tying the above together

pub mod gate_monitor;
pub mod homing;
pub mod orchestrator;
pub mod positioning;
pub mod pusher;
pub mod session;

// Re-export commonly used types
pub use orchestrator::{Collaborators, Orchestrator, Tick};
pub use positioning::{Positioner, SeekReport};
pub use session::{SessionHandle, SessionSummary};
