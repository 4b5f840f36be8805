//! Domain models - slots, motion outcomes, and the sort cycle
//!
//! This module contains the canonical data types used throughout the system:
//! - `Slot` - disposal destination (glass, plastic, can)
//! - `MotionOutcome` - result of a positioning attempt
//! - `SortCycle` - one item's trip through the machine
//! - `SessionStats` - per-operator counters
//! - `SorterState` / `MachineState` - orchestrator state and published snapshot

pub mod cycle;
pub mod types;

// Re-export commonly used types at module level
pub use cycle::{MachineState, SessionStats, SortCycle, SorterState};
pub use types::{
    ConveyorCommand, Label, MotionOutcome, PointsTable, Position, PusherCommand, Sensor, Slot,
    UserId,
};
