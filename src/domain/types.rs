//! Shared types for the sorting machine

use serde::{Deserialize, Serialize};

/// Newtype wrapper for ledger user IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Disposal destination for one material category
///
/// GLASS is coincident with HOME. CAN is coincident with the END limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Glass,
    Plastic,
    Can,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Glass, Slot::Plastic, Slot::Can];

    /// Item type string used by the points ledger
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Glass => "glass",
            Slot::Plastic => "plastic",
            Slot::Can => "can",
        }
    }

    /// Map a classifier label to a slot (case-insensitive)
    pub fn from_label(label: &str) -> Option<Slot> {
        match label.trim().to_ascii_lowercase().as_str() {
            "glass_bottle" | "glass" => Some(Slot::Glass),
            "plastic_bottle" | "plastic" => Some(Slot::Plastic),
            "can" => Some(Slot::Can),
            _ => None,
        }
    }

    /// The presence sensor that marks this slot's ejection point
    pub fn sensor(&self) -> Sensor {
        match self {
            Slot::Glass => Sensor::Glass,
            Slot::Plastic => Sensor::Plastic,
            Slot::Can => Sensor::Can,
        }
    }

    /// GLASS is the resting position; nothing to return from
    #[inline]
    pub fn is_home(&self) -> bool {
        matches!(self, Slot::Glass)
    }

    /// Index into per-slot arrays
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Slot::Glass => 0,
            Slot::Plastic => 1,
            Slot::Can => 2,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw label produced by the classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Label(pub String);

impl Label {
    pub fn slot(&self) -> Option<Slot> {
        Slot::from_label(&self.0)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digital inputs read through the sensor gateway (all active-low)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensor {
    Glass,
    Plastic,
    Can,
    HomeLimit,
    EndLimit,
    /// Triggered while the door beam is blocked (door closed)
    Door,
}

impl Sensor {
    pub const ALL: [Sensor; 6] = [
        Sensor::Glass,
        Sensor::Plastic,
        Sensor::Can,
        Sensor::HomeLimit,
        Sensor::EndLimit,
        Sensor::Door,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sensor::Glass => "ir_glass",
            Sensor::Plastic => "ir_plastic",
            Sensor::Can => "ir_can",
            Sensor::HomeLimit => "limit_home",
            Sensor::EndLimit => "limit_end",
            Sensor::Door => "ir_door",
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Sensor::Glass => 0,
            Sensor::Plastic => 1,
            Sensor::Can => 2,
            Sensor::HomeLimit => 3,
            Sensor::EndLimit => 4,
            Sensor::Door => 5,
        }
    }
}

/// Result of attempting to reach a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionOutcome {
    Reached,
    /// END limit hit while seeking a non-CAN slot; never retried
    BlockedByLimit,
    TimedOut,
}

impl MotionOutcome {
    #[inline]
    pub fn is_reached(&self) -> bool {
        matches!(self, MotionOutcome::Reached)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionOutcome::Reached => "reached",
            MotionOutcome::BlockedByLimit => "blocked_by_limit",
            MotionOutcome::TimedOut => "timed_out",
        }
    }
}

/// Conveyor position as known from sensor edges only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "at", content = "slot")]
pub enum Position {
    Home,
    Slot(Slot),
    EndLimit,
    Unknown,
}

/// Logical conveyor command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConveyorCommand {
    Forward,
    Reverse,
    Stop,
}

/// Logical pusher command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PusherCommand {
    Down,
    Up,
    Stop,
}

/// Static slot → points mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsTable {
    #[serde(default = "default_glass_points")]
    pub glass: u32,
    #[serde(default = "default_plastic_points")]
    pub plastic: u32,
    #[serde(default = "default_can_points")]
    pub can: u32,
}

fn default_glass_points() -> u32 {
    5
}

fn default_plastic_points() -> u32 {
    3
}

fn default_can_points() -> u32 {
    2
}

impl Default for PointsTable {
    fn default() -> Self {
        Self {
            glass: default_glass_points(),
            plastic: default_plastic_points(),
            can: default_can_points(),
        }
    }
}

impl PointsTable {
    #[inline]
    pub fn points(&self, slot: Slot) -> u32 {
        match slot {
            Slot::Glass => self.glass,
            Slot::Plastic => self.plastic,
            Slot::Can => self.can,
        }
    }
}
