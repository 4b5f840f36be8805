//! Sort cycle record, session statistics, and the orchestrator state machine

use crate::domain::types::{ConveyorCommand, Label, MotionOutcome, Position, PusherCommand, Slot};
use crate::error::SortError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Orchestrator states
///
/// A cycle walks `AwaitingItem → Classifying → Positioning → Ejecting →
/// ReportingPoints → ReturningHome → Ready`. Failures jump straight to
/// `Ready` from wherever they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SorterState {
    /// No authenticated user; polling
    WaitingForUser,
    /// Gate monitor running (door / rangefinder)
    AwaitingItem,
    /// Frame captured, classifier running
    Classifying,
    /// Conveyor seeking the slot
    Positioning,
    /// Pusher stroke in progress
    Ejecting,
    /// Session stats and ledger update
    ReportingPoints,
    /// Conveyor driving back to HOME
    ReturningHome,
    /// Cycle finished (successfully or not)
    Ready,
    /// Worker exited; outputs de-energized
    Stopped,
}

impl SorterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SorterState::WaitingForUser => "waiting_for_user",
            SorterState::AwaitingItem => "awaiting_item",
            SorterState::Classifying => "classifying",
            SorterState::Positioning => "positioning",
            SorterState::Ejecting => "ejecting",
            SorterState::ReportingPoints => "reporting_points",
            SorterState::ReturningHome => "returning_home",
            SorterState::Ready => "ready",
            SorterState::Stopped => "stopped",
        }
    }

    /// Check whether the orchestrator may move from `self` to `next`
    pub fn can_transition_to(self, next: SorterState) -> bool {
        use SorterState::*;

        match (self, next) {
            (_, Stopped) => true,
            (_, WaitingForUser) => true,
            (WaitingForUser, AwaitingItem) => true,
            (Ready, AwaitingItem) => true,
            (AwaitingItem, Classifying) => true,
            (Classifying, Positioning) => true,
            (Positioning, Ejecting) => true,
            (Ejecting, ReportingPoints) => true,
            (ReportingPoints, ReturningHome) => true,
            // Any stage may abort to Ready
            (AwaitingItem | Classifying | Positioning | Ejecting | ReportingPoints | ReturningHome, Ready) => true,
            (Ready, Ready) => true,
            _ => false,
        }
    }
}

/// Per-session counters for the logged-in operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub glass: u32,
    pub plastic: u32,
    pub can: u32,
    pub total_points: u32,
}

impl SessionStats {
    pub fn record(&mut self, slot: Slot, points: u32) {
        match slot {
            Slot::Glass => self.glass += 1,
            Slot::Plastic => self.plastic += 1,
            Slot::Can => self.can += 1,
        }
        self.total_points += points;
    }

    pub fn count(&self, slot: Slot) -> u32 {
        match slot {
            Slot::Glass => self.glass,
            Slot::Plastic => self.plastic,
            Slot::Can => self.can,
        }
    }

    pub fn items(&self) -> u32 {
        self.glass + self.plastic + self.can
    }
}

/// Transient record of one item's trip through the machine
#[derive(Debug, Clone)]
pub struct SortCycle {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub label: Option<Label>,
    pub slot: Option<Slot>,
    pub positioning: Option<MotionOutcome>,
    /// Positioning attempts used (0 when no motion was needed)
    pub attempts: u32,
    pub ejected: bool,
    /// Points credited to the session (None when nothing was earned)
    pub points: Option<u32>,
    pub home_attempted: bool,
    pub home_succeeded: bool,
    /// Why the cycle stopped early, if it did
    pub failure: Option<SortError>,
}

impl SortCycle {
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            started_at: Utc::now(),
            label: None,
            slot: None,
            positioning: None,
            attempts: 0,
            ejected: false,
            points: None,
            home_attempted: false,
            home_succeeded: false,
            failure: None,
        }
    }

    /// Positioning reached the slot; ejection and points follow deterministically
    #[inline]
    pub fn succeeded(&self) -> bool {
        self.positioning.map(|o| o.is_reached()).unwrap_or(false)
    }
}

impl Default for SortCycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the mechanism and orchestrator, published to readers
///
/// Only the orchestrator mutates this; everyone else reads copies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MachineState {
    pub state: SorterState,
    pub position: Position,
    pub conveyor: ConveyorCommand,
    pub pusher: PusherCommand,
    pub cycles: u64,
    pub last_slot: Option<Slot>,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            state: SorterState::WaitingForUser,
            position: Position::Unknown,
            conveyor: ConveyorCommand::Stop,
            pusher: PusherCommand::Stop,
            cycles: 0,
            last_slot: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_record() {
        let mut stats = SessionStats::default();
        stats.record(Slot::Plastic, 3);
        stats.record(Slot::Glass, 5);
        stats.record(Slot::Plastic, 3);

        assert_eq!(stats.plastic, 2);
        assert_eq!(stats.glass, 1);
        assert_eq!(stats.can, 0);
        assert_eq!(stats.total_points, 11);
        assert_eq!(stats.items(), 3);
        assert_eq!(stats.count(Slot::Plastic), 2);
    }

    #[test]
    fn test_happy_path_transitions() {
        use SorterState::*;
        let path = [
            WaitingForUser,
            AwaitingItem,
            Classifying,
            Positioning,
            Ejecting,
            ReportingPoints,
            ReturningHome,
            Ready,
            AwaitingItem,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failures_skip_to_ready() {
        use SorterState::*;
        assert!(Classifying.can_transition_to(Ready));
        assert!(Positioning.can_transition_to(Ready));
        // Glass skips the return trip
        assert!(ReportingPoints.can_transition_to(Ready));
    }

    #[test]
    fn test_invalid_transitions() {
        use SorterState::*;
        assert!(!AwaitingItem.can_transition_to(Ejecting));
        assert!(!Classifying.can_transition_to(ReportingPoints));
        assert!(!Positioning.can_transition_to(ReturningHome));
        assert!(!WaitingForUser.can_transition_to(Positioning));
    }

    #[test]
    fn test_cycle_success_follows_positioning() {
        let mut cycle = SortCycle::new();
        assert!(!cycle.succeeded());
        cycle.positioning = Some(MotionOutcome::BlockedByLimit);
        assert!(!cycle.succeeded());
        cycle.positioning = Some(MotionOutcome::Reached);
        assert!(cycle.succeeded());
    }
}
