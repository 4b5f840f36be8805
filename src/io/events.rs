//! Sorter events for presentation layers
//!
//! Status text, sorted items and state changes travel on one unbounded
//! channel so readers observe them in emission order and nothing is dropped.

use crate::domain::cycle::SorterState;
use crate::domain::types::Slot;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

/// User-visible status texts
pub mod status {
    pub const WAITING_FOR_LOGIN: &str = "Waiting for login";
    pub const WAITING_FOR_DOOR: &str = "Waiting for door to open...";
    pub const DOOR_OPEN: &str = "Door open - insert item";
    pub const DOOR_CLOSED: &str = "Door closed - scanning...";
    pub const OBJECT_DETECTED: &str = "Item detected - processing...";
    pub const CAMERA_RECONNECTING: &str = "Camera not detected - retrying...";
    pub const CAMERA_MISSING: &str = "Camera not detected";
    pub const CAMERA_ERROR: &str = "Camera error";
    pub const DETECTION_FAILED: &str = "Detection failed";
    pub const POSITIONING_FAILED: &str = "Positioning failed";
    pub const PUSHING: &str = "Ejecting...";
    pub const SENDING_POINTS: &str = "Sending points...";
    pub const RETURNING_HOME: &str = "Returning home...";
    pub const HOME_FAILED: &str = "Return home failed";
    pub const READY: &str = "Ready for next item";
    pub const HARDWARE_ERROR: &str = "Hardware error";
    pub const STOPPED: &str = "Stopped";

    pub fn detected(label: &str, points: u32) -> String {
        format!("Detected: {label} (+{points} points)")
    }

    pub fn unknown_label(label: &str) -> String {
        format!("Unknown item: {label}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SorterEvent {
    Status { message: String },
    ItemSorted { slot: Slot, points: u32 },
    State { state: SorterState },
}

/// Receiver of sorter notifications; fire-and-forget
pub trait StatusSink: Send {
    fn notify(&self, message: &str);

    fn item_sorted(&self, _slot: Slot, _points: u32) {}

    fn state_changed(&self, _state: SorterState) {}
}

/// Channel-backed sink used by the sort worker
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SorterEvent>,
}

impl EventSender {
    fn send(&self, event: SorterEvent) {
        // No listener is not an error for a fire-and-forget sink
        let _ = self.tx.send(event);
    }
}

impl StatusSink for EventSender {
    fn notify(&self, message: &str) {
        info!(message, "status");
        self.send(SorterEvent::Status { message: message.to_string() });
    }

    fn item_sorted(&self, slot: Slot, points: u32) {
        self.send(SorterEvent::ItemSorted { slot, points });
    }

    fn state_changed(&self, state: SorterState) {
        self.send(SorterEvent::State { state });
    }
}

pub fn create_event_channel() -> (EventSender, mpsc::UnboundedReceiver<SorterEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
