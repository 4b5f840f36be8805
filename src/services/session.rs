//! Operator session: who is logged in and what they have sorted
//!
//! Shared between the sort worker (records sorted items) and the front end
//! (login/logout), so the state sits behind a mutex. Points are only credited
//! while a user is logged in.

use crate::domain::cycle::SessionStats;
use crate::domain::types::{Slot, UserId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user: UserId,
    pub display_name: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Balance reported by the ledger at login
    pub opening_points: u32,
    pub stats: SessionStats,
}

/// What a finished session earned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub user: UserId,
    pub stats: SessionStats,
    pub duration_secs: i64,
}

#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<Mutex<Option<Session>>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session, ending any previous one
    pub fn login(&self, user: UserId, display_name: Option<String>, opening_points: u32) -> Option<SessionSummary> {
        let previous = self.logout();
        info!(user = %user, opening_points, "session_started");
        *self.inner.lock() = Some(Session {
            user,
            display_name,
            started_at: Utc::now(),
            opening_points,
            stats: SessionStats::default(),
        });
        previous
    }

    pub fn logout(&self) -> Option<SessionSummary> {
        let session = self.inner.lock().take()?;
        let summary = SessionSummary {
            duration_secs: (Utc::now() - session.started_at).num_seconds(),
            user: session.user,
            stats: session.stats,
        };
        info!(
            user = %summary.user,
            glass = summary.stats.glass,
            plastic = summary.stats.plastic,
            can = summary.stats.can,
            total_points = summary.stats.total_points,
            duration_secs = summary.duration_secs,
            "session_ended"
        );
        Some(summary)
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.inner.lock().as_ref().map(|s| s.user.clone())
    }

    pub fn stats(&self) -> Option<SessionStats> {
        self.inner.lock().as_ref().map(|s| s.stats)
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.inner.lock().clone()
    }

    /// Credit one sorted item to the session. Returns the user credited.
    pub fn record(&self, slot: Slot, points: u32) -> Option<UserId> {
        let mut guard = self.inner.lock();
        let session = guard.as_mut()?;
        session.stats.record(slot, points);
        Some(session.user.clone())
    }
}
