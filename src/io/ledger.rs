//! Points ledger client and submission worker
//!
//! The sort worker never waits on the network. It enqueues a `LedgerCmd`
//! with `try_send`; an async `LedgerWorker` performs the HTTP call and
//! records latency and failures. A full or closed queue is reported back as
//! a `LedgerError` and logged by the caller.

use crate::domain::types::{Slot, UserId};
use crate::infra::config::LedgerConfig;
use crate::infra::metrics::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("invalid phone number format")]
    InvalidPhone,

    #[error("user not found")]
    UnknownUser,

    #[error("ledger returned HTTP {0}")]
    Status(u16),

    #[error("ledger request failed: {0}")]
    Transport(String),

    #[error("ledger queue full")]
    QueueFull,

    #[error("ledger worker stopped")]
    Closed,
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => LedgerError::Status(status.as_u16()),
            None => LedgerError::Transport(e.to_string()),
        }
    }
}

/// Points collaborator as seen by the sort worker
pub trait PointsLedger: Send {
    /// Hand off one earned-points record. Must not block.
    fn submit(&self, user: &UserId, slot: Slot, points: u32) -> Result<(), LedgerError>;
}

#[derive(Debug, Serialize)]
struct AddPointRequest<'a> {
    user_id: &'a str,
    points: u32,
    label: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginPhoneRequest<'a> {
    phone: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub user: LedgerUser,
    #[serde(default)]
    pub points: u32,
}

#[derive(Debug, Deserialize)]
struct PointsResponse {
    #[serde(default)]
    points: u32,
}

/// Thai mobile number: 10 digits starting with 06, 08 or 09
pub fn is_valid_thai_phone(phone: &str) -> bool {
    let bytes = phone.as_bytes();
    bytes.len() == 10
        && bytes[0] == b'0'
        && matches!(bytes[1], b'6' | b'8' | b'9')
        && bytes.iter().all(u8::is_ascii_digit)
}

/// HTTP client for the points backend
#[derive(Clone)]
pub struct LedgerClient {
    base_url: String,
    http: reqwest::Client,
}

impl LedgerClient {
    pub fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .http1_only()
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self { base_url: config.base_url.trim_end_matches('/').to_string(), http })
    }

    /// POST /api/addPoint
    pub async fn add_points(&self, user: &UserId, slot: Slot, points: u32) -> Result<(), LedgerError> {
        let body = AddPointRequest { user_id: &user.0, points, label: slot.as_str() };
        self.http
            .post(format!("{}/api/addPoint", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// POST /api/loginPhone; the phone format is checked before any request
    pub async fn login_phone(&self, phone: &str) -> Result<LoginResponse, LedgerError> {
        if !is_valid_thai_phone(phone) {
            return Err(LedgerError::InvalidPhone);
        }
        let response = self
            .http
            .post(format!("{}/api/loginPhone", self.base_url))
            .json(&LoginPhoneRequest { phone })
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LedgerError::UnknownUser);
        }
        Ok(response.error_for_status()?.json().await?)
    }

    /// GET /api/getPoint?user_id=
    pub async fn get_points(&self, user: &UserId) -> Result<u32, LedgerError> {
        let response: PointsResponse = self
            .http
            .get(format!("{}/api/getPoint", self.base_url))
            .query(&[("user_id", user.0.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.points)
    }
}

/// A points submission waiting for the worker
#[derive(Debug)]
pub struct LedgerCmd {
    pub user: UserId,
    pub slot: Slot,
    pub points: u32,
    /// When the command was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

/// Sending half handed to the sort worker
#[derive(Clone)]
pub struct LedgerQueue {
    tx: mpsc::Sender<LedgerCmd>,
    metrics: Arc<Metrics>,
}

impl PointsLedger for LedgerQueue {
    fn submit(&self, user: &UserId, slot: Slot, points: u32) -> Result<(), LedgerError> {
        let cmd = LedgerCmd { user: user.clone(), slot, points, enqueued_at: Instant::now() };
        self.tx.try_send(cmd).map_err(|e| {
            self.metrics.record_ledger_dropped();
            match e {
                mpsc::error::TrySendError::Full(_) => LedgerError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => LedgerError::Closed,
            }
        })
    }
}

/// Worker that performs ledger submissions asynchronously
pub struct LedgerWorker {
    client: LedgerClient,
    cmd_rx: mpsc::Receiver<LedgerCmd>,
    metrics: Arc<Metrics>,
}

impl LedgerWorker {
    /// Run the worker, processing submissions until every sender is dropped
    pub async fn run(mut self) {
        info!("ledger_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            let queue_delay_ms = cmd.enqueued_at.elapsed().as_millis() as u64;
            let start = Instant::now();
            let result = self.client.add_points(&cmd.user, cmd.slot, cmd.points).await;
            let latency_ms = start.elapsed().as_millis() as u64;
            self.metrics.record_ledger_request(result.is_ok(), latency_ms);

            match result {
                Ok(()) => info!(
                    user = %cmd.user,
                    slot = %cmd.slot,
                    points = cmd.points,
                    queue_delay_ms,
                    latency_ms,
                    "ledger_points_sent"
                ),
                Err(e) => warn!(
                    user = %cmd.user,
                    slot = %cmd.slot,
                    points = cmd.points,
                    error = %e,
                    "ledger_submit_failed"
                ),
            }
        }

        info!("ledger_worker_stopped");
    }
}

/// Create a ledger channel and worker
///
/// Returns the queue (for the sort worker) and the worker (to be spawned)
pub fn create_ledger_worker(
    client: LedgerClient,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (LedgerQueue, LedgerWorker) {
    let (tx, cmd_rx) = mpsc::channel(buffer_size.max(1));
    let queue = LedgerQueue { tx, metrics: metrics.clone() };
    (queue, LedgerWorker { client, cmd_rx, metrics })
}

/// In-memory ledger: records submissions, used when the backend is disabled
#[derive(Clone, Default)]
pub struct MemoryLedger {
    entries: Arc<Mutex<Vec<(UserId, Slot, u32)>>>,
    fail: bool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger whose every submission fails (entries are still recorded)
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn entries(&self) -> Vec<(UserId, Slot, u32)> {
        self.entries.lock().clone()
    }
}

impl PointsLedger for MemoryLedger {
    fn submit(&self, user: &UserId, slot: Slot, points: u32) -> Result<(), LedgerError> {
        self.entries.lock().push((user.clone(), slot, points));
        if self.fail {
            return Err(LedgerError::Transport("simulated failure".to_string()));
        }
        info!(user = %user, slot = %slot, points, "ledger_points_recorded");
        Ok(())
    }
}
