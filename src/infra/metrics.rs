//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::{MotionOutcome, Slot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Sort cycle duration bucket boundaries (milliseconds)
/// Buckets: ≤250, ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, >128000
const CYCLE_BOUNDS: [u64; 10] = [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000];

/// Ledger request latency bucket boundaries (milliseconds)
const LEDGER_BOUNDS: [u64; 10] = [10, 25, 50, 100, 200, 400, 800, 1600, 3200, 6400];

const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(bounds: &[u64; 10], value: u64) -> usize {
    bounds.partition_point(|&bound| bound < value)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], bounds: &[u64; 10], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            // Overflow bucket reports twice the last bound
            return bounds.get(i).copied().unwrap_or(bounds[9] * 2);
        }
    }
    bounds[9] * 2
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Sort cycles started after an item was presented (monotonic)
    cycles_total: AtomicU64,
    /// Cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    /// Items ejected per slot (monotonic)
    sorted: [AtomicU64; 3],
    /// Points credited to sessions (monotonic)
    points_total: AtomicU64,
    seek_reached: AtomicU64,
    seek_blocked: AtomicU64,
    seek_timed_out: AtomicU64,
    /// Positioning attempts, including retries
    seek_attempts: AtomicU64,
    home_failures: AtomicU64,
    classification_misses: AtomicU64,
    camera_faults: AtomicU64,
    camera_reconnects: AtomicU64,
    rangefinder_faults: AtomicU64,
    gpio_faults: AtomicU64,
    ledger_submitted: AtomicU64,
    ledger_failures: AtomicU64,
    /// Submissions rejected because the queue was full or closed
    ledger_dropped: AtomicU64,
    /// Cycle duration histogram (cumulative)
    cycle_buckets: [AtomicU64; NUM_BUCKETS],
    cycle_sum_ms: AtomicU64,
    cycle_max_ms: AtomicU64,
    /// Ledger request latency histogram (cumulative)
    ledger_buckets: [AtomicU64; NUM_BUCKETS],
    ledger_sum_ms: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_since_report: AtomicU64::new(0),
            sorted: std::array::from_fn(|_| AtomicU64::new(0)),
            points_total: AtomicU64::new(0),
            seek_reached: AtomicU64::new(0),
            seek_blocked: AtomicU64::new(0),
            seek_timed_out: AtomicU64::new(0),
            seek_attempts: AtomicU64::new(0),
            home_failures: AtomicU64::new(0),
            classification_misses: AtomicU64::new(0),
            camera_faults: AtomicU64::new(0),
            camera_reconnects: AtomicU64::new(0),
            rangefinder_faults: AtomicU64::new(0),
            gpio_faults: AtomicU64::new(0),
            ledger_submitted: AtomicU64::new(0),
            ledger_failures: AtomicU64::new(0),
            ledger_dropped: AtomicU64::new(0),
            cycle_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            cycle_sum_ms: AtomicU64::new(0),
            cycle_max_ms: AtomicU64::new(0),
            ledger_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            ledger_sum_ms: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a finished sort cycle (any outcome) and its duration
    #[inline]
    pub fn record_cycle(&self, duration_ms: u64) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.cycle_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        update_atomic_max(&self.cycle_max_ms, duration_ms);
        self.cycle_buckets[bucket_index(&CYCLE_BOUNDS, duration_ms)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sorted(&self, slot: Slot, points: u32) {
        self.sorted[slot.index()].fetch_add(1, Ordering::Relaxed);
        self.points_total.fetch_add(points as u64, Ordering::Relaxed);
    }

    pub fn record_seek(&self, outcome: MotionOutcome, attempts: u32) {
        let counter = match outcome {
            MotionOutcome::Reached => &self.seek_reached,
            MotionOutcome::BlockedByLimit => &self.seek_blocked,
            MotionOutcome::TimedOut => &self.seek_timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.seek_attempts.fetch_add(attempts as u64, Ordering::Relaxed);
    }

    pub fn record_home_failure(&self) {
        self.home_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classification_miss(&self) {
        self.classification_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_camera_fault(&self) {
        self.camera_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_camera_reconnect(&self) {
        self.camera_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rangefinder_fault(&self) {
        self.rangefinder_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gpio_fault(&self) {
        self.gpio_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed ledger request and its latency
    pub fn record_ledger_request(&self, ok: bool, latency_ms: u64) {
        if ok {
            self.ledger_submitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ledger_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.ledger_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.ledger_buckets[bucket_index(&LEDGER_BOUNDS, latency_ms)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ledger_dropped(&self) {
        self.ledger_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    pub fn sorted(&self, slot: Slot) -> u64 {
        self.sorted[slot.index()].load(Ordering::Relaxed)
    }

    pub fn points_total(&self) -> u64 {
        self.points_total.load(Ordering::Relaxed)
    }

    pub fn ledger_dropped(&self) -> u64 {
        self.ledger_dropped.load(Ordering::Relaxed)
    }

    /// Generate a report. Only the cycle rate and max duration reset.
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let cycles_since = self.cycles_since_report.swap(0, Ordering::Relaxed);
        let cycles_per_min =
            if elapsed_secs > 0.0 { cycles_since as f64 * 60.0 / elapsed_secs } else { 0.0 };

        let cycle_buckets = load_buckets(&self.cycle_buckets);
        let cycle_count: u64 = cycle_buckets.iter().sum();
        let cycle_sum = self.cycle_sum_ms.load(Ordering::Relaxed);
        let cycle_avg_ms = if cycle_count > 0 { cycle_sum / cycle_count } else { 0 };

        let ledger_buckets = load_buckets(&self.ledger_buckets);
        let ledger_count: u64 = ledger_buckets.iter().sum();
        let ledger_sum = self.ledger_sum_ms.load(Ordering::Relaxed);
        let ledger_avg_ms = if ledger_count > 0 { ledger_sum / ledger_count } else { 0 };

        MetricsSummary {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_per_min,
            sorted: std::array::from_fn(|i| self.sorted[i].load(Ordering::Relaxed)),
            points_total: self.points_total.load(Ordering::Relaxed),
            seek_reached: self.seek_reached.load(Ordering::Relaxed),
            seek_blocked: self.seek_blocked.load(Ordering::Relaxed),
            seek_timed_out: self.seek_timed_out.load(Ordering::Relaxed),
            seek_attempts: self.seek_attempts.load(Ordering::Relaxed),
            home_failures: self.home_failures.load(Ordering::Relaxed),
            classification_misses: self.classification_misses.load(Ordering::Relaxed),
            camera_faults: self.camera_faults.load(Ordering::Relaxed),
            camera_reconnects: self.camera_reconnects.load(Ordering::Relaxed),
            rangefinder_faults: self.rangefinder_faults.load(Ordering::Relaxed),
            gpio_faults: self.gpio_faults.load(Ordering::Relaxed),
            ledger_submitted: self.ledger_submitted.load(Ordering::Relaxed),
            ledger_failures: self.ledger_failures.load(Ordering::Relaxed),
            ledger_dropped: self.ledger_dropped.load(Ordering::Relaxed),
            cycle_buckets,
            cycle_avg_ms,
            cycle_max_ms: self.cycle_max_ms.swap(0, Ordering::Relaxed),
            cycle_p95_ms: percentile_from_buckets(&cycle_buckets, &CYCLE_BOUNDS, 0.95),
            ledger_buckets,
            ledger_avg_ms,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;
pub const METRICS_CYCLE_BOUNDS: [u64; 10] = CYCLE_BOUNDS;
pub const METRICS_LEDGER_BOUNDS: [u64; 10] = LEDGER_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub cycles_total: u64,
    pub cycles_per_min: f64,
    /// Indexed by `Slot::index`
    pub sorted: [u64; 3],
    pub points_total: u64,
    pub seek_reached: u64,
    pub seek_blocked: u64,
    pub seek_timed_out: u64,
    pub seek_attempts: u64,
    pub home_failures: u64,
    pub classification_misses: u64,
    pub camera_faults: u64,
    pub camera_reconnects: u64,
    pub rangefinder_faults: u64,
    pub gpio_faults: u64,
    pub ledger_submitted: u64,
    pub ledger_failures: u64,
    pub ledger_dropped: u64,
    pub cycle_buckets: [u64; NUM_BUCKETS],
    pub cycle_avg_ms: u64,
    pub cycle_max_ms: u64,
    pub cycle_p95_ms: u64,
    pub ledger_buckets: [u64; NUM_BUCKETS],
    pub ledger_avg_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            cycles_total = %self.cycles_total,
            cycles_per_min = %format!("{:.1}", self.cycles_per_min),
            glass = %self.sorted[Slot::Glass.index()],
            plastic = %self.sorted[Slot::Plastic.index()],
            can = %self.sorted[Slot::Can.index()],
            points_total = %self.points_total,
            cycle_avg_ms = %self.cycle_avg_ms,
            cycle_max_ms = %self.cycle_max_ms,
            cycle_p95_ms = %self.cycle_p95_ms,
            seek_blocked = %self.seek_blocked,
            seek_timed_out = %self.seek_timed_out,
            home_failures = %self.home_failures,
            classification_misses = %self.classification_misses,
            camera_reconnects = %self.camera_reconnects,
            ledger_failures = %self.ledger_failures,
            ledger_dropped = %self.ledger_dropped,
            "metrics"
        );
    }
}
