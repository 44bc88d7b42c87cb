//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps periodic counters to get a consistent snapshot.
pub struct Metrics {
    /// Position samples received from the source (monotonic)
    samples_total: AtomicU64,
    /// Samples since last report (reset on report)
    samples_since_report: AtomicU64,
    /// Samples discarded for arriving out of order
    samples_out_of_order: AtomicU64,
    /// Samples above the accuracy ceiling (displayed, not evaluated)
    samples_low_accuracy: AtomicU64,
    /// Samples with malformed coordinates
    samples_invalid: AtomicU64,
    /// Sum of sample processing latencies (reset on report)
    latency_sum_us: AtomicU64,
    /// Max sample processing latency (reset on report)
    latency_max_us: AtomicU64,
    /// Sample processing latency histogram (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    zone_enters: AtomicU64,
    zone_exits: AtomicU64,
    /// Zones currently held Inside (gauge)
    zones_inside: AtomicU64,
    /// Candidates offered to the deduplicator
    candidates_total: AtomicU64,
    /// Candidates dropped before admission (channel full or session stop)
    candidates_discarded: AtomicU64,
    notifications_admitted: AtomicU64,
    notifications_upgraded: AtomicU64,
    notifications_deduplicated: AtomicU64,
    notifications_read: AtomicU64,
    notifications_dismissed: AtomicU64,
    /// Unread notifications in the authoritative list (gauge)
    unread: AtomicU64,
    audible_played: AtomicU64,
    audible_muted: AtomicU64,
    push_sent: AtomicU64,
    push_retried: AtomicU64,
    push_failed: AtomicU64,
    position_errors: AtomicU64,
    position_timeouts: AtomicU64,
    channel_disconnects: AtomicU64,
    channel_reconciles: AtomicU64,
    /// Operations waiting for the channel to come back (gauge)
    buffered_ops: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_total: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            samples_out_of_order: AtomicU64::new(0),
            samples_low_accuracy: AtomicU64::new(0),
            samples_invalid: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            zone_enters: AtomicU64::new(0),
            zone_exits: AtomicU64::new(0),
            zones_inside: AtomicU64::new(0),
            candidates_total: AtomicU64::new(0),
            candidates_discarded: AtomicU64::new(0),
            notifications_admitted: AtomicU64::new(0),
            notifications_upgraded: AtomicU64::new(0),
            notifications_deduplicated: AtomicU64::new(0),
            notifications_read: AtomicU64::new(0),
            notifications_dismissed: AtomicU64::new(0),
            unread: AtomicU64::new(0),
            audible_played: AtomicU64::new(0),
            audible_muted: AtomicU64::new(0),
            push_sent: AtomicU64::new(0),
            push_retried: AtomicU64::new(0),
            push_failed: AtomicU64::new(0),
            position_errors: AtomicU64::new(0),
            position_timeouts: AtomicU64::new(0),
            channel_disconnects: AtomicU64::new(0),
            channel_reconciles: AtomicU64::new(0),
            buffered_ops: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a sample was processed with given latency (lock-free)
    #[inline]
    pub fn record_sample_processed(&self, latency_us: u64) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_sample_out_of_order(&self) {
        self.samples_out_of_order.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_low_accuracy(&self) {
        self.samples_low_accuracy.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_invalid(&self) {
        self.samples_invalid.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_zone_enter(&self) {
        self.zone_enters.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_zone_exit(&self) {
        self.zone_exits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_zones_inside(&self, count: usize) {
        self.zones_inside.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_candidate(&self) {
        self.candidates_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_candidates_discarded(&self, count: u64) {
        self.candidates_discarded.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_admitted(&self) {
        self.notifications_admitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_upgraded(&self) {
        self.notifications_upgraded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_deduplicated(&self) {
        self.notifications_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read(&self) {
        self.notifications_read.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dismissed(&self) {
        self.notifications_dismissed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_unread(&self, count: usize) {
        self.unread.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_audible(&self, muted: bool) {
        if muted {
            self.audible_muted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.audible_played.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_push_sent(&self) {
        self.push_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_push_retry(&self) {
        self.push_retried.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_push_failed(&self) {
        self.push_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_error(&self, timeout: bool) {
        self.position_errors.fetch_add(1, Ordering::Relaxed);
        if timeout {
            self.position_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_channel_disconnect(&self) {
        self.channel_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_channel_reconcile(&self) {
        self.channel_reconciles.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_buffered_ops(&self, count: usize) {
        self.buffered_ops.store(count as u64, Ordering::Relaxed);
    }

    /// Get total samples processed
    #[inline]
    pub fn samples_total(&self) -> u64 {
        self.samples_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn zone_enters(&self) -> u64 {
        self.zone_enters.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn zone_exits(&self) -> u64 {
        self.zone_exits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn candidates_discarded(&self) -> u64 {
        self.candidates_discarded.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn push_failed(&self) -> u64 {
        self.push_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn position_errors(&self) -> u64 {
        self.position_errors.load(Ordering::Relaxed)
    }

    /// Produce a summary, resetting the periodic (per-interval) counters
    pub fn report(&self) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let samples_count = self.samples_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let samples_per_sec = if elapsed.as_secs_f64() > 0.0 {
            samples_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if samples_count > 0 { latency_sum / samples_count } else { 0 };

        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        MetricsSummary {
            samples_total: load(&self.samples_total),
            samples_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            samples_out_of_order: load(&self.samples_out_of_order),
            samples_low_accuracy: load(&self.samples_low_accuracy),
            samples_invalid: load(&self.samples_invalid),
            zone_enters: load(&self.zone_enters),
            zone_exits: load(&self.zone_exits),
            zones_inside: load(&self.zones_inside),
            candidates_total: load(&self.candidates_total),
            candidates_discarded: load(&self.candidates_discarded),
            notifications_admitted: load(&self.notifications_admitted),
            notifications_upgraded: load(&self.notifications_upgraded),
            notifications_deduplicated: load(&self.notifications_deduplicated),
            notifications_read: load(&self.notifications_read),
            notifications_dismissed: load(&self.notifications_dismissed),
            unread: load(&self.unread),
            audible_played: load(&self.audible_played),
            audible_muted: load(&self.audible_muted),
            push_sent: load(&self.push_sent),
            push_retried: load(&self.push_retried),
            push_failed: load(&self.push_failed),
            position_errors: load(&self.position_errors),
            position_timeouts: load(&self.position_timeouts),
            channel_disconnects: load(&self.channel_disconnects),
            channel_reconciles: load(&self.channel_reconciles),
            buffered_ops: load(&self.buffered_ops),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub samples_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Sample processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub samples_out_of_order: u64,
    pub samples_low_accuracy: u64,
    pub samples_invalid: u64,
    pub zone_enters: u64,
    pub zone_exits: u64,
    pub zones_inside: u64,
    pub candidates_total: u64,
    pub candidates_discarded: u64,
    pub notifications_admitted: u64,
    pub notifications_upgraded: u64,
    pub notifications_deduplicated: u64,
    pub notifications_read: u64,
    pub notifications_dismissed: u64,
    pub unread: u64,
    pub audible_played: u64,
    pub audible_muted: u64,
    pub push_sent: u64,
    pub push_retried: u64,
    pub push_failed: u64,
    pub position_errors: u64,
    pub position_timeouts: u64,
    pub channel_disconnects: u64,
    pub channel_reconciles: u64,
    pub buffered_ops: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_total = %self.samples_total,
            samples_per_sec = format!("{:.1}", self.samples_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            p99_us = %self.lat_p99_us,
            low_accuracy = %self.samples_low_accuracy,
            out_of_order = %self.samples_out_of_order,
            zones_inside = %self.zones_inside,
            enters = %self.zone_enters,
            exits = %self.zone_exits,
            admitted = %self.notifications_admitted,
            deduplicated = %self.notifications_deduplicated,
            unread = %self.unread,
            push_failed = %self.push_failed,
            position_errors = %self.position_errors,
            buffered_ops = %self.buffered_ops,
            "metrics"
        );
    }
}
