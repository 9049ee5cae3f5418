//! Lock-free metrics collection and periodic reporting
//!
//! Counters are plain atomics with Relaxed ordering. They are statistics
//! only and never drive orchestrator decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Classifier round-trip bucket boundaries (milliseconds)
/// Buckets: ≤25, ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, >12800
const CLASSIFY_BOUNDS: [u64; 10] = [25, 50, 100, 200, 400, 800, 1600, 3200, 6400, 12800];

#[inline]
fn bucket_index(bounds: &[u64; 10], value: u64) -> usize {
    bounds.partition_point(|&bound| bound < value)
}

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
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket containing the percentile
fn percentile_from_buckets(
    buckets: &[u64; NUM_BUCKETS],
    bounds: &[u64; 10],
    percentile: f64,
) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
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

fn new_buckets() -> [AtomicU64; NUM_BUCKETS] {
    std::array::from_fn(|_| AtomicU64::new(0))
}

/// Lock-free metrics collector
pub struct Metrics {
    events_total: AtomicU64,
    events_since_report: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_buckets: [AtomicU64; NUM_BUCKETS],

    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_declined: AtomicU64,
    sessions_abandoned: AtomicU64,
    utterances_finalized: AtomicU64,
    reprompts: AtomicU64,
    speech_timeouts: AtomicU64,
    classifications_total: AtomicU64,
    classification_failures: AtomicU64,
    stale_results: AtomicU64,
    classify_sum_ms: AtomicU64,
    classify_buckets: [AtomicU64; NUM_BUCKETS],
    submissions_ok: AtomicU64,
    submissions_failed: AtomicU64,

    events_dropped: AtomicU64,
    effects_dropped: AtomicU64,
    /// 1 while a visitor is considered present
    presence: AtomicU64,
    stage: Mutex<&'static str>,

    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: new_buckets(),
            sessions_started: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_declined: AtomicU64::new(0),
            sessions_abandoned: AtomicU64::new(0),
            utterances_finalized: AtomicU64::new(0),
            reprompts: AtomicU64::new(0),
            speech_timeouts: AtomicU64::new(0),
            classifications_total: AtomicU64::new(0),
            classification_failures: AtomicU64::new(0),
            stale_results: AtomicU64::new(0),
            classify_sum_ms: AtomicU64::new(0),
            classify_buckets: new_buckets(),
            submissions_ok: AtomicU64::new(0),
            submissions_failed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            effects_dropped: AtomicU64::new(0),
            presence: AtomicU64::new(0),
            stage: Mutex::new("inactive"),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_event_processed(&self, latency_us: u64) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        let idx = bucket_index(&BUCKET_BOUNDS, latency_us);
        self.latency_buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_declined(&self) {
        self.sessions_declined.fetch_add(1, Ordering::Relaxed);
    }

    /// Visitor walked away or a device failed mid-session
    pub fn record_session_abandoned(&self) {
        self.sessions_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_utterance_finalized(&self) {
        self.utterances_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reprompt(&self) {
        self.reprompts.fetch_add(1, Ordering::Relaxed);
    }

    /// Prompt abandoned because its finish notification never came
    pub fn record_speech_timeout(&self) {
        self.speech_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Classifier round trip in milliseconds
    pub fn record_classification(&self, latency_ms: u64, ok: bool) {
        self.classifications_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.classification_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.classify_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        let idx = bucket_index(&CLASSIFY_BOUNDS, latency_ms);
        self.classify_buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_result(&self) {
        self.stale_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission(&self, ok: bool) {
        if ok {
            self.submissions_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.submissions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_effect_dropped(&self) {
        self.effects_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_presence(&self, present: bool) {
        self.presence.store(present as u64, Ordering::Relaxed);
    }

    /// Current dialogue stage, for reports
    pub fn set_stage(&self, stage: &'static str) {
        *self.stage.lock() = stage;
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed.load(Ordering::Relaxed)
    }

    pub fn sessions_declined(&self) -> u64 {
        self.sessions_declined.load(Ordering::Relaxed)
    }

    pub fn sessions_abandoned(&self) -> u64 {
        self.sessions_abandoned.load(Ordering::Relaxed)
    }

    pub fn reprompts(&self) -> u64 {
        self.reprompts.load(Ordering::Relaxed)
    }

    pub fn speech_timeouts(&self) -> u64 {
        self.speech_timeouts.load(Ordering::Relaxed)
    }

    pub fn stale_results(&self) -> u64 {
        self.stale_results.load(Ordering::Relaxed)
    }

    pub fn effects_dropped(&self) -> u64 {
        self.effects_dropped.load(Ordering::Relaxed)
    }

    /// Snapshot, resetting the periodic latency counters
    pub fn report(&self) -> MetricsSummary {
        let events_count = self.events_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);
        let classify_sum = self.classify_sum_ms.swap(0, Ordering::Relaxed);
        let classify_buckets = swap_buckets(&self.classify_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let events_per_sec = if elapsed.as_secs_f64() > 0.0 {
            events_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if events_count > 0 { latency_sum / events_count } else { 0 };

        MetricsSummary {
            events_total: self.events_total.load(Ordering::Relaxed),
            events_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_sum_us: latency_sum,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, &BUCKET_BOUNDS, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, &BUCKET_BOUNDS, 0.99),
            classify_sum_ms: classify_sum,
            classify_buckets,
            classify_p95_ms: percentile_from_buckets(&classify_buckets, &CLASSIFY_BOUNDS, 0.95),
            stage: *self.stage.lock(),
            present: self.presence.load(Ordering::Relaxed) == 1,
            sessions_started: self.sessions_started(),
            sessions_completed: self.sessions_completed(),
            sessions_declined: self.sessions_declined(),
            sessions_abandoned: self.sessions_abandoned(),
            utterances_finalized: self.utterances_finalized.load(Ordering::Relaxed),
            reprompts: self.reprompts(),
            speech_timeouts: self.speech_timeouts(),
            classifications_total: self.classifications_total.load(Ordering::Relaxed),
            classification_failures: self.classification_failures.load(Ordering::Relaxed),
            stale_results: self.stale_results(),
            submissions_ok: self.submissions_ok.load(Ordering::Relaxed),
            submissions_failed: self.submissions_failed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            effects_dropped: self.effects_dropped(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_CLASSIFY_BOUNDS: [u64; 10] = CLASSIFY_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub events_total: u64,
    pub events_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    pub lat_sum_us: u64,
    /// Event handling latency histogram (µs, `METRICS_BUCKET_BOUNDS`)
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub classify_sum_ms: u64,
    /// Classifier round-trip histogram (ms, `METRICS_CLASSIFY_BOUNDS`)
    pub classify_buckets: [u64; NUM_BUCKETS],
    pub classify_p95_ms: u64,
    /// Dialogue stage at report time
    pub stage: &'static str,
    pub present: bool,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_declined: u64,
    pub sessions_abandoned: u64,
    pub utterances_finalized: u64,
    pub reprompts: u64,
    pub speech_timeouts: u64,
    pub classifications_total: u64,
    pub classification_failures: u64,
    pub stale_results: u64,
    pub submissions_ok: u64,
    pub submissions_failed: u64,
    pub events_dropped: u64,
    pub effects_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_total = %self.events_total,
            events_per_sec = format!("{:.1}", self.events_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            p99_us = %self.lat_p99_us,
            stage = %self.stage,
            present = %self.present,
            sessions = %self.sessions_started,
            completed = %self.sessions_completed,
            reprompts = %self.reprompts,
            classify_p95_ms = %self.classify_p95_ms,
            dropped = %(self.events_dropped + self.effects_dropped),
            "metrics"
        );
    }
}
