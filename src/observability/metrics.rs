//! Thread-safe metrics collection system
//!
//! Provides atomic counters and a mutex-protected sample window for tracking
//! operational statistics across sampling, encoding and the MQTT link.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Tick durations kept for percentile calculation
const TICK_WINDOW: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Sampling and encoding
    ticks: AtomicU64,
    reports_sampled: AtomicU64,
    frames_encoded: AtomicU64,
    bytes_encoded: AtomicU64,
    encode_failures: AtomicU64,
    frames_evicted: AtomicU64,
    malformed_frames: AtomicU64,

    // Link
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    frames_published: AtomicU64,
    bytes_published: AtomicU64,
    publish_failures: AtomicU64,
    reconnects_deferred: AtomicU64,
    sessions_connected: AtomicU64,
    sessions_total: AtomicU64,

    tick_durations: Mutex<Vec<u64>>, // in microseconds

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            reports_sampled: AtomicU64::new(0),
            frames_encoded: AtomicU64::new(0),
            bytes_encoded: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            frames_evicted: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            reconnects_deferred: AtomicU64::new(0),
            sessions_connected: AtomicU64::new(0),
            sessions_total: AtomicU64::new(0),
            tick_durations: Mutex::new(Vec::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Sampling metrics
    pub fn tick_completed(&self, duration: Duration) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut durations) = self.tick_durations.lock() {
            durations.push(duration.as_micros() as u64);
            if durations.len() > TICK_WINDOW {
                durations.remove(0);
            }
        }
    }

    pub fn report_sampled(&self) {
        self.reports_sampled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_encoded(&self, bytes: usize) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_encoded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn encode_failed(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame dropped by the queue's drop-oldest policy
    pub fn frame_evicted(&self) {
        self.frames_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    // Link metrics
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_published(&self, bytes: usize) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_deferred(&self) {
        self.reconnects_deferred.fetch_add(1, Ordering::Relaxed);
    }

    /// Gauges refreshed from the fleet snapshot
    pub fn set_session_gauges(&self, connected: usize, total: usize) {
        self.sessions_connected
            .store(connected as u64, Ordering::Relaxed);
        self.sessions_total.store(total as u64, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.ticks,
            &self.reports_sampled,
            &self.frames_encoded,
            &self.bytes_encoded,
            &self.encode_failures,
            &self.frames_evicted,
            &self.malformed_frames,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_lost,
            &self.frames_published,
            &self.bytes_published,
            &self.publish_failures,
            &self.reconnects_deferred,
            &self.sessions_connected,
            &self.sessions_total,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut durations) = self.tick_durations.lock() {
            durations.clear();
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Calculate tick duration statistics (pure function)
    fn calculate_tick_statistics(&self) -> (f64, f64, f64) {
        if let Ok(durations) = self.tick_durations.lock() {
            if durations.is_empty() {
                (0.0, 0.0, 0.0)
            } else {
                let mut sorted = durations.clone();
                sorted.sort_unstable();

                let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
                (avg, percentile(&sorted, 50.0), percentile(&sorted, 99.0))
            }
        } else {
            (0.0, 0.0, 0.0)
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_tick_us, tick_p50_us, tick_p99_us) = self.calculate_tick_statistics();

        let frames_encoded = self.frames_encoded.load(Ordering::Relaxed);
        let bytes_encoded = self.bytes_encoded.load(Ordering::Relaxed);
        let avg_frame_bytes = if frames_encoded == 0 {
            0.0
        } else {
            bytes_encoded as f64 / frames_encoded as f64
        };

        MetricsSnapshot {
            sampling: SamplingMetrics {
                ticks: self.ticks.load(Ordering::Relaxed),
                reports_sampled: self.reports_sampled.load(Ordering::Relaxed),
                frames_encoded,
                bytes_encoded,
                avg_frame_bytes,
                encode_failures: self.encode_failures.load(Ordering::Relaxed),
                frames_evicted: self.frames_evicted.load(Ordering::Relaxed),
                malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
                avg_tick_us,
                tick_p50_us,
                tick_p99_us,
            },
            link: LinkMetrics {
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                frames_published: self.frames_published.load(Ordering::Relaxed),
                bytes_published: self.bytes_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                reconnects_deferred: self.reconnects_deferred.load(Ordering::Relaxed),
                sessions_connected: self.sessions_connected.load(Ordering::Relaxed),
                sessions_total: self.sessions_total.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub sampling: SamplingMetrics,
    pub link: LinkMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct SamplingMetrics {
    pub ticks: u64,
    pub reports_sampled: u64,
    pub frames_encoded: u64,
    pub bytes_encoded: u64,
    pub avg_frame_bytes: f64,
    pub encode_failures: u64,
    pub frames_evicted: u64,
    pub malformed_frames: u64,
    pub avg_tick_us: f64,
    pub tick_p50_us: f64,
    pub tick_p99_us: f64,
}

#[derive(Debug, Serialize)]
pub struct LinkMetrics {
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub frames_published: u64,
    pub bytes_published: u64,
    pub publish_failures: u64,
    pub reconnects_deferred: u64,
    pub sessions_connected: u64,
    pub sessions_total: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_index = index.floor() as usize;
        let upper_index = index.ceil() as usize;
        let lower_value = sorted_data[lower_index] as f64;
        let upper_value = sorted_data[upper_index] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}
