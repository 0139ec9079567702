//! Thread-safe metrics collection system
//!
//! Provides atomic counters for tracking broker connection, publish and
//! delivery statistics across every session in the process.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Publish latencies kept for statistics
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // Connection metrics
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connection_start_time: AtomicU64,

    // Send path
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    publish_latencies: Mutex<Vec<u64>>, // in milliseconds

    // Receive path
    messages_received: AtomicU64,
    decode_failures: AtomicU64,
    duplicates_suppressed: AtomicU64,
    backpressure_events: AtomicU64,

    // Sessions
    sessions_configured: AtomicU64,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            publish_latencies: Mutex::new(Vec::new()),
            messages_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            duplicates_suppressed: AtomicU64::new(0),
            backpressure_events: AtomicU64::new(0),
            sessions_configured: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection metrics
    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Track the live/closed transition of the broker session
    pub fn set_connected(&self, connected: bool) {
        let was_connected = self.connected.swap(connected, Ordering::Relaxed);
        if connected && !was_connected {
            self.connections_established.fetch_add(1, Ordering::Relaxed);
            self.connection_start_time
                .store(current_timestamp(), Ordering::Relaxed);
        } else if !connected {
            self.connection_start_time.store(0, Ordering::Relaxed);
        }
    }

    // Send path
    pub fn record_message_published(&self, latency: Duration) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut latencies) = self.publish_latencies.lock() {
            latencies.push(latency.as_millis() as u64);

            // Keep the most recent samples only
            if latencies.len() > MAX_LATENCY_SAMPLES {
                latencies.remove(0);
            }
        }
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Receive path
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_suppressed(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure(&self) {
        self.backpressure_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_configured(&self) {
        self.sessions_configured.fetch_add(1, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connection_start_time,
            &self.messages_published,
            &self.publish_failures,
            &self.messages_received,
            &self.decode_failures,
            &self.duplicates_suppressed,
            &self.backpressure_events,
            &self.sessions_configured,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut latencies) = self.publish_latencies.lock() {
            latencies.clear();
        }
    }

    /// Calculate publish latency statistics (pure function)
    fn publish_latency_statistics(&self) -> (f64, f64, f64) {
        let Ok(latencies) = self.publish_latencies.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if latencies.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }

    /// Calculate connection duration (pure function)
    fn connection_duration(&self, now: u64) -> u64 {
        if !self.connected.load(Ordering::Relaxed) {
            return 0;
        }
        match self.connection_start_time.load(Ordering::Relaxed) {
            0 => 0,
            start => now.saturating_sub(start),
        }
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_publish_latency_ms, publish_latency_p50_ms, publish_latency_p95_ms) =
            self.publish_latency_statistics();

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connection_duration_seconds: self.connection_duration(now),
            },
            messages: MessageMetrics {
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                avg_publish_latency_ms,
                publish_latency_p50_ms,
                publish_latency_p95_ms,
                messages_received: self.messages_received.load(Ordering::Relaxed),
                decode_failures: self.decode_failures.load(Ordering::Relaxed),
                duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
                backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
            },
            sessions_configured: self.sessions_configured.load(Ordering::Relaxed),
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
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub sessions_configured: u64,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageMetrics {
    pub messages_published: u64,
    pub publish_failures: u64,
    pub avg_publish_latency_ms: f64,
    pub publish_latency_p50_ms: f64,
    pub publish_latency_p95_ms: f64,
    pub messages_received: u64,
    pub decode_failures: u64,
    pub duplicates_suppressed: u64,
    pub backpressure_events: u64,
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_connection_metrics() {
        let collector = MetricsCollector::new();

        collector.record_connection_attempt();
        collector.set_connected(true);
        collector.set_connected(true);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.connection.connection_attempts, 1);
        assert_eq!(snapshot.connection.connections_established, 1);
        assert!(snapshot.connection.connected);

        collector.set_connected(false);
        assert!(!collector.snapshot().connection.connected);
    }

    #[test]
    fn test_message_metrics() {
        let collector = MetricsCollector::new();

        collector.record_message_published(Duration::from_millis(20));
        collector.record_message_published(Duration::from_millis(40));
        collector.record_publish_failure();
        collector.record_message_received();
        collector.record_decode_failure();
        collector.record_duplicate_suppressed();
        collector.record_backpressure();

        let messages = collector.snapshot().messages;
        assert_eq!(messages.messages_published, 2);
        assert_eq!(messages.publish_failures, 1);
        assert!((messages.avg_publish_latency_ms - 30.0).abs() < 0.1);
        assert_eq!(messages.messages_received, 1);
        assert_eq!(messages.decode_failures, 1);
        assert_eq!(messages.duplicates_suppressed, 1);
        assert_eq!(messages.backpressure_events, 1);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.record_message_received();
                        collector.record_message_published(Duration::from_millis(1));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let messages = collector.snapshot().messages;
        assert_eq!(messages.messages_received, 1000);
        assert_eq!(messages.messages_published, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        let p50 = percentile(&data, 50.0);
        let p95 = percentile(&data, 95.0);

        assert!((p50 - 5.5).abs() < 0.1, "P50: expected ~5.5, got {p50}");
        assert!((p95 - 9.5).abs() < 0.1, "P95: expected ~9.5, got {p95}");
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_latency_samples_are_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..1500 {
            collector.record_message_published(Duration::from_millis(i));
        }
        let len = collector.publish_latencies.lock().unwrap().len();
        assert_eq!(len, MAX_LATENCY_SAMPLES);
    }

    #[test]
    fn test_snapshot_serializes() {
        let collector = MetricsCollector::new();
        collector.record_session_configured();
        let json = serde_json::to_value(collector.snapshot()).unwrap();
        assert_eq!(json["sessions_configured"], 1);
        assert_eq!(json["messages"]["decode_failures"], 0);
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();
        collector.record_message_received();
        collector.set_connected(true);

        collector.reset();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.messages.messages_received, 0);
        assert!(!snapshot.connection.connected);
    }
}
