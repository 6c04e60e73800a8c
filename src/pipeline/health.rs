//! Health monitoring and metrics for the receiver

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Receiver-wide counters
///
/// Shared by the session, every substream and every decoder pump. All
/// fields use relaxed atomics; readers only ever need a rough picture.
pub struct ReceiverHealth {
    /// TRTP fragments accepted off the wire
    pub fragments_received: AtomicU64,

    /// Fragments discarded (malformed, mismatched, gated, rejected)
    pub fragments_dropped: AtomicU64,

    /// Fragments carrying more bytes than their access unit declared
    pub anomalies: AtomicU64,

    /// Datagrams that were not valid RTP
    pub network_errors: AtomicU64,

    /// Sequence gaps seen on any substream
    pub sequence_gaps: AtomicU64,

    /// Access units fully reassembled and queued for decode
    pub units_completed: AtomicU64,

    pub bytes_completed: AtomicU64,

    /// Substream format changes (pump torn down and rebuilt)
    pub format_changes: AtomicU64,

    pub decode_failures: AtomicU64,

    pub buffers_rendered: AtomicU64,

    pub bytes_rendered: AtomicU64,

    /// Decoded buffers the render sink could not take
    pub render_drops: AtomicU64,

    /// Pumps that went terminal
    pub fatal_errors: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last accepted fragment
    pub last_fragment_time: AtomicU64,
}

impl ReceiverHealth {
    pub fn new() -> Self {
        Self {
            fragments_received: AtomicU64::new(0),
            fragments_dropped: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            network_errors: AtomicU64::new(0),
            sequence_gaps: AtomicU64::new(0),
            units_completed: AtomicU64::new(0),
            bytes_completed: AtomicU64::new(0),
            format_changes: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            buffers_rendered: AtomicU64::new(0),
            bytes_rendered: AtomicU64::new(0),
            render_drops: AtomicU64::new(0),
            fatal_errors: AtomicU64::new(0),
            last_fragment_time: AtomicU64::new(now_micros()),
        }
    }

    pub fn record_fragment(&self) {
        self.last_fragment_time.store(now_micros(), Ordering::Relaxed);
        self.fragments_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fragment_drop(&self) {
        self.fragments_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sequence_gap(&self) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit(&self, size: usize) {
        self.units_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_completed
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_format_change(&self) {
        self.format_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render(&self, size: usize) {
        self.buffers_rendered.fetch_add(1, Ordering::Relaxed);
        self.bytes_rendered
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_render_drop(&self) {
        self.render_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fatal(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fragments_received(&self) -> u64 {
        self.fragments_received.load(Ordering::Relaxed)
    }

    pub fn fragments_dropped(&self) -> u64 {
        self.fragments_dropped.load(Ordering::Relaxed)
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    pub fn network_errors(&self) -> u64 {
        self.network_errors.load(Ordering::Relaxed)
    }

    pub fn sequence_gaps(&self) -> u64 {
        self.sequence_gaps.load(Ordering::Relaxed)
    }

    pub fn units_completed(&self) -> u64 {
        self.units_completed.load(Ordering::Relaxed)
    }

    pub fn bytes_completed(&self) -> u64 {
        self.bytes_completed.load(Ordering::Relaxed)
    }

    pub fn format_changes(&self) -> u64 {
        self.format_changes.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn buffers_rendered(&self) -> u64 {
        self.buffers_rendered.load(Ordering::Relaxed)
    }

    pub fn bytes_rendered(&self) -> u64 {
        self.bytes_rendered.load(Ordering::Relaxed)
    }

    pub fn render_drops(&self) -> u64 {
        self.render_drops.load(Ordering::Relaxed)
    }

    pub fn fatal_errors(&self) -> u64 {
        self.fatal_errors.load(Ordering::Relaxed)
    }

    /// Get the timestamp of the last fragment (Unix microseconds)
    pub fn last_fragment_time(&self) -> u64 {
        self.last_fragment_time.load(Ordering::Relaxed)
    }

    /// Dropped fragments as a percentage of those received
    pub fn fragment_drop_rate(&self) -> f64 {
        let drops = self.fragments_dropped();
        let received = self.fragments_received();
        if received == 0 {
            return 0.0;
        }
        (drops as f64 / received as f64) * 100.0
    }

    /// Check if the receiver has stalled (no fragments for given duration)
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let elapsed_micros = now_micros().saturating_sub(self.last_fragment_time());
        elapsed_micros > threshold.as_micros() as u64
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            fragments_received: self.fragments_received(),
            fragments_dropped: self.fragments_dropped(),
            fragment_drop_rate: self.fragment_drop_rate(),
            anomalies: self.anomalies(),
            sequence_gaps: self.sequence_gaps(),
            units_completed: self.units_completed(),
            decode_failures: self.decode_failures(),
            buffers_rendered: self.buffers_rendered(),
            bytes_rendered: self.bytes_rendered(),
            fatal_errors: self.fatal_errors(),
        }
    }
}

impl Default for ReceiverHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub fragments_received: u64,
    pub fragments_dropped: u64,
    pub fragment_drop_rate: f64,
    pub anomalies: u64,
    pub sequence_gaps: u64,
    pub units_completed: u64,
    pub decode_failures: u64,
    pub buffers_rendered: u64,
    pub bytes_rendered: u64,
    pub fatal_errors: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} fragments ({} dropped, {:.2}%, {} anomalies, {} gaps), {} units, {} decode failures, {} buffers rendered ({} bytes), {} fatal",
            self.fragments_received,
            self.fragments_dropped,
            self.fragment_drop_rate,
            self.anomalies,
            self.sequence_gaps,
            self.units_completed,
            self.decode_failures,
            self.buffers_rendered,
            self.bytes_rendered,
            self.fatal_errors
        )
    }
}

/// Health alert types
#[derive(Debug, Clone, PartialEq)]
pub enum HealthAlert {
    /// No fragments for the threshold duration
    Stalled { duration: Duration },

    HighDropRate { rate: f64 },

    /// New decode failures since the last check
    DecodeFailures { count: u64 },

    /// New pumps gone terminal since the last check
    FatalErrors { count: u64 },
}

impl std::fmt::Display for HealthAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthAlert::Stalled { duration } => {
                write!(f, "Receiver stalled for {:?}", duration)
            }
            HealthAlert::HighDropRate { rate } => {
                write!(f, "High fragment drop rate: {:.2}%", rate)
            }
            HealthAlert::DecodeFailures { count } => {
                write!(f, "Decode failures: {}", count)
            }
            HealthAlert::FatalErrors { count } => {
                write!(f, "Decoder pumps failed: {}", count)
            }
        }
    }
}

/// Health monitoring service
///
/// Periodically checks receiver health and sends alerts when issues are detected.
pub struct HealthMonitor {
    health: Arc<ReceiverHealth>,
    alert_tx: mpsc::Sender<HealthAlert>,
    check_interval: Duration,
    stall_threshold: Duration,
    drop_rate_threshold: f64,
}

/// Counters carried between two health checks
#[derive(Debug, Default)]
struct CheckState {
    decode_failures: u64,
    fatal_errors: u64,
}

impl HealthMonitor {
    pub fn new(health: Arc<ReceiverHealth>, alert_tx: mpsc::Sender<HealthAlert>) -> Self {
        Self {
            health,
            alert_tx,
            check_interval: Duration::from_secs(5),
            stall_threshold: Duration::from_secs(5),
            drop_rate_threshold: 10.0,
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    pub fn with_drop_rate_threshold(mut self, threshold: f64) -> Self {
        self.drop_rate_threshold = threshold;
        self
    }

    fn check(&self, state: &mut CheckState) -> Vec<HealthAlert> {
        let mut alerts = Vec::new();

        if self.health.is_stalled(self.stall_threshold) {
            alerts.push(HealthAlert::Stalled {
                duration: self.stall_threshold,
            });
        }

        let drop_rate = self.health.fragment_drop_rate();
        if drop_rate > self.drop_rate_threshold {
            alerts.push(HealthAlert::HighDropRate { rate: drop_rate });
        }

        let decode_failures = self.health.decode_failures();
        if decode_failures > state.decode_failures {
            alerts.push(HealthAlert::DecodeFailures {
                count: decode_failures - state.decode_failures,
            });
            state.decode_failures = decode_failures;
        }

        let fatal_errors = self.health.fatal_errors();
        if fatal_errors > state.fatal_errors {
            alerts.push(HealthAlert::FatalErrors {
                count: fatal_errors - state.fatal_errors,
            });
            state.fatal_errors = fatal_errors;
        }

        alerts
    }

    /// Run the health monitor until the alert receiver goes away
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.check_interval);
        let mut state = CheckState::default();

        loop {
            interval.tick().await;
            for alert in self.check(&mut state) {
                if self.alert_tx.send(alert).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = ReceiverHealth::new();

        health.record_fragment();
        health.record_fragment();
        health.record_fragment();
        health.record_fragment();
        health.record_unit(1000);
        health.record_unit(500);
        health.record_render(4096);

        assert_eq!(health.fragments_received(), 4);
        assert_eq!(health.units_completed(), 2);
        assert_eq!(health.bytes_completed(), 1500);
        assert_eq!(health.bytes_rendered(), 4096);
        assert_eq!(health.fragment_drop_rate(), 0.0);

        health.record_fragment_drop();
        assert_eq!(health.fragments_dropped(), 1);
        assert_eq!(health.fragment_drop_rate(), 25.0);
    }

    #[test]
    fn test_stall_detection() {
        let health = ReceiverHealth::new();
        assert!(!health.is_stalled(Duration::from_secs(1)));

        health.record_fragment();
        std::thread::sleep(Duration::from_millis(150));
        assert!(health.is_stalled(Duration::from_millis(100)));
    }

    #[test]
    fn test_monitor_reports_new_failures_once() {
        let health = Arc::new(ReceiverHealth::new());
        let (tx, _rx) = mpsc::channel(8);
        let monitor = HealthMonitor::new(Arc::clone(&health), tx)
            .with_stall_threshold(Duration::from_secs(3600));
        let mut state = CheckState::default();

        assert!(monitor.check(&mut state).is_empty());

        health.record_decode_failure();
        health.record_decode_failure();
        health.record_fatal();
        assert_eq!(
            monitor.check(&mut state),
            vec![
                HealthAlert::DecodeFailures { count: 2 },
                HealthAlert::FatalErrors { count: 1 }
            ]
        );
        assert!(monitor.check(&mut state).is_empty());
    }

    #[test]
    fn test_monitor_drop_rate() {
        let health = Arc::new(ReceiverHealth::new());
        let (tx, _rx) = mpsc::channel(8);
        let monitor = HealthMonitor::new(Arc::clone(&health), tx)
            .with_stall_threshold(Duration::from_secs(3600))
            .with_drop_rate_threshold(40.0);
        let mut state = CheckState::default();

        health.record_fragment();
        health.record_fragment();
        health.record_fragment_drop();
        assert_eq!(
            monitor.check(&mut state),
            vec![HealthAlert::HighDropRate { rate: 50.0 }]
        );
    }
}
