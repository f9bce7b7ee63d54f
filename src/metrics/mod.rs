//! Prometheus metrics for synchronization, crawling and the message bridge
//!
//! This module provides metrics tracking for:
//! - Sync: completed and skipped runs, run duration, per-domain failures
//! - Crawler: folder pages fetched, isolated unit failures, portal responses
//! - Bridge: pending correlated requests, timeouts, booking attempts
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, or it is never called, metrics operations are no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for sync orchestrator metrics
struct SyncMetrics {
    completed: Counter,
    skipped: Counter,
    duration: Histogram,
    domain_failures: CounterVec,
}

/// Container for crawler and portal metrics
struct CrawlMetrics {
    pages_fetched: Counter,
    unit_failures: Counter,
    portal_requests: CounterVec,
}

/// Container for bridge and booking metrics
struct BridgeMetrics {
    pending_requests: Gauge,
    timeouts: CounterVec,
    booking_attempts: CounterVec,
}

static SYNC_METRICS: OnceLock<SyncMetrics> = OnceLock::new();

static CRAWL_METRICS: OnceLock<CrawlMetrics> = OnceLock::new();

static BRIDGE_METRICS: OnceLock<BridgeMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup. Subsequent
/// calls return `Ok(())` without registering anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = reis_sync::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let sync = SyncMetrics {
        completed: register_counter!("reis_sync_completed_total", "Total completed sync runs")?,
        skipped: register_counter!(
            "reis_sync_skipped_total",
            "Sync triggers ignored because a run was in flight"
        )?,
        duration: register_histogram!(
            "reis_sync_duration_seconds",
            "Duration of a full sync run in seconds",
            vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
        )?,
        domain_failures: register_counter_vec!(
            "reis_sync_domain_failures_total",
            "Failed domain fetches by domain",
            &["domain"]
        )?,
    };

    let crawl = CrawlMetrics {
        pages_fetched: register_counter!(
            "reis_crawler_pages_fetched_total",
            "Folder listing pages fetched"
        )?,
        unit_failures: register_counter!(
            "reis_crawler_unit_failures_total",
            "Pages, subfolders or subject workloads that failed and were skipped"
        )?,
        portal_requests: register_counter_vec!(
            "reis_portal_requests_total",
            "Portal HTTP responses by status",
            &["status"]
        )?,
    };

    let bridge = BridgeMetrics {
        pending_requests: register_gauge!(
            "reis_bridge_pending_requests",
            "Correlated requests awaiting a response"
        )?,
        timeouts: register_counter_vec!(
            "reis_bridge_timeouts_total",
            "Correlated requests that timed out by kind",
            &["kind"]
        )?,
        booking_attempts: register_counter_vec!(
            "reis_booking_attempts_total",
            "Automatic registration attempts by outcome",
            &["outcome"]
        )?,
    };

    SYNC_METRICS.set(sync).ok();
    CRAWL_METRICS.set(crawl).ok();
    BRIDGE_METRICS.set(bridge).ok();

    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SYNC_METRICS.get().is_some() && CRAWL_METRICS.get().is_some() && BRIDGE_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Sync
// ============================================================================

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start timing a sync run
pub fn start_sync_timer() -> MetricsTimer {
    match SYNC_METRICS.get() {
        Some(m) => MetricsTimer::new(m.duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

pub fn record_sync_completed() {
    if let Some(m) = SYNC_METRICS.get() {
        m.completed.inc();
    }
}

pub fn record_sync_skipped() {
    if let Some(m) = SYNC_METRICS.get() {
        m.skipped.inc();
    }
}

/// Record a failed Phase 1 domain fetch
pub fn record_domain_failure(domain: &str) {
    if let Some(m) = SYNC_METRICS.get() {
        m.domain_failures.with_label_values(&[domain]).inc();
    }
}

// ============================================================================
// Crawler
// ============================================================================

pub fn record_pages_fetched(count: usize) {
    if let Some(m) = CRAWL_METRICS.get() {
        m.pages_fetched.inc_by(count as f64);
    }
}

/// Record a unit of work that failed and degraded to an empty result
pub fn record_crawl_unit_failure() {
    if let Some(m) = CRAWL_METRICS.get() {
        m.unit_failures.inc();
    }
}

pub fn record_portal_request(status: u16) {
    if let Some(m) = CRAWL_METRICS.get() {
        m.portal_requests
            .with_label_values(&[&status.to_string()])
            .inc();
    }
}

// ============================================================================
// Bridge
// ============================================================================

pub fn set_pending_requests(count: usize) {
    if let Some(m) = BRIDGE_METRICS.get() {
        m.pending_requests.set(count as f64);
    }
}

pub fn record_transport_timeout(kind: &str) {
    if let Some(m) = BRIDGE_METRICS.get() {
        m.timeouts.with_label_values(&[kind]).inc();
    }
}

pub fn record_booking_fired(success: bool) {
    if let Some(m) = BRIDGE_METRICS.get() {
        let outcome = if success { "success" } else { "failure" };
        m.booking_attempts.with_label_values(&[outcome]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
