//! Prometheus metrics for the metrics broadcast service.
//!
//! - Admission metrics (decisions by outcome)
//! - Connection metrics (opened, closed, per-scope gauges, duration)
//! - Router metrics (inbound messages by kind, protocol errors)
//! - Broadcast and sweep metrics

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGaugeVec, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "vista";

lazy_static! {
    // ============================================================================
    // Admission Metrics
    // ============================================================================

    /// Admission decisions by outcome ("accept" or the reject code)
    pub static ref ADMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_admissions_total", METRIC_PREFIX),
        "Admission decisions by outcome",
        &["decision"]
    ).unwrap();

    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Total WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Active connections per scope
    pub static ref CONNECTIONS_BY_SCOPE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_connections_by_scope", METRIC_PREFIX),
        "Active connections per scope",
        &["scope"]
    ).unwrap();

    /// Connection lifetime in seconds
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Router Metrics
    // ============================================================================

    /// Inbound client messages by kind
    pub static ref MESSAGES_ROUTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_routed_total", METRIC_PREFIX),
        "Inbound client messages by kind",
        &["kind"]
    ).unwrap();

    /// Protocol errors by kind (oversize, malformed, unknown_type, desync)
    pub static ref PROTOCOL_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_protocol_errors_total", METRIC_PREFIX),
        "Protocol errors by kind",
        &["kind"]
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    /// Scheduled metric broadcasts delivered
    pub static ref BROADCASTS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcasts_sent_total", METRIC_PREFIX),
        "Scheduled metric broadcasts delivered"
    ).unwrap();

    /// Scheduled broadcasts that failed to send
    pub static ref BROADCAST_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcast_failures_total", METRIC_PREFIX),
        "Scheduled broadcasts that failed to send"
    ).unwrap();

    // ============================================================================
    // Sweep Metrics
    // ============================================================================

    /// Heartbeat frames delivered
    pub static ref HEARTBEATS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeats_sent_total", METRIC_PREFIX),
        "Heartbeat frames delivered"
    ).unwrap();

    /// Heartbeat sweep duration in milliseconds
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat sweep duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    ).unwrap();

    /// Connections evicted by the idle reaper
    pub static ref REAPED_CONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reaped_connections_total", METRIC_PREFIX),
        "Connections evicted by the idle reaper"
    ).unwrap();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper for recording admission decisions
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    pub fn record_accepted() {
        ADMISSIONS_TOTAL.with_label_values(&["accept"]).inc();
    }

    pub fn record_rejected(code: &str) {
        ADMISSIONS_TOTAL.with_label_values(&[code]).inc();
    }
}

/// Helper for recording routed messages and protocol errors
pub struct RouterMetrics;

impl RouterMetrics {
    pub fn record_routed(kind: &str) {
        MESSAGES_ROUTED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_oversize() {
        PROTOCOL_ERRORS_TOTAL.with_label_values(&["oversize"]).inc();
    }

    pub fn record_malformed() {
        PROTOCOL_ERRORS_TOTAL
            .with_label_values(&["malformed"])
            .inc();
    }

    pub fn record_unknown_type() {
        PROTOCOL_ERRORS_TOTAL
            .with_label_values(&["unknown_type"])
            .inc();
    }

    pub fn record_desync() {
        PROTOCOL_ERRORS_TOTAL.with_label_values(&["desync"]).inc();
    }
}

/// Helper for recording broadcast outcomes
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record_sent() {
        BROADCASTS_SENT_TOTAL.inc();
    }

    pub fn record_failure() {
        BROADCAST_FAILURES_TOTAL.inc();
    }
}

/// Helper for recording sweep activity
pub struct SweepMetrics;

impl SweepMetrics {
    pub fn record_heartbeat_round(sent: usize, duration_ms: u64) {
        HEARTBEATS_SENT_TOTAL.inc_by(sent as u64);
        HEARTBEAT_DURATION_MS.observe(duration_ms as f64);
    }

    pub fn record_reaped() {
        REAPED_CONNECTIONS_TOTAL.inc();
    }
}
