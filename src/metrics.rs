//! Prometheus metrics collection for atriumd.
//!
//! Tracks room lifecycle, voice-event health and reconciler repairs,
//! and serves them on the HTTP `/metrics` endpoint.

use axum::{Router, routing::get};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::net::SocketAddr;

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Room creates requested via spawn-channel entries.
    pub static ref ROOMS_REQUESTED: IntCounter = IntCounter::new(
        "atrium_rooms_requested_total",
        "Room creates requested"
    ).unwrap();

    /// Rooms actually created.
    pub static ref ROOMS_CREATED: IntCounter = IntCounter::new(
        "atrium_rooms_created_total",
        "Rooms created"
    ).unwrap();

    /// Empty user rooms deleted.
    pub static ref ROOMS_DELETED: IntCounter = IntCounter::new(
        "atrium_rooms_deleted_total",
        "Empty rooms deleted"
    ).unwrap();

    /// Voice transitions whose handling failed.
    pub static ref VOICE_ERRORS: IntCounter = IntCounter::new(
        "atrium_voice_errors_total",
        "Failed voice transitions"
    ).unwrap();

    /// Per-user force resyncs triggered by repeated failures.
    pub static ref FORCE_RESYNCS: IntCounter = IntCounter::new(
        "atrium_force_resyncs_total",
        "Force resyncs run"
    ).unwrap();

    /// Sessions opened or closed by the reconciler.
    pub static ref SESSIONS_REPAIRED: IntCounter = IntCounter::new(
        "atrium_sessions_repaired_total",
        "Sessions repaired by the reconciler"
    ).unwrap();

    /// Command refusals from the per-user rate limiter.
    pub static ref RATE_LIMITED: IntCounter = IntCounter::new(
        "atrium_rate_limited_total",
        "Rate limit refusals"
    ).unwrap();

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// User rooms currently alive.
    pub static ref ACTIVE_ROOMS: IntGauge = IntGauge::new(
        "atrium_active_rooms",
        "Active user rooms"
    ).unwrap();

    /// Sessions currently open.
    pub static ref OPEN_SESSIONS: IntGauge = IntGauge::new(
        "atrium_open_sessions",
        "Open voice sessions"
    ).unwrap();
}

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    REGISTRY
        .register(Box::new(ROOMS_REQUESTED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ROOMS_CREATED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ROOMS_DELETED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(VOICE_ERRORS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(FORCE_RESYNCS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SESSIONS_REPAIRED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RATE_LIMITED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ACTIVE_ROOMS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(OPEN_SESSIONS.clone()))
        .unwrap();
}

/// Gather all metrics and encode them in Prometheus text format.
///
/// Returns a string suitable for HTTP response on `/metrics` endpoint.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Serve `/metrics` for Prometheus scraping.
///
/// Binds to `0.0.0.0:port`; a long-running task spawned from startup.
pub async fn serve(port: u16) {
    let app = Router::new().route("/metrics", get(|| async { gather_metrics() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(addr = %addr, "Prometheus HTTP server listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind metrics endpoint");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Metrics endpoint error");
    }
}
