// Prometheus metrics for the upload guard
//
// Exposes metrics on /metrics HTTP endpoint:
// - Upload decisions by outcome (counter)
// - Admin authentication failures (counter)
// - Policy updates (counter)
// - Tracked upload clients (gauge)
// - Evicted idle clients (counter)

use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Enforcement metrics
    pub static ref UPLOAD_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("upload_decisions_total", "Upload attempts evaluated, by outcome"),
        &["outcome"]
    ).expect("Failed to create upload decisions metric");

    pub static ref TRACKED_UPLOAD_CLIENTS: IntGauge = IntGauge::new(
        "tracked_upload_clients",
        "Clients currently holding upload counters"
    ).expect("Failed to create tracked clients metric");

    pub static ref EVICTED_UPLOAD_CLIENTS_TOTAL: IntCounter = IntCounter::new(
        "evicted_upload_clients_total",
        "Idle client records dropped by the eviction sweep"
    ).expect("Failed to create evicted clients metric");

    // Admin metrics
    pub static ref ADMIN_AUTH_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "admin_auth_failures_total",
        "Rejected admin credentials"
    ).expect("Failed to create admin auth failures metric");

    pub static ref POLICY_UPDATES_TOTAL: IntCounter = IntCounter::new(
        "policy_updates_total",
        "Successful upload policy updates"
    ).expect("Failed to create policy updates metric");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init() -> prometheus::Result<()> {
    register(Box::new(UPLOAD_DECISIONS_TOTAL.clone()))?;
    register(Box::new(TRACKED_UPLOAD_CLIENTS.clone()))?;
    register(Box::new(EVICTED_UPLOAD_CLIENTS_TOTAL.clone()))?;
    register(Box::new(ADMIN_AUTH_FAILURES_TOTAL.clone()))?;
    register(Box::new(POLICY_UPDATES_TOTAL.clone()))?;
    Ok(())
}

fn register(collector: Box<dyn Collector>) -> prometheus::Result<()> {
    match REGISTRY.register(collector) {
        Err(prometheus::Error::AlreadyReg) => Ok(()),
        other => other,
    }
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
