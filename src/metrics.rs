//! Prometheus metrics for the slot store
//!
//! Collectors live in a crate-local registry; call [`init_metrics`] once to
//! register them and [`export_metrics`] to render the text format.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("slotdev_operations_total", "Store operations by outcome"),
        &["op", "status"]
    ).expect("valid metric definition");

    pub static ref IO_BYTES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("slotdev_io_bytes_total", "Caller bytes transferred"),
        &["direction"]
    ).expect("valid metric definition");

    pub static ref BLOCK_OPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("slotdev_block_ops_total", "Physical block writes by coverage"),
        &["kind"]
    ).expect("valid metric definition");

    pub static ref FREE_SLOTS: IntGauge = IntGauge::new(
        "slotdev_free_slots",
        "Slots currently in the free list"
    ).expect("valid metric definition");

    pub static ref ASSIGNED_SLOTS: IntGauge = IntGauge::new(
        "slotdev_assigned_slots",
        "Slots currently bound to a key"
    ).expect("valid metric definition");
}

/// Initialize metrics registry
pub fn init_metrics() {
    info!("Initializing Prometheus metrics");

    METRICS_REGISTRY.register(Box::new(OPERATIONS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(IO_BYTES_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(BLOCK_OPS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(FREE_SLOTS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(ASSIGNED_SLOTS.clone())).ok();
}

/// Count one store operation
pub fn record_operation(op: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    OPERATIONS_TOTAL.with_label_values(&[op, status]).inc();
}

/// Count bytes moved for a caller
pub fn record_bytes(direction: &str, bytes: usize) {
    IO_BYTES_TOTAL
        .with_label_values(&[direction])
        .inc_by(bytes as u64);
}

/// Count one physical block write (`full` or `rmw`)
pub fn record_block_op(kind: &str) {
    BLOCK_OPS_TOTAL.with_label_values(&[kind]).inc();
}

/// Publish slot occupancy
pub fn update_slot_gauges(assigned: usize, free: usize) {
    ASSIGNED_SLOTS.set(assigned as i64);
    FREE_SLOTS.set(free as i64);
}

/// Export metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
