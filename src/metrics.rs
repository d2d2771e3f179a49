// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for skopos.
//!
//! All metrics share the namespace prefix `skopos_` and are registered in
//! [`METRICS_REGISTRY`], which the RPC server exposes on `/metrics`.
//!
//! # Metrics Categories
//!
//! - **Health Check Metrics** - Probe outcomes, cycle outcomes and status transitions
//! - **Inventory Metrics** - Number of resolver nodes per status
//! - **Reconciliation Metrics** - Reconciliation runs, DNS writes and purges
//! - **RPC Metrics** - Requests handled by the RPC server
//! - **Tailnet Metrics** - Control-plane requests made by the adapter
//!
//! # Example
//!
//! ```rust,no_run
//! use skopos::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success(std::time::Duration::from_millis(120));
//! ```

use crate::inventory::NodeStatus;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all skopos metrics
const METRICS_NAMESPACE: &str = "skopos";

/// Statuses exported by the inventory gauge, so absent statuses report zero
const NODE_STATUSES: [NodeStatus; 4] = [
    NodeStatus::Unknown,
    NodeStatus::Healthy,
    NodeStatus::Unhealthy,
    NodeStatus::Removed,
];

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Health Check Metrics
// ============================================================================

/// Total number of probes by outcome
///
/// Labels:
/// - `result`: `success`, `offline`, `timeout` or `not_found`
pub static HEALTH_PROBES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_health_probes_total"),
        "Total number of resolver node probes by result",
    );
    let counter = CounterVec::new(opts, &["result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of health check cycles by outcome
///
/// Labels:
/// - `status`: `completed` or `abandoned`
pub static HEALTH_CYCLES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_health_cycles_total"),
        "Total number of health check cycles by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of health check cycles in seconds
pub static HEALTH_CYCLE_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_health_cycle_duration_seconds"),
        "Duration of health check cycles in seconds by status",
    )
    .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]);
    let histogram = HistogramVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of node status transitions
///
/// Labels:
/// - `from`: Previous status
/// - `to`: New status
pub static STATUS_TRANSITIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_status_transitions_total"),
        "Total number of resolver node status transitions",
    );
    let counter = CounterVec::new(opts, &["from", "to"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Inventory Metrics
// ============================================================================

/// Number of resolver nodes per status
///
/// Labels:
/// - `status`: `unknown`, `healthy`, `unhealthy` or `removed`
pub static INVENTORY_NODES: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_inventory_nodes"),
        "Number of resolver nodes in the inventory by status",
    );
    let gauge = GaugeVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliation runs by outcome
///
/// Labels:
/// - `status`: `success` or `error`
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliation runs by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliation runs in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliation runs in seconds by status",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]);
    let histogram = HistogramVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of nameserver writes attempted
///
/// Labels:
/// - `status`: `success` or `error`
pub static DNS_WRITES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_dns_writes_total"),
        "Total number of tailnet nameserver writes by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of removed nodes purged from the inventory
pub static NODES_PURGED_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    let counter = Counter::new(
        format!("{METRICS_NAMESPACE}_nodes_purged_total"),
        "Total number of removed resolver nodes purged from the inventory",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// RPC Metrics
// ============================================================================

/// Total number of RPC requests
///
/// Labels:
/// - `method`: RPC method name
/// - `status`: `ok`, `invalid` or `failed`
pub static RPC_REQUESTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_rpc_requests_total"),
        "Total number of RPC requests by method and status",
    );
    let counter = CounterVec::new(opts, &["method", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Tailnet Metrics
// ============================================================================

/// Total number of control-plane requests by operation and outcome
///
/// Labels:
/// - `operation`: Adapter operation
/// - `status`: `success`, `retry` or `failure`
pub static TAILNET_REQUESTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_tailnet_requests_total"),
        "Total number of tailnet control-plane requests by operation and status",
    );
    let counter = CounterVec::new(opts, &["operation", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Latency of successful control-plane requests in seconds
pub static TAILNET_REQUEST_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_tailnet_request_duration_seconds"),
        "Latency of successful tailnet control-plane requests by operation",
    )
    .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]);
    let histogram = HistogramVec::new(opts, &["operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of adapter events dropped because the observer lagged
pub static TAILNET_EVENTS_DROPPED_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    let counter = Counter::new(
        format!("{METRICS_NAMESPACE}_tailnet_events_dropped_total"),
        "Total number of tailnet adapter events dropped by a lagging observer",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record the outcome of a single probe
pub fn record_health_probe(result: &str) {
    HEALTH_PROBES_TOTAL.with_label_values(&[result]).inc();
}

/// Record a health check cycle that ran to completion
pub fn record_health_cycle_completed(duration: Duration) {
    HEALTH_CYCLES_TOTAL.with_label_values(&["completed"]).inc();
    HEALTH_CYCLE_DURATION_SECONDS
        .with_label_values(&["completed"])
        .observe(duration.as_secs_f64());
}

/// Record a health check cycle abandoned because of an adapter failure
pub fn record_health_cycle_abandoned(duration: Duration) {
    HEALTH_CYCLES_TOTAL.with_label_values(&["abandoned"]).inc();
    HEALTH_CYCLE_DURATION_SECONDS
        .with_label_values(&["abandoned"])
        .observe(duration.as_secs_f64());
}

/// Record a node status transition
pub fn record_status_transition(from: NodeStatus, to: NodeStatus) {
    STATUS_TRANSITIONS_TOTAL
        .with_label_values(&[from.as_str(), to.as_str()])
        .inc();
}

/// Publish the number of nodes per status
///
/// Every status is set, so a status whose last node left drops to zero.
pub fn set_inventory_nodes(counts: &BTreeMap<NodeStatus, usize>) {
    for status in NODE_STATUSES {
        #[allow(clippy::cast_precision_loss)]
        let count = counts.get(&status).copied().unwrap_or(0) as f64;
        INVENTORY_NODES
            .with_label_values(&[status.as_str()])
            .set(count);
    }
}

/// Record a successful reconciliation run
pub fn record_reconciliation_success(duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&["success"]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&["success"])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation run
pub fn record_reconciliation_error(duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&["error"]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&["error"])
        .observe(duration.as_secs_f64());
}

/// Record a nameserver write attempt
pub fn record_dns_write(success: bool) {
    let status = if success { "success" } else { "error" };
    DNS_WRITES_TOTAL.with_label_values(&[status]).inc();
}

/// Record a node purged from the inventory
pub fn record_node_purged() {
    NODES_PURGED_TOTAL.inc();
}

/// Record an RPC request
pub fn record_rpc_request(method: &str, status: &str) {
    RPC_REQUESTS_TOTAL.with_label_values(&[method, status]).inc();
}

/// Record a successful control-plane request
pub fn record_tailnet_request_success(operation: &str, duration: Duration) {
    TAILNET_REQUESTS_TOTAL
        .with_label_values(&[operation, "success"])
        .inc();
    TAILNET_REQUEST_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record a control-plane request being retried
pub fn record_tailnet_request_retry(operation: &str) {
    TAILNET_REQUESTS_TOTAL
        .with_label_values(&[operation, "retry"])
        .inc();
}

/// Record a control-plane request that failed for good
pub fn record_tailnet_request_failure(operation: &str) {
    TAILNET_REQUESTS_TOTAL
        .with_label_values(&[operation, "failure"])
        .inc();
}

/// Record adapter events lost by a lagging observer
pub fn record_tailnet_events_dropped(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    let count = count as f64;
    TAILNET_EVENTS_DROPPED_TOTAL.inc_by(count);
}

/// Gather all metrics in Prometheus text format
///
/// # Errors
///
/// Returns an error if metrics encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
