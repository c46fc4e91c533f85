//! Observability infrastructure for the bandwidth controller
//!
//! Provides:
//! - Prometheus metrics (tick duration, managed pods, contention state, limit actions)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, register_int_gauge_vec,
    Histogram, IntCounter, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for tick duration (in seconds)
const TICK_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ControllerMetricsInner {
    tick_duration_seconds: Histogram,
    managed_pods: IntGaugeVec,
    contention_state: IntGauge,
    low_class_bps: IntGauge,
    throttled_cgroups: IntGauge,
    limits_applied: IntCounter,
    limits_cleared: IntCounter,
    limit_errors: IntCounter,
    discovery_errors: IntCounter,
    resolve_skips: IntCounter,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "drcio_tick_duration_seconds",
                "Time spent running one control loop tick",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            managed_pods: register_int_gauge_vec!(
                "drcio_managed_pods",
                "Number of managed pods on this node by priority class",
                &["class"]
            )
            .expect("Failed to register managed_pods"),

            contention_state: register_int_gauge!(
                "drcio_contention_state",
                "Current contention signal (0=none, 1=building, 2=active)"
            )
            .expect("Failed to register contention_state"),

            low_class_bps: register_int_gauge!(
                "drcio_low_class_bytes_per_second",
                "Smoothed aggregate Low-class throughput"
            )
            .expect("Failed to register low_class_bps"),

            throttled_cgroups: register_int_gauge!(
                "drcio_throttled_cgroups",
                "Number of cgroups with a managed io.max limit in force"
            )
            .expect("Failed to register throttled_cgroups"),

            limits_applied: register_int_counter!(
                "drcio_limits_applied_total",
                "Total number of io.max limits written"
            )
            .expect("Failed to register limits_applied"),

            limits_cleared: register_int_counter!(
                "drcio_limits_cleared_total",
                "Total number of io.max limits removed"
            )
            .expect("Failed to register limits_cleared"),

            limit_errors: register_int_counter!(
                "drcio_limit_errors_total",
                "Total number of failed io.max operations"
            )
            .expect("Failed to register limit_errors"),

            discovery_errors: register_int_counter!(
                "drcio_discovery_errors_total",
                "Total number of failed pod discovery refreshes"
            )
            .expect("Failed to register discovery_errors"),

            resolve_skips: register_int_counter!(
                "drcio_resolve_skips_total",
                "Containers skipped because no cgroup was found"
            )
            .expect("Failed to register resolve_skips"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record a tick duration observation
    pub fn observe_tick_duration(&self, duration_secs: f64) {
        self.inner().tick_duration_seconds.observe(duration_secs);
    }

    /// Update managed pod counts per priority class
    pub fn set_managed_pods(&self, high: i64, low: i64) {
        self.inner().managed_pods.with_label_values(&["high"]).set(high);
        self.inner().managed_pods.with_label_values(&["low"]).set(low);
    }

    /// Update the contention state gauge
    pub fn set_contention_state(&self, state: i64) {
        self.inner().contention_state.set(state);
    }

    /// Update the smoothed Low-class throughput gauge
    pub fn set_low_class_bps(&self, bps: i64) {
        self.inner().low_class_bps.set(bps);
    }

    /// Update the throttled cgroups gauge
    pub fn set_throttled_cgroups(&self, count: i64) {
        self.inner().throttled_cgroups.set(count);
    }

    /// Increment applied limits counter
    pub fn inc_limits_applied(&self) {
        self.inner().limits_applied.inc();
    }

    /// Increment cleared limits counter
    pub fn inc_limits_cleared(&self) {
        self.inner().limits_cleared.inc();
    }

    /// Increment limit errors counter
    pub fn inc_limit_errors(&self) {
        self.inner().limit_errors.inc();
    }

    /// Increment discovery errors counter
    pub fn inc_discovery_errors(&self) {
        self.inner().discovery_errors.inc();
    }

    /// Increment resolve skips counter
    pub fn inc_resolve_skips(&self) {
        self.inner().resolve_skips.inc();
    }
}

/// Structured logger for controller events
///
/// Provides consistent JSON-formatted logging for limit changes,
/// contention transitions, and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a limit being written to a cgroup
    pub fn log_limit_applied(
        &self,
        container_id: &str,
        pod_name: &str,
        namespace: &str,
        device: &str,
        read_bps: u64,
        write_bps: u64,
    ) {
        info!(
            event = "limit_applied",
            node = %self.node_name,
            container_id = %container_id,
            pod_name = %pod_name,
            namespace = %namespace,
            device = %device,
            read_bps = read_bps,
            write_bps = write_bps,
            "Bandwidth limit applied"
        );
    }

    /// Log a limit being removed from a cgroup
    pub fn log_limit_cleared(&self, container_id: &str, pod_name: &str, device: &str) {
        info!(
            event = "limit_cleared",
            node = %self.node_name,
            container_id = %container_id,
            pod_name = %pod_name,
            device = %device,
            "Bandwidth limit cleared"
        );
    }

    /// Log a contention signal transition
    pub fn log_contention_transition(&self, from: &str, to: &str, smoothed_bps: u64) {
        info!(
            event = "contention_transition",
            node = %self.node_name,
            from = %from,
            to = %to,
            smoothed_bps = smoothed_bps,
            "Contention signal changed"
        );
    }

    /// Log a failed discovery refresh
    pub fn log_discovery_failure(&self, error: &str) {
        warn!(
            event = "discovery_failed",
            node = %self.node_name,
            error = %error,
            "Pod discovery failed, operating on previous snapshot"
        );
    }

    /// Log controller startup
    pub fn log_startup(&self, version: &str, poll_interval_secs: u64) {
        info!(
            event = "controller_started",
            node = %self.node_name,
            controller_version = %version,
            poll_interval_secs = poll_interval_secs,
            "Bandwidth controller started"
        );
    }

    /// Log controller shutdown
    pub fn log_shutdown(&self, reason: &str, limits_cleared: usize) {
        info!(
            event = "controller_shutdown",
            node = %self.node_name,
            reason = %reason,
            limits_cleared = limits_cleared,
            "Bandwidth controller shutting down"
        );
    }
}
