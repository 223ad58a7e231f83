//! Controller metrics

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Ingress reconciliation duration
    static ref INGRESS_RECONCILIATION_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "netgate_ingress_reconciliation_duration_seconds",
            "Ingress reconciliation duration in seconds",
        );
        let histogram = HistogramVec::new(opts, &["namespace"])
            .expect("Failed to create histogram");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Ingress reconciliations total, by outcome
    static ref INGRESS_RECONCILIATIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "netgate_ingress_reconciliations_total",
            "Total number of ingress reconciliations",
        );
        let counter = IntCounterVec::new(opts, &["namespace", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Child resource writes, by kind and verb
    static ref CHILD_WRITES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "netgate_child_writes_total",
            "Total number of child resource writes",
        );
        let counter = IntCounterVec::new(opts, &["kind", "verb", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Gateway configuration reloads
    static ref CONFIG_RELOADS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "netgate_config_reloads_total",
            "Total number of gateway configuration reloads",
        );
        let counter = IntCounterVec::new(opts, &["result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Owner keys currently tracked by the child index
    static ref CHILD_INDEX_OWNERS: IntGauge = {
        let gauge = IntGauge::new(
            "netgate_child_index_owners",
            "Number of Ingresses with children in the index",
        )
        .expect("Failed to create gauge");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(gauge.clone()))
            .expect("Failed to register gauge");
        gauge
    };
}

/// Record Ingress reconciliation
///
/// Labelled by namespace only; per-object labels would grow without bound.
pub fn record_ingress_reconciliation(namespace: &str, duration_secs: f64, result: &str) {
    INGRESS_RECONCILIATION_DURATION
        .with_label_values(&[namespace])
        .observe(duration_secs);

    INGRESS_RECONCILIATIONS_TOTAL
        .with_label_values(&[namespace, result])
        .inc();
}

/// Record one create/update/delete of a child resource
pub fn record_child_write(kind: &str, verb: &str, result: &str) {
    CHILD_WRITES_TOTAL
        .with_label_values(&[kind, verb, result])
        .inc();
}

/// Record a configuration reload attempt
pub fn record_config_reload(result: &str) {
    CONFIG_RELOADS_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_child_index_owners(count: usize) {
    CHILD_INDEX_OWNERS.set(count as i64);
}

/// Gather controller metrics
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}
