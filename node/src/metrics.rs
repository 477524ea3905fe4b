//! # Prometheus Metrics
//!
//! Ledger throughput and rejection metrics, scraped at `/metrics` on the
//! metrics port. Everything lives in a dedicated registry with the
//! `capvault_` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metric handles shared by every request handler.
pub struct NodeMetrics {
    registry: Registry,
    /// Committed deposits.
    pub deposits_total: IntCounter,
    /// Committed withdrawals.
    pub withdrawals_total: IntCounter,
    /// Rejected operations, labelled by error kind.
    pub rejected_operations_total: IntCounterVec,
    /// Current sum of all balances.
    pub total_deposited: IntGauge,
    /// Time spent holding the ledger lock per operation, persistence included.
    pub operation_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("capvault".into()), None)
            .expect("failed to create prometheus registry");

        let deposits_total = IntCounter::new("deposits_total", "Committed deposits")
            .expect("metric creation");
        registry
            .register(Box::new(deposits_total.clone()))
            .expect("metric registration");

        let withdrawals_total = IntCounter::new("withdrawals_total", "Committed withdrawals")
            .expect("metric creation");
        registry
            .register(Box::new(withdrawals_total.clone()))
            .expect("metric registration");

        let rejected_operations_total = IntCounterVec::new(
            Opts::new(
                "rejected_operations_total",
                "Operations rejected by the ledger or the host",
            ),
            &["reason"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(rejected_operations_total.clone()))
            .expect("metric registration");

        let total_deposited = IntGauge::new("total_deposited", "Sum of all account balances")
            .expect("metric creation");
        registry
            .register(Box::new(total_deposited.clone()))
            .expect("metric registration");

        let operation_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Deposit and withdrawal latency in seconds, persistence included",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            deposits_total,
            withdrawals_total,
            rejected_operations_total,
            total_deposited,
            operation_latency_seconds,
        }
    }

    /// Records a rejected operation under its error kind.
    pub fn reject(&self, reason: &str) {
        self.rejected_operations_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Sets the `total_deposited` gauge. Values beyond `i64::MAX` saturate.
    pub fn set_total_deposited(&self, total: u64) {
        self.total_deposited
            .set(i64::try_from(total).unwrap_or(i64::MAX));
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_prefixed_metrics() {
        let metrics = NodeMetrics::new();
        metrics.deposits_total.inc();
        metrics.reject("zero_amount");
        metrics.set_total_deposited(42);

        let text = metrics.encode().unwrap();
        assert!(text.contains("capvault_deposits_total 1"));
        assert!(text.contains("capvault_rejected_operations_total{reason=\"zero_amount\"} 1"));
        assert!(text.contains("capvault_total_deposited 42"));
    }

    #[test]
    fn total_gauge_saturates() {
        let metrics = NodeMetrics::new();
        metrics.set_total_deposited(u64::MAX);
        assert_eq!(metrics.total_deposited.get(), i64::MAX);
    }
}
