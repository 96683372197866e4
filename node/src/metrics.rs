//! # Prometheus Metrics
//!
//! Operational metrics for the ledger node, scraped by Prometheus at
//! `/metrics` on the configured metrics listener.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] under
//! the `bank` namespace so they do not collide with the default global
//! registry.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use bank_ledger::{LedgerError, SettlementReport};

/// Metric handles for the node. Cheap to clone; every handle is an `Arc`
/// internally.
#[derive(Clone)]
pub struct LedgerMetrics {
    registry: Registry,
    /// Accounts opened through the API.
    pub accounts_opened_total: IntCounter,
    /// Customer transfers committed.
    pub transfers_total: IntCounter,
    /// Rejected requests by operation and error kind.
    pub rejections_total: IntCounterVec,
    /// Committed ATM cash movements by direction and by whether a customer
    /// account was involved.
    pub atm_operations_total: IntCounterVec,
    /// Transactions the store flipped to applied during settlement.
    pub settled_total: IntCounter,
    /// Handler latency by operation.
    pub request_latency_seconds: HistogramVec,
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, collector: C) -> C {
    registry
        .register(Box::new(collector.clone()))
        .expect("metric registration");
    collector
}

impl LedgerMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("bank".into()), None)
            .expect("failed to create prometheus registry");

        let accounts_opened_total = register(
            &registry,
            IntCounter::new("accounts_opened_total", "Total number of accounts opened")
                .expect("metric creation"),
        );
        let transfers_total = register(
            &registry,
            IntCounter::new("transfers_total", "Total number of committed customer transfers")
                .expect("metric creation"),
        );
        let rejections_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("rejections_total", "Requests rejected, by operation and error kind"),
                &["operation", "kind"],
            )
            .expect("metric creation"),
        );
        let atm_operations_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("atm_operations_total", "Committed ATM cash movements"),
                &["direction", "customer"],
            )
            .expect("metric creation"),
        );
        let settled_total = register(
            &registry,
            IntCounter::new(
                "settled_total",
                "Transactions marked applied by the settlement worker",
            )
            .expect("metric creation"),
        );
        let request_latency_seconds = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "request_latency_seconds",
                    "Ledger operation latency in seconds, by operation",
                )
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ]),
                &["operation"],
            )
            .expect("metric creation"),
        );

        Self {
            registry,
            accounts_opened_total,
            transfers_total,
            rejections_total,
            atm_operations_total,
            settled_total,
            request_latency_seconds,
        }
    }

    /// Records the outcome of one ledger operation.
    pub fn observe(&self, operation: &str, elapsed: Duration, error: Option<&LedgerError>) {
        self.request_latency_seconds
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
        if let Some(error) = error {
            self.rejections_total
                .with_label_values(&[operation, error.kind().as_str()])
                .inc();
        }
    }

    /// Counts the records a settlement pass actually marked applied.
    pub fn record_settlement(&self, report: &SettlementReport) {
        self.settled_total.inc_by(report.applied as u64);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<LedgerMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
