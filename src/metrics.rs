//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `maskinporten_operator_reconciliations_total` - Total number of reconcile passes
//! - `maskinporten_operator_reconciliation_errors_total` - Total number of failed passes
//! - `maskinporten_operator_reconciliation_duration_seconds` - Duration of reconcile passes
//! - `maskinporten_operator_commands_executed_total` - Total number of commands executed
//! - `maskinporten_operator_authority_requests_total` - Total number of authority HTTP attempts
//! - `maskinporten_operator_authority_request_retries_total` - Authority attempts that were retried

use anyhow::Result;
use prometheus::{Histogram, IntCounter, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "maskinporten_operator_reconciliations_total",
        "Total number of reconcile passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "maskinporten_operator_reconciliation_errors_total",
        "Total number of failed reconcile passes",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "maskinporten_operator_reconciliation_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static COMMANDS_EXECUTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "maskinporten_operator_commands_executed_total",
        "Total number of reconcile commands executed",
    )
    .expect("Failed to create COMMANDS_EXECUTED_TOTAL metric - this should never happen")
});

static AUTHORITY_REQUESTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "maskinporten_operator_authority_requests_total",
        "Total number of HTTP request attempts against the authority",
    )
    .expect("Failed to create AUTHORITY_REQUESTS_TOTAL metric - this should never happen")
});

static AUTHORITY_REQUEST_RETRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "maskinporten_operator_authority_request_retries_total",
        "Total number of authority request attempts that were retried",
    )
    .expect("Failed to create AUTHORITY_REQUEST_RETRIES_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(COMMANDS_EXECUTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AUTHORITY_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AUTHORITY_REQUEST_RETRIES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(seconds: f64) {
    RECONCILIATION_DURATION.observe(seconds);
}

pub fn increment_commands_executed(count: u64) {
    COMMANDS_EXECUTED_TOTAL.inc_by(count);
}

pub fn increment_authority_requests() {
    AUTHORITY_REQUESTS_TOTAL.inc();
}

pub fn increment_authority_request_retries() {
    AUTHORITY_REQUEST_RETRIES_TOTAL.inc();
}
