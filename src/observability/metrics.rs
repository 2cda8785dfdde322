//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `certificate_manager_reconciliations_total` - Total number of reconciliations
//! - `certificate_manager_reconciliation_errors_total` - Reconciliation errors by kind
//! - `certificate_manager_reconciliation_duration_seconds` - Duration of reconciliations
//! - `certificate_manager_certificates_issued_total` - Leaf certificates issued
//! - `certificate_manager_issuance_duration_seconds` - Key generation and signing time
//! - `certificate_manager_certificates_expired_total` - Certificates found missing or expired
//! - `certificate_manager_subject_drift_total` - Stored certificates that no longer match their spec
//! - `certificate_manager_requeues_total` - Requeues by reason

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "certificate_manager_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "certificate_manager_reconciliation_errors_total",
            "Total number of reconciliation errors by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "certificate_manager_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static CERTIFICATES_ISSUED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "certificate_manager_certificates_issued_total",
        "Total number of leaf certificates issued",
    )
    .expect("Failed to create CERTIFICATES_ISSUED_TOTAL metric - this should never happen")
});

static ISSUANCE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "certificate_manager_issuance_duration_seconds",
            "Duration of key generation and signing in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
    )
    .expect("Failed to create ISSUANCE_DURATION metric - this should never happen")
});

static CERTIFICATES_EXPIRED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "certificate_manager_certificates_expired_total",
        "Total number of certificates found missing or past NotAfter",
    )
    .expect("Failed to create CERTIFICATES_EXPIRED_TOTAL metric - this should never happen")
});

static SUBJECT_DRIFT_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "certificate_manager_subject_drift_total",
        "Total number of stored certificates found not matching their spec",
    )
    .expect("Failed to create SUBJECT_DRIFT_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "certificate_manager_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only when a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATES_ISSUED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ISSUANCE_DURATION.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATES_EXPIRED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SUBJECT_DRIFT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

/// Snapshot of every registered metric family
#[must_use]
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_certificates_issued() {
    CERTIFICATES_ISSUED_TOTAL.inc();
}

pub fn observe_issuance_duration(duration: f64) {
    ISSUANCE_DURATION.observe(duration);
}

pub fn increment_certificates_expired() {
    CERTIFICATES_EXPIRED_TOTAL.inc();
}

pub fn increment_subject_drift() {
    SUBJECT_DRIFT_TOTAL.inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
