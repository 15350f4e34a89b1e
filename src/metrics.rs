//! Prometheus metrics for the maintenance suppression service
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `maintenance_events_total` (counter): events by kind and result (processed/duplicate/failed).
//! - `maintenance_handler_duration_seconds` (histogram): per-event handling time by kind.
//! - `maintenance_resolve_failures_total` (counter): per-scope resolve failures.
//! - `maintenance_resolved_resources` (gauge): resources resolved by the latest event per kind.
//! - `suppression_rule_operations_total` (counter): rule operations by operation and result.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    /// "starting" or "completed"
    pub kind: String,
    /// "processed", "duplicate" or "failed"
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ScopeLabels {
    pub scope: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RuleOperationLabels {
    /// "suppress" or "unsuppress"
    pub operation: String,
    /// Rule change or error label, e.g. "created", "already_absent", "error"
    pub result: String,
}

pub static EVENTS_TOTAL: Lazy<Family<EventLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static HANDLER_DURATION_SECONDS: Lazy<Family<KindLabels, Histogram>> = Lazy::new(|| {
    fn handler_histogram() -> Histogram {
        // 10ms .. ~5.5min across 16 buckets.
        Histogram::new(exponential_buckets(0.01, 2.0, 16))
    }

    Family::new_with_constructor(handler_histogram)
});

pub static RESOLVE_FAILURES_TOTAL: Lazy<Family<ScopeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RESOLVED_RESOURCES: Lazy<Family<KindLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static RULE_OPERATIONS_TOTAL: Lazy<Family<RuleOperationLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "maintenance_events",
        "Maintenance lifecycle events received, by kind and result",
        EVENTS_TOTAL.clone(),
    );
    registry.register(
        "maintenance_handler_duration_seconds",
        "Time spent handling one maintenance event",
        HANDLER_DURATION_SECONDS.clone(),
    );
    registry.register(
        "maintenance_resolve_failures",
        "Subscription scopes that failed to resolve",
        RESOLVE_FAILURES_TOTAL.clone(),
    );
    registry.register(
        "maintenance_resolved_resources",
        "Resources resolved by the most recent event of each kind",
        RESOLVED_RESOURCES.clone(),
    );
    registry.register(
        "suppression_rule_operations",
        "Suppression rule operations by operation and result",
        RULE_OPERATIONS_TOTAL.clone(),
    );

    registry
});

pub fn inc_event(kind: &str, result: &str) {
    let labels = EventLabels {
        kind: kind.to_string(),
        result: result.to_string(),
    };
    EVENTS_TOTAL.get_or_create(&labels).inc();
}

pub fn observe_handler_duration_seconds(kind: &str, seconds: f64) {
    let labels = KindLabels {
        kind: kind.to_string(),
    };
    HANDLER_DURATION_SECONDS.get_or_create(&labels).observe(seconds);
}

pub fn inc_resolve_failure(scope: &str) {
    let labels = ScopeLabels {
        scope: scope.to_string(),
    };
    RESOLVE_FAILURES_TOTAL.get_or_create(&labels).inc();
}

pub fn set_resolved_resources(kind: &str, count: usize) {
    let labels = KindLabels {
        kind: kind.to_string(),
    };
    RESOLVED_RESOURCES.get_or_create(&labels).set(count as i64);
}

pub fn inc_rule_operation(operation: &str, result: &str) {
    let labels = RuleOperationLabels {
        operation: operation.to_string(),
        result: result.to_string(),
    };
    RULE_OPERATIONS_TOTAL.get_or_create(&labels).inc();
}

/// Render the registry in the OpenMetrics text format
pub fn encode_text() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_operation_counter_is_exported() {
        inc_rule_operation("suppress", "created");
        let text = encode_text().unwrap();
        assert!(text.contains("suppression_rule_operations_total"));
        assert!(text.contains("operation=\"suppress\""));
    }

    #[test]
    fn test_event_counter_is_exported() {
        inc_event("starting", "duplicate");
        let text = encode_text().unwrap();
        assert!(text.contains("maintenance_events_total{kind=\"starting\",result=\"duplicate\"}"));
    }
}
