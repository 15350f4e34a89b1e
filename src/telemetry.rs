//! OpenTelemetry export for tracing spans
//!
//! Enabled by the binary when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. The
//! exporter reads its endpoint and headers from the standard OTEL variables.

use opentelemetry::trace::TraceError;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self as sdktrace, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

pub const SERVICE_NAME: &str = "maintenance-quiesce";

/// Build the OTLP pipeline and return a layer for the tracing registry
///
/// Also installs the W3C trace-context propagator so `traceparent` headers on
/// inbound deliveries continue the sender's trace.
pub fn init_telemetry<S>(_subscriber: &S) -> Result<OpenTelemetryLayer<S, Tracer>, TraceError>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio)?;

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Flush pending spans before exit
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
