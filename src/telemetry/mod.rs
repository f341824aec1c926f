//! Tracing, metrics and log export for the stage workers.
//!
//! With an OTLP endpoint, spans, metrics and log records go to the collector
//! over gRPC and a compact copy of every event is still written to stderr.
//! Without one, only the stderr formatter is installed and the metric
//! instruments in [`metrics`] record into the global no-op provider.

pub mod genai;
pub mod metrics;
pub mod work;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::error::{Error, Result};

/// Instrumentation scope for spans this crate creates.
const TRACER_NAME: &str = "clipboard-tts";

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`.
    pub endpoint: Option<String>,
    /// Reported as `service.name`; one per stage worker.
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

struct OtlpProviders {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

/// Flushes and shuts down the OTLP pipelines when dropped. Hold it until
/// the worker exits.
pub struct TelemetryGuard {
    otlp: Option<OtlpProviders>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(otlp) = self.otlp.take() else {
            return;
        };
        let _ = otlp.logger.shutdown();
        let _ = otlp.meter.shutdown();
        let _ = otlp.tracer.shutdown();
    }
}

fn resource(service_name: String) -> Resource {
    Resource::builder()
        .with_service_name(service_name)
        .with_attribute(KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ))
        .build()
}

fn exporter_error(signal: &'static str) -> impl Fn(opentelemetry_otlp::ExporterBuildError) -> Error {
    move |e| Error::Other(format!("cannot build OTLP {signal} exporter: {e}"))
}

fn otlp_providers(endpoint: &str, resource: Resource) -> Result<OtlpProviders> {
    use opentelemetry_otlp::{LogExporter, MetricExporter, SpanExporter, WithExportConfig as _};

    let spans = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(exporter_error("span"))?;
    let metrics = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(exporter_error("metric"))?;
    let logs = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(exporter_error("log"))?;

    Ok(OtlpProviders {
        tracer: SdkTracerProvider::builder()
            .with_batch_exporter(spans)
            .with_resource(resource.clone())
            .build(),
        meter: SdkMeterProvider::builder()
            .with_periodic_exporter(metrics)
            .with_resource(resource.clone())
            .build(),
        logger: SdkLoggerProvider::builder()
            .with_batch_exporter(logs)
            .with_resource(resource)
            .build(),
    })
}

/// Install the global subscriber (and meter provider, with OTLP).
///
/// `RUST_LOG` wins over `config.log_level`. Fails if an exporter can't be
/// built or a subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let init_error = |e: tracing_subscriber::util::TryInitError| {
        Error::Other(format!("cannot install tracing subscriber: {e}"))
    };

    let Some(endpoint) = config.endpoint else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(init_error)?;
        return Ok(TelemetryGuard { otlp: None });
    };

    let otlp = otlp_providers(&endpoint, resource(config.service_name))?;
    opentelemetry::global::set_meter_provider(otlp.meter.clone());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .with(tracing_opentelemetry::layer().with_tracer(otlp.tracer.tracer(TRACER_NAME)))
        .with(opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(
            &otlp.logger,
        ))
        .try_init()
        .map_err(init_error)?;

    Ok(TelemetryGuard { otlp: Some(otlp) })
}
