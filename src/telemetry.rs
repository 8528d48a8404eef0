//! Logging and optional OTLP export.
//!
//! Console logs go to stderr so command output on stdout stays machine
//! readable. `RUST_LOG` overrides the default `coding_agent=info` filter and
//! `CODING_AGENT_LOG_FORMAT=json` switches to one JSON object per line.
//! With the `otel` feature, setting `OTEL_EXPORTER_OTLP_ENDPOINT` also ships
//! spans and log events over OTLP/HTTP.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "coding_agent=info";
const SERVICE_NAME: &str = "coding-agent";

/// Flushes exporters on drop. Keep it alive for the whole process.
#[derive(Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    tracer: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
    #[cfg(feature = "otel")]
    logger: Option<opentelemetry_sdk::logs::SdkLoggerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        {
            if let Some(tracer) = self.tracer.take()
                && let Err(e) = tracer.shutdown()
            {
                eprintln!("failed to flush traces: {e}");
            }
            if let Some(logger) = self.logger.take()
                && let Err(e) = logger.shutdown()
            {
                eprintln!("failed to flush logs: {e}");
            }
        }
    }
}

fn json_requested() -> bool {
    std::env::var("CODING_AGENT_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Install the global subscriber. Safe to call once; later calls are ignored.
pub fn init() -> TelemetryGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = if json_requested() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };

    #[cfg(feature = "otel")]
    {
        let mut guard = TelemetryGuard::default();
        let (trace_layer, log_layer) = match otlp::providers() {
            Ok(Some((tracer, logger))) => {
                let layers = otlp::layers(&tracer, &logger);
                guard.tracer = Some(tracer);
                guard.logger = Some(logger);
                (Some(layers.0), Some(layers.1))
            }
            Ok(None) => (None, None),
            Err(e) => {
                eprintln!("OTLP export disabled: {e:#}");
                (None, None)
            }
        };
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(trace_layer)
            .with(log_layer)
            .try_init();
        guard
    }

    #[cfg(not(feature = "otel"))]
    {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init();
        TelemetryGuard::default()
    }
}

#[cfg(feature = "otel")]
mod otlp {
    use anyhow::Context;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
    use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};

    use super::SERVICE_NAME;

    /// Exporters read the endpoint and headers from the standard OTEL_* variables.
    pub(super) fn providers() -> anyhow::Result<Option<(SdkTracerProvider, SdkLoggerProvider)>> {
        if !std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok_and(|v| !v.trim().is_empty()) {
            return Ok(None);
        }
        let resource = Resource::builder().with_service_name(SERVICE_NAME).build();

        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .build()
            .context("building OTLP span exporter")?;
        let tracer = SdkTracerProvider::builder()
            .with_batch_exporter(spans)
            .with_resource(resource.clone())
            .build();

        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_http()
            .build()
            .context("building OTLP log exporter")?;
        let logger = SdkLoggerProvider::builder()
            .with_batch_exporter(logs)
            .with_resource(resource)
            .build();

        Ok(Some((tracer, logger)))
    }

    pub(super) fn layers<S>(
        tracer: &SdkTracerProvider,
        logger: &SdkLoggerProvider,
    ) -> (
        tracing_opentelemetry::OpenTelemetryLayer<S, SdkTracer>,
        OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>,
    )
    where
        S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
    {
        (
            tracing_opentelemetry::layer().with_tracer(tracer.tracer(SERVICE_NAME)),
            OpenTelemetryTracingBridge::new(logger),
        )
    }
}
