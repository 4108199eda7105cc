//! Subscriber installation with optional OTLP span export.

use anyhow::Result;
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{OtlpProtocol, TracingConfig};

/// Keeps the span exporter alive; flushes and shuts it down on drop.
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl TracingGuard {
    /// Whether spans are being exported to an OTLP collector.
    pub fn exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("redirect-tracing: exporter shutdown failed: {e}");
            }
        }
    }
}

/// Install the global subscriber: log lines on stderr, plus OTLP export when
/// `otlp_endpoint` is set.
///
/// An exporter that cannot be built is reported and skipped; logging still
/// comes up. Hold the returned guard until the process exits.
pub fn init_tracing(config: &TracingConfig) -> TracingGuard {
    let exporter = config
        .otlp_endpoint
        .as_deref()
        .map(|endpoint| (endpoint, build_provider(config, endpoint)));

    let (provider, failure) = match exporter {
        None => (None, None),
        Some((_, Ok(provider))) => (Some(provider), None),
        Some((endpoint, Err(e))) => (None, Some((endpoint, e))),
    };

    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let installed = tracing_subscriber::registry()
        .with(otel_layer)
        .with(fmt_layer(config))
        .with(env_filter(config))
        .try_init();
    if let Err(e) = installed {
        eprintln!("redirect-tracing: subscriber already installed: {e}");
    }

    match (&provider, failure) {
        (_, Some((endpoint, e))) => tracing::warn!(
            error = %e,
            endpoint = %endpoint,
            "OTLP exporter unavailable, logging only"
        ),
        (Some(_), None) => tracing::info!(
            endpoint = config.otlp_endpoint.as_deref().unwrap_or_default(),
            service = %config.service_name,
            protocol = ?config.protocol,
            "Exporting spans over OTLP"
        ),
        (None, None) => {}
    }

    TracingGuard { provider }
}

/// `log_level` as a filter directive; an unparsable value means `info`.
fn env_filter(config: &TracingConfig) -> EnvFilter {
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer<S>(config: &TracingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if config.json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

fn build_provider(config: &TracingConfig, endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = match config.protocol {
        OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?,
        OtlpProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?,
    };

    let resource = Resource::builder_empty()
        .with_service_name(config.service_name.clone())
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}
