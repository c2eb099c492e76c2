//! Logging and metrics setup shared by the seeder crates.
//!
//! Logs go to stdout through `tracing-subscriber`, compact by default or JSON
//! with `RUST_LOG_FORMAT=json`. Traces and metrics are exported over OTLP only
//! when `OTEL_SDK_DISABLED=false`; the exporter itself is then configured by
//! the standard `OTEL_EXPORTER_OTLP_*` variables.
use std::borrow::Cow;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{InstrumentationScope, global};
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, SpanExporter};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_opentelemetry::MetricsLayer;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::{prelude::*, registry::LookupSpan};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter},
};

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const RUST_LOG_FORMAT: &str = "RUST_LOG_FORMAT";
const DEFAULT_DIRECTIVE: &str = "info";
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("Failed to build {signal} exporter"))]
    Exporter {
        signal: &'static str,
        source: ExporterBuildError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// How logs, traces and metrics leave the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub service_name: Cow<'static, str>,
    pub service_version: Cow<'static, str>,
    pub log_format: LogFormat,
    /// Export traces and metrics over OTLP.
    pub otlp: bool,
    /// Filter used when `RUST_LOG` is not set.
    pub default_directive: String,
}

/// Keeps the OpenTelemetry providers alive for the duration of the process.
///
/// Call [`ObservabilityGuard::shutdown`] before exiting so that the final
/// record counters reach the collector.
#[must_use]
pub struct ObservabilityGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Installs the global subscriber using configuration from the environment.
pub fn init_observability(
    service_name: impl Into<Cow<'static, str>>,
    service_version: impl Into<Cow<'static, str>>,
) -> Result<ObservabilityGuard, ObservabilityError> {
    let config = ObservabilityConfig::new(service_name, service_version)
        .with_env(|key| std::env::var(key).ok());
    init_with_config(config)
}

pub fn init_with_config(
    config: ObservabilityConfig,
) -> Result<ObservabilityGuard, ObservabilityError> {
    let (otel_layer, guard) = otel(&config)?;
    let layers = vec![stdout(&config), otel_layer];

    tracing_subscriber::registry().with(layers).init();

    Ok(guard)
}

impl ObservabilityConfig {
    pub fn new(
        service_name: impl Into<Cow<'static, str>>,
        service_version: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            log_format: LogFormat::default(),
            otlp: false,
            default_directive: DEFAULT_DIRECTIVE.to_string(),
        }
    }

    /// Apply `RUST_LOG_FORMAT` and `OTEL_SDK_DISABLED` as returned by `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(format) = lookup(RUST_LOG_FORMAT) {
            self.log_format = if format.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Compact
            };
        }

        // Export stays off unless explicitly enabled, the reverse of the
        // OpenTelemetry default.
        if let Some(disabled) = lookup(OTEL_SDK_DISABLED) {
            self.otlp = disabled.eq_ignore_ascii_case("false");
        }

        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

impl ObservabilityGuard {
    pub fn shutdown(self) {
        if let Err(err) = self.tracer_provider.shutdown() {
            eprintln!("failed to shutdown tracer provider: {err}");
        }
        if let Err(err) = self.meter_provider.shutdown() {
            eprintln!("failed to shutdown meter provider: {err}");
        }
    }
}

fn stdout<S>(config: &ObservabilityConfig) -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(config.env_filter())
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false)
            .compact()
            .with_filter(config.env_filter())
            .boxed(),
    }
}

fn otel<S>(
    config: &ObservabilityConfig,
) -> Result<(BoxedLayer<S>, ObservabilityGuard), ObservabilityError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let resource = Resource::builder()
        .with_service_name(config.service_name.to_string())
        .build();

    let scope = InstrumentationScope::builder(config.service_name.clone())
        .with_version(config.service_version.clone())
        .build();

    let mut tracer_provider = SdkTracerProvider::builder().with_resource(resource.clone());
    let mut meter_provider = MeterProviderBuilder::default().with_resource(resource);

    if config.otlp {
        let spans = SpanExporter::builder()
            .with_tonic()
            .build()
            .context(ExporterSnafu { signal: "span" })?;
        tracer_provider = tracer_provider.with_batch_exporter(spans);

        let metrics = MetricExporter::builder()
            .with_tonic()
            .build()
            .context(ExporterSnafu { signal: "metric" })?;
        meter_provider = meter_provider.with_reader(
            PeriodicReader::builder(metrics)
                .with_interval(METRICS_EXPORT_INTERVAL)
                .build(),
        );
    }

    let tracer_provider = tracer_provider.build();
    let tracer = tracer_provider.tracer_with_scope(scope);
    let meter_provider = meter_provider.build();

    global::set_meter_provider(meter_provider.clone());

    let layer = config
        .env_filter()
        .and_then(MetricsLayer::new(meter_provider.clone()))
        .and_then(tracing_opentelemetry::layer().with_tracer(tracer))
        .boxed();

    Ok((
        layer,
        ObservabilityGuard {
            tracer_provider,
            meter_provider,
        },
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> ObservabilityConfig {
        let vars: HashMap<_, _> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ObservabilityConfig::new("seeder", "0.1.0").with_env(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        let config = config_from(&[]);
        assert_eq!(config.log_format, LogFormat::Compact);
        assert!(!config.otlp);
        assert_eq!(config.default_directive, "info");
    }

    #[test]
    fn test_json_logs() {
        assert_eq!(
            config_from(&[("RUST_LOG_FORMAT", "JSON")]).log_format,
            LogFormat::Json
        );
        assert_eq!(
            config_from(&[("RUST_LOG_FORMAT", "pretty")]).log_format,
            LogFormat::Compact
        );
    }

    #[test]
    fn test_otlp_needs_explicit_opt_in() {
        assert!(config_from(&[("OTEL_SDK_DISABLED", "false")]).otlp);
        assert!(!config_from(&[("OTEL_SDK_DISABLED", "true")]).otlp);
        assert!(!config_from(&[("OTEL_SDK_DISABLED", "")]).otlp);
    }
}
