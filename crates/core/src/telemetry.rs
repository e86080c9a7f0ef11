// Telemetry
//
// Console logging for every Orator process, plus OTLP trace export when an
// endpoint is configured. Completion and agent spans carry the Gen-AI
// semantic-convention attributes named in `gen_ai`.

use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, Tracer};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Service name used when `OTEL_SERVICE_NAME` is unset
pub const DEFAULT_SERVICE_NAME: &str = "orator";

const DEFAULT_LOG_FILTER: &str = "info";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Gen-AI attribute names (https://opentelemetry.io/docs/specs/semconv/gen-ai/)
pub mod gen_ai {
    pub const REQUEST_MODEL: &str = "gen_ai.request.model";
    pub const USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
    pub const USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
    /// Game session the agent is serving
    pub const CONVERSATION_ID: &str = "gen_ai.conversation.id";

    pub mod operation {
        pub const CHAT: &str = "chat";
        pub const INVOKE_AGENT: &str = "invoke_agent";
    }
}

/// Span name for an agent invocation, e.g. "invoke_agent npc"
pub fn agent_span_name(agent: &str) -> String {
    format!("{} {agent}", gen_ai::operation::INVOKE_AGENT)
}

/// Logging and trace-export settings
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: Option<String>,
    /// OTLP gRPC endpoint; export is off when unset
    pub otlp_endpoint: Option<String>,
    /// Reported as `deployment.environment`
    pub environment: Option<String>,
    pub enable_console: bool,
    /// `EnvFilter` directives, e.g. "orator_resilience=debug"
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: None,
            otlp_endpoint: None,
            environment: None,
            enable_console: true,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Read `OTEL_SERVICE_NAME`, `OTEL_SERVICE_VERSION`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_ENVIRONMENT` and
    /// `RUST_LOG` (or `LOG_LEVEL`)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            service_name: lookup("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: lookup("OTEL_SERVICE_VERSION"),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.trim().is_empty()),
            environment: lookup("OTEL_ENVIRONMENT"),
            log_filter: lookup("RUST_LOG").or_else(|| lookup("LOG_LEVEL")),
            ..defaults
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }

    fn resource(&self) -> Resource {
        let attributes = [
            Some(KeyValue::new("service.name", self.service_name.clone())),
            self.service_version
                .clone()
                .map(|version| KeyValue::new("service.version", version)),
            self.environment
                .clone()
                .map(|env| KeyValue::new("deployment.environment", env)),
        ];
        Resource::builder()
            .with_attributes(attributes.into_iter().flatten())
            .build()
    }
}

/// Flushes and shuts down trace export on drop
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("orator: tracer provider shutdown failed: {err:?}");
            }
        }
    }
}

/// Install the global subscriber
///
/// Hold the returned guard until the process exits. A failing OTLP setup is
/// logged and the process continues with console logging only. Calling this
/// twice keeps the first subscriber.
///
/// ```ignore
/// let _telemetry = orator_core::init_telemetry(TelemetryConfig::from_env());
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let console = config
        .enable_console
        .then(|| tracing_subscriber::fmt::layer().with_target(true).with_filter(config.env_filter()));

    let (provider, otel, export_status) = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => match otlp_tracer(endpoint, &config) {
            Ok((provider, tracer)) => (
                Some(provider),
                Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                Some(Ok(endpoint)),
            ),
            Err(err) => (None, None, Some(Err((endpoint, err.to_string())))),
        },
        None => (None, None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(otel)
        .try_init();

    match export_status {
        Some(Ok(endpoint)) => tracing::info!(endpoint, "Exporting traces over OTLP"),
        Some(Err((endpoint, error))) => {
            tracing::warn!(endpoint, %error, "OTLP exporter unavailable, logging to console only")
        }
        None => tracing::debug!("Trace export disabled"),
    }

    TelemetryGuard { provider }
}

fn otlp_tracer(
    endpoint: &str,
    config: &TelemetryConfig,
) -> Result<(SdkTracerProvider, Tracer), Box<dyn std::error::Error + Send + Sync>> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(config.resource())
        .build();
    let tracer = provider.tracer(config.service_name.clone());
    Ok((provider, tracer))
}
