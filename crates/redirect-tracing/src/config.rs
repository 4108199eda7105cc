//! `[tracing]` settings.

use serde::Deserialize;

/// Log output and span export. Every field is optional in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// `service.name` on exported spans.
    pub service_name: String,

    /// Collector address such as `http://localhost:4317`. Export is off when unset.
    pub otlp_endpoint: Option<String>,

    pub protocol: OtlpProtocol,

    /// `EnvFilter` directives, e.g. `redirect_helper=debug,info`.
    pub log_level: String,

    /// One JSON object per log line.
    pub json: bool,
}

/// How spans reach the collector: `grpc` (port 4317) or `http` (port 4318).
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "redirect-helper".to_string(),
            otlp_endpoint: None,
            protocol: OtlpProtocol::Grpc,
            log_level: "info".to_string(),
            json: false,
        }
    }
}
