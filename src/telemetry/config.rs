//! Telemetry configuration.

use std::path::PathBuf;

use crate::config::{keys, ConfigSource};

/// Default Application Insights ingestion endpoint.
pub const DEFAULT_APM_ENDPOINT: &str = "https://dc.services.visualstudio.com";

/// Log level used when none is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Where structured log records are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Append to a file, created if missing.
    File(PathBuf),
}

/// Configuration for building a [`Telemetry`](super::Telemetry) facade.
///
/// Immutable once built; the facade takes ownership of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    instrumentation_key: String,
    service_name: String,
    log_level: String,
    caller_skip: usize,
    apm_endpoint: String,
    log_output: LogOutput,
}

impl TelemetryConfig {
    /// Create a configuration.
    ///
    /// An empty `instrumentation_key` disables the APM sink. The log level is
    /// validated when the facade is built, not here.
    pub fn new(
        instrumentation_key: impl Into<String>,
        service_name: impl Into<String>,
        log_level: impl Into<String>,
        caller_skip: usize,
    ) -> Self {
        Self {
            instrumentation_key: instrumentation_key.into(),
            service_name: service_name.into(),
            log_level: log_level.into(),
            caller_skip,
            apm_endpoint: DEFAULT_APM_ENDPOINT.to_string(),
            log_output: LogOutput::default(),
        }
    }

    /// Resolve a configuration from a lookup source.
    ///
    /// Missing keys fall back to empty values (instrumentation key, service
    /// name) or defaults (log level, endpoint). The source is read exactly once.
    pub fn from_source(source: &dyn ConfigSource, caller_skip: usize) -> Self {
        let get = |key: &str| source.get_var(key).unwrap_or_default();

        let mut config = Self::new(
            get(keys::INSTRUMENTATION_KEY),
            get(keys::SERVICE_NAME),
            get(keys::LOG_LEVEL),
            caller_skip,
        );
        if let Some(endpoint) = source
            .get_var(keys::APM_ENDPOINT)
            .filter(|e| !e.is_empty())
        {
            config.apm_endpoint = endpoint;
        }
        config
    }

    /// Use a different APM ingestion endpoint.
    #[must_use]
    pub fn with_apm_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.apm_endpoint = endpoint.into();
        self
    }

    /// Write structured log records to `output`.
    #[must_use]
    pub fn with_log_output(mut self, output: LogOutput) -> Self {
        self.log_output = output;
        self
    }

    pub fn instrumentation_key(&self) -> &str {
        &self.instrumentation_key
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The configured log level, or the default when none was given.
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            DEFAULT_LOG_LEVEL
        } else {
            &self.log_level
        }
    }

    /// Caller frames to skip, as configured.
    ///
    /// Has no effect on the `caller` attribute: facade methods resolve their
    /// call site through `#[track_caller]`. A wrapper that should be skipped
    /// must itself be `#[track_caller]`.
    pub fn caller_skip(&self) -> usize {
        self.caller_skip
    }

    pub fn apm_endpoint(&self) -> &str {
        &self.apm_endpoint
    }

    pub fn log_output(&self) -> &LogOutput {
        &self.log_output
    }

    /// Whether remote APM telemetry was requested.
    pub fn apm_configured(&self) -> bool {
        !self.instrumentation_key.is_empty()
    }

    /// Instrumentation key with all but the last four characters masked.
    pub fn redacted_instrumentation_key(&self) -> String {
        let key = &self.instrumentation_key;
        let visible = key.chars().rev().take(4).collect::<Vec<_>>();
        let hidden = key.chars().count().saturating_sub(visible.len());
        let mut out = "*".repeat(hidden);
        out.extend(visible.into_iter().rev());
        out
    }
}
