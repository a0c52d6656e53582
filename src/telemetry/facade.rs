//! The telemetry facade.
//!
//! [`Telemetry`] is the single surface application code emits through. Each
//! call resolves correlation values from the caller's [`Carrier`], writes a
//! structured log record, and forwards to the APM sink when one is configured.

use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::fmt::writer::BoxMakeWriter;

use super::apm::{ApmClient, ApmSink, ApmTransport, Dependency, HttpTransport, Request};
use super::config::TelemetryConfig;
use super::correlation::{Carrier, Correlation, OperationId};
use super::error::TelemetryError;
use super::field::Field;
use super::log_sink::LogSink;
use super::severity::Severity;

const DEPENDENCY_TYPE_KEY: &str = "DependencyType";
const TARGET_KEY: &str = "Target";
const METHOD_KEY: &str = "Method";
const URL_KEY: &str = "URL";
const RESPONSE_CODE_KEY: &str = "ResponseCode";
const SOURCE_KEY: &str = "Source";
const SUCCESS_KEY: &str = "Success";
const DURATION_KEY: &str = "DurationMs";
const RECORD_ID_KEY: &str = "RecordID";

/// Correlated telemetry emitter.
///
/// Build one per process and share it by reference; every method takes
/// `&self` and is safe to call concurrently.
///
/// # Example
///
/// ```rust,no_run
/// use telemux::telemetry::{Field, Telemetry, TelemetryConfig};
///
/// let telemetry = Telemetry::new(TelemetryConfig::new("", "billing", "info", 0))?;
///
/// // Once per inbound request:
/// let carrier = telemetry.carrier().with_operation_id("op-1");
/// telemetry.info(&carrier, "payment processed", &[Field::string("amount", "42")]);
/// # Ok::<(), telemux::telemetry::TelemetryError>(())
/// ```
#[derive(Debug)]
pub struct Telemetry {
    config: TelemetryConfig,
    log: LogSink,
    apm: ApmSink,
}

impl Telemetry {
    /// Build a facade writing to the configured log output and, when an
    /// instrumentation key is set, to the configured APM endpoint over HTTP.
    ///
    /// Fails only when the log sink cannot be built. A missing instrumentation
    /// key, or an APM transport that cannot be set up, leaves the facade
    /// logging locally only.
    pub fn new(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        let log = LogSink::new(config.log_level(), config.log_output())?;

        let apm = if config.apm_configured() {
            match HttpTransport::new(config.apm_endpoint()) {
                Ok(transport) => ApmSink::Enabled(ApmClient::new(
                    config.instrumentation_key(),
                    config.service_name(),
                    Arc::new(transport),
                )),
                Err(e) => {
                    tracing::warn!(error = %e, "APM transport unavailable, logging locally only");
                    ApmSink::Disabled
                }
            }
        } else {
            ApmSink::Disabled
        };

        Ok(Self::from_parts(config, log, apm))
    }

    /// Build a facade with explicit sink destinations.
    ///
    /// `transport` is only used when the configuration carries an
    /// instrumentation key.
    pub fn with_sinks(
        config: TelemetryConfig,
        writer: BoxMakeWriter,
        transport: Arc<dyn ApmTransport>,
    ) -> Result<Self, TelemetryError> {
        let log = LogSink::with_writer(config.log_level(), writer)?;

        let apm = if config.apm_configured() {
            ApmSink::Enabled(ApmClient::new(
                config.instrumentation_key(),
                config.service_name(),
                transport,
            ))
        } else {
            ApmSink::Disabled
        };

        Ok(Self::from_parts(config, log, apm))
    }

    fn from_parts(config: TelemetryConfig, log: LogSink, apm: ApmSink) -> Self {
        tracing::debug!(
            service = config.service_name(),
            level = config.log_level(),
            apm = apm.is_enabled(),
            "Telemetry initialized"
        );
        Self { config, log, apm }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Whether records are forwarded to the remote APM backend.
    pub fn apm_enabled(&self) -> bool {
        self.apm.is_enabled()
    }

    /// Wait up to `timeout` for APM records still being delivered. Returns
    /// `false` if some were still in flight. Blocks the calling thread.
    ///
    /// Sends run on the tokio runtime the facade was built in, if any. Called
    /// from a current-thread runtime, that runtime cannot make progress while
    /// this blocks, so pending records only time out; flush from outside the
    /// runtime or from a multi-thread one.
    ///
    /// Local records are written synchronously and need no flushing.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.apm.flush(timeout)
    }

    /// A root carrier holding the configured service name.
    ///
    /// Derive one carrier per unit of work from it, e.g. with
    /// [`Carrier::with_operation_id`].
    pub fn carrier(&self) -> Carrier {
        Carrier::new().with_service_name(self.config.service_name())
    }

    /// Local-only debug record. Never forwarded to APM.
    #[track_caller]
    pub fn debug(&self, carrier: &Carrier, message: &str, fields: &[Field]) {
        self.emit(Severity::Verbose, Location::caller(), carrier, message, fields);
    }

    #[track_caller]
    pub fn info(&self, carrier: &Carrier, message: &str, fields: &[Field]) {
        self.emit(
            Severity::Information,
            Location::caller(),
            carrier,
            message,
            fields,
        );
    }

    #[track_caller]
    pub fn warn(&self, carrier: &Carrier, message: &str, fields: &[Field]) {
        self.emit(Severity::Warning, Location::caller(), carrier, message, fields);
    }

    /// Error record; reported to APM as an exception.
    #[track_caller]
    pub fn error(&self, carrier: &Carrier, message: &str, fields: &[Field]) {
        self.emit(Severity::Error, Location::caller(), carrier, message, fields);
    }

    /// Critical record. Distinct from [`error`](Self::error) in the local log
    /// only; APM receives the same exception record.
    #[track_caller]
    pub fn critical(&self, carrier: &Carrier, message: &str, fields: &[Field]) {
        self.emit(Severity::Critical, Location::caller(), carrier, message, fields);
    }

    /// Record an outbound call. Returns the id assigned to the record.
    #[track_caller]
    pub fn dependency(
        &self,
        carrier: &Carrier,
        dependency: &Dependency,
        message: &str,
        fields: &[Field],
    ) -> OperationId {
        let caller = Location::caller();
        let correlation = Correlation::resolve(carrier);
        let id = OperationId::new();

        let mut local = fields.to_vec();
        local.extend([
            Field::string(DEPENDENCY_TYPE_KEY, dependency.kind.as_str()),
            Field::string(TARGET_KEY, dependency.target.as_str()),
            Field::bool(SUCCESS_KEY, dependency.success),
            Field::int(DURATION_KEY, dependency.duration().num_milliseconds()),
            Field::string(RECORD_ID_KEY, id.as_str()),
        ]);
        self.log
            .emit(Severity::Information, caller, message, &local, &correlation);

        self.apm
            .dependency(dependency, &id, message, fields, &correlation);
        id
    }

    /// Record an inbound call. Returns the id assigned to the record.
    #[track_caller]
    pub fn request(
        &self,
        carrier: &Carrier,
        request: &Request,
        message: &str,
        fields: &[Field],
    ) -> OperationId {
        let caller = Location::caller();
        let correlation = Correlation::resolve(carrier);
        let id = OperationId::new();

        let mut local = fields.to_vec();
        local.extend([
            Field::string(METHOD_KEY, request.method.as_str()),
            Field::string(URL_KEY, request.url.as_str()),
            Field::string(RESPONSE_CODE_KEY, request.response_code.as_str()),
            Field::bool(SUCCESS_KEY, request.success),
            Field::int(
                DURATION_KEY,
                i64::try_from(request.duration.as_millis()).unwrap_or(i64::MAX),
            ),
            Field::string(RECORD_ID_KEY, id.as_str()),
        ]);
        if !request.source.is_empty() {
            local.push(Field::string(SOURCE_KEY, request.source.as_str()));
        }
        self.log
            .emit(Severity::Information, caller, message, &local, &correlation);

        self.apm.request(request, &id, message, fields, &correlation);
        id
    }

    fn emit(
        &self,
        severity: Severity,
        caller: &Location<'_>,
        carrier: &Carrier,
        message: &str,
        fields: &[Field],
    ) {
        let correlation = Correlation::resolve(carrier);

        self.log.emit(severity, caller, message, fields, &correlation);

        match severity {
            Severity::Verbose => {}
            Severity::Information | Severity::Warning => {
                self.apm.trace(severity, message, fields, &correlation)
            }
            Severity::Error | Severity::Critical => {
                self.apm.exception(message, fields, &correlation)
            }
        }
    }
}
