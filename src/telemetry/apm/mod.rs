//! Remote APM sink.
//!
//! Translates facade events into Application Insights records (trace,
//! exception, dependency, request) and hands them to an [`ApmTransport`].
//! Every record carries the operation id as its parent-operation link and
//! both `ServiceName` and `OperationID` as explicit properties, so grouping
//! works regardless of how the backend's role tagging is configured.

pub mod envelope;
pub mod transport;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::correlation::{Correlation, OperationId, OPERATION_ID_KEY, SERVICE_NAME_KEY};
use super::field::{Field, FieldValue};
use super::severity::Severity;
use envelope::{
    Data, Envelope, ExceptionData, ExceptionDetails, MessageData, RemoteDependencyData,
    RequestData, DATA_VERSION, TAG_CLOUD_ROLE, TAG_OPERATION_PARENT_ID, TAG_SDK_VERSION,
};
pub use transport::{ApmTransport, HttpTransport, MemoryTransport, TransportError};

/// Property holding the caller's message on dependency, request and
/// error-carrying exception records.
const MESSAGE_PROPERTY: &str = "Message";
/// Exception type reported for facade errors.
const EXCEPTION_TYPE: &str = "Error";

/// An outbound call the service made to another system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Dependency type, e.g. `HTTP` or `SQL`.
    pub kind: String,
    pub target: String,
    pub success: bool,
    pub start: DateTime<Utc>,
    /// Must not precede `start`; durations are not clamped.
    pub end: DateTime<Utc>,
    /// Display name; the event message is used when absent.
    pub name: Option<String>,
    /// Command or query issued, e.g. the full URL or SQL text.
    pub data: Option<String>,
    pub result_code: Option<String>,
}

impl Dependency {
    pub fn new(
        kind: impl Into<String>,
        target: impl Into<String>,
        success: bool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            success,
            start,
            end,
            name: None,
            data: None,
            result_code: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    #[must_use]
    pub fn with_result_code(mut self, code: impl Into<String>) -> Self {
        self.result_code = Some(code.into());
        self
    }

    /// `end - start`, possibly negative.
    pub fn duration(&self) -> chrono::Duration {
        self.end.signed_duration_since(self.start)
    }
}

/// An inbound call the service served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub duration: Duration,
    pub response_code: String,
    pub success: bool,
    /// Caller identity, if known.
    pub source: String,
}

impl Request {
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        duration: Duration,
        response_code: impl Into<String>,
        success: bool,
        source: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            duration,
            response_code: response_code.into(),
            success,
            source: source.into(),
        }
    }
}

/// Application Insights `SeverityLevel` for a severity. Error and Critical
/// share the exception route and level.
fn severity_level(severity: Severity) -> u8 {
    match severity {
        Severity::Verbose => 0,
        Severity::Information => 1,
        Severity::Warning => 2,
        Severity::Error | Severity::Critical => 3,
    }
}

/// Builds envelopes for one instrumentation key and submits them.
pub struct ApmClient {
    instrumentation_key: String,
    role: String,
    transport: Arc<dyn ApmTransport>,
}

impl ApmClient {
    pub fn new(
        instrumentation_key: impl Into<String>,
        role: impl Into<String>,
        transport: Arc<dyn ApmTransport>,
    ) -> Self {
        Self {
            instrumentation_key: instrumentation_key.into(),
            role: role.into(),
            transport,
        }
    }

    pub fn trace(
        &self,
        severity: Severity,
        message: &str,
        fields: &[Field],
        correlation: &Correlation<'_>,
    ) {
        let data = Data::MessageData(MessageData {
            ver: DATA_VERSION,
            message: message.to_string(),
            severity_level: severity_level(severity),
            properties: properties(fields, correlation),
        });
        self.submit(data, Utc::now(), correlation);
    }

    /// The exception carries the text of the first error field when there is
    /// one, with the event message kept in the `Message` property. Otherwise
    /// the event message is the exception message.
    pub fn exception(&self, message: &str, fields: &[Field], correlation: &Correlation<'_>) {
        let mut props = properties(fields, correlation);
        let error = fields.iter().find_map(|f| match &f.value {
            FieldValue::Error(text) => Some(text.as_str()),
            _ => None,
        });
        let exception_message = match error {
            Some(text) => {
                props.insert(MESSAGE_PROPERTY.to_string(), message.to_string());
                text
            }
            None => message,
        };

        let data = Data::ExceptionData(ExceptionData {
            ver: DATA_VERSION,
            exceptions: vec![ExceptionDetails {
                type_name: EXCEPTION_TYPE.to_string(),
                message: exception_message.to_string(),
                has_full_stack: false,
            }],
            severity_level: severity_level(Severity::Error),
            properties: props,
        });
        self.submit(data, Utc::now(), correlation);
    }

    pub fn dependency(
        &self,
        dependency: &Dependency,
        id: &OperationId,
        message: &str,
        fields: &[Field],
        correlation: &Correlation<'_>,
    ) {
        let mut props = properties(fields, correlation);
        props.insert(MESSAGE_PROPERTY.to_string(), message.to_string());

        let data = Data::RemoteDependencyData(RemoteDependencyData {
            ver: DATA_VERSION,
            name: dependency
                .name
                .clone()
                .unwrap_or_else(|| message.to_string()),
            id: id.to_string(),
            duration: envelope::format_delta(dependency.duration()),
            success: dependency.success,
            result_code: dependency.result_code.clone(),
            data: dependency.data.clone(),
            target: dependency.target.clone(),
            dependency_type: dependency.kind.clone(),
            properties: props,
        });
        self.submit(data, dependency.start, correlation);
    }

    pub fn request(
        &self,
        request: &Request,
        id: &OperationId,
        message: &str,
        fields: &[Field],
        correlation: &Correlation<'_>,
    ) {
        let mut props = properties(fields, correlation);
        props.insert(MESSAGE_PROPERTY.to_string(), message.to_string());

        let started = chrono::Duration::from_std(request.duration)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or_else(Utc::now);

        let data = Data::RequestData(RequestData {
            ver: DATA_VERSION,
            id: id.to_string(),
            name: format!("{} {}", request.method, request.url),
            duration: envelope::format_duration(request.duration),
            response_code: request.response_code.clone(),
            success: request.success,
            source: (!request.source.is_empty()).then(|| request.source.clone()),
            url: request.url.clone(),
            properties: props,
        });
        self.submit(data, started, correlation);
    }

    fn submit(&self, data: Data, time: DateTime<Utc>, correlation: &Correlation<'_>) {
        let mut tags = BTreeMap::new();
        tags.insert(TAG_CLOUD_ROLE.to_string(), self.role.clone());
        tags.insert(
            TAG_SDK_VERSION.to_string(),
            format!("telemux:{}", env!("CARGO_PKG_VERSION")),
        );
        if let Some(parent) = correlation.parent_id() {
            tags.insert(TAG_OPERATION_PARENT_ID.to_string(), parent.to_string());
        }

        let envelope = Envelope {
            name: format!(
                "Microsoft.ApplicationInsights.{}.{}",
                self.instrumentation_key.replace('-', ""),
                data.kind()
            ),
            time: time.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            instrumentation_key: self.instrumentation_key.clone(),
            tags,
            data,
        };
        self.transport.submit(envelope);
    }

    pub fn flush(&self, timeout: Duration) -> bool {
        self.transport.flush(timeout)
    }
}

impl std::fmt::Debug for ApmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApmClient")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Fields as string properties, followed by the correlation properties.
fn properties(fields: &[Field], correlation: &Correlation<'_>) -> BTreeMap<String, String> {
    let mut props: BTreeMap<String, String> = fields
        .iter()
        .map(|f| (f.record_key().into_owned(), f.value.to_property()))
        .collect();

    props.insert(
        SERVICE_NAME_KEY.to_string(),
        correlation.service_name.to_string(),
    );
    match correlation.parent_id() {
        Some(id) => {
            props.insert(OPERATION_ID_KEY.to_string(), id.to_string());
        }
        None => {
            props.remove(OPERATION_ID_KEY);
        }
    }
    props
}

/// The remote sink, chosen once when the facade is built.
#[derive(Debug)]
pub enum ApmSink {
    /// No instrumentation key: every record is dropped.
    Disabled,
    Enabled(ApmClient),
}

impl ApmSink {
    pub fn is_enabled(&self) -> bool {
        matches!(self, ApmSink::Enabled(_))
    }

    pub fn flush(&self, timeout: Duration) -> bool {
        match self {
            ApmSink::Disabled => true,
            ApmSink::Enabled(client) => client.flush(timeout),
        }
    }

    pub fn trace(
        &self,
        severity: Severity,
        message: &str,
        fields: &[Field],
        correlation: &Correlation<'_>,
    ) {
        if let ApmSink::Enabled(client) = self {
            client.trace(severity, message, fields, correlation);
        }
    }

    pub fn exception(&self, message: &str, fields: &[Field], correlation: &Correlation<'_>) {
        if let ApmSink::Enabled(client) = self {
            client.exception(message, fields, correlation);
        }
    }

    pub fn dependency(
        &self,
        dependency: &Dependency,
        id: &OperationId,
        message: &str,
        fields: &[Field],
        correlation: &Correlation<'_>,
    ) {
        if let ApmSink::Enabled(client) = self {
            client.dependency(dependency, id, message, fields, correlation);
        }
    }

    pub fn request(
        &self,
        request: &Request,
        id: &OperationId,
        message: &str,
        fields: &[Field],
        correlation: &Correlation<'_>,
    ) {
        if let ApmSink::Enabled(client) = self {
            client.request(request, id, message, fields, correlation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::correlation::Carrier;

    fn client() -> (ApmClient, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let client = ApmClient::new("0000-1111", "billing", transport.clone());
        (client, transport)
    }

    #[test]
    fn test_trace_envelope() {
        let (client, transport) = client();
        let carrier = Carrier::new()
            .with_service_name("billing")
            .with_operation_id("abc123");

        client.trace(
            Severity::Warning,
            "slow response",
            &[Field::int("ms", 900), Field::bool("cached", false)],
            &Correlation::resolve(&carrier),
        );

        let envelopes = transport.envelopes();
        assert_eq!(envelopes.len(), 1);
        let env = &envelopes[0];
        assert_eq!(env.name, "Microsoft.ApplicationInsights.00001111.Message");
        assert_eq!(env.instrumentation_key, "0000-1111");
        assert_eq!(env.parent_id(), Some("abc123"));
        assert_eq!(env.tags[TAG_CLOUD_ROLE], "billing");

        let props = env.properties();
        assert_eq!(props["ms"], "900");
        assert_eq!(props["cached"], "false");
        assert_eq!(props["ServiceName"], "billing");
        assert_eq!(props["OperationID"], "abc123");

        match &env.data {
            Data::MessageData(d) => {
                assert_eq!(d.message, "slow response");
                assert_eq!(d.severity_level, 2);
            }
            other => panic!("expected MessageData, got {other:?}"),
        }
    }

    #[test]
    fn test_exception_collapses_critical() {
        let (client, transport) = client();
        let carrier = Carrier::new().with_service_name("billing");

        client.exception("boom", &[], &Correlation::resolve(&carrier));

        let env = &transport.envelopes()[0];
        assert_eq!(env.parent_id(), None);
        assert!(!env.properties().contains_key("OperationID"));
        match &env.data {
            Data::ExceptionData(d) => {
                assert_eq!(d.severity_level, 3);
                assert_eq!(d.exceptions[0].message, "boom");
            }
            other => panic!("expected ExceptionData, got {other:?}"),
        }
        assert_eq!(severity_level(Severity::Critical), 3);
    }

    #[test]
    fn test_exception_uses_error_field() {
        let (client, transport) = client();
        let carrier = Carrier::new().with_service_name("billing");

        client.exception(
            "charge failed",
            &[
                Field::string("card", "visa"),
                Field::new("error", FieldValue::Error("card declined".into())),
            ],
            &Correlation::resolve(&carrier),
        );

        let env = &transport.envelopes()[0];
        match &env.data {
            Data::ExceptionData(d) => {
                assert_eq!(d.exceptions[0].message, "card declined");
                assert_eq!(d.properties["Message"], "charge failed");
                assert_eq!(d.properties["error"], "card declined");
                assert_eq!(d.properties["card"], "visa");
            }
            other => panic!("expected ExceptionData, got {other:?}"),
        }
    }

    #[test]
    fn test_dependency_negative_duration_not_clamped() {
        let (client, transport) = client();
        let carrier = Carrier::new().with_service_name("billing");
        let start = Utc::now();
        let end = start - chrono::Duration::milliseconds(10);
        let dep = Dependency::new("HTTP", "payments-api", false, start, end);

        client.dependency(
            &dep,
            &OperationId::from_string("dep-1"),
            "charge card",
            &[],
            &Correlation::resolve(&carrier),
        );

        match &transport.envelopes()[0].data {
            Data::RemoteDependencyData(d) => {
                assert_eq!(d.duration, "-0.00:00:00.0100000");
                assert_eq!(d.name, "charge card");
                assert_eq!(d.id, "dep-1");
                assert!(!d.success);
                assert_eq!(d.properties["Message"], "charge card");
            }
            other => panic!("expected RemoteDependencyData, got {other:?}"),
        }
    }

    #[test]
    fn test_request_envelope() {
        let (client, transport) = client();
        let carrier = Carrier::new()
            .with_service_name("billing")
            .with_operation_id("op-7");
        let req = Request::new(
            "POST",
            "/charges",
            Duration::from_millis(120),
            "201",
            true,
            "",
        );

        client.request(
            &req,
            &OperationId::from_string("req-1"),
            "charge created",
            &[],
            &Correlation::resolve(&carrier),
        );

        let env = &transport.envelopes()[0];
        assert_eq!(env.parent_id(), Some("op-7"));
        match &env.data {
            Data::RequestData(d) => {
                assert_eq!(d.name, "POST /charges");
                assert_eq!(d.duration, "0.00:00:00.1200000");
                assert_eq!(d.response_code, "201");
                assert_eq!(d.source, None);
            }
            other => panic!("expected RequestData, got {other:?}"),
        }
    }

    #[test]
    fn test_disabled_sink_is_noop() {
        let sink = ApmSink::Disabled;
        let carrier = Carrier::new().with_service_name("billing");
        sink.trace(
            Severity::Information,
            "ignored",
            &[],
            &Correlation::resolve(&carrier),
        );
        assert!(!sink.is_enabled());
    }
}
