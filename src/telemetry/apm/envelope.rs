//! Application Insights ingestion envelopes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Schema version of every `baseData` payload.
pub const DATA_VERSION: u32 = 2;

/// Envelope tag holding the service role.
pub const TAG_CLOUD_ROLE: &str = "ai.cloud.role";
/// Envelope tag linking a record to its parent operation.
pub const TAG_OPERATION_PARENT_ID: &str = "ai.operation.parentId";
/// Envelope tag naming the emitting SDK.
pub const TAG_SDK_VERSION: &str = "ai.internal.sdkVersion";

/// One telemetry item as accepted by the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: String,
    pub time: String,
    #[serde(rename = "iKey")]
    pub instrumentation_key: String,
    pub tags: BTreeMap<String, String>,
    pub data: Data,
}

impl Envelope {
    /// The parent operation id, if the record was linked to one.
    pub fn parent_id(&self) -> Option<&str> {
        self.tags.get(TAG_OPERATION_PARENT_ID).map(String::as_str)
    }

    /// Custom properties of the payload.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        match &self.data {
            Data::MessageData(d) => &d.properties,
            Data::ExceptionData(d) => &d.properties,
            Data::RemoteDependencyData(d) => &d.properties,
            Data::RequestData(d) => &d.properties,
        }
    }
}

/// Payload, tagged with its `baseType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "baseType", content = "baseData")]
pub enum Data {
    MessageData(MessageData),
    ExceptionData(ExceptionData),
    RemoteDependencyData(RemoteDependencyData),
    RequestData(RequestData),
}

impl Data {
    /// Record kind used in the envelope name.
    pub fn kind(&self) -> &'static str {
        match self {
            Data::MessageData(_) => "Message",
            Data::ExceptionData(_) => "Exception",
            Data::RemoteDependencyData(_) => "RemoteDependency",
            Data::RequestData(_) => "Request",
        }
    }
}

/// Trace record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub ver: u32,
    pub message: String,
    pub severity_level: u8,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub type_name: String,
    pub message: String,
    pub has_full_stack: bool,
}

/// Exception record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionData {
    pub ver: u32,
    pub exceptions: Vec<ExceptionDetails>,
    pub severity_level: u8,
    pub properties: BTreeMap<String, String>,
}

/// Outbound call record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDependencyData {
    pub ver: u32,
    pub name: String,
    pub id: String,
    pub duration: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub target: String,
    #[serde(rename = "type")]
    pub dependency_type: String,
    pub properties: BTreeMap<String, String>,
}

/// Inbound call record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub ver: u32,
    pub id: String,
    pub name: String,
    pub duration: String,
    pub response_code: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub url: String,
    pub properties: BTreeMap<String, String>,
}

const TICKS_PER_SECOND: u128 = 10_000_000;
const TICKS_PER_MINUTE: u128 = 60 * TICKS_PER_SECOND;
const TICKS_PER_HOUR: u128 = 60 * TICKS_PER_MINUTE;
const TICKS_PER_DAY: u128 = 24 * TICKS_PER_HOUR;

/// Format a duration as `d.hh:mm:ss.fffffff`.
pub fn format_duration(duration: std::time::Duration) -> String {
    format_ticks(false, duration.as_nanos() / 100)
}

/// Format a signed interval as `[-]d.hh:mm:ss.fffffff`. Negative intervals
/// are kept as is.
pub fn format_delta(delta: chrono::Duration) -> String {
    let ticks: i128 = match delta.num_nanoseconds() {
        Some(nanos) => i128::from(nanos) / 100,
        None => i128::from(delta.num_milliseconds()) * 10_000,
    };
    format_ticks(ticks < 0, ticks.unsigned_abs())
}

fn format_ticks(negative: bool, ticks: u128) -> String {
    let days = ticks / TICKS_PER_DAY;
    let hours = (ticks % TICKS_PER_DAY) / TICKS_PER_HOUR;
    let minutes = (ticks % TICKS_PER_HOUR) / TICKS_PER_MINUTE;
    let seconds = (ticks % TICKS_PER_MINUTE) / TICKS_PER_SECOND;
    let fraction = ticks % TICKS_PER_SECOND;
    let sign = if negative { "-" } else { "" };
    format!("{sign}{days}.{hours:02}:{minutes:02}:{seconds:02}.{fraction:07}")
}
