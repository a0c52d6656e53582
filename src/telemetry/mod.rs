//! Correlated telemetry fan-out.
//!
//! This module provides:
//! - A typed, request-scoped correlation [`Carrier`]
//! - Typed [`Field`] attributes and a sink-independent [`Severity`]
//! - A structured JSON log sink and an Application Insights APM sink
//! - The [`Telemetry`] facade that stamps, routes and emits every event
//!
//! The APM sink is optional: without an instrumentation key the facade logs
//! locally only.

pub mod apm;
mod config;
mod correlation;
mod error;
mod facade;
mod field;
mod init;
pub mod log_sink;
mod severity;

pub use apm::{ApmTransport, Dependency, HttpTransport, MemoryTransport, Request};
pub use config::{LogOutput, TelemetryConfig, DEFAULT_APM_ENDPOINT};
pub use correlation::{
    with_operation_id, with_service_name, Carrier, CarrierKey, OperationId, OPERATION_ID_KEY,
    SERVICE_NAME_KEY,
};
pub use error::TelemetryError;
pub use facade::Telemetry;
pub use field::{Field, FieldValue};
pub use init::{init_diagnostics, DiagnosticsConfig};
pub use log_sink::{LogLevel, MemoryWriter};
pub use severity::Severity;
