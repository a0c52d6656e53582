//! telemux - correlated telemetry fan-out
//!
//! Emits every event to a local structured log and, when configured, to an
//! Application Insights compatible APM backend, stamped with the request's
//! operation id and the service name.

pub mod config;
pub mod telemetry;

pub use telemetry::{Carrier, Field, Severity, Telemetry, TelemetryConfig, TelemetryError};
