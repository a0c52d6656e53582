//! Errors raised while building the telemetry facade.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that prevent a [`Telemetry`](super::Telemetry) facade from being built.
///
/// A missing APM instrumentation key is not among them: the facade then
/// simply runs without the remote sink.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log level '{0}' (expected debug, info, warn or error)")]
    InvalidLogLevel(String),

    #[error("Failed to open log output {path}: {source}")]
    LogOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
