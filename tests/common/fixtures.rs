//! Facade fixtures backed by in-memory sinks.

use std::sync::Arc;

use serde_json::Value;
use telemux::telemetry::{MemoryTransport, MemoryWriter};
use telemux::{Telemetry, TelemetryConfig};

/// A facade whose log output and APM submissions are captured in memory.
pub struct TelemetryFixture {
    pub telemetry: Telemetry,
    pub output: MemoryWriter,
    pub transport: Arc<MemoryTransport>,
}

impl TelemetryFixture {
    /// Local-only facade (empty instrumentation key).
    pub fn local(service: &str, level: &str) -> Self {
        Self::build(TelemetryConfig::new("", service, level, 0))
    }

    /// Facade with the APM sink enabled.
    pub fn with_apm(service: &str, level: &str) -> Self {
        Self::build(TelemetryConfig::new(
            "11111111-2222-3333-4444-555555555555",
            service,
            level,
            0,
        ))
    }

    pub fn build(config: TelemetryConfig) -> Self {
        let output = MemoryWriter::new();
        let transport = Arc::new(MemoryTransport::new());
        let telemetry = Telemetry::with_sinks(config, output.boxed(), transport.clone())
            .expect("facade should build");
        Self {
            telemetry,
            output,
            transport,
        }
    }

    /// Structured records written so far.
    pub fn records(&self) -> Vec<Value> {
        self.output.records()
    }

    /// The only structured record written so far.
    pub fn single_record(&self) -> Value {
        let records = self.records();
        assert_eq!(
            records.len(),
            1,
            "expected exactly one record, got {records:?}"
        );
        records.into_iter().next().unwrap()
    }
}
