//! Structured log sink.
//!
//! Writes one newline-delimited JSON object per event. Correlation values are
//! carried as attributes; the message text is written exactly as given.

use std::fs::OpenOptions;
use std::io::Write;
use std::panic::Location;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

use super::config::LogOutput;
use super::correlation::{Correlation, OPERATION_ID_KEY, SERVICE_NAME_KEY};
use super::error::TelemetryError;
use super::field::Field;
use super::severity::Severity;

const TIME_KEY: &str = "ts";
const LEVEL_KEY: &str = "level";
const CALLER_KEY: &str = "caller";
const MESSAGE_KEY: &str = "msg";

/// Minimum level written by the log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(TelemetryError::InvalidLogLevel(s.to_string())),
        }
    }
}

/// Severity to (`tracing` level used for filtering, level label written).
fn level_for(severity: Severity) -> (Level, &'static str) {
    match severity {
        Severity::Verbose => (Level::DEBUG, "debug"),
        Severity::Information => (Level::INFO, "info"),
        Severity::Warning => (Level::WARN, "warn"),
        Severity::Error => (Level::ERROR, "error"),
        Severity::Critical => (Level::ERROR, "critical"),
    }
}

/// Writes structured records to a [`MakeWriter`] destination.
pub struct LogSink {
    writer: BoxMakeWriter,
    threshold: LevelFilter,
    write_failed: AtomicBool,
}

impl LogSink {
    /// Build a sink for `output` at `level`.
    pub fn new(level: &str, output: &LogOutput) -> Result<Self, TelemetryError> {
        let writer = match output {
            LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogOutput::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| TelemetryError::LogOutput {
                        path: path.clone(),
                        source,
                    })?;
                BoxMakeWriter::new(Mutex::new(file))
            }
        };
        Self::with_writer(level, writer)
    }

    /// Build a sink writing to an arbitrary destination.
    pub fn with_writer(level: &str, writer: BoxMakeWriter) -> Result<Self, TelemetryError> {
        let level: LogLevel = level.parse()?;
        Ok(Self {
            writer,
            threshold: level.filter(),
            write_failed: AtomicBool::new(false),
        })
    }

    /// Whether a record at `severity` would be written.
    pub fn enabled(&self, severity: Severity) -> bool {
        level_for(severity).0 <= self.threshold
    }

    /// Write one record. Failures are reported through diagnostics, never
    /// returned.
    pub fn emit(
        &self,
        severity: Severity,
        caller: &Location<'_>,
        message: &str,
        fields: &[Field],
        correlation: &Correlation<'_>,
    ) {
        if !self.enabled(severity) {
            return;
        }

        let record = build_record(severity, caller, message, fields, correlation);
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => {
                self.report_failure(&e);
                return;
            }
        };
        line.push(b'\n');

        let mut writer = self.writer.make_writer();
        if let Err(e) = writer.write_all(&line).and_then(|_| writer.flush()) {
            self.report_failure(&e);
        }
    }

    fn report_failure(&self, error: &dyn std::fmt::Display) {
        if !self.write_failed.swap(true, Ordering::Relaxed) {
            tracing::warn!(error = %error, "Failed to write structured log record");
        } else {
            tracing::debug!(error = %error, "Failed to write structured log record");
        }
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

fn build_record(
    severity: Severity,
    caller: &Location<'_>,
    message: &str,
    fields: &[Field],
    correlation: &Correlation<'_>,
) -> Map<String, Value> {
    let mut record = Map::new();

    for field in fields {
        record.insert(field.record_key().into_owned(), field.value.to_json());
    }

    record.insert(
        SERVICE_NAME_KEY.to_string(),
        Value::from(correlation.service_name),
    );
    match correlation.parent_id() {
        Some(id) => {
            record.insert(OPERATION_ID_KEY.to_string(), Value::from(id));
        }
        None => {
            record.remove(OPERATION_ID_KEY);
        }
    }

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    record.insert(TIME_KEY.to_string(), Value::from(ts));
    record.insert(LEVEL_KEY.to_string(), Value::from(level_for(severity).1));
    record.insert(
        CALLER_KEY.to_string(),
        Value::from(format!("{}:{}", caller.file(), caller.line())),
    );
    record.insert(MESSAGE_KEY.to_string(), Value::from(message));

    record
}

/// Shared in-memory log destination.
///
/// Every writer created from it appends to the same buffer; records can be
/// read back parsed.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw buffered output.
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Parsed records, one per non-empty line. Lines that are not JSON are
    /// skipped.
    pub fn records(&self) -> Vec<Value> {
        self.contents()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    /// Boxed writer suitable for [`Telemetry::with_sinks`](super::Telemetry::with_sinks).
    pub fn boxed(&self) -> BoxMakeWriter {
        BoxMakeWriter::new(self.clone())
    }
}

/// Writer handed out by [`MemoryWriter`].
#[derive(Debug)]
pub struct MemoryWriterGuard {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for MemoryWriterGuard {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MemoryWriter {
    type Writer = MemoryWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        MemoryWriterGuard {
            buf: Arc::clone(&self.buf),
        }
    }
}
