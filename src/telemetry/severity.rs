//! Sink-independent severity levels.

use std::fmt;

/// Severity of a telemetry event, ordered from least to most severe.
///
/// Each sink owns its own translation of these levels; the translations need
/// not have the same granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Verbose => "verbose",
            Severity::Information => "information",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}
