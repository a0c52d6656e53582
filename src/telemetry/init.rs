//! Diagnostics initialization.
//!
//! Installs a `tracing` subscriber for telemux's own diagnostics (delivery
//! failures, degraded APM setup). Diagnostics go to stderr so they never
//! interleave with structured records written to stdout.

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Configuration for diagnostics output.
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    /// Default diagnostics level
    pub default_level: Level,
    /// Whether to include file and line numbers
    pub include_file_line: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
    /// Custom filter directive (overrides default_level if set)
    pub filter_directive: Option<String>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            default_level: Level::WARN,
            include_file_line: false,
            ansi_colors: false,
            filter_directive: None,
        }
    }
}

impl DiagnosticsConfig {
    /// Verbose diagnostics for troubleshooting.
    pub fn verbose() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_file_line: true,
            ..Self::default()
        }
    }
}

/// Install the diagnostics subscriber.
///
/// Fails if the filter directive is invalid or a global subscriber is
/// already set.
pub fn init_diagnostics(config: &DiagnosticsConfig) -> anyhow::Result<()> {
    let filter = if let Some(ref directive) = config.filter_directive {
        EnvFilter::try_new(directive)?
    } else {
        EnvFilter::from_default_env()
            .add_directive(format!("telemux={}", config.default_level).parse()?)
    };

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi_colors)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = DiagnosticsConfig::default();
        assert_eq!(config.default_level, Level::WARN);
        assert!(config.filter_directive.is_none());
    }

    #[test]
    fn test_config_verbose() {
        let config = DiagnosticsConfig::verbose();
        assert_eq!(config.default_level, Level::DEBUG);
        assert!(config.include_file_line);
    }

    #[test]
    fn test_invalid_directive_rejected() {
        let config = DiagnosticsConfig {
            filter_directive: Some("telemux=notalevel".to_string()),
            ..DiagnosticsConfig::default()
        };
        assert!(init_diagnostics(&config).is_err());
    }
}
