//! telemux CLI entry point

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use telemux::config::{keys, ConfigSource, EnvSource, FileSource};
use telemux::telemetry::{init_diagnostics, DiagnosticsConfig, Field, FieldValue};
use telemux::{Telemetry, TelemetryConfig};

/// How long `emit` waits for APM delivery before exiting
const FLUSH_TIMEOUT_SECS: u64 = 5;

#[derive(Parser)]
#[command(name = "telemux")]
#[command(author, version, about = "Correlated telemetry fan-out", long_about = None)]
struct Cli {
    /// YAML config file (defaults to environment variables)
    #[arg(short, long, global = true, env = "TELEMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit a single event
    Emit {
        /// Event severity
        #[arg(value_enum)]
        level: Level,
        /// Event message
        message: String,
        /// Attribute as key=value (repeatable)
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<Field>,
        /// Operation id to correlate the event with
        #[arg(short, long)]
        operation_id: Option<String>,
    },
    /// Show the resolved configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

/// Parse `key=value`. Integers and booleans keep their type.
fn parse_field(s: &str) -> Result<Field, String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }

    let value = if let Ok(i) = value.parse::<i64>() {
        FieldValue::Int(i)
    } else if let Ok(b) = value.parse::<bool>() {
        FieldValue::Bool(b)
    } else {
        FieldValue::String(value.to_string())
    };
    Ok(Field::new(key, value))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let diagnostics = if cli.verbose {
        DiagnosticsConfig::verbose()
    } else {
        DiagnosticsConfig::default()
    };
    init_diagnostics(&diagnostics)?;

    let source: Box<dyn ConfigSource> = match &cli.config {
        Some(path) => Box::new(FileSource::load(path)?),
        None => Box::new(EnvSource),
    };
    let config = TelemetryConfig::from_source(source.as_ref(), 0);

    match cli.command {
        Commands::Emit {
            level,
            message,
            fields,
            operation_id,
        } => {
            let telemetry = Telemetry::new(config)?;
            if telemetry.config().service_name().is_empty() {
                anyhow::bail!("{} is not set", keys::SERVICE_NAME);
            }
            let mut carrier = telemetry.carrier();
            if let Some(id) = operation_id {
                carrier = carrier.with_operation_id(id);
            }

            match level {
                Level::Debug => telemetry.debug(&carrier, &message, &fields),
                Level::Info => telemetry.info(&carrier, &message, &fields),
                Level::Warn => telemetry.warn(&carrier, &message, &fields),
                Level::Error => telemetry.error(&carrier, &message, &fields),
                Level::Critical => telemetry.critical(&carrier, &message, &fields),
            }

            if !telemetry.flush(Duration::from_secs(FLUSH_TIMEOUT_SECS)) {
                tracing::warn!("APM delivery still pending after {FLUSH_TIMEOUT_SECS}s");
            }
        }
        Commands::Config => {
            let key = if config.apm_configured() {
                config.redacted_instrumentation_key()
            } else {
                "<not set>".to_string()
            };
            println!("service_name: {}", config.service_name());
            println!("log_level: {}", config.log_level());
            println!("instrumentation_key: {key}");
            println!("apm_endpoint: {}", config.apm_endpoint());
            println!(
                "apm: {}",
                if config.apm_configured() {
                    "enabled"
                } else {
                    "disabled"
                }
            );
        }
    }

    Ok(())
}
