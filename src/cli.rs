//! Command-line interface for hufix.
use std::{str::FromStr, time::Duration};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::config::parse_duration;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

fn parse_hold(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|err| err.to_string())
}

/// Command-line interface for hufix.
#[derive(Parser)]
#[command(name = "hufix", version, author)]
#[command(
    about = "Run a hadoop-unit standalone server as a disposable test fixture",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for hufix.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the server, wait until it is ready and keep it up until interrupted.
    Run {
        /// Path to the fixture configuration (defaults to `hufix.yaml`).
        #[arg(short, long, default_value = "hufix.yaml")]
        config: String,

        /// Stop automatically after this long (e.g., "30", "10s", "5m").
        #[arg(long, value_name = "DURATION", value_parser = parse_hold)]
        hold: Option<Duration>,
    },

    /// Probe the enabled services without starting anything.
    Status {
        /// Path to the fixture configuration (defaults to `hufix.yaml`).
        #[arg(short, long, default_value = "hufix.yaml")]
        config: String,

        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show the tail of the boot log.
    Logs {
        /// Path to the fixture configuration (defaults to `hufix.yaml`).
        #[arg(short, long, default_value = "hufix.yaml")]
        config: String,

        /// Number of lines to show (default: 50).
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },

    /// Print the launcher that would be used.
    Locate {
        /// Path to the fixture configuration (defaults to `hufix.yaml`).
        #[arg(short, long, default_value = "hufix.yaml")]
        config: String,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
