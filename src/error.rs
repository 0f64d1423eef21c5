//! Error handling for the hadoop-unit fixture.
use std::{path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

/// Defines all possible errors raised while driving a fixture.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The launcher could not be spawned (missing, not executable, ...).
    #[error("failed to launch {name}: {source}")]
    Launch {
        /// Fixture name.
        name: String,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// Enabled services did not become ready within the boot timeout.
    #[error("*** failed to launch {name} (timeout after {waited:?}) ***\n{bootlog}")]
    BootTimeout {
        /// Fixture name.
        name: String,
        /// How long the fixture waited.
        waited: Duration,
        /// Full boot log at the time of failure.
        bootlog: String,
    },

    /// The child exited before the enabled services became ready.
    #[error("*** failed to launch {name} ({status}) ***\n{bootlog}")]
    EarlyExit {
        /// Fixture name.
        name: String,
        /// Exit status reported by the child.
        status: ExitStatus,
        /// Full boot log at the time of failure.
        bootlog: String,
    },

    /// The server did not shut down within the stop timeout and was killed.
    #[error("*** failed to shutdown {name} (timeout after {waited:?}) ***\n{bootlog}")]
    ShutdownTimeout {
        /// Fixture name.
        name: String,
        /// How long the fixture waited before killing.
        waited: Duration,
        /// Full boot log at the time of failure.
        bootlog: String,
    },

    /// A PID marker from a previous run is still present.
    #[error(
        "another server is already running, please kill it and delete {}",
        pid_file.display()
    )]
    StaleRun {
        /// Location of the marker.
        pid_file: PathBuf,
    },

    /// The boot log could not be opened or read.
    #[error("failed to open file {}: {source}", path.display())]
    BootLog {
        /// Location of the boot log.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error reading or writing a property file.
    #[error("Property file error: {0}")]
    Properties(#[from] PropertiesError),

    /// Error loading or validating the fixture configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Any other I/O failure (scratch directory creation, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for property file operations.
#[derive(Debug, Error)]
pub enum PropertiesError {
    /// The file could not be read.
    #[error("Failed to read property file {}: {source}", path.display())]
    ReadError {
        /// File that was being read.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The merged mapping could not be written back.
    #[error("Failed to write property file {}: {source}", path.display())]
    WriteError {
        /// File that was being written.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The file content could not be decoded or encoded as `.properties`.
    #[error("Malformed property file {}: {source}", path.display())]
    Format {
        /// File that was being read or written.
        path: PathBuf,
        /// Parser error, carrying the line number when known.
        #[source]
        source: java_properties::PropertiesError,
    },
}

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the configuration file.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// The configuration references an unset environment variable.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An enabled service is not part of the known catalog.
    #[error("Unknown service '{0}'")]
    UnknownService(String),

    /// A duration string could not be parsed.
    #[error("Invalid duration value: '{0}'")]
    InvalidDuration(String),

    /// A signal name could not be parsed.
    #[error("Invalid signal name: '{0}'")]
    InvalidSignal(String),

    /// Log markers were configured for a service that is not in the catalog.
    #[error("Log marker configured for unknown service '{0}'")]
    UnknownMarkerService(String),
}
