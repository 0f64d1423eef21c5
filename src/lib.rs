//! hadoop-unit-fixture launches a hadoop-unit standalone server for integration
//! tests and tears it down afterwards. It patches the installation's property
//! files, waits until the enabled services are listening and healthy, and
//! makes sure no server process outlives the test run.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared constants.
pub mod constants;

/// Error handling.
pub mod error;

/// Server lifecycle management.
pub mod fixture;

/// Launcher lookup.
pub mod locate;

/// Boot log management.
pub mod logs;

/// Readiness probes.
pub mod probe;

/// Java-style property files.
pub mod properties;

/// Test helpers shared by unit and integration tests.
pub mod test_utils;

pub use config::{FixtureConfig, ServiceName, load_config};
pub use error::{ConfigError, FixtureError, PropertiesError};
pub use fixture::{FixtureState, HadoopFixture, ShutdownOutcome};
pub use probe::ServiceReadiness;
