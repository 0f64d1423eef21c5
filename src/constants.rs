//! Constants and default values for the hadoop-unit fixture.
//!
//! This module centralizes file names, probe strings and timing values used
//! throughout the crate so the on-disk contract with hadoop-unit lives in one
//! place.

use std::time::Duration;

// ============================================================================
// Installation Layout
// ============================================================================

/// Name of the hadoop-unit launcher executable.
pub const LAUNCHER_NAME: &str = "hadoop-unit-standalone";

/// Subdirectories of the installation root probed for the launcher, in order.
pub const LAUNCHER_SUBDIRS: &[&str] = &["bin"];

/// Directory (relative to the installation root) holding property files.
pub const CONF_DIR: &str = "conf";

/// Property file with test-scoped paths and ports.
pub const DEFAULT_PROPERTIES_FILE: &str = "hadoop-unit-default.properties";

/// Property file with one boolean flag per catalog service.
pub const SERVICES_PROPERTIES_FILE: &str = "hadoop.properties";

/// Directory (relative to the installation root) where the launcher writes its PID marker.
pub const PID_MARKER_DIR: &str = "logs";

/// Default installation root.
pub const DEFAULT_HADOOP_UNIT_PATH: &str = "/usr/local/hadoop-unit";

/// Default fixture name, used for the boot log file.
pub const DEFAULT_FIXTURE_NAME: &str = "hadoop-server";

// ============================================================================
// Launcher Verbs
// ============================================================================

/// Verb that runs hadoop-unit attached to the console.
pub const CONSOLE_VERB: &str = "console";

/// Verb that asks a running hadoop-unit to shut down.
pub const STOP_VERB: &str = "stop";

// ============================================================================
// Timing
// ============================================================================

/// Default time allowed for enabled services to become ready.
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(240);

/// Default time allowed for the server to shut down before it is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between readiness and shutdown checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timeout applied to each HTTP health probe request.
pub const HTTP_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Health Probes
// ============================================================================

/// Property key holding the NameNode web port.
pub const NAMENODE_HTTP_PORT_KEY: &str = "hdfs.namenode.http.port";

/// JMX bean queried to learn the NameNode state.
pub const NAMENODE_STATUS_BEAN: &str = "Hadoop:service=NameNode,name=NameNodeStatus";

/// Literal the JMX response must contain for the NameNode to count as active.
pub const ACTIVE_STATE_MARKER: &str = r#""State" : "active""#;

/// Substring that identifies a port entry in the default properties.
pub const PORT_KEY_FRAGMENT: &str = ".port";

// ============================================================================
// Default Property Overlays
// ============================================================================

/// Default overlay for `hadoop-unit-default.properties`.
pub const DEFAULT_PROPERTY_OVERLAY: &[(&str, &str)] = &[
    ("hdfs.test.file", "/tmp/testing"),
    ("maven.local.repo", "/tmp/m2"),
];
