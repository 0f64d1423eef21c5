//! Configuration management for the hadoop-unit fixture.
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::{
    collections::BTreeMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::constants::{
    CONF_DIR, DEFAULT_BOOT_TIMEOUT, DEFAULT_FIXTURE_NAME, DEFAULT_HADOOP_UNIT_PATH,
    DEFAULT_PROPERTIES_FILE, DEFAULT_PROPERTY_OVERLAY, DEFAULT_STOP_TIMEOUT,
    LAUNCHER_NAME, PID_MARKER_DIR, SERVICES_PROPERTIES_FILE,
};
use crate::error::ConfigError;

/// Catalog of sub-services hadoop-unit knows how to run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, AsRefStr, IntoStaticStr,
    Display, EnumIter,
)]
pub enum ServiceName {
    #[strum(serialize = "hdfs")]
    Hdfs,
    #[strum(serialize = "zookeeper")]
    Zookeeper,
    #[strum(serialize = "alluxio")]
    Alluxio,
    #[strum(serialize = "hivemeta")]
    Hivemeta,
    #[strum(serialize = "hiveserver2")]
    Hiveserver2,
    #[strum(serialize = "kafka")]
    Kafka,
    #[strum(serialize = "hbase")]
    Hbase,
    #[strum(serialize = "solrcloud")]
    Solrcloud,
    #[strum(serialize = "oozie")]
    Oozie,
    #[strum(serialize = "mongodb")]
    Mongodb,
    #[strum(serialize = "cassandra")]
    Cassandra,
    #[strum(serialize = "elasticsearch")]
    Elasticsearch,
    #[strum(serialize = "neo4j")]
    Neo4j,
    #[strum(serialize = "knox")]
    Knox,
    #[strum(serialize = "redis")]
    Redis,
    #[strum(serialize = "yarn")]
    Yarn,
    #[strum(serialize = "confluent_kafka_rest")]
    ConfluentKafkaRest,
    #[strum(serialize = "confluent_schemaregistry")]
    ConfluentSchemaregistry,
    #[strum(serialize = "confluent_kafka")]
    ConfluentKafka,
    #[strum(serialize = "confluent_ksql_rest")]
    ConfluentKsqlRest,
}

/// What to do with enabled service names outside the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownServerPolicy {
    /// Refuse to build the fixture.
    #[default]
    Reject,
    /// Log and drop the name.
    Ignore,
}

/// Signal delivered to the child when stopping.
///
/// Resolved once when the configuration is built instead of being looked up
/// from global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminateSignal(pub nix::sys::signal::Signal);

impl TerminateSignal {
    /// The platform's standard graceful termination signal.
    pub fn platform_default() -> Self {
        Self(nix::sys::signal::Signal::SIGTERM)
    }

    pub fn signal(&self) -> nix::sys::signal::Signal {
        self.0
    }
}

impl Default for TerminateSignal {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl FromStr for TerminateSignal {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim().to_ascii_uppercase();
        let name = if trimmed.starts_with("SIG") {
            trimmed
        } else {
            format!("SIG{trimmed}")
        };
        nix::sys::signal::Signal::from_str(&name)
            .map(Self)
            .map_err(|_| ConfigError::InvalidSignal(raw.to_string()))
    }
}

impl<'de> Deserialize<'de> for TerminateSignal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Options recognised by the fixture.
///
/// Every option has a named field; anything else in a YAML file lands in
/// `extra` and is only reachable through [`FixtureConfig::setting`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Fixture name; the boot log is `<base_dir>/<name>.log`.
    pub name: String,
    /// hadoop-unit installation root.
    pub hadoop_unit_path: PathBuf,
    /// Working directory. A private scratch directory is used when unset.
    pub base_dir: Option<PathBuf>,
    /// Catalog names of the services to run.
    pub enabled_servers: Vec<String>,
    /// Policy for names outside the catalog.
    pub unknown_servers: UnknownServerPolicy,
    /// Treat services without a health probe as never healthy.
    pub require_health_probe: bool,
    /// Overlay for `hadoop-unit-default.properties`.
    pub default_properties: BTreeMap<String, String>,
    /// Overlay for `hadoop.properties`, applied after the enable flags.
    pub service_properties: BTreeMap<String, String>,
    /// Time allowed for enabled services to become ready.
    #[serde(deserialize_with = "deserialize_duration")]
    pub boot_timeout: Duration,
    /// Time allowed for shutdown before the server is killed.
    #[serde(deserialize_with = "deserialize_duration")]
    pub stop_timeout: Duration,
    /// Signal sent to the child on stop.
    pub terminate_signal: TerminateSignal,
    /// Spawn the server in its own process group.
    pub own_process_group: bool,
    /// Ask the kernel to signal the server if this process dies (Linux only).
    pub kill_on_parent_exit: bool,
    /// Boot-log lines that mark a service as healthy.
    pub log_markers: BTreeMap<String, String>,
    /// Unrecognised settings.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_FIXTURE_NAME.to_string(),
            hadoop_unit_path: PathBuf::from(DEFAULT_HADOOP_UNIT_PATH),
            base_dir: None,
            enabled_servers: vec![ServiceName::Hdfs.to_string()],
            unknown_servers: UnknownServerPolicy::default(),
            require_health_probe: false,
            default_properties: DEFAULT_PROPERTY_OVERLAY
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            service_properties: BTreeMap::new(),
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            terminate_signal: TerminateSignal::platform_default(),
            own_process_group: true,
            kill_on_parent_exit: true,
            log_markers: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl FixtureConfig {
    /// Looks up a setting that has no named field.
    pub fn setting(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.extra.get(key)
    }

    /// Validates `enabled_servers` against the catalog, preserving order and
    /// dropping duplicates.
    pub fn enabled_services(&self) -> Result<Vec<ServiceName>, ConfigError> {
        let mut services = Vec::new();
        for raw in &self.enabled_servers {
            match ServiceName::from_str(raw.trim()) {
                Ok(service) => {
                    if !services.contains(&service) {
                        services.push(service);
                    }
                }
                Err(_) => match self.unknown_servers {
                    UnknownServerPolicy::Reject => {
                        return Err(ConfigError::UnknownService(raw.clone()));
                    }
                    UnknownServerPolicy::Ignore => {
                        tracing::warn!("Ignoring unknown service '{raw}'");
                    }
                },
            }
        }
        Ok(services)
    }

    /// Resolves `log_markers` keys to catalog services.
    pub fn service_log_markers(
        &self,
    ) -> Result<BTreeMap<ServiceName, String>, ConfigError> {
        self.log_markers
            .iter()
            .map(|(service, marker)| {
                ServiceName::from_str(service.trim())
                    .map(|name| (name, marker.clone()))
                    .map_err(|_| ConfigError::UnknownMarkerService(service.clone()))
            })
            .collect()
    }

    /// Enable/disable flag for every catalog service, followed by the
    /// `service_properties` overlay.
    pub fn services_overlay(
        &self,
        enabled: &[ServiceName],
    ) -> Vec<(String, String)> {
        let mut overlay: Vec<(String, String)> = ServiceName::iter()
            .map(|service| {
                (
                    service.to_string(),
                    enabled.contains(&service).to_string(),
                )
            })
            .collect();
        overlay.extend(
            self.service_properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        overlay
    }

    /// `<root>/conf/hadoop-unit-default.properties`.
    pub fn default_properties_path(&self) -> PathBuf {
        self.hadoop_unit_path
            .join(CONF_DIR)
            .join(DEFAULT_PROPERTIES_FILE)
    }

    /// `<root>/conf/hadoop.properties`.
    pub fn services_properties_path(&self) -> PathBuf {
        self.hadoop_unit_path
            .join(CONF_DIR)
            .join(SERVICES_PROPERTIES_FILE)
    }

    /// `<root>/logs/hadoop-unit-standalone.pid`.
    pub fn pid_marker_path(&self) -> PathBuf {
        self.hadoop_unit_path
            .join(PID_MARKER_DIR)
            .join(format!("{LAUNCHER_NAME}.pid"))
    }
}

impl fmt::Display for FixtureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}; services: {})",
            self.name,
            self.hadoop_unit_path.display(),
            self.enabled_servers.join(",")
        )
    }
}

/// Parses a duration in the format `<number>[ms|s|m|h]`; bare numbers are seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }

    let invalid = || ConfigError::InvalidDuration(raw.to_string());

    if let Some(stripped) = value.strip_suffix("ms") {
        let amount: u64 = stripped.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().map_err(|_| invalid())?;
    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Expands `$VAR` and `${VAR}` references within a string.
///
/// `$$` produces a literal `$`. A `${` that does not enclose a plain variable
/// name, such as the `${hadoop.tmp.dir}` placeholders Hadoop resolves itself,
/// is left untouched.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("env var pattern is valid");

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let Some(var_name) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
            return "$".to_string();
        };
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var_name) => Err(ConfigError::MissingEnvVar(var_name)),
        None => Ok(result.into_owned()),
    }
}

/// Loads and parses a YAML fixture configuration, expanding environment variables.
///
/// A relative `base_dir` or `hadoop_unit_path` is resolved against the
/// directory containing the file.
pub fn load_config(config_path: &Path) -> Result<FixtureConfig, ConfigError> {
    let content = fs::read_to_string(config_path).map_err(|e| {
        ConfigError::ReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content)?;
    let mut config: FixtureConfig = serde_yaml::from_str(&expanded)?;

    let base_path = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    if config.hadoop_unit_path.is_relative() {
        config.hadoop_unit_path = base_path.join(&config.hadoop_unit_path);
    }
    if let Some(dir) = config.base_dir.as_mut()
        && dir.is_relative()
    {
        *dir = base_path.join(&*dir);
    }

    Ok(config)
}
