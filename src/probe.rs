//! Readiness probing for enabled hadoop-unit services.
//!
//! Two independent signals are combined per service: the expected port is
//! bound on loopback, and an application-level probe reports the service as
//! healthy. Neither signal alone proves readiness; a bound socket says nothing
//! about the layer above it.
use std::{
    collections::BTreeMap,
    io::ErrorKind,
    net::{Ipv4Addr, TcpListener},
};

use reqwest::blocking::Client;
use serde::Serialize;
use tracing::debug;

use crate::{
    config::ServiceName,
    constants::{
        ACTIVE_STATE_MARKER, HTTP_PROBE_TIMEOUT, NAMENODE_HTTP_PORT_KEY,
        NAMENODE_STATUS_BEAN, PORT_KEY_FRAGMENT,
    },
    error::FixtureError,
    logs::BootLog,
    properties::Properties,
};

/// Application-level health check strategy for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthProbe {
    /// Query the NameNode JMX servlet for an active state.
    NameNodeJmx,
    /// Scan the boot log for a marker line.
    BootLogMarker(String),
    /// No probe is known for this service.
    Unregistered,
}

impl HealthProbe {
    /// Picks the probe for `service`. A configured log marker takes precedence
    /// over the built-in probe.
    pub fn for_service(
        service: ServiceName,
        markers: &BTreeMap<ServiceName, String>,
    ) -> Self {
        if let Some(marker) = markers.get(&service) {
            return Self::BootLogMarker(marker.clone());
        }

        match service {
            ServiceName::Hdfs => Self::NameNodeJmx,
            _ => Self::Unregistered,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NameNodeJmx => "jmx",
            Self::BootLogMarker(_) => "log-marker",
            Self::Unregistered => "none",
        }
    }
}

/// Observed readiness of one service.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceReadiness {
    pub service: String,
    pub port: Option<u16>,
    pub listening: bool,
    pub probe: &'static str,
    pub healthy: bool,
}

impl ServiceReadiness {
    pub fn is_ready(&self) -> bool {
        self.listening && self.healthy
    }
}

/// Evaluates the readiness predicate for a fixed set of enabled services.
#[derive(Debug, Clone)]
pub struct ReadinessProber {
    client: Client,
    services: Vec<(ServiceName, HealthProbe)>,
    require_health_probe: bool,
    /// `None` when no run directory is known, as for `hufix status` without
    /// a `base_dir`.
    bootlog: Option<BootLog>,
}

impl ReadinessProber {
    /// Builds a prober for `services`. Log markers can only match when a
    /// boot log is given.
    pub fn new(
        services: &[ServiceName],
        markers: &BTreeMap<ServiceName, String>,
        require_health_probe: bool,
        bootlog: Option<BootLog>,
    ) -> Result<Self, FixtureError> {
        let client = Client::builder()
            .timeout(HTTP_PROBE_TIMEOUT)
            .build()
            .map_err(|err| FixtureError::Io(std::io::Error::other(err.to_string())))?;

        Ok(Self {
            client,
            services: services
                .iter()
                .map(|service| (*service, HealthProbe::for_service(*service, markers)))
                .collect(),
            require_health_probe,
            bootlog,
        })
    }

    /// Enabled services paired with their health probes.
    pub fn services(&self) -> &[(ServiceName, HealthProbe)] {
        &self.services
    }

    /// Checks whether every enabled service has its port bound.
    ///
    /// Listening does not mean ready to accept requests.
    pub fn are_listening(&self, properties: &Properties) -> bool {
        self.services.iter().all(|(service, _)| {
            match find_port(*service, properties) {
                Some(port) => port_in_use(port),
                None => true,
            }
        })
    }

    /// Runs the application-level probe of every enabled service.
    pub fn are_started(&self, properties: &Properties) -> bool {
        self.services
            .iter()
            .all(|(service, probe)| self.is_healthy(*service, probe, properties))
    }

    /// Combined readiness predicate: listening and started.
    pub fn is_ready(&self, properties: &Properties) -> bool {
        self.are_listening(properties) && self.are_started(properties)
    }

    /// Per-service breakdown of both signals.
    pub fn report(&self, properties: &Properties) -> Vec<ServiceReadiness> {
        self.services
            .iter()
            .map(|(service, probe)| {
                let port = find_port(*service, properties);
                ServiceReadiness {
                    service: service.to_string(),
                    port,
                    listening: port.is_none_or(port_in_use),
                    probe: self.label_of(probe),
                    healthy: self.is_healthy(*service, probe, properties),
                }
            })
            .collect()
    }

    fn label_of(&self, check: &HealthProbe) -> &'static str {
        match check {
            HealthProbe::BootLogMarker(_) if self.bootlog.is_none() => "unavailable",
            other => other.label(),
        }
    }

    fn is_healthy(
        &self,
        service: ServiceName,
        probe: &HealthProbe,
        properties: &Properties,
    ) -> bool {
        match probe {
            HealthProbe::NameNodeJmx => {
                match properties
                    .get(NAMENODE_HTTP_PORT_KEY)
                    .and_then(|raw| raw.trim().parse::<u16>().ok())
                {
                    Some(port) => namenode_active(&self.client, port),
                    None => {
                        debug!(
                            "No '{NAMENODE_HTTP_PORT_KEY}' property; '{service}' cannot be probed yet"
                        );
                        false
                    }
                }
            }
            HealthProbe::BootLogMarker(marker) => self
                .bootlog
                .as_ref()
                .is_some_and(|bootlog| bootlog.contains(marker)),
            HealthProbe::Unregistered => !self.require_health_probe,
        }
    }
}

/// Returns the port of the first property (in file order) whose key contains
/// both the service name and `.port`. Zero and unparsable values count as no
/// port.
pub fn find_port(service: ServiceName, properties: &Properties) -> Option<u16> {
    let name: &str = service.as_ref();
    properties
        .iter()
        .find(|(key, _)| key.contains(name) && key.contains(PORT_KEY_FRAGMENT))
        .and_then(|(_, value)| value.trim().parse::<u16>().ok())
        .filter(|port| *port != 0)
}

/// Tries to bind `port` on loopback; a refused bind (address in use) means
/// something is listening there.
pub fn port_in_use(port: u16) -> bool {
    match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
        Ok(_) => false,
        Err(err) => err.kind() == ErrorKind::AddrInUse,
    }
}

/// Queries the NameNode status bean over HTTP. Network errors mean "not ready".
pub fn namenode_active(client: &Client, port: u16) -> bool {
    let url = format!("http://localhost:{port}/jmx?qry={NAMENODE_STATUS_BEAN}");
    match client.get(&url).send().and_then(|response| response.text()) {
        Ok(body) => body.contains(ACTIVE_STATE_MARKER),
        Err(err) => {
            debug!("JMX probe on port {port} failed: {err}");
            false
        }
    }
}
