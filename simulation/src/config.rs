//! Scenario configuration
//!
//! A TOML file describing nodes, their routing stacks, links, traffic and
//! timed link events. Every section is optional; missing fields fall back
//! to defaults.
//!
//! ```toml
//! duration_ms = 2000
//!
//! [discovery]
//! discovery_delay_ms = 50
//!
//! [[nodes]]
//! name = "a"
//! routing = [{ protocol = "static", priority = 10 }, { protocol = "discovery", priority = 5 }]
//!
//! [[nodes.routes]]
//! destination = "10.9.0.0/16"
//! gateway = "10.0.1.2"
//!
//! [[links]]
//! a = "a"
//! b = "b"
//! network = "10.0.1.0/24"
//! delay_ms = 2
//!
//! [[traffic]]
//! from = "a"
//! to = "b"
//! at_ms = 100
//!
//! [[events]]
//! at_ms = 500
//! link = 0
//! action = "down"
//! ```

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use netsim_core::{InterfaceError, InterfaceIndex, Ipv4Prefix, SimTime};
use netsim_logging::LogConfig;
use netsim_routing::{DiscoveryConfig, ProtocolContext, ProtocolRegistry, RegistryError, StaticRouting};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::topology::{Network, TopologyError};
use crate::types::{LinkId, NodeId};

/// Errors raised while loading or applying a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to write configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Unknown link: {0}")]
    UnknownLink(usize),

    #[error("Not a node name or IPv4 address: {0}")]
    InvalidDestination(String),

    #[error("Node {node} has static routes but no static protocol in its stack")]
    NoStaticProtocol { node: String },

    #[error("Node {node}: no interface reaches gateway {gateway}")]
    UnreachableGateway { node: String, gateway: Ipv4Addr },

    #[error("Node {node}: route to {destination} needs a gateway or an interface")]
    MissingInterface { node: String, destination: Ipv4Prefix },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Interface error: {0}")]
    Interface(#[from] InterfaceError),
}

/// One protocol in a node's stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEntry {
    pub protocol: String,
    #[serde(default)]
    pub priority: i16,
}

impl ProtocolEntry {
    pub fn new(protocol: impl Into<String>, priority: i16) -> Self {
        Self {
            protocol: protocol.into(),
            priority,
        }
    }
}

/// A static unicast route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRouteConfig {
    pub destination: Ipv4Prefix,
    /// Next hop; the output interface is the one whose subnet holds it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
    /// Output interface for on-link routes without a gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<u32>,
    #[serde(default)]
    pub metric: u32,
}

fn default_routing() -> Vec<ProtocolEntry> {
    vec![ProtocolEntry::new(StaticRouting::TYPE_NAME, 0)]
}

fn default_true() -> bool {
    true
}

/// A node and its routing stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default = "default_routing")]
    pub routing: Vec<ProtocolEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<StaticRouteConfig>,
    /// Whether the node forwards transit packets
    #[serde(default = "default_true")]
    pub forwarding: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            routing: default_routing(),
            routes: Vec::new(),
            forwarding: true,
        }
    }
}

fn default_delay_ms() -> u64 {
    1
}

/// A point-to-point link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub a: String,
    pub b: String,
    pub network: Ipv4Prefix,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_count() -> u32 {
    1
}

fn default_interval_ms() -> u64 {
    10
}

fn default_size() -> usize {
    64
}

/// A burst of packets from one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficConfig {
    pub from: String,
    /// Destination node name or dotted IPv4 address
    pub to: String,
    #[serde(default)]
    pub at_ms: u64,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_size")]
    pub size: usize,
}

/// What a timed event does to a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkAction {
    Down,
    Up,
}

/// A link state change at a given time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEventConfig {
    pub at_ms: u64,
    /// Index into `links`
    pub link: usize,
    pub action: LinkAction,
}

/// Whole-scenario configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Simulated time to run for
    pub duration_ms: u64,
    /// Discovery tuning shared by every node
    pub discovery: DiscoveryConfig,
    /// Logging setup used by the CLI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LogConfig>,
    pub nodes: Vec<NodeConfig>,
    pub links: Vec<LinkConfig>,
    pub traffic: Vec<TrafficConfig>,
    pub events: Vec<LinkEventConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            discovery: DiscoveryConfig::default(),
            logging: None,
            nodes: Vec::new(),
            links: Vec::new(),
            traffic: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Load a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn duration(&self) -> SimTime {
        SimTime::from_millis(self.duration_ms)
    }

    fn node_index(&self, name: &str) -> Result<NodeId, ConfigError> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(|i| NodeId(i as u32))
            .ok_or_else(|| ConfigError::UnknownNode(name.to_string()))
    }

    /// Check names and references without building anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(ConfigError::DuplicateNode(node.name.clone()));
            }
            let has_static = node.routing.iter().any(|p| p.protocol == StaticRouting::TYPE_NAME);
            if !node.routes.is_empty() && !has_static {
                return Err(ConfigError::NoStaticProtocol {
                    node: node.name.clone(),
                });
            }
        }
        for link in &self.links {
            self.node_index(&link.a)?;
            self.node_index(&link.b)?;
        }
        for traffic in &self.traffic {
            self.node_index(&traffic.from)?;
        }
        for event in &self.events {
            if event.link >= self.links.len() {
                return Err(ConfigError::UnknownLink(event.link));
            }
        }
        self.discovery.validate()?;
        Ok(())
    }

    /// Build the network, install protocols and schedule traffic and events
    ///
    /// Nothing runs until the returned network's simulator is driven.
    pub fn build(&self) -> Result<Network, ConfigError> {
        self.validate()?;
        let network = Network::new();
        for node in &self.nodes {
            network.add_node(node.name.clone());
        }
        for link in &self.links {
            network.connect(
                self.node_index(&link.a)?,
                self.node_index(&link.b)?,
                link.network,
                Duration::from_millis(link.delay_ms),
            )?;
        }

        let registry = ProtocolRegistry::with_builtins();
        for (i, node) in self.nodes.iter().enumerate() {
            let id = NodeId(i as u32);
            self.install_stack(&network, &registry, id, node)?;
        }

        for traffic in &self.traffic {
            self.schedule_traffic(&network, traffic)?;
        }
        for event in &self.events {
            let up = event.action == LinkAction::Up;
            network.schedule_link_state(SimTime::from_millis(event.at_ms), LinkId(event.link), up);
        }
        info!(
            nodes = self.nodes.len(),
            links = self.links.len(),
            traffic = self.traffic.len(),
            events = self.events.len(),
            "Network built from configuration"
        );
        Ok(network)
    }

    fn install_stack(
        &self,
        network: &Network,
        registry: &ProtocolRegistry,
        id: NodeId,
        node: &NodeConfig,
    ) -> Result<(), ConfigError> {
        let l3 = network
            .node(id)
            .map(|n| n.l3)
            .ok_or(TopologyError::UnknownNode(id))?;
        let view = l3.interfaces();
        if !node.forwarding {
            for i in 1..view.n_interfaces() as u32 {
                l3.set_forwarding(InterfaceIndex(i), false)?;
            }
        }

        let ctx = ProtocolContext::new(network.simulator())
            .with_resolver(network.resolver_for(id))
            .with_discovery(self.discovery.clone());
        let stack: Vec<_> = node
            .routing
            .iter()
            .map(|p| (p.protocol.clone(), p.priority))
            .collect();
        let mut list = registry.create_list(&stack, &ctx)?;

        if !node.routes.is_empty() {
            let routing = list
                .protocol_mut::<StaticRouting>()
                .ok_or_else(|| ConfigError::NoStaticProtocol {
                    node: node.name.clone(),
                })?;
            for route in &node.routes {
                let interface = match (route.gateway, route.interface) {
                    (_, Some(index)) => InterfaceIndex(index),
                    (Some(gateway), None) => {
                        view.interface_for_prefix(gateway)
                            .ok_or_else(|| ConfigError::UnreachableGateway {
                                node: node.name.clone(),
                                gateway,
                            })?
                    }
                    (None, None) => {
                        return Err(ConfigError::MissingInterface {
                            node: node.name.clone(),
                            destination: route.destination,
                        });
                    }
                };
                routing.add_network_route_to(route.destination, route.gateway, interface, route.metric);
            }
        }
        debug!(node = %node.name, stack = ?list.consultation_order(), "Routing stack installed");
        network.install_routing(id, Box::new(list))?;
        Ok(())
    }

    fn schedule_traffic(&self, network: &Network, traffic: &TrafficConfig) -> Result<(), ConfigError> {
        let from = self.node_index(&traffic.from)?;
        let destination = match traffic.to.parse::<Ipv4Addr>() {
            Ok(addr) => addr,
            Err(_) => {
                let target = self.node_index(&traffic.to)?;
                network
                    .address_of(target)
                    .ok_or_else(|| ConfigError::InvalidDestination(traffic.to.clone()))?
            }
        };
        let payload = Bytes::from(vec![0u8; traffic.size]);
        for k in 0..traffic.count {
            let at = SimTime::from_millis(traffic.at_ms + u64::from(k) * traffic.interval_ms);
            network.schedule_send(at, from, destination, payload.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        duration_ms = 500

        [discovery]
        discovery_delay_ms = 20

        [[nodes]]
        name = "a"
        routing = [{ protocol = "static", priority = 10 }, { protocol = "discovery", priority = 5 }]

        [[nodes.routes]]
        destination = "10.0.2.0/24"
        gateway = "10.0.1.2"

        [[nodes]]
        name = "b"

        [[nodes]]
        name = "c"

        [[links]]
        a = "a"
        b = "b"
        network = "10.0.1.0/24"
        delay_ms = 2

        [[links]]
        a = "b"
        b = "c"
        network = "10.0.2.0/24"

        [[traffic]]
        from = "a"
        to = "c"
        count = 3

        [[events]]
        at_ms = 300
        link = 1
        action = "down"
    "#;

    #[test]
    fn test_parse_sample() {
        let config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.duration(), SimTime::from_millis(500));
        assert_eq!(config.discovery.discovery_delay_ms, 20);
        assert_eq!(config.discovery.max_attempts, 3);
        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.nodes[1].routing, default_routing());
        assert!(config.nodes[1].forwarding);
        assert_eq!(config.links[1].delay_ms, 1);
        assert_eq!(config.traffic[0].interval_ms, 10);
        assert_eq!(config.events[0].action, LinkAction::Down);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_references() {
        let mut config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        config.links[0].b = "zed".into();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownNode(name)) if name == "zed"));

        let mut config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        config.nodes[2].name = "a".into();
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateNode(_))));

        let mut config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        config.events[0].link = 9;
        assert!(matches!(config.validate(), Err(ConfigError::UnknownLink(9))));

        let mut config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        config.nodes[0].routing = vec![ProtocolEntry::new("discovery", 0)];
        assert!(matches!(config.validate(), Err(ConfigError::NoStaticProtocol { .. })));
    }

    #[test]
    fn test_unknown_protocol_fails_build() {
        let mut config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        config.nodes[1].routing = vec![ProtocolEntry::new("ospf", 0)];
        assert!(matches!(
            config.build(),
            Err(ConfigError::Registry(RegistryError::UnknownProtocol(_)))
        ));
    }

    #[test]
    fn test_build_and_run_sample() {
        let config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        let network = config.build().unwrap();
        network.run_until(config.duration());

        // a reaches c over its static route; b and c use connected routes
        let deliveries = network.deliveries();
        assert_eq!(deliveries.len(), 3);
        assert!(deliveries.iter().all(|d| d.node == NodeId(2) && d.hops == 1));
        assert_eq!(deliveries[0].time, SimTime::from_millis(3));
        assert_eq!(network.link(LinkId(1)).map(|l| l.up), Some(false));
        assert_eq!(network.total_stats().contract_violations, 0);
    }

    #[test]
    fn test_round_trip_through_file() {
        let config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(SimulationConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = SimulationConfig::from_file("/nonexistent/netsim.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/netsim.toml"));
    }
}
