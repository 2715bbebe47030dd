//! Pre-defined simulation scenarios
//!
//! - `fallback`: a static protocol answers what it knows at once, a
//!   lower-priority discovery protocol answers the rest later
//! - `discovery`: on-demand routing across a line of routers
//! - `link-failure`: a pending discovery is resolved by an error when its
//!   only link goes down

use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use netsim_core::{InterfaceIndex, SimTime};
use netsim_routing::{DiscoveryConfig, DiscoveryRouting, ListRouting, StaticRouting};
use serde::Serialize;
use tracing::info;

use crate::topology::{Network, TopologyError, link_subnet};
use crate::types::{DeliveryRecord, L3Stats, LinkId, NetworkEvent, NodeId};

/// Names accepted by [`run_scenario`]
pub const SCENARIOS: [&str; 3] = ["fallback", "discovery", "link-failure"];

/// Per-node part of a [`SimulationReport`]
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub name: String,
    pub stats: L3Stats,
}

/// Everything worth printing after a run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub name: String,
    pub finished_at: SimTime,
    pub total: L3Stats,
    pub nodes: Vec<NodeReport>,
    pub deliveries: Vec<DeliveryRecord>,
    pub events: Vec<NetworkEvent>,
    pub routing_tables: String,
}

impl SimulationReport {
    pub fn collect(name: impl Into<String>, network: &Network) -> Self {
        let nodes = network
            .nodes()
            .into_iter()
            .map(|n| NodeReport {
                id: n.id,
                name: n.name,
                stats: n.l3.stats(),
            })
            .collect();
        Self {
            name: name.into(),
            finished_at: network.now(),
            total: network.total_stats(),
            nodes,
            deliveries: network.deliveries(),
            events: network.events(),
            routing_tables: network.routing_tables().unwrap_or_default(),
        }
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let t = &self.total;
        let _ = writeln!(out, "=== {} (finished at {}) ===", self.name, self.finished_at);
        let _ = writeln!(
            out,
            "  sent {} | delivered {} ({:.1}%) | forwarded {} | dropped {} | diagnostics {} | violations {}",
            t.sent,
            t.delivered,
            t.delivery_rate(),
            t.forwarded,
            t.total_dropped(),
            t.diagnostics,
            t.contract_violations
        );
        for (kind, count) in &t.dropped {
            let _ = writeln!(out, "    dropped {kind}: {count}");
        }
        let _ = writeln!(out, "\nDeliveries:");
        for d in &self.deliveries {
            let _ = writeln!(
                out,
                "  {} packet {} at {} from {} ({} hops)",
                d.time, d.packet, d.node, d.source, d.hops
            );
        }
        let _ = writeln!(out, "\nRouting tables:\n{}", self.routing_tables);
        out
    }
}

/// Run a built-in scenario by name
pub fn run_scenario(name: &str) -> Option<Result<Network, TopologyError>> {
    match name {
        "fallback" => Some(run_fallback_scenario()),
        "discovery" => Some(run_discovery_scenario(5)),
        "link-failure" => Some(run_link_failure_scenario()),
        _ => None,
    }
}

fn discovery(network: &Network, node: NodeId) -> DiscoveryRouting {
    DiscoveryRouting::new(network.simulator(), network.resolver_for(node), DiscoveryConfig::default())
}

fn line(network: &Network, count: usize, delay: Duration) -> Result<Vec<NodeId>, TopologyError> {
    let ids: Vec<_> = (0..count).map(|i| network.add_node(format!("n{i}"))).collect();
    for k in 1..count {
        network.connect(ids[k - 1], ids[k], link_subnet(k - 1), delay)?;
    }
    Ok(ids)
}

/// Static routing in front of discovery on one router
///
/// ```text
/// s --- r --- h          r runs static (10) then discovery (5)
///       |
///       x --- y          y is unknown to r's static table
/// ```
///
/// s sends one packet to h and one to y. Static answers h immediately;
/// y's packet falls through to discovery and is forwarded once the route
/// is found.
pub fn run_fallback_scenario() -> Result<Network, TopologyError> {
    info!("=== Running fallback scenario ===");
    let network = Network::new();
    let delay = Duration::from_millis(2);
    let [s, r, h, x, y] = ["s", "r", "h", "x", "y"].map(|name| network.add_node(name));

    network.connect(s, r, "10.0.1.0/24".parse()?, delay)?;
    network.connect(r, h, "10.0.0.0/24".parse()?, delay)?;
    network.connect(r, x, "10.0.2.0/24".parse()?, delay)?;
    network.connect(x, y, "10.0.3.0/24".parse()?, delay)?;

    let mut source = StaticRouting::new();
    source.set_default_route(Ipv4Addr::new(10, 0, 1, 2), InterfaceIndex(1), 0);
    network.install_routing(s, Box::new(source))?;

    let mut router = ListRouting::new();
    router.add_routing_protocol(Box::new(StaticRouting::new()), 10);
    router.add_routing_protocol(Box::new(discovery(&network, r)), 5);
    network.install_routing(r, Box::new(router))?;

    for node in [h, x, y] {
        network.install_routing(node, Box::new(StaticRouting::new()))?;
    }

    let payload = Bytes::from_static(b"fallback");
    let to_h = Ipv4Addr::new(10, 0, 0, 2);
    let to_y = Ipv4Addr::new(10, 0, 3, 2);
    info!(dst = %to_h, "s sends to h, known to r's static table");
    network.send(s, to_h, payload.clone())?;
    info!(dst = %to_y, "s sends to y, only discovery can route it");
    network.send(s, to_y, payload)?;

    network.run();
    info!(deliveries = network.deliveries().len(), "Fallback scenario finished");
    Ok(network)
}

/// On-demand routing along a line of `nodes` nodes
///
/// The first packet waits for discovery at every router; a second packet
/// sent later rides the cached routes.
pub fn run_discovery_scenario(nodes: usize) -> Result<Network, TopologyError> {
    info!(nodes, "=== Running discovery scenario ===");
    let network = Network::new();
    let ids = line(&network, nodes.max(2), Duration::from_millis(1))?;
    for id in &ids {
        network.install_routing(*id, Box::new(discovery(&network, *id)))?;
    }

    let (first, last) = (ids[0], ids[ids.len() - 1]);
    let target = network
        .address_of(last)
        .ok_or(TopologyError::UnknownNode(last))?;
    network.schedule_send(SimTime::ZERO, first, target, Bytes::from_static(b"cold"))?;
    network.schedule_send(SimTime::from_millis(500), first, target, Bytes::from_static(b"warm"))?;

    network.run();
    info!(deliveries = network.deliveries().len(), "Discovery scenario finished");
    Ok(network)
}

/// A pending discovery loses its only interface
///
/// a - b - c with discovery everywhere. a's first packet is waiting for a
/// route when the a-b link fails, so it is dropped with an interface-down
/// error. After the link recovers a second packet gets through.
pub fn run_link_failure_scenario() -> Result<Network, TopologyError> {
    info!("=== Running link failure scenario ===");
    let network = Network::new();
    let ids = line(&network, 3, Duration::from_millis(1))?;
    for id in &ids {
        network.install_routing(*id, Box::new(discovery(&network, *id)))?;
    }
    let (a, c) = (ids[0], ids[2]);
    let target = network.address_of(c).ok_or(TopologyError::UnknownNode(c))?;

    network.schedule_send(SimTime::ZERO, a, target, Bytes::from_static(b"lost"))?;
    network.schedule_link_state(SimTime::from_millis(20), LinkId(0), false);
    network.schedule_link_state(SimTime::from_millis(100), LinkId(0), true);
    network.schedule_send(SimTime::from_millis(150), a, target, Bytes::from_static(b"recovered"))?;

    network.run();
    info!(deliveries = network.deliveries().len(), "Link failure scenario finished");
    Ok(network)
}
