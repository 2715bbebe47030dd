//! Network topology for netsim
//!
//! [`Network`] owns the simulator, the nodes and the point-to-point links
//! between them. A [`TopologyOracle`] mirrors the link graph and answers
//! route discovery for every node by breadth-first search over the links
//! that are currently up.
//!
//! [`TopologyBuilder`] generates scenario configurations for the classic
//! shapes:
//! - Line: n0 - n1 - n2 - ...
//! - Ring: a line closed back onto n0
//! - Star: n0 in the center
//! - Full mesh: every node linked to every other
//! - Random: configurable link probability, seeded

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::{self, Write as _};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use netsim_core::{
    InterfaceError, InterfaceIndex, Ipv4InterfaceAddress, Ipv4Mask, Ipv4Prefix, Ipv4RoutingProtocol,
    PacketId, SimTime, Simulator,
};
use netsim_routing::{DiscoveredRoute, RouteResolver};
use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::{info, warn};

use crate::channel::PointToPointChannel;
use crate::config::{LinkConfig, NodeConfig, ProtocolEntry, SimulationConfig};
use crate::ipv4::{Ipv4L3Protocol, UDP_PROTOCOL};
use crate::types::{DeliveryRecord, EventLog, L3Stats, LinkId, NetworkEvent, NodeId, PacketIdAllocator};

/// Errors raised while building or changing a topology
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Unknown link: {0}")]
    UnknownLink(LinkId),

    #[error("Cannot link node {0} to itself")]
    SelfLoop(NodeId),

    #[error("Subnet {0} has no room for two hosts")]
    SubnetTooSmall(Ipv4Prefix),

    #[error("Interface error: {0}")]
    Interface(#[from] InterfaceError),
}

/// One side of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEndpoint {
    pub node: NodeId,
    pub interface: InterfaceIndex,
    pub address: Ipv4Addr,
}

/// A point-to-point link as the topology sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub id: LinkId,
    pub a: LinkEndpoint,
    pub b: LinkEndpoint,
    pub network: Ipv4Prefix,
    pub delay: Duration,
    pub up: bool,
}

impl Link {
    /// The endpoint on `node` and the one across from it
    fn sides(&self, node: NodeId) -> Option<(LinkEndpoint, LinkEndpoint)> {
        if self.a.node == node {
            Some((self.a, self.b))
        } else if self.b.node == node {
            Some((self.b, self.a))
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct TopologyGraph {
    links: Vec<Link>,
    adjacency: BTreeMap<NodeId, Vec<LinkId>>,
    owners: BTreeMap<Ipv4Addr, NodeId>,
}

/// Shared view of the link graph used to answer route discovery
#[derive(Debug, Clone, Default)]
pub struct TopologyOracle {
    graph: Rc<RefCell<TopologyGraph>>,
}

impl TopologyOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(&self, node: NodeId) {
        self.graph.borrow_mut().adjacency.entry(node).or_default();
    }

    fn add_link(&self, link: Link) {
        let mut graph = self.graph.borrow_mut();
        graph.owners.insert(link.a.address, link.a.node);
        graph.owners.insert(link.b.address, link.b.node);
        graph.adjacency.entry(link.a.node).or_default().push(link.id);
        graph.adjacency.entry(link.b.node).or_default().push(link.id);
        graph.links.push(link);
    }

    fn set_link_up(&self, link: LinkId, up: bool) {
        if let Some(entry) = self.graph.borrow_mut().links.get_mut(link.0) {
            entry.up = up;
        }
    }

    pub fn link(&self, link: LinkId) -> Option<Link> {
        self.graph.borrow().links.get(link.0).copied()
    }

    pub fn links(&self) -> Vec<Link> {
        self.graph.borrow().links.clone()
    }

    /// Node owning an interface address
    pub fn owner_of(&self, address: Ipv4Addr) -> Option<NodeId> {
        self.graph.borrow().owners.get(&address).copied()
    }

    /// Neighbours of `node` over up links, in link order
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let graph = self.graph.borrow();
        graph
            .adjacency
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|id| graph.links.get(id.0))
            .filter(|link| link.up)
            .filter_map(|link| link.sides(node).map(|(_, far)| far.node))
            .collect()
    }

    /// Shortest path over up links, as the links taken from `from` to `to`
    pub fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<Vec<LinkId>> {
        let graph = self.graph.borrow();
        let mut previous: BTreeMap<NodeId, (NodeId, LinkId)> = BTreeMap::new();
        let mut visited = BTreeSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(node) = queue.pop_front() {
            if node == to {
                break;
            }
            for id in graph.adjacency.get(&node).into_iter().flatten() {
                let Some(link) = graph.links.get(id.0).filter(|l| l.up) else {
                    continue;
                };
                let Some((_, far)) = link.sides(node) else {
                    continue;
                };
                if visited.insert(far.node) {
                    previous.insert(far.node, (node, *id));
                    queue.push_back(far.node);
                }
            }
        }

        if from == to || !previous.contains_key(&to) {
            return None;
        }
        let mut path = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let (prev, link) = previous.get(&cursor).copied()?;
            path.push(link);
            cursor = prev;
        }
        path.reverse();
        Some(path)
    }

    /// First hop from `node` towards the owner of `destination`
    pub fn resolve(&self, node: NodeId, destination: Ipv4Addr) -> Option<DiscoveredRoute> {
        let target = self.owner_of(destination)?;
        let path = self.shortest_path(node, target)?;
        let first = self.link(*path.first()?)?;
        let (near, far) = first.sides(node)?;
        Some(DiscoveredRoute {
            next_hop: far.address,
            interface: near.interface,
            hop_count: path.len() as u32,
        })
    }

    /// Resolver answering discovery for one node
    pub fn resolver_for(&self, node: NodeId) -> Rc<dyn RouteResolver> {
        Rc::new(NodeResolver {
            oracle: self.clone(),
            node,
        })
    }
}

/// [`RouteResolver`] backed by the topology oracle
struct NodeResolver {
    oracle: TopologyOracle,
    node: NodeId,
}

impl RouteResolver for NodeResolver {
    fn resolve(&self, destination: Ipv4Addr) -> Option<DiscoveredRoute> {
        self.oracle.resolve(self.node, destination)
    }
}

/// A node: a name and its IPv4 stack
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub l3: Ipv4L3Protocol,
}

struct NetworkInner {
    simulator: Simulator,
    oracle: TopologyOracle,
    nodes: RefCell<Vec<Node>>,
    channels: RefCell<Vec<Rc<PointToPointChannel>>>,
    log: EventLog,
    packet_ids: PacketIdAllocator,
}

/// A simulated network
///
/// Cheap to clone; clones share the same simulator and nodes, so scheduled
/// events can hold one.
#[derive(Clone)]
pub struct Network {
    inner: Rc<NetworkInner>,
}

impl Network {
    /// Create an empty network with a fresh simulator
    pub fn new() -> Self {
        Self::with_simulator(Simulator::new())
    }

    pub fn with_simulator(simulator: Simulator) -> Self {
        Self {
            inner: Rc::new(NetworkInner {
                simulator,
                oracle: TopologyOracle::new(),
                nodes: RefCell::new(Vec::new()),
                channels: RefCell::new(Vec::new()),
                log: EventLog::new(),
                packet_ids: PacketIdAllocator::new(),
            }),
        }
    }

    pub fn simulator(&self) -> Simulator {
        self.inner.simulator.clone()
    }

    pub fn oracle(&self) -> TopologyOracle {
        self.inner.oracle.clone()
    }

    pub fn now(&self) -> SimTime {
        self.inner.simulator.now()
    }

    /// Add a node with only a loopback interface
    pub fn add_node(&self, name: impl Into<String>) -> NodeId {
        let inner = &self.inner;
        let mut nodes = inner.nodes.borrow_mut();
        let id = NodeId(nodes.len() as u32);
        let l3 = Ipv4L3Protocol::new(id, inner.simulator.clone(), inner.log.clone(), inner.packet_ids.clone());
        let name = name.into();
        info!(node = %id, %name, "Node added");
        nodes.push(Node { id, name, l3 });
        inner.oracle.add_node(id);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.inner.nodes.borrow().get(id.0 as usize).cloned()
    }

    pub fn node_by_name(&self, name: &str) -> Option<Node> {
        self.inner.nodes.borrow().iter().find(|n| n.name == name).cloned()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.inner.nodes.borrow().clone()
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    fn l3(&self, id: NodeId) -> Result<Ipv4L3Protocol, TopologyError> {
        self.node(id).map(|n| n.l3).ok_or(TopologyError::UnknownNode(id))
    }

    /// Link two nodes over `network`
    ///
    /// `a` takes the first host address of the subnet and `b` the second.
    /// Both interfaces come up immediately.
    pub fn connect(
        &self,
        a: NodeId,
        b: NodeId,
        network: Ipv4Prefix,
        delay: Duration,
    ) -> Result<LinkId, TopologyError> {
        if a == b {
            return Err(TopologyError::SelfLoop(a));
        }
        if network.mask().prefix_len() > 30 {
            return Err(TopologyError::SubnetTooSmall(network));
        }
        let (l3_a, l3_b) = (self.l3(a)?, self.l3(b)?);
        let base = u32::from(network.network());
        let addr_a = Ipv4InterfaceAddress::new(Ipv4Addr::from(base + 1), network.mask());
        let addr_b = Ipv4InterfaceAddress::new(Ipv4Addr::from(base + 2), network.mask());

        let (channel, if_a, if_b) = PointToPointChannel::connect(&self.inner.simulator, delay, &l3_a, &l3_b);
        l3_a.add_address(if_a, addr_a)?;
        l3_b.add_address(if_b, addr_b)?;
        l3_a.set_up(if_a)?;
        l3_b.set_up(if_b)?;

        let mut channels = self.inner.channels.borrow_mut();
        let id = LinkId(channels.len());
        channels.push(channel);
        self.inner.oracle.add_link(Link {
            id,
            a: LinkEndpoint {
                node: a,
                interface: if_a,
                address: addr_a.local(),
            },
            b: LinkEndpoint {
                node: b,
                interface: if_b,
                address: addr_b.local(),
            },
            network,
            delay,
            up: true,
        });
        info!(link = %id, %a, %b, %network, delay_ms = delay.as_millis() as u64, "Link created");
        Ok(id)
    }

    pub fn link(&self, id: LinkId) -> Option<Link> {
        self.inner.oracle.link(id)
    }

    pub fn links(&self) -> Vec<Link> {
        self.inner.oracle.links()
    }

    /// Packets carried by a link so far
    pub fn link_traffic(&self, id: LinkId) -> Option<u64> {
        self.inner.channels.borrow().get(id.0).map(|c| c.packets_carried())
    }

    /// Bring both interfaces of a link up or down
    ///
    /// Routing protocols on both nodes are notified. Setting a link to the
    /// state it is already in does nothing.
    pub fn set_link_state(&self, id: LinkId, up: bool) -> Result<(), TopologyError> {
        let link = self.link(id).ok_or(TopologyError::UnknownLink(id))?;
        if link.up == up {
            return Ok(());
        }
        self.inner.oracle.set_link_up(id, up);
        for end in [link.a, link.b] {
            let l3 = self.l3(end.node)?;
            if up {
                l3.set_up(end.interface)?;
            } else {
                l3.set_down(end.interface)?;
            }
        }
        let time = self.now();
        self.inner.log.push(if up {
            NetworkEvent::LinkUp { link: id, time }
        } else {
            NetworkEvent::LinkDown { link: id, time }
        });
        info!(link = %id, up, "Link state changed");
        Ok(())
    }

    pub fn link_down(&self, id: LinkId) -> Result<(), TopologyError> {
        self.set_link_state(id, false)
    }

    pub fn link_up(&self, id: LinkId) -> Result<(), TopologyError> {
        self.set_link_state(id, true)
    }

    /// Change a link's state at an absolute time
    pub fn schedule_link_state(&self, at: SimTime, id: LinkId, up: bool) {
        let network = self.clone();
        self.inner.simulator.schedule_at(at, move || {
            if let Err(err) = network.set_link_state(id, up) {
                warn!(link = %id, %err, "Scheduled link change failed");
            }
        });
    }

    /// Install a routing protocol on a node
    pub fn install_routing(&self, id: NodeId, protocol: Box<dyn Ipv4RoutingProtocol>) -> Result<(), TopologyError> {
        self.l3(id)?.set_routing_protocol(protocol);
        Ok(())
    }

    /// Discovery resolver for a node
    pub fn resolver_for(&self, id: NodeId) -> Rc<dyn RouteResolver> {
        self.inner.oracle.resolver_for(id)
    }

    /// First non-loopback address of a node
    pub fn address_of(&self, id: NodeId) -> Option<Ipv4Addr> {
        let view = self.node(id)?.l3.interfaces();
        (1..view.n_interfaces() as u32)
            .flat_map(|i| view.addresses(InterfaceIndex(i)))
            .map(|a| a.local())
            .next()
    }

    /// Originate a packet now
    pub fn send(&self, from: NodeId, destination: Ipv4Addr, payload: impl Into<Bytes>) -> Result<PacketId, TopologyError> {
        Ok(self.l3(from)?.send(payload, destination, UDP_PROTOCOL))
    }

    /// Originate a packet at an absolute time
    pub fn schedule_send(&self, at: SimTime, from: NodeId, destination: Ipv4Addr, payload: Bytes) -> Result<(), TopologyError> {
        let l3 = self.l3(from)?;
        self.inner.simulator.schedule_at(at, move || {
            l3.send(payload, destination, UDP_PROTOCOL);
        });
        Ok(())
    }

    pub fn run(&self) {
        self.inner.simulator.run();
    }

    pub fn run_until(&self, until: SimTime) {
        self.inner.simulator.run_until(until);
    }

    pub fn events(&self) -> Vec<NetworkEvent> {
        self.inner.log.snapshot()
    }

    pub fn event_log(&self) -> EventLog {
        self.inner.log.clone()
    }

    /// Every delivery in the network, in time order
    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        let mut all: Vec<_> = self.nodes().iter().flat_map(|n| n.l3.deliveries()).collect();
        all.sort_by_key(|d| (d.time, d.packet));
        all
    }

    /// Counters summed over every node
    pub fn total_stats(&self) -> L3Stats {
        let mut total = L3Stats::default();
        for node in self.nodes() {
            total.merge(&node.l3.stats());
        }
        total
    }

    /// Every node's routing table, one block per node
    pub fn routing_tables(&self) -> Result<String, fmt::Error> {
        let mut out = String::new();
        for node in self.nodes() {
            writeln!(out, "== {} ({}) ==", node.name, node.id)?;
            node.l3.print_routing_table(&mut out)?;
        }
        Ok(out)
    }

    /// Simple ASCII visualization of the topology
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Network Topology:\n");
        output.push_str(&format!("  Nodes: {}\n", self.node_count()));
        output.push_str(&format!("  Links: {}\n\n", self.links().len()));
        for node in self.nodes() {
            let neighbors: Vec<String> = self
                .inner
                .oracle
                .neighbors(node.id)
                .into_iter()
                .filter_map(|n| self.node(n).map(|n| n.name))
                .collect();
            output.push_str(&format!("  {} -> [{}]\n", node.name, neighbors.join(", ")));
        }
        output
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("now", &self.now())
            .field("nodes", &self.node_count())
            .field("links", &self.links().len())
            .finish()
    }
}

/// Subnet for the `k`-th generated link: 10.x.y.0/24
pub fn link_subnet(k: usize) -> Ipv4Prefix {
    let k = k as u32 + 1;
    let network = Ipv4Addr::new(10, ((k >> 8) & 0xff) as u8, (k & 0xff) as u8, 0);
    Ipv4Prefix::new(network, Ipv4Mask::SLASH_24)
}

/// Builder for generated topologies
///
/// Produces a [`SimulationConfig`] so generated topologies can be saved,
/// edited and run like hand-written ones.
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    node_count: usize,
    routing: Vec<ProtocolEntry>,
    delay_ms: u64,
}

impl TopologyBuilder {
    /// Create a builder for nodes n0, n1, ...
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            routing: vec![ProtocolEntry::new("discovery", 0)],
            delay_ms: 1,
        }
    }

    /// Protocol stack installed on every node
    pub fn with_routing(mut self, routing: Vec<ProtocolEntry>) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn build(&self, edges: &[(usize, usize)]) -> SimulationConfig {
        let nodes = (0..self.node_count)
            .map(|i| NodeConfig {
                name: format!("n{i}"),
                routing: self.routing.clone(),
                ..NodeConfig::default()
            })
            .collect();
        let links = edges
            .iter()
            .enumerate()
            .map(|(k, (a, b))| LinkConfig {
                a: format!("n{a}"),
                b: format!("n{b}"),
                network: link_subnet(k),
                delay_ms: self.delay_ms,
            })
            .collect();
        SimulationConfig {
            nodes,
            links,
            ..SimulationConfig::default()
        }
    }

    /// n0 - n1 - n2 - ...
    pub fn line(self) -> SimulationConfig {
        let edges: Vec<_> = (1..self.node_count).map(|i| (i - 1, i)).collect();
        self.build(&edges)
    }

    /// A line closed back onto n0
    pub fn ring(self) -> SimulationConfig {
        let mut edges: Vec<_> = (1..self.node_count).map(|i| (i - 1, i)).collect();
        if self.node_count > 2 {
            edges.push((self.node_count - 1, 0));
        }
        self.build(&edges)
    }

    /// n0 in the center, linked to all others
    pub fn star(self) -> SimulationConfig {
        let edges: Vec<_> = (1..self.node_count).map(|i| (0, i)).collect();
        self.build(&edges)
    }

    /// Every node linked to every other
    pub fn full_mesh(self) -> SimulationConfig {
        let mut edges = Vec::new();
        for i in 0..self.node_count {
            for j in (i + 1)..self.node_count {
                edges.push((i, j));
            }
        }
        self.build(&edges)
    }

    /// Random links with the given probability, reproducible from `seed`
    pub fn random(self, link_probability: f64, seed: u64) -> SimulationConfig {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut edges = Vec::new();
        let mut degree = vec![0usize; self.node_count];
        for i in 0..self.node_count {
            for j in (i + 1)..self.node_count {
                if rng.random::<f64>() < link_probability {
                    edges.push((i, j));
                    degree[i] += 1;
                    degree[j] += 1;
                }
            }
        }

        // Ensure no node is isolated
        if self.node_count > 1 {
            for i in 0..self.node_count {
                if degree[i] == 0 {
                    let mut other = rng.random_range(0..self.node_count - 1);
                    if other >= i {
                        other += 1;
                    }
                    edges.push((i.min(other), i.max(other)));
                    degree[i] += 1;
                    degree[other] += 1;
                }
            }
        }
        self.build(&edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_network(n: usize) -> (Network, Vec<NodeId>) {
        let net = Network::new();
        let ids: Vec<_> = (0..n).map(|i| net.add_node(format!("n{i}"))).collect();
        for k in 1..n {
            net.connect(ids[k - 1], ids[k], link_subnet(k - 1), Duration::from_millis(1))
                .unwrap();
        }
        (net, ids)
    }

    #[test]
    fn test_connect_assigns_addresses() {
        let (net, ids) = line_network(2);
        let link = net.link(LinkId(0)).unwrap();
        assert_eq!(link.a.address, Ipv4Addr::new(10, 0, 1, 1));
        assert_eq!(link.b.address, Ipv4Addr::new(10, 0, 1, 2));
        assert_eq!(net.address_of(ids[1]), Some(Ipv4Addr::new(10, 0, 1, 2)));
        let view = net.node(ids[0]).unwrap().l3.interfaces();
        assert!(view.is_up(InterfaceIndex(1)));
    }

    #[test]
    fn test_connect_rejects_bad_links() {
        let (net, ids) = line_network(2);
        assert!(matches!(
            net.connect(ids[0], ids[0], link_subnet(5), Duration::ZERO),
            Err(TopologyError::SelfLoop(_))
        ));
        assert!(matches!(
            net.connect(ids[0], ids[1], "10.9.9.0/31".parse().unwrap(), Duration::ZERO),
            Err(TopologyError::SubnetTooSmall(_))
        ));
        assert!(matches!(
            net.connect(ids[0], NodeId(42), link_subnet(6), Duration::ZERO),
            Err(TopologyError::UnknownNode(NodeId(42)))
        ));
    }

    #[test]
    fn test_oracle_resolves_first_hop() {
        let (net, ids) = line_network(4);
        let target = net.address_of(ids[3]).unwrap();
        let found = net.oracle().resolve(ids[0], target).unwrap();
        assert_eq!(found.next_hop, Ipv4Addr::new(10, 0, 1, 2));
        assert_eq!(found.interface, InterfaceIndex(1));
        assert_eq!(found.hop_count, 3);

        // from the middle, towards n0 goes back through interface 1
        let back = net.oracle().resolve(ids[2], Ipv4Addr::new(10, 0, 1, 1)).unwrap();
        assert_eq!(back.next_hop, Ipv4Addr::new(10, 0, 2, 1));
        assert_eq!(back.interface, InterfaceIndex(1));
        assert_eq!(back.hop_count, 2);
    }

    #[test]
    fn test_oracle_ignores_down_links() {
        let (net, ids) = line_network(3);
        let target = net.address_of(ids[2]).unwrap();
        net.link_down(LinkId(1)).unwrap();
        assert!(net.oracle().resolve(ids[0], target).is_none());
        assert!(!net.node(ids[1]).unwrap().l3.interfaces().is_up(InterfaceIndex(2)));

        net.link_up(LinkId(1)).unwrap();
        assert!(net.oracle().resolve(ids[0], target).is_some());

        let kinds: Vec<_> = net
            .events()
            .into_iter()
            .filter(|e| matches!(e, NetworkEvent::LinkDown { .. } | NetworkEvent::LinkUp { .. }))
            .collect();
        assert_eq!(kinds.len(), 2);
    }

    #[test]
    fn test_shortest_path_prefers_fewer_hops() {
        let config = TopologyBuilder::new(5).ring();
        let net = config.build().unwrap();
        let path = net.oracle().shortest_path(NodeId(0), NodeId(4)).unwrap();
        assert_eq!(path, vec![LinkId(4)]);
        assert!(net.oracle().shortest_path(NodeId(0), NodeId(0)).is_none());
    }

    #[test]
    fn test_builder_shapes() {
        assert_eq!(TopologyBuilder::new(4).line().links.len(), 3);
        assert_eq!(TopologyBuilder::new(4).ring().links.len(), 4);
        assert_eq!(TopologyBuilder::new(4).star().links.len(), 3);
        assert_eq!(TopologyBuilder::new(4).full_mesh().links.len(), 6);
        assert_eq!(TopologyBuilder::new(1).line().links.len(), 0);
    }

    #[test]
    fn test_random_is_reproducible_and_connected() {
        let a = TopologyBuilder::new(8).random(0.2, 7);
        let b = TopologyBuilder::new(8).random(0.2, 7);
        assert_eq!(a, b);
        for node in &a.nodes {
            assert!(
                a.links.iter().any(|l| l.a == node.name || l.b == node.name),
                "{} is isolated",
                node.name
            );
        }
    }

    #[test]
    fn test_visualize_lists_neighbors() {
        let (net, _) = line_network(3);
        let text = net.visualize();
        assert!(text.contains("Nodes: 3"));
        assert!(text.contains("n1 -> [n0, n2]"));
    }
}
