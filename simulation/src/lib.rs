//! # netsim simulation
//!
//! The IPv4 layer, point-to-point links and topologies that drive the
//! routing protocols in `netsim-routing` through a discrete-event simulator.
//!
//! ## Architecture
//!
//! - **Types** (`types.rs`): node and link ids, the network event log, per-node statistics
//! - **IPv4** (`ipv4.rs`): the per-node layer 3 stack that calls into a routing protocol
//! - **Channel** (`channel.rs`): point-to-point links with a fixed propagation delay
//! - **Topology** (`topology.rs`): the network, its address oracle and topology builders
//! - **Config** (`config.rs`): TOML description of a whole simulation
//! - **Scenarios** (`scenarios.rs`): pre-built scenarios and run reports
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use netsim_simulation::*;
//!
//! let network = Network::new();
//! let a = network.add_node("a");
//! let b = network.add_node("b");
//! network.connect(a, b, "10.0.0.0/24".parse()?, Duration::from_millis(1))?;
//! network.install_routing(a, Box::new(StaticRouting::new()))?;
//! network.install_routing(b, Box::new(StaticRouting::new()))?;
//!
//! network.send(a, "10.0.0.2".parse()?, &b"hello"[..])?;
//! network.run();
//! assert_eq!(network.deliveries().len(), 1);
//! ```
//!
//! ## Packet path
//!
//! 1. **Origination**: `route_output` picks a route or fails; a failed lookup
//!    hands the packet to `route_input` on the loopback interface so an
//!    on-demand protocol can hold it
//! 2. **Input**: `route_input` claims the packet and later resolves its
//!    responder exactly once (unicast, multicast, local delivery or error)
//! 3. **Forwarding**: non-local packets lose one TTL per hop and leave
//!    through the chosen interface's channel

pub mod channel;
pub mod config;
pub mod ipv4;
pub mod scenarios;
pub mod topology;
pub mod types;

#[cfg(test)]
mod integration_scenarios;

pub use channel::PointToPointChannel;
pub use config::{
    ConfigError, LinkAction, LinkConfig, LinkEventConfig, NodeConfig, ProtocolEntry, SimulationConfig,
    StaticRouteConfig, TrafficConfig,
};
pub use ipv4::{Ipv4L3Protocol, NetDevice, UDP_PROTOCOL};
pub use scenarios::{NodeReport, SCENARIOS, SimulationReport, run_scenario};
pub use topology::{Link, LinkEndpoint, Network, Node, TopologyBuilder, TopologyError, TopologyOracle, link_subnet};
pub use types::{DeliveryRecord, EventLog, L3Stats, LinkId, NetworkEvent, NodeId, PacketIdAllocator};

pub use netsim_core::{SimTime, Simulator};
pub use netsim_routing::{DiscoveryConfig, DiscoveryRouting, ListRouting, StaticRouting};
