//! # Netsim Routing
//!
//! Routing protocols for the netsim IPv4 simulator.
//!
//! Every protocol here implements [`netsim_core::Ipv4RoutingProtocol`] and
//! can be installed on a node directly or combined in a [`ListRouting`].
//!
//! ## Core Components
//!
//! - [`StaticRouting`]: Manually configured unicast and multicast tables plus
//!   connected-network routes maintained from interface notifications
//! - [`DiscoveryRouting`]: On-demand discovery that queues transit packets
//!   while a route is resolved asynchronously
//! - [`ListRouting`]: Consults several protocols in priority order
//! - [`ProtocolRegistry`]: Builds protocols by type name from configuration
//!
//! ## Consultation Order
//!
//! A [`ListRouting`] offers each decision to its protocols from the highest
//! priority down, ties in registration order:
//!
//! 1. **Local**: packets for this node are delivered before any protocol sees them
//! 2. **Claim**: the first protocol to claim a transit packet owns it
//! 3. **Decline**: if every protocol declines, the forwarding layer drops it
//!
//! ## Example
//!
//! ```rust,ignore
//! use netsim_routing::{ListRouting, StaticRouting, DiscoveryRouting};
//!
//! let mut list = ListRouting::new();
//! list.add_routing_protocol(Box::new(static_routing), 10);
//! list.add_routing_protocol(Box::new(discovery), 5);
//!
//! // installed on a node's forwarding layer
//! l3.set_routing_protocol(Box::new(list));
//! ```

pub mod discovery;
pub mod error;
pub mod list;
pub mod registry;
pub mod static_routing;
pub mod table;

// Re-export main types
pub use discovery::{
    DiscoveredRoute, DiscoveryConfig, DiscoveryRouting, DiscoveryStats, RequestId, RouteResolver,
};
pub use error::{RegistryError, RegistryResult};
pub use list::ListRouting;
pub use registry::{ProtocolContext, ProtocolFactory, ProtocolRegistry};
pub use static_routing::StaticRouting;
pub use table::{MulticastRouteEntry, RouteEntry, RoutingTable};

// Re-export the contract for convenience
pub use netsim_core::{InputDisposition, Ipv4RoutingProtocol, RoutingError};
