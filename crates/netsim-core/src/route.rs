//! Route descriptors produced by routing protocols
//!
//! Descriptors are immutable once built. Protocols build a fresh one for
//! every lookup; the forwarding layer only reads them.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::interface::InterfaceIndex;

/// Resolved unicast route for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv4Route {
    destination: Ipv4Addr,
    gateway: Ipv4Addr,
    source: Ipv4Addr,
    output_interface: InterfaceIndex,
}

impl Ipv4Route {
    /// Create a route descriptor
    ///
    /// For directly connected destinations pass the destination itself (or
    /// [`Ipv4Addr::UNSPECIFIED`]) as the gateway.
    pub fn new(
        destination: Ipv4Addr,
        gateway: Ipv4Addr,
        source: Ipv4Addr,
        output_interface: InterfaceIndex,
    ) -> Self {
        Self {
            destination,
            gateway,
            source,
            output_interface,
        }
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    /// The gateway as configured; may be unspecified for on-link routes
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Address of the node the packet is handed to on the output link
    pub fn next_hop(&self) -> Ipv4Addr {
        if self.gateway.is_unspecified() {
            self.destination
        } else {
            self.gateway
        }
    }

    /// Source address to stamp on the packet if it has none yet
    pub fn source(&self) -> Ipv4Addr {
        self.source
    }

    pub fn output_interface(&self) -> InterfaceIndex {
        self.output_interface
    }
}

impl Display for Ipv4Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via {} src {} dev {}",
            self.destination,
            self.next_hop(),
            self.source,
            self.output_interface
        )
    }
}

/// Resolved multicast route: where to replicate a packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4MulticastRoute {
    group: Ipv4Addr,
    origin: Ipv4Addr,
    parent: InterfaceIndex,
    output_ttls: BTreeMap<InterfaceIndex, u8>,
}

impl Ipv4MulticastRoute {
    /// Create a multicast route
    ///
    /// `output_ttls` maps each output interface to the minimum TTL a packet
    /// must carry to be replicated onto it.
    pub fn new(
        group: Ipv4Addr,
        origin: Ipv4Addr,
        parent: InterfaceIndex,
        output_ttls: BTreeMap<InterfaceIndex, u8>,
    ) -> Self {
        Self {
            group,
            origin,
            parent,
            output_ttls,
        }
    }

    pub fn group(&self) -> Ipv4Addr {
        self.group
    }

    pub fn origin(&self) -> Ipv4Addr {
        self.origin
    }

    /// Interface the packet arrived on
    pub fn parent(&self) -> InterfaceIndex {
        self.parent
    }

    /// Output interfaces a packet with the given TTL is replicated onto
    pub fn output_interfaces(&self, ttl: u8) -> impl Iterator<Item = InterfaceIndex> + '_ {
        self.output_ttls
            .iter()
            .filter(move |(_, threshold)| ttl >= **threshold)
            .map(|(interface, _)| *interface)
    }

    pub fn output_ttl(&self, interface: InterfaceIndex) -> Option<u8> {
        self.output_ttls.get(&interface).copied()
    }

    /// Whether any output interface is listed, whatever its TTL threshold
    pub fn has_outputs(&self) -> bool {
        !self.output_ttls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_hop_on_link() {
        let route = Ipv4Route::new(
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::new(10, 0, 0, 1),
            InterfaceIndex(1),
        );
        assert_eq!(route.next_hop(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(route.output_interface(), InterfaceIndex(1));
    }

    #[test]
    fn test_next_hop_via_gateway() {
        let route = Ipv4Route::new(
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(10, 1, 1, 2),
            Ipv4Addr::new(10, 1, 1, 1),
            InterfaceIndex(2),
        );
        assert_eq!(route.next_hop(), Ipv4Addr::new(10, 1, 1, 2));
        assert_eq!(route.to_string(), "10.0.0.5 via 10.1.1.2 src 10.1.1.1 dev 2");
    }

    #[test]
    fn test_multicast_ttl_threshold() {
        let mut ttls = BTreeMap::new();
        ttls.insert(InterfaceIndex(1), 1);
        ttls.insert(InterfaceIndex(2), 16);
        let route = Ipv4MulticastRoute::new(
            Ipv4Addr::new(239, 1, 1, 1),
            Ipv4Addr::new(10, 0, 0, 1),
            InterfaceIndex(3),
            ttls,
        );

        let low: Vec<_> = route.output_interfaces(4).collect();
        assert_eq!(low, vec![InterfaceIndex(1)]);

        let high: Vec<_> = route.output_interfaces(64).collect();
        assert_eq!(high, vec![InterfaceIndex(1), InterfaceIndex(2)]);
        assert_eq!(route.output_ttl(InterfaceIndex(2)), Some(16));
        assert_eq!(route.parent(), InterfaceIndex(3));
        assert!(route.has_outputs());
        assert_eq!(route.output_interfaces(0).count(), 0);

        let empty = Ipv4MulticastRoute::new(route.group(), route.origin(), InterfaceIndex(3), BTreeMap::new());
        assert!(!empty.has_outputs());
    }
}
