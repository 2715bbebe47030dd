//! Static routing
//!
//! [`StaticRouting`] answers every lookup synchronously from manually
//! configured tables. It also maintains connected-network routes for each
//! interface address, installing them when an interface comes up or gains
//! an address and removing them when the interface goes down. Configured
//! routes survive a flap; lookups skip them while their interface is down.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use netsim_core::{
    ForwardResponder, InputDisposition, InterfaceIndex, InterfaceView, Ipv4Header,
    Ipv4InterfaceAddress, Ipv4Mask, Ipv4MulticastRoute, Ipv4Prefix, Ipv4Route,
    Ipv4RoutingProtocol, Packet, RoutingError, SimTime, is_local_multicast,
};
use tracing::{debug, trace, warn};

use crate::table::{MulticastRouteEntry, RouteEntry, RoutingTable};

/// TTL threshold installed for static multicast output interfaces
const MULTICAST_TTL_THRESHOLD: u8 = 1;

/// Table-driven routing from manually configured routes
#[derive(Debug, Default)]
pub struct StaticRouting {
    ipv4: Option<InterfaceView>,
    unicast: RoutingTable,
    multicast: Vec<MulticastRouteEntry>,
}

impl StaticRouting {
    pub const TYPE_NAME: &'static str = "static";

    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route to a network, optionally through a gateway
    pub fn add_network_route_to(
        &mut self,
        network: Ipv4Prefix,
        gateway: Option<Ipv4Addr>,
        interface: InterfaceIndex,
        metric: u32,
    ) {
        let entry = RouteEntry::new(network, gateway, interface, metric);
        if self.unicast.insert(entry) {
            debug!(%network, ?gateway, iface = %interface, metric, "Static route added");
        }
    }

    /// Add a /32 route to a single host
    pub fn add_host_route_to(
        &mut self,
        host: Ipv4Addr,
        gateway: Option<Ipv4Addr>,
        interface: InterfaceIndex,
        metric: u32,
    ) {
        self.add_network_route_to(Ipv4Prefix::new(host, Ipv4Mask::HOST), gateway, interface, metric);
    }

    /// Add a 0.0.0.0/0 route through `gateway`
    pub fn set_default_route(&mut self, gateway: Ipv4Addr, interface: InterfaceIndex, metric: u32) {
        self.add_network_route_to(
            Ipv4Prefix::new(Ipv4Addr::UNSPECIFIED, Ipv4Mask::ANY),
            Some(gateway),
            interface,
            metric,
        );
    }

    pub fn n_routes(&self) -> usize {
        self.unicast.len()
    }

    pub fn route(&self, index: usize) -> Option<&RouteEntry> {
        self.unicast.get(index)
    }

    pub fn remove_route(&mut self, index: usize) -> Option<RouteEntry> {
        self.unicast.remove(index)
    }

    /// Add a multicast forwarding entry
    pub fn add_multicast_route(
        &mut self,
        origin: Ipv4Addr,
        group: Ipv4Addr,
        input_interface: Option<InterfaceIndex>,
        output_interfaces: Vec<InterfaceIndex>,
    ) {
        self.multicast.push(MulticastRouteEntry::new(
            origin,
            group,
            input_interface,
            output_interfaces,
        ));
    }

    /// Forward every multicast packet without a specific entry out `interface`
    pub fn set_default_multicast_route(&mut self, interface: InterfaceIndex) {
        self.add_multicast_route(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, None, vec![interface]);
    }

    pub fn n_multicast_routes(&self) -> usize {
        self.multicast.len()
    }

    pub fn remove_multicast_route(&mut self, index: usize) -> Option<MulticastRouteEntry> {
        (index < self.multicast.len()).then(|| self.multicast.remove(index))
    }

    fn is_up(&self, interface: InterfaceIndex) -> bool {
        self.ipv4.as_ref().is_some_and(|v| v.is_up(interface))
    }

    fn lookup(&self, destination: Ipv4Addr, oif: Option<InterfaceIndex>) -> Option<Ipv4Route> {
        let ipv4 = self.ipv4.as_ref()?;

        if is_local_multicast(destination) {
            // link-local multicast goes straight out the requested interface
            let oif = oif?;
            let source = ipv4.source_address_for(oif, destination)?;
            return Some(Ipv4Route::new(destination, Ipv4Addr::UNSPECIFIED, source, oif));
        }

        let entry = self.unicast.lookup(destination, oif, |i| ipv4.is_up(i))?;
        let next_hop = entry.gateway().unwrap_or(destination);
        let source = ipv4.source_address_for(entry.interface(), next_hop)?;
        trace!(dst = %destination, iface = %entry.interface(), %next_hop, "Static lookup hit");
        Some(Ipv4Route::new(
            destination,
            entry.gateway().unwrap_or(Ipv4Addr::UNSPECIFIED),
            source,
            entry.interface(),
        ))
    }

    fn lookup_multicast(&self, origin: Ipv4Addr, group: Ipv4Addr, iif: InterfaceIndex) -> Option<Ipv4MulticastRoute> {
        let entry = self.multicast.iter().find(|e| e.matches(origin, group, iif))?;
        let output_ttls: BTreeMap<_, _> = entry
            .output_interfaces()
            .iter()
            .filter(|i| **i != iif && self.is_up(**i))
            .map(|i| (*i, MULTICAST_TTL_THRESHOLD))
            .collect();
        if output_ttls.is_empty() {
            trace!(%group, iif = %iif, "Multicast entry has no usable output");
            return None;
        }
        Some(Ipv4MulticastRoute::new(group, origin, iif, output_ttls))
    }

    fn connected_route(interface: InterfaceIndex, address: &Ipv4InterfaceAddress) -> Option<RouteEntry> {
        if address.local().is_unspecified() || address.mask() == Ipv4Mask::HOST {
            return None;
        }
        Some(RouteEntry::new(address.prefix(), None, interface, 0))
    }
}

impl Ipv4RoutingProtocol for StaticRouting {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn set_ipv4(&mut self, ipv4: InterfaceView) {
        let up: Vec<_> = (0..ipv4.n_interfaces() as u32)
            .map(InterfaceIndex)
            .filter(|i| ipv4.is_up(*i))
            .collect();
        self.ipv4 = Some(ipv4);
        for interface in up {
            self.notify_interface_up(interface);
        }
    }

    fn route_output(
        &mut self,
        _packet: Option<&Packet>,
        header: &Ipv4Header,
        oif: Option<InterfaceIndex>,
    ) -> Result<Ipv4Route, RoutingError> {
        self.lookup(header.destination, oif)
            .ok_or(RoutingError::NoRouteToHost(header.destination))
    }

    fn route_input(&mut self, responder: ForwardResponder) -> InputDisposition {
        let Some(ipv4) = self.ipv4.clone() else {
            warn!("Static routing has no interface table attached");
            return InputDisposition::Declined(responder);
        };
        let header = *responder.header();
        let iif = responder.input_interface();

        if header.is_multicast() {
            return match self.lookup_multicast(header.source, header.destination, iif) {
                Some(route) => {
                    trace!(group = %header.destination, iif = %iif, "Multicast route found");
                    responder.multicast(route);
                    InputDisposition::Claimed
                }
                None => InputDisposition::Declined(responder),
            };
        }

        if ipv4.is_destination_address(header.destination, iif) {
            responder.local_deliver(iif);
            return InputDisposition::Claimed;
        }

        if !ipv4.is_forwarding(iif) {
            responder.error(RoutingError::ForwardingDisabled(iif));
            return InputDisposition::Claimed;
        }

        match self.lookup(header.destination, None) {
            Some(route) => {
                responder.unicast(route);
                InputDisposition::Claimed
            }
            None => InputDisposition::Declined(responder),
        }
    }

    fn notify_interface_up(&mut self, interface: InterfaceIndex) {
        let Some(ipv4) = self.ipv4.as_ref() else {
            return;
        };
        for address in ipv4.addresses(interface) {
            if let Some(entry) = Self::connected_route(interface, &address) {
                if self.unicast.insert(entry) {
                    debug!(network = %entry.prefix(), iface = %interface, "Connected route added");
                }
            }
        }
    }

    fn notify_interface_down(&mut self, interface: InterfaceIndex) {
        let Some(ipv4) = self.ipv4.as_ref() else {
            return;
        };
        let connected: Vec<_> = ipv4
            .addresses(interface)
            .iter()
            .filter_map(|a| Self::connected_route(interface, a))
            .collect();
        let removed = self.unicast.retain(|e| !connected.contains(e));
        debug!(iface = %interface, removed, "Connected routes through interface removed");
    }

    fn notify_add_address(&mut self, interface: InterfaceIndex, address: Ipv4InterfaceAddress) {
        if !self.is_up(interface) {
            return;
        }
        if let Some(entry) = Self::connected_route(interface, &address) {
            if self.unicast.insert(entry) {
                debug!(network = %entry.prefix(), iface = %interface, "Connected route added");
            }
        }
    }

    fn notify_remove_address(&mut self, interface: InterfaceIndex, address: Ipv4InterfaceAddress) {
        if !self.is_up(interface) {
            return;
        }
        if let Some(connected) = Self::connected_route(interface, &address) {
            let removed = self.unicast.retain(|e| *e != connected);
            debug!(network = %connected.prefix(), iface = %interface, removed, "Connected route removed");
        }
    }

    fn print_routing_table(&self, out: &mut dyn fmt::Write, now: SimTime) -> fmt::Result {
        writeln!(out, "Time: {now}, StaticRouting table")?;
        if self.unicast.is_empty() {
            writeln!(out, "  (no routes)")?;
        } else {
            writeln!(
                out,
                "{:<16}{:<16}{:<16}{:<6}{:<7}Iface",
                "Destination", "Gateway", "Genmask", "Flags", "Metric"
            )?;
            for entry in self.unicast.iter() {
                writeln!(
                    out,
                    "{:<16}{:<16}{:<16}{:<6}{:<7}{}",
                    entry.prefix().network().to_string(),
                    entry.gateway().unwrap_or(Ipv4Addr::UNSPECIFIED).to_string(),
                    entry.prefix().mask().to_string(),
                    entry.flags(),
                    entry.metric(),
                    entry.interface()
                )?;
            }
        }
        for entry in &self.multicast {
            let outputs: Vec<String> = entry.output_interfaces().iter().map(|i| i.to_string()).collect();
            writeln!(
                out,
                "mcast origin {} group {} iif {} -> [{}]",
                entry.origin(),
                entry.group(),
                entry.input_interface().map_or_else(|| "*".to_string(), |i| i.to_string()),
                outputs.join(",")
            )?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
