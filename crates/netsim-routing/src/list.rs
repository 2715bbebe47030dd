//! Prioritised protocol list
//!
//! [`ListRouting`] lets several protocols share one node. Protocols are
//! consulted in descending priority; equal priorities keep registration
//! order. The first protocol to claim a transit packet or to return a
//! route for a local packet wins.

use std::any::Any;
use std::fmt;

use netsim_core::{
    ForwardResponder, InputDisposition, InterfaceIndex, InterfaceView, Ipv4Header,
    Ipv4InterfaceAddress, Ipv4Route, Ipv4RoutingProtocol, Packet, RoutingError, SimTime,
};
use tracing::{debug, trace};

struct RegisteredProtocol {
    priority: i16,
    protocol: Box<dyn Ipv4RoutingProtocol>,
}

/// Routing protocol that delegates to an ordered list of protocols
#[derive(Default)]
pub struct ListRouting {
    ipv4: Option<InterfaceView>,
    protocols: Vec<RegisteredProtocol>,
}

impl ListRouting {
    pub const TYPE_NAME: &'static str = "list";

    pub fn new() -> Self {
        Self::default()
    }

    /// Install `protocol` at `priority`; higher priorities are consulted first
    pub fn add_routing_protocol(&mut self, mut protocol: Box<dyn Ipv4RoutingProtocol>, priority: i16) {
        if let Some(ipv4) = &self.ipv4 {
            protocol.set_ipv4(ipv4.clone());
        }
        debug!(protocol = protocol.type_name(), priority, "Routing protocol added");
        // insert after every entry of equal or higher priority
        let position = self.protocols.partition_point(|p| p.priority >= priority);
        self.protocols.insert(position, RegisteredProtocol { priority, protocol });
    }

    pub fn n_routing_protocols(&self) -> usize {
        self.protocols.len()
    }

    /// Protocol at consultation position `index` with its priority
    pub fn routing_protocol(&self, index: usize) -> Option<(&dyn Ipv4RoutingProtocol, i16)> {
        self.protocols.get(index).map(|p| (p.protocol.as_ref(), p.priority))
    }

    /// Type names in consultation order
    pub fn consultation_order(&self) -> Vec<&'static str> {
        self.protocols.iter().map(|p| p.protocol.type_name()).collect()
    }

    /// First installed protocol of concrete type `T`
    pub fn protocol<T: Ipv4RoutingProtocol + 'static>(&self) -> Option<&T> {
        self.protocols
            .iter()
            .find_map(|p| p.protocol.as_any().downcast_ref::<T>())
    }

    pub fn protocol_mut<T: Ipv4RoutingProtocol + 'static>(&mut self) -> Option<&mut T> {
        self.protocols
            .iter_mut()
            .find_map(|p| p.protocol.as_any_mut().downcast_mut::<T>())
    }
}

impl fmt::Debug for ListRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order: Vec<_> = self
            .protocols
            .iter()
            .map(|p| (p.protocol.type_name(), p.priority))
            .collect();
        f.debug_struct("ListRouting").field("protocols", &order).finish()
    }
}

impl Ipv4RoutingProtocol for ListRouting {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn set_ipv4(&mut self, ipv4: InterfaceView) {
        for p in &mut self.protocols {
            p.protocol.set_ipv4(ipv4.clone());
        }
        self.ipv4 = Some(ipv4);
    }

    fn route_output(
        &mut self,
        packet: Option<&Packet>,
        header: &Ipv4Header,
        oif: Option<InterfaceIndex>,
    ) -> Result<Ipv4Route, RoutingError> {
        for p in &mut self.protocols {
            if let Ok(route) = p.protocol.route_output(packet, header, oif) {
                trace!(protocol = p.protocol.type_name(), dst = %header.destination, %route, "Output route found");
                return Ok(route);
            }
        }
        Err(RoutingError::NoRouteToHost(header.destination))
    }

    fn route_input(&mut self, responder: ForwardResponder) -> InputDisposition {
        let Some(ipv4) = &self.ipv4 else {
            return InputDisposition::Declined(responder);
        };
        let header = *responder.header();
        let iif = responder.input_interface();

        if !header.is_multicast() && ipv4.is_destination_address(header.destination, iif) {
            responder.local_deliver(iif);
            return InputDisposition::Claimed;
        }

        if !header.is_multicast() && !iif.is_loopback() && !ipv4.is_forwarding(iif) {
            responder.error(RoutingError::ForwardingDisabled(iif));
            return InputDisposition::Claimed;
        }

        let mut responder = responder;
        for p in &mut self.protocols {
            match p.protocol.route_input(responder) {
                InputDisposition::Claimed => {
                    trace!(protocol = p.protocol.type_name(), dst = %header.destination, "Packet claimed");
                    return InputDisposition::Claimed;
                }
                InputDisposition::Declined(back) => responder = back,
            }
        }
        InputDisposition::Declined(responder)
    }

    fn notify_interface_up(&mut self, interface: InterfaceIndex) {
        for p in &mut self.protocols {
            p.protocol.notify_interface_up(interface);
        }
    }

    fn notify_interface_down(&mut self, interface: InterfaceIndex) {
        for p in &mut self.protocols {
            p.protocol.notify_interface_down(interface);
        }
    }

    fn notify_add_address(&mut self, interface: InterfaceIndex, address: Ipv4InterfaceAddress) {
        for p in &mut self.protocols {
            p.protocol.notify_add_address(interface, address);
        }
    }

    fn notify_remove_address(&mut self, interface: InterfaceIndex, address: Ipv4InterfaceAddress) {
        for p in &mut self.protocols {
            p.protocol.notify_remove_address(interface, address);
        }
    }

    fn print_routing_table(&self, out: &mut dyn fmt::Write, now: SimTime) -> fmt::Result {
        writeln!(out, "Time: {now}, ListRouting with {} protocols", self.protocols.len())?;
        for p in &self.protocols {
            writeln!(out, "  Priority: {} Protocol: {}", p.priority, p.protocol.type_name())?;
            p.protocol.print_routing_table(out, now)?;
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
