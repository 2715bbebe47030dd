//! IPv4 forwarding layer
//!
//! [`Ipv4L3Protocol`] is the per-node stack the routing protocols plug
//! into. It owns the interface table and the attached devices, builds one
//! set of [`ForwardCallbacks`] for the node and turns routing decisions
//! into transmissions, local deliveries and drops.
//!
//! Locally originated packets go through `route_output`. When that finds
//! nothing the packet is offered to `route_input` on the loopback
//! interface, which lets on-demand protocols resolve it asynchronously.
//!
//! Forwarding callbacks never call back into the routing protocol. Work
//! that may need routing again is scheduled with `schedule_now`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use netsim_core::{
    DEFAULT_TTL, ForwardCallbacks, InputDisposition, InterfaceError, InterfaceIndex,
    InterfaceView, Ipv4Header, Ipv4InterfaceAddress, Ipv4InterfaceTable, Ipv4MulticastRoute,
    Ipv4Route, Ipv4RoutingProtocol, Packet, PacketId, RoutingError, SharedInterfaceTable,
    Simulator,
};
use tracing::{debug, info, trace, warn};

use crate::types::{DeliveryRecord, EventLog, L3Stats, NetworkEvent, NodeId, PacketIdAllocator};

/// IP protocol number used for generated traffic
pub const UDP_PROTOCOL: u8 = 17;

/// Something that puts packets on a link
pub trait NetDevice {
    fn transmit(&self, packet: Packet, header: Ipv4Header, next_hop: Ipv4Addr);
}

struct L3Inner {
    this: Weak<L3Inner>,
    node: NodeId,
    simulator: Simulator,
    interfaces: SharedInterfaceTable,
    routing: RefCell<Option<Box<dyn Ipv4RoutingProtocol>>>,
    devices: RefCell<BTreeMap<InterfaceIndex, Rc<dyn NetDevice>>>,
    callbacks: ForwardCallbacks,
    stats: RefCell<L3Stats>,
    deliveries: RefCell<Vec<DeliveryRecord>>,
    log: EventLog,
    packet_ids: PacketIdAllocator,
}

/// Per-node IPv4 stack
#[derive(Clone)]
pub struct Ipv4L3Protocol {
    inner: Rc<L3Inner>,
}

/// Non-owning handle to an [`Ipv4L3Protocol`], held by channels
#[derive(Clone)]
pub struct WeakIpv4L3Protocol(Weak<L3Inner>);

impl WeakIpv4L3Protocol {
    pub fn upgrade(&self) -> Option<Ipv4L3Protocol> {
        self.0.upgrade().map(|inner| Ipv4L3Protocol { inner })
    }
}

impl Ipv4L3Protocol {
    /// Create a stack with only the loopback interface
    pub fn new(node: NodeId, simulator: Simulator, log: EventLog, packet_ids: PacketIdAllocator) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<L3Inner>| L3Inner {
            this: weak.clone(),
            node,
            simulator,
            interfaces: Ipv4InterfaceTable::new().into_shared(),
            routing: RefCell::new(None),
            devices: RefCell::new(BTreeMap::new()),
            callbacks: forward_callbacks(weak),
            stats: RefCell::new(L3Stats::default()),
            deliveries: RefCell::new(Vec::new()),
            log,
            packet_ids,
        });
        Self { inner }
    }

    pub fn node(&self) -> NodeId {
        self.inner.node
    }

    pub fn downgrade(&self) -> WeakIpv4L3Protocol {
        WeakIpv4L3Protocol(Rc::downgrade(&self.inner))
    }

    /// Read-only view of the interface table
    pub fn interfaces(&self) -> InterfaceView {
        self.inner.view()
    }

    /// Attach a device as a new interface, initially down
    pub fn add_interface(&self, device: Rc<dyn NetDevice>) -> InterfaceIndex {
        let index = self.inner.interfaces.borrow_mut().add_interface();
        self.inner.devices.borrow_mut().insert(index, device);
        debug!(node = %self.inner.node, iface = %index, "Interface added");
        index
    }

    /// Install the routing protocol, replacing any previous one
    pub fn set_routing_protocol(&self, mut protocol: Box<dyn Ipv4RoutingProtocol>) {
        protocol.set_ipv4(self.inner.view());
        debug!(node = %self.inner.node, protocol = protocol.type_name(), "Routing protocol installed");
        *self.inner.routing.borrow_mut() = Some(protocol);
    }

    /// Run `f` against the installed protocol
    ///
    /// Must not be called from inside a forwarding callback.
    pub fn with_routing<R>(&self, f: impl FnOnce(&mut dyn Ipv4RoutingProtocol) -> R) -> Option<R> {
        let mut routing = self.inner.routing.borrow_mut();
        routing.as_mut().map(|protocol| f(protocol.as_mut()))
    }

    pub fn set_up(&self, interface: InterfaceIndex) -> Result<(), InterfaceError> {
        let changed = self.inner.interfaces.borrow_mut().set_up(interface)?;
        if changed {
            info!(node = %self.inner.node, iface = %interface, "Interface up");
            self.inner.notify(|p| p.notify_interface_up(interface));
        }
        Ok(())
    }

    pub fn set_down(&self, interface: InterfaceIndex) -> Result<(), InterfaceError> {
        let changed = self.inner.interfaces.borrow_mut().set_down(interface)?;
        if changed {
            info!(node = %self.inner.node, iface = %interface, "Interface down");
            self.inner.notify(|p| p.notify_interface_down(interface));
        }
        Ok(())
    }

    pub fn set_forwarding(&self, interface: InterfaceIndex, forwarding: bool) -> Result<(), InterfaceError> {
        self.inner
            .interfaces
            .borrow_mut()
            .set_forwarding(interface, forwarding)
    }

    pub fn add_address(
        &self,
        interface: InterfaceIndex,
        address: Ipv4InterfaceAddress,
    ) -> Result<(), InterfaceError> {
        self.inner.interfaces.borrow_mut().add_address(interface, address)?;
        debug!(node = %self.inner.node, iface = %interface, %address, "Address added");
        self.inner.notify(|p| p.notify_add_address(interface, address));
        Ok(())
    }

    pub fn remove_address(
        &self,
        interface: InterfaceIndex,
        local: Ipv4Addr,
    ) -> Result<Ipv4InterfaceAddress, InterfaceError> {
        let address = self
            .inner
            .interfaces
            .borrow_mut()
            .remove_address(interface, local)?;
        debug!(node = %self.inner.node, iface = %interface, %address, "Address removed");
        self.inner.notify(|p| p.notify_remove_address(interface, address));
        Ok(address)
    }

    /// Originate a packet from this node
    pub fn send(&self, payload: impl Into<Bytes>, destination: Ipv4Addr, protocol: u8) -> PacketId {
        let inner = &self.inner;
        let id = inner.packet_ids.next_id();
        let packet = Packet::new(id, payload);
        let mut header = Ipv4Header::new(destination, protocol);

        inner.stats.borrow_mut().sent += 1;
        inner.log.push(NetworkEvent::Sent {
            node: inner.node,
            packet: id,
            destination,
            time: inner.simulator.now(),
        });
        trace!(node = %inner.node, packet = %id, dst = %destination, "Packet originated");

        if inner.view().is_destination_address(destination, InterfaceIndex::LOOPBACK) {
            inner.input(packet, header, InterfaceIndex::LOOPBACK);
            return id;
        }

        let result = match inner.routing.borrow_mut().as_mut() {
            Some(routing) => routing.route_output(Some(&packet), &header, None),
            None => Err(RoutingError::NoRouteToHost(destination)),
        };
        match result {
            Ok(route) => {
                header.source = route.source();
                inner.transmit(route.output_interface(), route.next_hop(), packet, header);
            }
            Err(err) => {
                debug!(node = %inner.node, packet = %id, dst = %destination, %err, "No route at origin, offering via loopback");
                inner.input(packet, header, InterfaceIndex::LOOPBACK);
            }
        }
        id
    }

    /// Accept a packet arriving from a link
    pub fn receive(&self, packet: Packet, header: Ipv4Header, interface: InterfaceIndex) {
        let inner = &self.inner;
        if !inner.view().is_up(interface) {
            trace!(node = %inner.node, packet = %packet.id(), iface = %interface, "Packet arrived on a down interface");
            inner.count_drop(&packet, &RoutingError::InterfaceDown(interface));
            return;
        }
        inner.stats.borrow_mut().received += 1;
        inner.input(packet, header, interface);
    }

    /// Counters, including contract violations seen by the callbacks
    pub fn stats(&self) -> L3Stats {
        let mut stats = self.inner.stats.borrow().clone();
        stats.contract_violations = self.inner.callbacks.contract_violations();
        stats
    }

    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.inner.deliveries.borrow().clone()
    }

    /// Dump the installed protocol's routes
    pub fn print_routing_table(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let inner = &self.inner;
        match inner.routing.borrow().as_ref() {
            Some(routing) => routing.print_routing_table(out, inner.simulator.now()),
            None => writeln!(out, "Time: {}, no routing protocol", inner.simulator.now()),
        }
    }
}

impl fmt::Debug for Ipv4L3Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ipv4L3Protocol")
            .field("node", &self.inner.node)
            .field("interfaces", &self.inner.view().n_interfaces())
            .field("stats", &self.inner.stats.borrow())
            .finish()
    }
}

fn forward_callbacks(weak: &Weak<L3Inner>) -> ForwardCallbacks {
    let (u, m, l, e) = (weak.clone(), weak.clone(), weak.clone(), weak.clone());
    ForwardCallbacks::new(
        move |route, packet, header| {
            if let Some(l3) = u.upgrade() {
                l3.ip_forward(route, packet, header);
            }
        },
        move |route, packet, header| {
            if let Some(l3) = m.upgrade() {
                l3.ip_multicast_forward(route, packet, header);
            }
        },
        move |packet, header, iif| {
            if let Some(l3) = l.upgrade() {
                l3.local_deliver(packet, header, iif);
            }
        },
        move |packet, header, err| {
            if let Some(l3) = e.upgrade() {
                l3.route_error(packet, header, err);
            }
        },
    )
}

impl L3Inner {
    fn view(&self) -> InterfaceView {
        InterfaceView::new(&self.interfaces)
    }

    fn notify(&self, f: impl FnOnce(&mut dyn Ipv4RoutingProtocol)) {
        if let Some(routing) = self.routing.borrow_mut().as_mut() {
            f(routing.as_mut());
        }
    }

    /// Packets with no source yet, or one of ours, started here
    fn is_local_origin(&self, source: Ipv4Addr) -> bool {
        source.is_unspecified() || self.view().interface_for_address(source).is_some()
    }

    fn input(&self, packet: Packet, header: Ipv4Header, iif: InterfaceIndex) {
        let responder = self.callbacks.responder(packet, header, iif);
        let disposition = match self.routing.borrow_mut().as_mut() {
            Some(routing) => routing.route_input(responder),
            None => InputDisposition::Declined(responder),
        };
        if let InputDisposition::Declined(responder) = disposition {
            let (packet, header) = responder.into_parts();
            self.route_error(packet, header, RoutingError::NoRouteToHost(header.destination));
        }
    }

    fn transmit(&self, interface: InterfaceIndex, next_hop: Ipv4Addr, packet: Packet, header: Ipv4Header) {
        if interface.is_loopback() {
            let weak = self.this.clone();
            self.simulator.schedule_now(move || {
                if let Some(l3) = weak.upgrade() {
                    l3.input(packet, header, InterfaceIndex::LOOPBACK);
                }
            });
            return;
        }
        if !self.view().is_up(interface) {
            self.route_error(packet, header, RoutingError::InterfaceDown(interface));
            return;
        }
        let device = self.devices.borrow().get(&interface).cloned();
        match device {
            Some(device) => {
                trace!(node = %self.node, packet = %packet.id(), iface = %interface, %next_hop, "Transmit");
                device.transmit(packet, header, next_hop);
            }
            None => {
                warn!(node = %self.node, iface = %interface, "No device attached to interface");
                self.route_error(packet, header, RoutingError::InterfaceDown(interface));
            }
        }
    }

    fn ip_forward(&self, route: Ipv4Route, packet: Packet, mut header: Ipv4Header) {
        let local = self.is_local_origin(header.source);
        if header.source.is_unspecified() {
            header.source = route.source();
        }
        if !local {
            if !header.decrement_ttl() {
                self.route_error(packet, header, RoutingError::TtlExpired(header.destination));
                return;
            }
            self.stats.borrow_mut().forwarded += 1;
            self.log.push(NetworkEvent::Forwarded {
                node: self.node,
                packet: packet.id(),
                next_hop: route.next_hop(),
                iface: route.output_interface(),
                time: self.simulator.now(),
            });
        }
        self.transmit(route.output_interface(), route.next_hop(), packet, header);
    }

    fn ip_multicast_forward(&self, route: Ipv4MulticastRoute, packet: Packet, header: Ipv4Header) {
        if !route.has_outputs() {
            self.route_error(packet, header, RoutingError::NoRouteToHost(header.destination));
            return;
        }
        let outputs: Vec<_> = route.output_interfaces(header.ttl).collect();
        let mut copies = 0u64;
        for oif in outputs {
            let mut copy = header;
            if !copy.decrement_ttl() {
                continue;
            }
            copies += 1;
            self.transmit(oif, header.destination, packet.clone(), copy);
        }
        if copies == 0 {
            self.route_error(packet, header, RoutingError::TtlExpired(header.destination));
            return;
        }
        self.stats.borrow_mut().forwarded += copies;
        trace!(node = %self.node, packet = %packet.id(), group = %route.group(), copies, "Multicast replicated");
    }

    fn local_deliver(&self, packet: Packet, header: Ipv4Header, iif: InterfaceIndex) {
        let weak = self.this.clone();
        self.simulator.schedule_now(move || {
            if let Some(l3) = weak.upgrade() {
                l3.record_delivery(packet, header, iif);
            }
        });
    }

    fn record_delivery(&self, packet: Packet, header: Ipv4Header, iif: InterfaceIndex) {
        let now = self.simulator.now();
        let hops = DEFAULT_TTL.saturating_sub(header.ttl);
        self.stats.borrow_mut().delivered += 1;
        self.deliveries.borrow_mut().push(DeliveryRecord {
            node: self.node,
            packet: packet.id(),
            source: header.source,
            destination: header.destination,
            iface: iif,
            len: packet.len(),
            hops,
            time: now,
        });
        self.log.push(NetworkEvent::Delivered {
            node: self.node,
            packet: packet.id(),
            source: header.source,
            hops,
            time: now,
        });
        info!(node = %self.node, packet = %packet.id(), src = %header.source, hops, "Packet delivered");
    }

    fn count_drop(&self, packet: &Packet, reason: &RoutingError) {
        self.stats.borrow_mut().record_drop(reason);
        self.log.push(NetworkEvent::Dropped {
            node: self.node,
            packet: packet.id(),
            reason: reason.to_string(),
            time: self.simulator.now(),
        });
    }

    fn route_error(&self, packet: Packet, header: Ipv4Header, reason: RoutingError) {
        debug!(node = %self.node, packet = %packet.id(), dst = %header.destination, %reason, "Packet dropped");
        self.count_drop(&packet, &reason);
        if reason.is_unreachable() && !self.is_local_origin(header.source) {
            self.stats.borrow_mut().diagnostics += 1;
            self.log.push(NetworkEvent::Unreachable {
                node: self.node,
                packet: packet.id(),
                source: header.source,
                destination: header.destination,
                time: self.simulator.now(),
            });
        }
    }
}
