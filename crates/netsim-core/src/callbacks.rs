//! Forwarding callbacks and the one-shot responder
//!
//! A forwarding layer builds one [`ForwardCallbacks`] with its four outcome
//! handlers and hands a [`ForwardResponder`] to the routing protocol for
//! every transit packet. The responder owns the packet until a protocol
//! decides its fate:
//!
//! - **unicast**: a route was found, transmit via the route
//! - **multicast**: replicate according to a multicast route
//! - **local_deliver**: the packet is for this node
//! - **error**: no route, drop and maybe report
//!
//! Each outcome method consumes the responder, so at most one fires. A
//! responder dropped without firing is a contract violation: it is logged
//! and counted so test harnesses can assert it never happens.

use std::cell::Cell;
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::Rc;

use tracing::error;

use crate::error::RoutingError;
use crate::interface::InterfaceIndex;
use crate::packet::{Ipv4Header, Packet};
use crate::route::{Ipv4MulticastRoute, Ipv4Route};

pub type UnicastForwardCallback = Rc<dyn Fn(Ipv4Route, Packet, Ipv4Header)>;
pub type MulticastForwardCallback = Rc<dyn Fn(Ipv4MulticastRoute, Packet, Ipv4Header)>;
pub type LocalDeliverCallback = Rc<dyn Fn(Packet, Ipv4Header, InterfaceIndex)>;
pub type RouteErrorCallback = Rc<dyn Fn(Packet, Ipv4Header, RoutingError)>;

/// The four outcome handlers supplied by a forwarding layer
///
/// Cloning only bumps reference counts, so a forwarding layer builds this
/// once and clones it per packet.
#[derive(Clone)]
pub struct ForwardCallbacks {
    unicast: UnicastForwardCallback,
    multicast: MulticastForwardCallback,
    local: LocalDeliverCallback,
    error: RouteErrorCallback,
    violations: Rc<Cell<u64>>,
}

impl ForwardCallbacks {
    pub fn new(
        unicast: impl Fn(Ipv4Route, Packet, Ipv4Header) + 'static,
        multicast: impl Fn(Ipv4MulticastRoute, Packet, Ipv4Header) + 'static,
        local: impl Fn(Packet, Ipv4Header, InterfaceIndex) + 'static,
        error: impl Fn(Packet, Ipv4Header, RoutingError) + 'static,
    ) -> Self {
        Self {
            unicast: Rc::new(unicast),
            multicast: Rc::new(multicast),
            local: Rc::new(local),
            error: Rc::new(error),
            violations: Rc::new(Cell::new(0)),
        }
    }

    /// Wrap a packet arriving on `input_interface` for hand-off to a protocol
    pub fn responder(&self, packet: Packet, header: Ipv4Header, input_interface: InterfaceIndex) -> ForwardResponder {
        ForwardResponder {
            callbacks: self.clone(),
            pending: Some(PendingPacket { packet, header }),
            input_interface,
        }
    }

    /// Responders dropped without resolving their packet
    pub fn contract_violations(&self) -> u64 {
        self.violations.get()
    }
}

impl fmt::Debug for ForwardCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardCallbacks")
            .field("violations", &self.violations.get())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct PendingPacket {
    packet: Packet,
    header: Ipv4Header,
}

/// One-shot continuation for a single transit packet
///
/// Protocols either resolve it immediately, hand it back by declining, or
/// store it and resolve it from a later scheduled event.
pub struct ForwardResponder {
    callbacks: ForwardCallbacks,
    pending: Option<PendingPacket>,
    input_interface: InterfaceIndex,
}

impl ForwardResponder {
    fn pending(&self) -> &PendingPacket {
        // only the consuming methods below take the packet out, and they
        // consume self
        self.pending.as_ref().unwrap_or_else(|| unreachable!("responder already resolved"))
    }

    fn take(&mut self) -> PendingPacket {
        self.pending
            .take()
            .unwrap_or_else(|| unreachable!("responder already resolved"))
    }

    pub fn packet(&self) -> &Packet {
        &self.pending().packet
    }

    pub fn header(&self) -> &Ipv4Header {
        &self.pending().header
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.pending().header.destination
    }

    pub fn input_interface(&self) -> InterfaceIndex {
        self.input_interface
    }

    /// Transmit the packet via `route`
    pub fn unicast(mut self, route: Ipv4Route) {
        let PendingPacket { packet, header } = self.take();
        (self.callbacks.unicast)(route, packet, header);
    }

    /// Replicate the packet according to `route`
    pub fn multicast(mut self, route: Ipv4MulticastRoute) {
        let PendingPacket { packet, header } = self.take();
        (self.callbacks.multicast)(route, packet, header);
    }

    /// Deliver the packet to this node's upper layers
    pub fn local_deliver(mut self, interface: InterfaceIndex) {
        let PendingPacket { packet, header } = self.take();
        (self.callbacks.local)(packet, header, interface);
    }

    /// Drop the packet with `reason`
    pub fn error(mut self, reason: RoutingError) {
        let PendingPacket { packet, header } = self.take();
        (self.callbacks.error)(packet, header, reason);
    }

    /// Take the packet back without firing any callback
    ///
    /// Only the forwarding layer should do this, after every protocol
    /// declined the packet.
    pub fn into_parts(mut self) -> (Packet, Ipv4Header) {
        let PendingPacket { packet, header } = self.take();
        (packet, header)
    }
}

impl Drop for ForwardResponder {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.callbacks.violations.set(self.callbacks.violations.get() + 1);
            error!(
                packet = %pending.packet.id(),
                dst = %pending.header.destination,
                iif = %self.input_interface,
                "Routing contract violation: packet claimed but never resolved"
            );
        }
    }
}

impl fmt::Debug for ForwardResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardResponder")
            .field("pending", &self.pending)
            .field("input_interface", &self.input_interface)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketId;
    use std::cell::RefCell;

    #[derive(Debug, PartialEq)]
    enum Outcome {
        Unicast(InterfaceIndex),
        Multicast,
        Local(InterfaceIndex),
        Error(RoutingError),
    }

    fn recording_callbacks() -> (ForwardCallbacks, Rc<RefCell<Vec<Outcome>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (u, m, l, e) = (log.clone(), log.clone(), log.clone(), log.clone());
        let callbacks = ForwardCallbacks::new(
            move |route, _, _| u.borrow_mut().push(Outcome::Unicast(route.output_interface())),
            move |_, _, _| m.borrow_mut().push(Outcome::Multicast),
            move |_, _, iif| l.borrow_mut().push(Outcome::Local(iif)),
            move |_, _, err| e.borrow_mut().push(Outcome::Error(err)),
        );
        (callbacks, log)
    }

    fn make_responder(callbacks: &ForwardCallbacks) -> ForwardResponder {
        callbacks.responder(
            Packet::new(PacketId(1), b"x".to_vec()),
            Ipv4Header::new(Ipv4Addr::new(10, 0, 0, 5), 17),
            InterfaceIndex(1),
        )
    }

    #[test]
    fn test_unicast_fires_once() {
        let (callbacks, log) = recording_callbacks();
        let responder = make_responder(&callbacks);
        assert_eq!(responder.destination(), Ipv4Addr::new(10, 0, 0, 5));
        responder.unicast(Ipv4Route::new(
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::new(10, 0, 0, 1),
            InterfaceIndex(2),
        ));
        assert_eq!(*log.borrow(), vec![Outcome::Unicast(InterfaceIndex(2))]);
        assert_eq!(callbacks.contract_violations(), 0);
    }

    #[test]
    fn test_local_and_error() {
        let (callbacks, log) = recording_callbacks();
        make_responder(&callbacks).local_deliver(InterfaceIndex(1));
        make_responder(&callbacks).error(RoutingError::NoRouteToHost(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(
            *log.borrow(),
            vec![
                Outcome::Local(InterfaceIndex(1)),
                Outcome::Error(RoutingError::NoRouteToHost(Ipv4Addr::new(10, 0, 0, 5))),
            ]
        );
    }

    #[test]
    fn test_dropped_responder_counts_violation() {
        let (callbacks, log) = recording_callbacks();
        drop(make_responder(&callbacks));
        assert!(log.borrow().is_empty());
        assert_eq!(callbacks.contract_violations(), 1);
    }

    #[test]
    fn test_into_parts_is_not_a_violation() {
        let (callbacks, log) = recording_callbacks();
        let (packet, header) = make_responder(&callbacks).into_parts();
        assert_eq!(packet.id(), PacketId(1));
        assert_eq!(header.destination, Ipv4Addr::new(10, 0, 0, 5));
        assert!(log.borrow().is_empty());
        assert_eq!(callbacks.contract_violations(), 0);
    }

    #[test]
    fn test_violation_counter_shared_across_clones() {
        let (callbacks, _) = recording_callbacks();
        let clone = callbacks.clone();
        drop(make_responder(&clone));
        assert_eq!(callbacks.contract_violations(), 1);
    }
}
