//! The routing protocol contract
//!
//! Every routing algorithm installed on a node implements
//! [`Ipv4RoutingProtocol`]. The forwarding layer never knows which one is
//! installed; it only calls this trait.

use std::any::Any;
use std::fmt;

use crate::address::Ipv4InterfaceAddress;
use crate::callbacks::ForwardResponder;
use crate::error::RoutingError;
use crate::interface::{InterfaceIndex, InterfaceView};
use crate::packet::{Ipv4Header, Packet};
use crate::route::Ipv4Route;
use crate::scheduler::SimTime;

/// What a protocol did with a transit packet
#[derive(Debug)]
pub enum InputDisposition {
    /// The protocol owns the packet's fate and will fire exactly one
    /// callback, now or from a later event
    Claimed,
    /// The protocol does not handle this packet; the responder is handed
    /// back untouched for the next protocol
    Declined(ForwardResponder),
}

impl InputDisposition {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

/// Routing protocol contract
///
/// Implementations must return from every method without waiting on
/// simulated time. Asynchronous resolution means storing the
/// [`ForwardResponder`] and resolving it from a scheduled event.
pub trait Ipv4RoutingProtocol {
    /// Name the protocol type is registered under
    fn type_name(&self) -> &'static str;

    /// Attach the node's interface table
    ///
    /// Called once when the protocol is installed. Protocols should treat
    /// every interface that is already up as if it had just come up.
    fn set_ipv4(&mut self, ipv4: InterfaceView);

    /// Resolve a route for a locally originated packet
    ///
    /// Must answer immediately and must not schedule events. `oif`
    /// restricts the answer to one output interface.
    fn route_output(
        &mut self,
        packet: Option<&Packet>,
        header: &Ipv4Header,
        oif: Option<InterfaceIndex>,
    ) -> Result<Ipv4Route, RoutingError>;

    /// Offer a packet arriving from the network
    fn route_input(&mut self, responder: ForwardResponder) -> InputDisposition;

    fn notify_interface_up(&mut self, interface: InterfaceIndex);

    fn notify_interface_down(&mut self, interface: InterfaceIndex);

    fn notify_add_address(&mut self, interface: InterfaceIndex, address: Ipv4InterfaceAddress);

    fn notify_remove_address(&mut self, interface: InterfaceIndex, address: Ipv4InterfaceAddress);

    /// Dump known routes, in protocol-defined order
    fn print_routing_table(&self, out: &mut dyn fmt::Write, now: SimTime) -> fmt::Result;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
