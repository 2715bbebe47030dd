//! Point-to-point channels
//!
//! A channel joins exactly two interfaces and delivers every packet to the
//! far end after a fixed propagation delay. Carrier state lives in the
//! interfaces: a packet still in flight when its link goes down is dropped
//! by the receiving stack.

use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use netsim_core::{InterfaceIndex, Ipv4Header, Packet, Simulator};
use tracing::{trace, warn};

use crate::ipv4::{Ipv4L3Protocol, NetDevice, WeakIpv4L3Protocol};

/// A two-ended link with a fixed delay
pub struct PointToPointChannel {
    simulator: Simulator,
    delay: Duration,
    ends: RefCell<[Option<(WeakIpv4L3Protocol, InterfaceIndex)>; 2]>,
    carried: Cell<u64>,
}

/// One side of a [`PointToPointChannel`], attached to a node as a device
struct ChannelEnd {
    channel: Rc<PointToPointChannel>,
    side: usize,
}

impl PointToPointChannel {
    /// Create a channel and attach a new interface on each node to it
    ///
    /// Returns the channel and the interface indices on `a` and `b`. The
    /// interfaces start down without addresses.
    pub fn connect(
        simulator: &Simulator,
        delay: Duration,
        a: &Ipv4L3Protocol,
        b: &Ipv4L3Protocol,
    ) -> (Rc<Self>, InterfaceIndex, InterfaceIndex) {
        let channel = Rc::new(Self {
            simulator: simulator.clone(),
            delay,
            ends: RefCell::new([None, None]),
            carried: Cell::new(0),
        });
        let if_a = a.add_interface(Rc::new(ChannelEnd {
            channel: channel.clone(),
            side: 0,
        }));
        let if_b = b.add_interface(Rc::new(ChannelEnd {
            channel: channel.clone(),
            side: 1,
        }));
        *channel.ends.borrow_mut() = [Some((a.downgrade(), if_a)), Some((b.downgrade(), if_b))];
        (channel, if_a, if_b)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Packets put on the channel so far, both directions
    pub fn packets_carried(&self) -> u64 {
        self.carried.get()
    }
}

impl NetDevice for ChannelEnd {
    fn transmit(&self, packet: Packet, header: Ipv4Header, next_hop: Ipv4Addr) {
        let channel = &self.channel;
        let peer = channel.ends.borrow()[1 - self.side].clone();
        let Some((peer, iface)) = peer else {
            warn!(packet = %packet.id(), "Channel has no far end, packet lost");
            return;
        };
        channel.carried.set(channel.carried.get() + 1);
        trace!(packet = %packet.id(), %next_hop, delay_ms = channel.delay.as_millis() as u64, "Packet on the wire");
        channel.simulator.schedule(channel.delay, move || {
            if let Some(l3) = peer.upgrade() {
                l3.receive(packet, header, iface);
            }
        });
    }
}
