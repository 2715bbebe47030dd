//! Core types for the netsim simulation
//!
//! Node identifiers, the global event log, per-node delivery records and
//! forwarding statistics.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::rc::Rc;

use netsim_core::{InterfaceIndex, PacketId, RoutingError, SimTime};
use serde::{Deserialize, Serialize};

/// Unique identifier for a node in the network
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[display("n{_0}")]
pub struct NodeId(pub u32);

/// Unique identifier for a point-to-point link
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[display("link{_0}")]
pub struct LinkId(pub usize);

/// Events that occur in the network simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NetworkEvent {
    /// Packet originated by a node
    Sent {
        node: NodeId,
        packet: PacketId,
        destination: Ipv4Addr,
        time: SimTime,
    },
    /// Transit packet handed to the next hop
    Forwarded {
        node: NodeId,
        packet: PacketId,
        next_hop: Ipv4Addr,
        iface: InterfaceIndex,
        time: SimTime,
    },
    /// Packet handed to the local stack of its destination
    Delivered {
        node: NodeId,
        packet: PacketId,
        source: Ipv4Addr,
        hops: u8,
        time: SimTime,
    },
    /// Packet dropped by a node
    Dropped {
        node: NodeId,
        packet: PacketId,
        reason: String,
        time: SimTime,
    },
    /// Unreachability notice recorded for a transit packet's source
    Unreachable {
        node: NodeId,
        packet: PacketId,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        time: SimTime,
    },
    LinkDown {
        link: LinkId,
        time: SimTime,
    },
    LinkUp {
        link: LinkId,
        time: SimTime,
    },
}

impl NetworkEvent {
    pub fn time(&self) -> SimTime {
        match self {
            Self::Sent { time, .. }
            | Self::Forwarded { time, .. }
            | Self::Delivered { time, .. }
            | Self::Dropped { time, .. }
            | Self::Unreachable { time, .. }
            | Self::LinkDown { time, .. }
            | Self::LinkUp { time, .. } => *time,
        }
    }

    /// Packet the event concerns, if any
    pub fn packet(&self) -> Option<PacketId> {
        match self {
            Self::Sent { packet, .. }
            | Self::Forwarded { packet, .. }
            | Self::Delivered { packet, .. }
            | Self::Dropped { packet, .. }
            | Self::Unreachable { packet, .. } => Some(*packet),
            Self::LinkDown { .. } | Self::LinkUp { .. } => None,
        }
    }
}

/// Append-only event log shared by every node of a network
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<NetworkEvent>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: NetworkEvent) {
        self.0.borrow_mut().push(event);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Copy of every event so far, in the order they happened
    pub fn snapshot(&self) -> Vec<NetworkEvent> {
        self.0.borrow().clone()
    }

    /// Events concerning one packet
    pub fn for_packet(&self, packet: PacketId) -> Vec<NetworkEvent> {
        self.0
            .borrow()
            .iter()
            .filter(|e| e.packet() == Some(packet))
            .cloned()
            .collect()
    }
}

/// Network-wide packet id counter
#[derive(Debug, Clone, Default)]
pub struct PacketIdAllocator(Rc<Cell<u64>>);

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> PacketId {
        let next = self.0.get() + 1;
        self.0.set(next);
        PacketId(next)
    }
}

/// A packet that reached its destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub node: NodeId,
    pub packet: PacketId,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub iface: InterfaceIndex,
    pub len: usize,
    /// Routers traversed on the way
    pub hops: u8,
    pub time: SimTime,
}

/// Forwarding layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L3Stats {
    pub sent: u64,
    pub received: u64,
    pub forwarded: u64,
    pub delivered: u64,
    /// Drops keyed by [`RoutingError::kind`]
    pub dropped: BTreeMap<String, u64>,
    pub diagnostics: u64,
    pub contract_violations: u64,
}

impl L3Stats {
    pub fn record_drop(&mut self, reason: &RoutingError) {
        *self.dropped.entry(reason.kind().to_string()).or_default() += 1;
    }

    pub fn dropped(&self, kind: &str) -> u64 {
        self.dropped.get(kind).copied().unwrap_or(0)
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped.values().sum()
    }

    /// Add another node's counters into this one
    pub fn merge(&mut self, other: &L3Stats) {
        self.sent += other.sent;
        self.received += other.received;
        self.forwarded += other.forwarded;
        self.delivered += other.delivered;
        self.diagnostics += other.diagnostics;
        self.contract_violations += other.contract_violations;
        for (kind, count) in &other.dropped {
            *self.dropped.entry(kind.clone()).or_default() += count;
        }
    }

    /// Delivery rate as a percentage of packets sent
    pub fn delivery_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            (self.delivered as f64 / self.sent as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display() {
        assert_eq!(NodeId(3).to_string(), "n3");
        assert_eq!(LinkId(0).to_string(), "link0");
    }

    #[test]
    fn test_packet_ids_are_unique_across_clones() {
        let ids = PacketIdAllocator::new();
        let other = ids.clone();
        assert_eq!(ids.next_id(), PacketId(1));
        assert_eq!(other.next_id(), PacketId(2));
        assert_eq!(ids.next_id(), PacketId(3));
    }

    #[test]
    fn test_stats_merge_and_drops() {
        let mut a = L3Stats {
            sent: 4,
            delivered: 2,
            ..Default::default()
        };
        a.record_drop(&RoutingError::QueueFull(Ipv4Addr::LOCALHOST));
        let mut b = L3Stats::default();
        b.record_drop(&RoutingError::QueueFull(Ipv4Addr::LOCALHOST));
        b.record_drop(&RoutingError::TtlExpired(Ipv4Addr::LOCALHOST));

        a.merge(&b);
        assert_eq!(a.dropped("queue-full"), 2);
        assert_eq!(a.dropped("ttl-expired"), 1);
        assert_eq!(a.dropped("no-route"), 0);
        assert_eq!(a.total_dropped(), 3);
        assert!((a.delivery_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_event_log_filters_by_packet() {
        let log = EventLog::new();
        log.push(NetworkEvent::Sent {
            node: NodeId(0),
            packet: PacketId(1),
            destination: Ipv4Addr::new(10, 0, 0, 2),
            time: SimTime::ZERO,
        });
        log.push(NetworkEvent::LinkDown {
            link: LinkId(0),
            time: SimTime::from_millis(5),
        });
        assert_eq!(log.len(), 2);
        assert_eq!(log.for_packet(PacketId(1)).len(), 1);
        assert_eq!(log.snapshot()[1].time(), SimTime::from_millis(5));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = NetworkEvent::LinkUp {
            link: LinkId(2),
            time: SimTime::ZERO,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"link_up""#));
    }
}
