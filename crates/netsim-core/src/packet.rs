//! Packet and IPv4 header types
//!
//! Packets are opaque payloads with a unique id. The payload is a
//! reference-counted [`Bytes`] buffer, so a protocol that needs to hold a
//! packet while a route is discovered can clone it without copying.

use std::net::Ipv4Addr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Default hop limit for locally originated packets
pub const DEFAULT_TTL: u8 = 64;

/// Unique identifier for a packet within one simulation run
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
#[display("#{_0}")]
pub struct PacketId(pub u64);

/// A simulated packet payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: PacketId,
    payload: Bytes,
}

impl Packet {
    /// Create a new packet
    pub fn new(id: PacketId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// The IPv4 header fields routing protocols look at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Header {
    /// Source address; unspecified until a route picks one
    pub source: Ipv4Addr,
    /// Final destination
    pub destination: Ipv4Addr,
    /// Upper-layer protocol number
    pub protocol: u8,
    /// Remaining hop limit
    pub ttl: u8,
}

impl Ipv4Header {
    /// Create a header for a locally originated packet
    pub fn new(destination: Ipv4Addr, protocol: u8) -> Self {
        Self {
            source: Ipv4Addr::UNSPECIFIED,
            destination,
            protocol,
            ttl: DEFAULT_TTL,
        }
    }

    /// Builder-style source override
    pub fn with_source(mut self, source: Ipv4Addr) -> Self {
        self.source = source;
        self
    }

    /// Builder-style TTL override
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn is_multicast(&self) -> bool {
        self.destination.is_multicast()
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination.is_broadcast()
    }

    /// Decrement the TTL, returning `false` if the packet must be dropped
    pub fn decrement_ttl(&mut self) -> bool {
        if self.ttl <= 1 {
            self.ttl = 0;
            return false;
        }
        self.ttl -= 1;
        true
    }
}
