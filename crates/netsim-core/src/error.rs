//! Error types for netsim

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::interface::InterfaceIndex;

/// Why a single packet could not be routed
///
/// This is the error code handed to the route-error callback and returned
/// by `route_output` when no route is known. Every variant terminates one
/// packet's journey and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("No route to host {0}")]
    NoRouteToHost(Ipv4Addr),

    #[error("Interface {0} is down")]
    InterfaceDown(InterfaceIndex),

    #[error("Forwarding is disabled on interface {0}")]
    ForwardingDisabled(InterfaceIndex),

    #[error("Discovery queue full for {0}")]
    QueueFull(Ipv4Addr),

    #[error("Route discovery for {destination} timed out after {attempts} attempts")]
    DiscoveryTimedOut { destination: Ipv4Addr, attempts: u32 },

    #[error("TTL expired for packet to {0}")]
    TtlExpired(Ipv4Addr),
}

impl RoutingError {
    /// Whether the forwarding layer should report this error back to the
    /// packet's source as an unreachability notice
    pub fn is_unreachable(&self) -> bool {
        !matches!(self, Self::TtlExpired(_))
    }

    /// Short stable label, used as a statistics key
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoRouteToHost(_) => "no-route",
            Self::InterfaceDown(_) => "interface-down",
            Self::ForwardingDisabled(_) => "forwarding-disabled",
            Self::QueueFull(_) => "queue-full",
            Self::DiscoveryTimedOut { .. } => "discovery-timeout",
            Self::TtlExpired(_) => "ttl-expired",
        }
    }
}

/// Errors related to the interface table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterfaceError {
    #[error("Interface not found: {0}")]
    NotFound(InterfaceIndex),

    #[error("Address {address} already assigned to interface {interface}")]
    DuplicateAddress {
        interface: InterfaceIndex,
        address: Ipv4Addr,
    },

    #[error("Address {address} not assigned to interface {interface}")]
    AddressNotFound {
        interface: InterfaceIndex,
        address: Ipv4Addr,
    },

    #[error("Invalid prefix length: {0}")]
    InvalidPrefix(u8),

    #[error("Non-contiguous mask: {0:#010x}")]
    InvalidMask(u32),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
