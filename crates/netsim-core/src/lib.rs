//! # Netsim Core
//!
//! Core types, callbacks and the routing protocol contract for the netsim
//! discrete-event IPv4 network simulator.
//!
//! This crate lets many routing algorithms plug into a shared IPv4
//! forwarding layer without the forwarding layer knowing which algorithm
//! is installed.
//!
//! ## Key Traits
//!
//! - [`Ipv4RoutingProtocol`]: The contract every routing protocol satisfies
//!
//! ## Key Types
//!
//! - [`Ipv4Route`]: Resolved next hop, output interface and source address
//! - [`ForwardCallbacks`]: The four outcome callbacks a forwarding layer supplies
//! - [`ForwardResponder`]: One-shot continuation that fires exactly one callback
//! - [`InterfaceView`]: Read-only view of a node's interface table
//! - [`Simulator`]: Deterministic discrete-event scheduler
//!
//! ## Resolution Modes
//!
//! Locally originated packets are resolved synchronously through
//! [`Ipv4RoutingProtocol::route_output`]. Transit packets go through
//! [`Ipv4RoutingProtocol::route_input`], which may answer immediately or keep
//! the [`ForwardResponder`] and answer from a later scheduled event.

pub mod address;
pub mod callbacks;
pub mod error;
pub mod interface;
pub mod packet;
pub mod protocol;
pub mod route;
pub mod scheduler;

// Re-export main types
pub use address::*;
pub use callbacks::*;
pub use error::*;
pub use interface::*;
pub use packet::*;
pub use protocol::*;
pub use route::*;
pub use scheduler::*;
