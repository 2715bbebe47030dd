//! Routing crate error types
//!
//! Per-packet failures use the core [`RoutingError`]; this module adds the
//! errors raised while assembling protocol stacks.

use thiserror::Error;

pub use netsim_core::RoutingError;

/// Errors raised by the protocol registry and protocol configuration
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Interface table error
    #[error("Interface error: {0}")]
    Interface(#[from] netsim_core::InterfaceError),

    /// No factory registered under this name
    #[error("Unknown routing protocol: {0}")]
    UnknownProtocol(String),

    /// A factory is already registered under this name
    #[error("Routing protocol already registered: {0}")]
    DuplicateProtocol(String),

    /// The protocol needs a route resolver but the context has none
    #[error("Routing protocol {0} requires a route resolver")]
    MissingResolver(String),

    /// Configuration values out of range
    #[error("Invalid protocol configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;
