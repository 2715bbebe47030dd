//! Protocol registry
//!
//! Maps protocol type names to factories so protocol stacks can be built
//! from configuration. A registry is an ordinary value; nothing is global.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use netsim_core::{Ipv4RoutingProtocol, Simulator};
use tracing::debug;

use crate::discovery::{DiscoveryConfig, DiscoveryRouting, RouteResolver};
use crate::error::{RegistryError, RegistryResult};
use crate::list::ListRouting;
use crate::static_routing::StaticRouting;

/// Everything a factory may need to build a protocol for one node
#[derive(Clone)]
pub struct ProtocolContext {
    pub simulator: Simulator,
    pub resolver: Option<Rc<dyn RouteResolver>>,
    pub discovery: DiscoveryConfig,
}

impl ProtocolContext {
    pub fn new(simulator: Simulator) -> Self {
        Self {
            simulator,
            resolver: None,
            discovery: DiscoveryConfig::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Rc<dyn RouteResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_discovery(mut self, config: DiscoveryConfig) -> Self {
        self.discovery = config;
        self
    }
}

impl fmt::Debug for ProtocolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolContext")
            .field("now", &self.simulator.now())
            .field("resolver", &self.resolver.is_some())
            .field("discovery", &self.discovery)
            .finish()
    }
}

/// Builds a protocol instance for a node
pub type ProtocolFactory = Box<dyn Fn(&ProtocolContext) -> RegistryResult<Box<dyn Ipv4RoutingProtocol>>>;

/// Name to factory table
pub struct ProtocolRegistry {
    factories: BTreeMap<String, ProtocolFactory>,
}

impl ProtocolRegistry {
    /// Empty registry
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in protocols
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.insert(StaticRouting::TYPE_NAME, |_| Ok(Box::new(StaticRouting::new())));
        registry.insert(DiscoveryRouting::TYPE_NAME, |ctx| {
            ctx.discovery.validate()?;
            let resolver = ctx
                .resolver
                .clone()
                .ok_or_else(|| RegistryError::MissingResolver(DiscoveryRouting::TYPE_NAME.to_string()))?;
            Ok(Box::new(DiscoveryRouting::new(
                ctx.simulator.clone(),
                resolver,
                ctx.discovery.clone(),
            )))
        });
        registry.insert(ListRouting::TYPE_NAME, |_| Ok(Box::new(ListRouting::new())));
        registry
    }

    fn insert(
        &mut self,
        name: &str,
        factory: impl Fn(&ProtocolContext) -> RegistryResult<Box<dyn Ipv4RoutingProtocol>> + 'static,
    ) {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Register a factory under `name`
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&ProtocolContext) -> RegistryResult<Box<dyn Ipv4RoutingProtocol>> + 'static,
    ) -> RegistryResult<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::DuplicateProtocol(name));
        }
        debug!(protocol = %name, "Routing protocol registered");
        self.insert(&name, factory);
        Ok(())
    }

    /// Build a fresh instance of the protocol registered as `name`
    pub fn create(&self, name: &str, ctx: &ProtocolContext) -> RegistryResult<Box<dyn Ipv4RoutingProtocol>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProtocol(name.to_string()))?;
        factory(ctx)
    }

    /// Build a [`ListRouting`] holding one instance per `(name, priority)`
    pub fn create_list(&self, stack: &[(String, i16)], ctx: &ProtocolContext) -> RegistryResult<ListRouting> {
        let mut list = ListRouting::new();
        for (name, priority) in stack {
            list.add_routing_protocol(self.create(name, ctx)?, *priority);
        }
        Ok(list)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolRegistry").field("names", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveredRoute;
    use std::net::Ipv4Addr;

    struct NoAnswer;

    impl RouteResolver for NoAnswer {
        fn resolve(&self, _destination: Ipv4Addr) -> Option<DiscoveredRoute> {
            None
        }
    }

    #[test]
    fn test_builtins() {
        let registry = ProtocolRegistry::default();
        assert_eq!(registry.names(), vec!["discovery", "list", "static"]);
        let ctx = ProtocolContext::new(Simulator::new());
        assert_eq!(registry.create("static", &ctx).unwrap().type_name(), "static");
        assert_eq!(registry.create("list", &ctx).unwrap().type_name(), "list");
    }

    #[test]
    fn test_unknown_protocol() {
        let registry = ProtocolRegistry::default();
        let ctx = ProtocolContext::new(Simulator::new());
        assert!(matches!(
            registry.create("ospf", &ctx),
            Err(RegistryError::UnknownProtocol(name)) if name == "ospf"
        ));
    }

    #[test]
    fn test_discovery_needs_resolver() {
        let registry = ProtocolRegistry::default();
        let ctx = ProtocolContext::new(Simulator::new());
        assert!(matches!(
            registry.create("discovery", &ctx),
            Err(RegistryError::MissingResolver(_))
        ));

        let ctx = ctx.with_resolver(Rc::new(NoAnswer));
        assert_eq!(registry.create("discovery", &ctx).unwrap().type_name(), "discovery");

        let ctx = ctx.with_discovery(DiscoveryConfig {
            max_queue_len: 0,
            ..DiscoveryConfig::default()
        });
        assert!(matches!(
            registry.create("discovery", &ctx),
            Err(RegistryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_register_custom_and_duplicates() {
        let mut registry = ProtocolRegistry::empty();
        registry
            .register("mine", |_| Ok(Box::new(StaticRouting::new())))
            .unwrap();
        assert!(registry.contains("mine"));
        assert!(matches!(
            registry.register("mine", |_| Ok(Box::new(ListRouting::new()))),
            Err(RegistryError::DuplicateProtocol(_))
        ));
    }

    #[test]
    fn test_create_list_orders_by_priority() {
        let registry = ProtocolRegistry::default();
        let ctx = ProtocolContext::new(Simulator::new()).with_resolver(Rc::new(NoAnswer));
        let list = registry
            .create_list(&[("static".to_string(), 0), ("discovery".to_string(), 10)], &ctx)
            .unwrap();
        assert_eq!(list.consultation_order(), vec!["discovery", "static"]);
    }
}
