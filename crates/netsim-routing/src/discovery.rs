//! On-demand route discovery
//!
//! [`DiscoveryRouting`] keeps no precomputed table. When a transit packet
//! arrives for an unknown destination the packet is queued and a discovery
//! request starts. Each attempt completes on a scheduled event after a
//! binary back-off delay; the multi-step exchange itself is abstracted by a
//! [`RouteResolver`] consulted at completion time.
//!
//! # Request lifecycle
//!
//! 1. **Start**: first packet to an unresolved destination opens a request
//!    probing every up interface
//! 2. **Queue**: later packets for the same destination join the request,
//!    up to `max_queue_len`
//! 3. **Complete**: the resolver answers and every queued packet is
//!    forwarded, or the attempt is retried, or the request fails after
//!    `max_attempts` with [`RoutingError::DiscoveryTimedOut`]
//!
//! Interfaces going down shrink the probe set of pending requests; a
//! request left with nothing to probe fails immediately.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use netsim_core::{
    EventId, ForwardResponder, InputDisposition, InterfaceIndex, InterfaceView, Ipv4Header,
    Ipv4InterfaceAddress, Ipv4Route, Ipv4RoutingProtocol, Packet, RoutingError, SimTime,
    Simulator,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::RegistryError;

/// Answer to a completed discovery exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredRoute {
    /// Neighbour to hand the packet to
    pub next_hop: Ipv4Addr,
    /// Interface the neighbour is reached through
    pub interface: InterfaceIndex,
    /// Hops to the destination
    pub hop_count: u32,
}

/// Source of discovery answers
///
/// Consulted once per completed attempt. `None` means the attempt went
/// unanswered.
pub trait RouteResolver {
    fn resolve(&self, destination: Ipv4Addr) -> Option<DiscoveredRoute>;
}

/// Discovery tuning, all durations in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Duration of the first attempt; attempt `n` lasts `delay * 2^(n-1)`
    pub discovery_delay_ms: u64,
    /// Attempts before queued packets fail
    pub max_attempts: u32,
    /// Packets queued per destination while discovery runs
    pub max_queue_len: usize,
    /// How long a discovered route stays valid
    pub route_lifetime_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_delay_ms: 50,
            max_attempts: 3,
            max_queue_len: 64,
            route_lifetime_ms: 3_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn discovery_delay(&self) -> Duration {
        Duration::from_millis(self.discovery_delay_ms)
    }

    pub fn route_lifetime(&self) -> Duration {
        Duration::from_millis(self.route_lifetime_ms)
    }

    /// Length of the given 1-based attempt
    pub fn attempt_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.discovery_delay() * (1u32 << shift)
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.max_attempts == 0 {
            return Err(RegistryError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.max_queue_len == 0 {
            return Err(RegistryError::InvalidConfig("max_queue_len must be at least 1".into()));
        }
        if self.discovery_delay_ms == 0 {
            return Err(RegistryError::InvalidConfig("discovery_delay_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Identifier of a pending discovery request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("rreq{_0}")]
pub struct RequestId(u64);

/// Discovery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub requests_started: u64,
    pub attempts: u64,
    pub resolved: u64,
    pub timed_out: u64,
    pub aborted: u64,
    pub queue_overflows: u64,
    pub routes_invalidated: u64,
}

#[derive(Debug, Clone, Copy)]
struct CachedRoute {
    route: Ipv4Route,
    hop_count: u32,
    expires_at: SimTime,
}

#[derive(Debug)]
struct RouteRequest {
    destination: Ipv4Addr,
    probed: BTreeSet<InterfaceIndex>,
    attempts: u32,
    waiting: VecDeque<ForwardResponder>,
    event: Option<EventId>,
}

/// What a finished attempt means for the queued packets
enum AttemptOutcome {
    Resolved(Ipv4Route, Vec<ForwardResponder>),
    Failed(RoutingError, Vec<ForwardResponder>),
    Retrying,
    Gone,
}

struct DiscoveryState {
    config: DiscoveryConfig,
    simulator: Simulator,
    resolver: Rc<dyn RouteResolver>,
    ipv4: Option<InterfaceView>,
    cache: BTreeMap<Ipv4Addr, CachedRoute>,
    pending: BTreeMap<RequestId, RouteRequest>,
    by_destination: BTreeMap<Ipv4Addr, RequestId>,
    next_request: u64,
    stats: DiscoveryStats,
}

impl DiscoveryState {
    /// Cached route usable right now, evicting it if it went stale
    fn cached(&mut self, destination: Ipv4Addr, oif: Option<InterfaceIndex>) -> Option<Ipv4Route> {
        let now = self.simulator.now();
        let entry = *self.cache.get(&destination)?;
        let usable = self
            .ipv4
            .as_ref()
            .is_some_and(|v| v.is_up(entry.route.output_interface()));
        if entry.expires_at <= now || !usable {
            self.cache.remove(&destination);
            self.stats.routes_invalidated += 1;
            debug!(dst = %destination, "Stale route invalidated");
            return None;
        }
        if oif.is_some_and(|oif| oif != entry.route.output_interface()) {
            return None;
        }
        Some(entry.route)
    }

    /// Drop every cached route past its lifetime
    fn prune_expired(&mut self) {
        let now = self.simulator.now();
        let before = self.cache.len();
        self.cache.retain(|_, cached| cached.expires_at > now);
        let pruned = (before - self.cache.len()) as u64;
        if pruned > 0 {
            self.stats.routes_invalidated += pruned;
            debug!(pruned, "Expired routes pruned");
        }
    }

    fn start_attempt(&mut self, this: &Weak<RefCell<Self>>, id: RequestId) {
        let Some(request) = self.pending.get_mut(&id) else {
            return;
        };
        request.attempts += 1;
        let delay = self.config.attempt_delay(request.attempts);
        let weak = this.clone();
        let event = self.simulator.schedule(delay, move || {
            if let Some(state) = weak.upgrade() {
                DiscoveryRouting::complete_attempt(&state, id);
            }
        });
        request.event = Some(event);
        self.stats.attempts += 1;
        debug!(
            request = %id,
            dst = %request.destination,
            attempt = request.attempts,
            delay_ms = delay.as_millis() as u64,
            "Discovery attempt started"
        );
    }

    fn remove_request(&mut self, id: RequestId) -> Option<RouteRequest> {
        let request = self.pending.remove(&id)?;
        self.by_destination.remove(&request.destination);
        Some(request)
    }

    fn finish_attempt(&mut self, this: &Weak<RefCell<Self>>, id: RequestId) -> AttemptOutcome {
        let Some(request) = self.pending.get_mut(&id) else {
            return AttemptOutcome::Gone;
        };
        request.event = None;
        let destination = request.destination;

        match self.resolver.resolve(destination) {
            Some(found) => {
                let probed = request.probed.contains(&found.interface);
                let source = self
                    .ipv4
                    .as_ref()
                    .filter(|v| v.is_up(found.interface))
                    .and_then(|v| v.source_address_for(found.interface, found.next_hop));
                let Some(source) = source.filter(|_| probed) else {
                    warn!(request = %id, dst = %destination, iface = %found.interface, "Discovery answered through an unusable interface");
                    let waiting = self.remove_request(id).map(|r| r.waiting).unwrap_or_default();
                    self.stats.aborted += 1;
                    return AttemptOutcome::Failed(RoutingError::InterfaceDown(found.interface), waiting.into());
                };
                let route = Ipv4Route::new(destination, found.next_hop, source, found.interface);
                self.prune_expired();
                self.cache.insert(
                    destination,
                    CachedRoute {
                        route,
                        hop_count: found.hop_count,
                        expires_at: self.simulator.now() + self.config.route_lifetime(),
                    },
                );
                let waiting = self.remove_request(id).map(|r| r.waiting).unwrap_or_default();
                self.stats.resolved += 1;
                info!(request = %id, dst = %destination, %route, hops = found.hop_count, queued = waiting.len(), "Route discovered");
                AttemptOutcome::Resolved(route, waiting.into())
            }
            None if request.attempts < self.config.max_attempts => {
                trace!(request = %id, dst = %destination, attempt = request.attempts, "Discovery attempt unanswered");
                self.start_attempt(this, id);
                AttemptOutcome::Retrying
            }
            None => {
                let attempts = request.attempts;
                let waiting = self.remove_request(id).map(|r| r.waiting).unwrap_or_default();
                self.stats.timed_out += 1;
                warn!(request = %id, dst = %destination, attempts, dropped = waiting.len(), "Route discovery timed out");
                AttemptOutcome::Failed(
                    RoutingError::DiscoveryTimedOut {
                        destination,
                        attempts,
                    },
                    waiting.into(),
                )
            }
        }
    }
}

/// On-demand routing protocol
pub struct DiscoveryRouting {
    state: Rc<RefCell<DiscoveryState>>,
}

impl DiscoveryRouting {
    pub const TYPE_NAME: &'static str = "discovery";

    pub fn new(simulator: Simulator, resolver: Rc<dyn RouteResolver>, config: DiscoveryConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(DiscoveryState {
                config,
                simulator,
                resolver,
                ipv4: None,
                cache: BTreeMap::new(),
                pending: BTreeMap::new(),
                by_destination: BTreeMap::new(),
                next_request: 0,
                stats: DiscoveryStats::default(),
            })),
        }
    }

    pub fn config(&self) -> DiscoveryConfig {
        self.state.borrow().config.clone()
    }

    pub fn stats(&self) -> DiscoveryStats {
        self.state.borrow().stats
    }

    pub fn pending_requests(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Packets waiting on discovery for `destination`
    pub fn queued_packets(&self, destination: Ipv4Addr) -> usize {
        let state = self.state.borrow();
        state
            .by_destination
            .get(&destination)
            .and_then(|id| state.pending.get(id))
            .map_or(0, |r| r.waiting.len())
    }

    /// Number of cached routes, expired or not
    pub fn cached_routes(&self) -> usize {
        self.state.borrow().cache.len()
    }

    /// Forget every cached route
    pub fn flush_cache(&self) {
        let mut state = self.state.borrow_mut();
        let n = state.cache.len() as u64;
        state.cache.clear();
        state.stats.routes_invalidated += n;
    }

    fn complete_attempt(state: &Rc<RefCell<DiscoveryState>>, id: RequestId) {
        let weak = Rc::downgrade(state);
        let outcome = state.borrow_mut().finish_attempt(&weak, id);
        // borrow released before any callback runs
        match outcome {
            AttemptOutcome::Resolved(route, waiting) => {
                for responder in waiting {
                    responder.unicast(route);
                }
            }
            AttemptOutcome::Failed(reason, waiting) => {
                for responder in waiting {
                    responder.error(reason.clone());
                }
            }
            AttemptOutcome::Retrying | AttemptOutcome::Gone => {}
        }
    }
}

impl fmt::Debug for DiscoveryRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("DiscoveryRouting")
            .field("config", &state.config)
            .field("cached", &state.cache.len())
            .field("pending", &state.pending.len())
            .field("stats", &state.stats)
            .finish()
    }
}

impl Ipv4RoutingProtocol for DiscoveryRouting {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn set_ipv4(&mut self, ipv4: InterfaceView) {
        self.state.borrow_mut().ipv4 = Some(ipv4);
    }

    fn route_output(
        &mut self,
        _packet: Option<&Packet>,
        header: &Ipv4Header,
        oif: Option<InterfaceIndex>,
    ) -> Result<Ipv4Route, RoutingError> {
        self.state
            .borrow_mut()
            .cached(header.destination, oif)
            .ok_or(RoutingError::NoRouteToHost(header.destination))
    }

    fn route_input(&mut self, responder: ForwardResponder) -> InputDisposition {
        let weak = Rc::downgrade(&self.state);
        let mut state = self.state.borrow_mut();
        let Some(ipv4) = state.ipv4.clone() else {
            return InputDisposition::Declined(responder);
        };
        let destination = responder.destination();
        let iif = responder.input_interface();

        if responder.header().is_multicast() || responder.header().is_broadcast() {
            return InputDisposition::Declined(responder);
        }

        if ipv4.is_destination_address(destination, iif) {
            drop(state);
            responder.local_deliver(iif);
            return InputDisposition::Claimed;
        }

        if !iif.is_loopback() && !ipv4.is_forwarding(iif) {
            drop(state);
            responder.error(RoutingError::ForwardingDisabled(iif));
            return InputDisposition::Claimed;
        }

        if let Some(route) = state.cached(destination, None) {
            drop(state);
            trace!(dst = %destination, %route, "Discovery cache hit");
            responder.unicast(route);
            return InputDisposition::Claimed;
        }

        if let Some(id) = state.by_destination.get(&destination).copied() {
            let max = state.config.max_queue_len;
            let Some(request) = state.pending.get_mut(&id) else {
                return InputDisposition::Declined(responder);
            };
            if request.waiting.len() >= max {
                state.stats.queue_overflows += 1;
                drop(state);
                warn!(request = %id, dst = %destination, packet = %responder.packet().id(), "Discovery queue full");
                responder.error(RoutingError::QueueFull(destination));
                return InputDisposition::Claimed;
            }
            request.waiting.push_back(responder);
            trace!(request = %id, dst = %destination, queued = request.waiting.len(), "Packet queued behind discovery");
            return InputDisposition::Claimed;
        }

        let probed: BTreeSet<_> = ipv4.up_interfaces().into_iter().collect();
        if probed.is_empty() {
            return InputDisposition::Declined(responder);
        }

        let id = RequestId(state.next_request);
        state.next_request += 1;
        state.stats.requests_started += 1;
        debug!(request = %id, dst = %destination, probes = probed.len(), "Route discovery started");
        state.pending.insert(
            id,
            RouteRequest {
                destination,
                probed,
                attempts: 0,
                waiting: VecDeque::from([responder]),
                event: None,
            },
        );
        state.by_destination.insert(destination, id);
        state.start_attempt(&weak, id);
        InputDisposition::Claimed
    }

    fn notify_interface_up(&mut self, interface: InterfaceIndex) {
        if interface.is_loopback() {
            return;
        }
        let mut state = self.state.borrow_mut();
        for request in state.pending.values_mut() {
            request.probed.insert(interface);
        }
    }

    fn notify_interface_down(&mut self, interface: InterfaceIndex) {
        let mut failed = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            let before = state.cache.len();
            state.cache.retain(|_, c| c.route.output_interface() != interface);
            let invalidated = (before - state.cache.len()) as u64;
            state.stats.routes_invalidated += invalidated;
            if invalidated > 0 {
                debug!(iface = %interface, invalidated, "Routes through interface invalidated");
            }

            let mut orphaned = Vec::new();
            for (id, request) in state.pending.iter_mut() {
                if request.probed.remove(&interface) && request.probed.is_empty() {
                    orphaned.push(*id);
                }
            }
            for id in orphaned {
                if let Some(request) = state.remove_request(id) {
                    if let Some(event) = request.event {
                        state.simulator.cancel(event);
                    }
                    state.stats.aborted += 1;
                    debug!(request = %id, dst = %request.destination, iface = %interface, "Discovery aborted, no interface left to probe");
                    failed.extend(request.waiting);
                }
            }
        }
        for responder in failed {
            responder.error(RoutingError::InterfaceDown(interface));
        }
    }

    fn notify_add_address(&mut self, interface: InterfaceIndex, address: Ipv4InterfaceAddress) {
        trace!(iface = %interface, %address, "Address added");
    }

    fn notify_remove_address(&mut self, interface: InterfaceIndex, address: Ipv4InterfaceAddress) {
        let mut state = self.state.borrow_mut();
        let before = state.cache.len();
        state.cache.retain(|_, c| {
            !(c.route.output_interface() == interface && c.route.source() == address.local())
        });
        let invalidated = (before - state.cache.len()) as u64;
        state.stats.routes_invalidated += invalidated;
    }

    fn print_routing_table(&self, out: &mut dyn fmt::Write, now: SimTime) -> fmt::Result {
        let state = self.state.borrow();
        writeln!(out, "Time: {now}, DiscoveryRouting cache")?;
        writeln!(
            out,
            "{:<16}{:<16}{:<6}{:<6}Expires",
            "Destination", "NextHop", "Iface", "Hops"
        )?;
        for (destination, cached) in &state.cache {
            let expires = if cached.expires_at <= now {
                "expired".to_string()
            } else {
                format!("{:.3}s", (cached.expires_at - now).as_secs_f64())
            };
            writeln!(
                out,
                "{:<16}{:<16}{:<6}{:<6}{}",
                destination.to_string(),
                cached.route.next_hop().to_string(),
                cached.route.output_interface(),
                cached.hop_count,
                expires
            )?;
        }
        for (id, request) in &state.pending {
            writeln!(
                out,
                "pending {id} dst {} attempt {} queued {}",
                request.destination,
                request.attempts,
                request.waiting.len()
            )?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
