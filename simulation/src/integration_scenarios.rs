//! Integration scenarios running the full stack
//!
//! These scenarios exercise together:
//! - netsim-core scheduling, interfaces and one-shot forwarding responders
//! - netsim-routing static, discovery and list protocols
//! - the IPv4 layer, channels and configuration in this crate

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use bytes::Bytes;
use netsim_core::{
    ForwardResponder, InputDisposition, InterfaceIndex, InterfaceView, Ipv4Header, Ipv4InterfaceAddress,
    Ipv4MulticastRoute, Ipv4Route, Ipv4RoutingProtocol, Packet, RoutingError, SimTime,
};
use netsim_routing::{ListRouting, StaticRouting};

use crate::config::{
    LinkAction, LinkEventConfig, ProtocolEntry, SimulationConfig, StaticRouteConfig, TrafficConfig,
};
use crate::scenarios::{
    SimulationReport, run_discovery_scenario, run_fallback_scenario, run_link_failure_scenario, run_scenario,
};
use crate::topology::{Network, TopologyBuilder};
use crate::types::{LinkId, NetworkEvent, NodeId};

fn assert_clean(network: &Network) {
    let stats = network.total_stats();
    assert_eq!(stats.contract_violations, 0, "every responder resolved exactly once");
}

fn traffic(from: &str, to: &str, at_ms: u64, count: u32) -> TrafficConfig {
    TrafficConfig {
        from: from.into(),
        to: to.into(),
        at_ms,
        count,
        interval_ms: 10,
        size: 64,
    }
}

/// Static answers first, discovery picks up what static cannot route
#[test]
fn test_fallback_scenario() {
    let network = run_fallback_scenario().unwrap();
    assert_clean(&network);

    let deliveries = network.deliveries();
    assert_eq!(deliveries.len(), 2);

    // s -> r -> h through r's connected route, no waiting
    let to_h = &deliveries[0];
    assert_eq!(to_h.node, NodeId(2));
    assert_eq!(to_h.time, SimTime::from_millis(4));
    assert_eq!(to_h.hops, 1);
    assert_eq!(to_h.source, Ipv4Addr::new(10, 0, 1, 1));

    // s -> r waits one discovery attempt, then r -> x -> y
    let to_y = &deliveries[1];
    assert_eq!(to_y.node, NodeId(4));
    assert_eq!(to_y.time, SimTime::from_millis(56));
    assert_eq!(to_y.hops, 2);

    let stats = network.total_stats();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.forwarded, 3);
    assert_eq!(stats.total_dropped(), 0);
    assert_eq!(stats.diagnostics, 0);
}

/// First packet pays for discovery at every router, the second does not
#[test]
fn test_discovery_scenario() {
    let network = run_discovery_scenario(5).unwrap();
    assert_clean(&network);

    let deliveries = network.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().all(|d| d.node == NodeId(4) && d.hops == 3));

    // four discovery waits of 50ms plus four 1ms links
    assert_eq!(deliveries[0].time, SimTime::from_millis(204));
    // cached routes all the way
    assert_eq!(deliveries[1].time, SimTime::from_millis(504));

    let stats = network.total_stats();
    assert_eq!(stats.forwarded, 6);
    assert_eq!(stats.total_dropped(), 0);
}

#[test]
fn test_discovery_scenario_minimum_line() {
    let network = run_discovery_scenario(0).unwrap();
    assert_eq!(network.node_count(), 2);
    let deliveries = network.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].time, SimTime::from_millis(51));
    assert_eq!(deliveries[0].hops, 0);
}

/// A pending request whose only interface fails ends in an error
#[test]
fn test_link_failure_scenario() {
    let network = run_link_failure_scenario().unwrap();
    assert_clean(&network);

    let a = network.node(NodeId(0)).unwrap();
    let a_stats = a.l3.stats();
    assert_eq!(a_stats.dropped("interface-down"), 1);
    // a originated the packet, nobody to notify
    assert_eq!(a_stats.diagnostics, 0);

    let dropped: Vec<_> = network
        .events()
        .into_iter()
        .filter(|e| matches!(e, NetworkEvent::Dropped { .. }))
        .collect();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].time(), SimTime::from_millis(20));

    let deliveries = network.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].node, NodeId(2));
    assert_eq!(deliveries[0].time, SimTime::from_millis(252));
    assert_eq!(network.link(LinkId(0)).map(|l| l.up), Some(true));
}

#[test]
fn test_run_scenario_by_name() {
    assert!(run_scenario("fallback").is_some());
    assert!(run_scenario("ospf").is_none());
}

#[test]
fn test_report_summarizes_run() {
    let network = run_fallback_scenario().unwrap();
    let report = SimulationReport::collect("fallback", &network);
    assert_eq!(report.nodes.len(), 5);
    assert_eq!(report.deliveries.len(), 2);

    let summary = report.summary();
    assert!(summary.contains("=== fallback"));
    assert!(summary.contains("delivered 2"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["total"]["sent"], 2);
    assert_eq!(json["deliveries"].as_array().map(Vec::len), Some(2));
}

/// Same hop count either way round the ring, so timing is fixed
#[test]
fn test_generated_ring_with_discovery() {
    let mut config = TopologyBuilder::new(6).ring();
    config.traffic.push(traffic("n0", "n3", 0, 1));
    let network = config.build().unwrap();
    network.run_until(config.duration());
    assert_clean(&network);

    let deliveries = network.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].node, NodeId(3));
    assert_eq!(deliveries[0].hops, 2);
    assert_eq!(deliveries[0].time, SimTime::from_millis(153));
}

/// Packets queue behind one request per router and leave together
#[test]
fn test_queued_packets_released_together() {
    let mut config = TopologyBuilder::new(4).line();
    config.traffic.push(traffic("n0", "n3", 0, 3));
    let network = config.build().unwrap();
    network.run_until(config.duration());
    assert_clean(&network);

    let deliveries = network.deliveries();
    assert_eq!(deliveries.len(), 3);
    assert!(deliveries.iter().all(|d| d.time == SimTime::from_millis(153)));
    // released in arrival order
    let packets: Vec<_> = deliveries.iter().map(|d| d.packet).collect();
    let mut sorted = packets.clone();
    sorted.sort();
    assert_eq!(packets, sorted);
}

#[test]
fn test_unknown_destination_times_out() {
    let mut config = TopologyBuilder::new(2).line();
    config.traffic.push(traffic("n0", "10.99.0.1", 0, 1));
    let network = config.build().unwrap();
    network.run_until(config.duration());
    assert_clean(&network);

    let stats = network.total_stats();
    assert_eq!(stats.dropped("discovery-timeout"), 1);
    assert_eq!(stats.delivered, 0);

    // attempts of 50, 100 and 200ms
    let drop_time = network
        .events()
        .iter()
        .find(|e| matches!(e, NetworkEvent::Dropped { .. }))
        .map(NetworkEvent::time);
    assert_eq!(drop_time, Some(SimTime::from_millis(350)));
}

/// A transit node with forwarding off drops and notifies the source
#[test]
fn test_forwarding_disabled_router() {
    let mut config = TopologyBuilder::new(3).line();
    config.nodes[1].forwarding = false;
    config.traffic.push(traffic("n0", "n2", 0, 1));
    let network = config.build().unwrap();
    network.run_until(config.duration());
    assert_clean(&network);

    let middle = network.node(NodeId(1)).unwrap().l3.stats();
    assert_eq!(middle.dropped("forwarding-disabled"), 1);
    assert_eq!(middle.diagnostics, 1);
    assert!(network.deliveries().is_empty());

    let unreachable = network
        .events()
        .into_iter()
        .find(|e| matches!(e, NetworkEvent::Unreachable { .. }));
    assert!(matches!(
        unreachable,
        Some(NetworkEvent::Unreachable { source, .. }) if source == Ipv4Addr::new(10, 0, 1, 1)
    ));
}

/// In-flight packets die with the link; later traffic gets through again
#[test]
fn test_static_routes_across_link_flap() {
    let mut config = TopologyBuilder::new(2)
        .with_routing(vec![ProtocolEntry::new("static", 0)])
        .with_delay_ms(10)
        .line();
    config.traffic.push(traffic("n0", "n1", 0, 1));
    config.traffic.push(traffic("n0", "n1", 100, 1));
    config.events.push(LinkEventConfig {
        at_ms: 5,
        link: 0,
        action: LinkAction::Down,
    });
    config.events.push(LinkEventConfig {
        at_ms: 50,
        link: 0,
        action: LinkAction::Up,
    });
    let network = config.build().unwrap();
    network.run_until(config.duration());
    assert_clean(&network);

    // the first packet reached n1 while its interface was down
    let n1 = network.node(NodeId(1)).unwrap().l3.stats();
    assert_eq!(n1.dropped("interface-down"), 1);

    let deliveries = network.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].time, SimTime::from_millis(110));
    assert_eq!(network.link_traffic(LinkId(0)), Some(2));
}

#[test]
fn test_send_to_self_is_delivered_locally() {
    let network = TopologyBuilder::new(2).line().build().unwrap();
    let own = network.address_of(NodeId(0)).unwrap();
    network.send(NodeId(0), own, Bytes::from_static(b"loop")).unwrap();
    network.run();

    let deliveries = network.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].node, NodeId(0));
    assert_eq!(deliveries[0].time, SimTime::ZERO);
    assert_eq!(network.link_traffic(LinkId(0)), Some(0));
}

#[test]
fn test_config_round_trip_runs_identically() {
    let mut config = TopologyBuilder::new(4).random(0.5, 42);
    config.traffic.push(traffic("n0", "n3", 0, 2));
    let text = config.to_toml_string().unwrap();
    let reparsed = SimulationConfig::from_toml_str(&text).unwrap();

    let first = config.build().unwrap();
    first.run_until(config.duration());
    let second = reparsed.build().unwrap();
    second.run_until(reparsed.duration());
    assert_eq!(first.deliveries(), second.deliveries());
    assert_eq!(first.events(), second.events());
}

/// The shipped sample file: static in front of discovery, with an x-y outage
#[test]
fn test_sample_config_file() {
    let config = SimulationConfig::from_toml_str(include_str!("../configs/fallback.toml")).unwrap();
    assert!(config.logging.is_some());
    let network = config.build().unwrap();
    network.run_until(config.duration());
    assert_clean(&network);

    let deliveries = network.deliveries();
    let to_h: Vec<_> = deliveries.iter().filter(|d| d.node == NodeId(2)).collect();
    let to_y: Vec<_> = deliveries.iter().filter(|d| d.node == NodeId(4)).collect();
    assert_eq!(to_h.len(), 5);
    assert_eq!(to_h[0].time, SimTime::from_millis(4));
    // the packet sent at 310ms finds x-y down
    assert_eq!(to_y.len(), 4);
    assert_eq!(to_y[0].time, SimTime::from_millis(66));
    assert_eq!(to_y[1].time, SimTime::from_millis(116));

    let x = network.node(NodeId(3)).unwrap().l3.stats();
    assert_eq!(x.dropped("no-route"), 1);
    assert_eq!(x.diagnostics, 1);
}

/// A gateway route configured on n0 is still there after its link flaps
#[test]
fn test_configured_gateway_route_survives_link_flap() {
    let mut config = TopologyBuilder::new(3)
        .with_routing(vec![ProtocolEntry::new("static", 0)])
        .line();
    config.nodes[0].routes.push(StaticRouteConfig {
        destination: "10.0.2.0/24".parse().unwrap(),
        gateway: Some(Ipv4Addr::new(10, 0, 1, 2)),
        interface: None,
        metric: 0,
    });
    config.traffic.push(traffic("n0", "n2", 0, 1));
    config.traffic.push(traffic("n0", "n2", 200, 1));
    config.events.push(LinkEventConfig {
        at_ms: 50,
        link: 0,
        action: LinkAction::Down,
    });
    config.events.push(LinkEventConfig {
        at_ms: 100,
        link: 0,
        action: LinkAction::Up,
    });
    let network = config.build().unwrap();
    network.run_until(config.duration());
    assert_clean(&network);

    let deliveries = network.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().all(|d| d.node == NodeId(2) && d.hops == 1));
    assert_eq!(deliveries[1].time, SimTime::from_millis(202));

    let stats = network.total_stats();
    assert_eq!(stats.dropped("no-route"), 0);
    assert_eq!(stats.total_dropped(), 0);
}

/// A static multicast entry whose only output is down is not a TTL problem
#[test]
fn test_multicast_entry_with_down_output_is_no_route() {
    let network = TopologyBuilder::new(2)
        .with_routing(vec![ProtocolEntry::new("static", 0)])
        .line()
        .build()
        .unwrap();
    let group = Ipv4Addr::new(239, 1, 2, 3);
    let n0 = network.node(NodeId(0)).unwrap();
    let added = n0.l3.with_routing(|routing| {
        let list = routing.as_any_mut().downcast_mut::<ListRouting>()?;
        list.protocol_mut::<StaticRouting>()?
            .add_multicast_route(Ipv4Addr::UNSPECIFIED, group, None, vec![InterfaceIndex(1)]);
        Some(())
    });
    assert_eq!(added, Some(Some(())));

    network.link_down(LinkId(0)).unwrap();
    network.send(NodeId(0), group, Bytes::from_static(b"mc")).unwrap();
    network.run();
    assert_clean(&network);

    let stats = n0.l3.stats();
    assert_eq!(stats.dropped("no-route"), 1);
    assert_eq!(stats.dropped("ttl-expired"), 0);
    assert_eq!(network.link_traffic(LinkId(0)), Some(0));
}

/// Claims every multicast packet with a route that lists no outputs
#[derive(Debug, Default)]
struct EmptyMulticastRouting;

impl Ipv4RoutingProtocol for EmptyMulticastRouting {
    fn type_name(&self) -> &'static str {
        "empty-multicast"
    }

    fn set_ipv4(&mut self, _ipv4: InterfaceView) {}

    fn route_output(
        &mut self,
        _packet: Option<&Packet>,
        header: &Ipv4Header,
        _oif: Option<InterfaceIndex>,
    ) -> Result<Ipv4Route, RoutingError> {
        Err(RoutingError::NoRouteToHost(header.destination))
    }

    fn route_input(&mut self, responder: ForwardResponder) -> InputDisposition {
        let header = *responder.header();
        if !header.is_multicast() {
            return InputDisposition::Declined(responder);
        }
        let iif = responder.input_interface();
        responder.multicast(Ipv4MulticastRoute::new(header.destination, header.source, iif, BTreeMap::new()));
        InputDisposition::Claimed
    }

    fn notify_interface_up(&mut self, _interface: InterfaceIndex) {}

    fn notify_interface_down(&mut self, _interface: InterfaceIndex) {}

    fn notify_add_address(&mut self, _interface: InterfaceIndex, _address: Ipv4InterfaceAddress) {}

    fn notify_remove_address(&mut self, _interface: InterfaceIndex, _address: Ipv4InterfaceAddress) {}

    fn print_routing_table(&self, out: &mut dyn fmt::Write, _now: SimTime) -> fmt::Result {
        writeln!(out, "empty")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn test_claimed_multicast_without_outputs_is_no_route() {
    let network = TopologyBuilder::new(2).line().build().unwrap();
    network.install_routing(NodeId(0), Box::new(EmptyMulticastRouting)).unwrap();
    network
        .send(NodeId(0), Ipv4Addr::new(239, 4, 4, 4), Bytes::from_static(b"mc"))
        .unwrap();
    network.run();
    assert_clean(&network);

    let stats = network.node(NodeId(0)).unwrap().l3.stats();
    assert_eq!(stats.dropped("no-route"), 1);
    assert_eq!(stats.dropped("ttl-expired"), 0);
    assert_eq!(stats.forwarded, 0);
}
