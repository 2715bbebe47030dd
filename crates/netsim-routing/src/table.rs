//! Route tables used by table-driven protocols
//!
//! The [`RoutingTable`] keeps unicast entries in insertion order and
//! answers longest-prefix-match lookups. Ties are broken by the lowest
//! metric and then by insertion order, which keeps lookups deterministic.

use std::net::Ipv4Addr;

use netsim_core::{InterfaceIndex, Ipv4Mask, Ipv4Prefix};

/// A unicast route entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    prefix: Ipv4Prefix,
    gateway: Option<Ipv4Addr>,
    interface: InterfaceIndex,
    metric: u32,
}

impl RouteEntry {
    pub fn new(
        prefix: Ipv4Prefix,
        gateway: Option<Ipv4Addr>,
        interface: InterfaceIndex,
        metric: u32,
    ) -> Self {
        Self {
            prefix,
            gateway,
            interface,
            metric,
        }
    }

    pub fn prefix(&self) -> Ipv4Prefix {
        self.prefix
    }

    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    pub fn interface(&self) -> InterfaceIndex {
        self.interface
    }

    pub fn metric(&self) -> u32 {
        self.metric
    }

    pub fn is_host(&self) -> bool {
        self.prefix.mask() == Ipv4Mask::HOST
    }

    pub fn is_default(&self) -> bool {
        self.prefix.mask() == Ipv4Mask::ANY
    }

    /// `U`, `G`, `H` flags in the classic route table layout
    pub fn flags(&self) -> String {
        let mut flags = String::from("U");
        if self.gateway.is_some() {
            flags.push('G');
        }
        if self.is_host() {
            flags.push('H');
        }
        flags
    }
}

/// Ordered unicast route table
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    entries: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route; returns `false` if an identical entry already exists
    pub fn insert(&mut self, entry: RouteEntry) -> bool {
        if self.entries.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Remove the route at `index`
    pub fn remove(&mut self, index: usize) -> Option<RouteEntry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    /// Keep only entries matching the predicate; returns how many were removed
    pub fn retain(&mut self, f: impl FnMut(&RouteEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(f);
        before - self.entries.len()
    }

    pub fn get(&self, index: usize) -> Option<&RouteEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    /// Best entry for `destination`
    ///
    /// Only entries whose interface satisfies `usable` are considered; if
    /// `oif` is given the entry must also go out of that interface.
    pub fn lookup(
        &self,
        destination: Ipv4Addr,
        oif: Option<InterfaceIndex>,
        usable: impl Fn(InterfaceIndex) -> bool,
    ) -> Option<&RouteEntry> {
        let mut best: Option<&RouteEntry> = None;
        for entry in &self.entries {
            if !entry.prefix.contains(destination) {
                continue;
            }
            if oif.is_some_and(|oif| oif != entry.interface) {
                continue;
            }
            if !usable(entry.interface) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => {
                    let (len, cur_len) = (entry.prefix.mask().prefix_len(), current.prefix.mask().prefix_len());
                    len > cur_len || (len == cur_len && entry.metric < current.metric)
                }
            };
            if better {
                best = Some(entry);
            }
        }
        best
    }
}

/// A multicast forwarding entry; unspecified origin/group and a missing
/// input interface act as wildcards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastRouteEntry {
    origin: Ipv4Addr,
    group: Ipv4Addr,
    input_interface: Option<InterfaceIndex>,
    output_interfaces: Vec<InterfaceIndex>,
}

impl MulticastRouteEntry {
    pub fn new(
        origin: Ipv4Addr,
        group: Ipv4Addr,
        input_interface: Option<InterfaceIndex>,
        output_interfaces: Vec<InterfaceIndex>,
    ) -> Self {
        Self {
            origin,
            group,
            input_interface,
            output_interfaces,
        }
    }

    pub fn origin(&self) -> Ipv4Addr {
        self.origin
    }

    pub fn group(&self) -> Ipv4Addr {
        self.group
    }

    pub fn input_interface(&self) -> Option<InterfaceIndex> {
        self.input_interface
    }

    pub fn output_interfaces(&self) -> &[InterfaceIndex] {
        &self.output_interfaces
    }

    pub fn matches(&self, origin: Ipv4Addr, group: Ipv4Addr, iif: InterfaceIndex) -> bool {
        (self.origin.is_unspecified() || self.origin == origin)
            && (self.group.is_unspecified() || self.group == group)
            && self.input_interface.is_none_or(|i| i == iif)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(s: &str) -> Ipv4Prefix {
        s.parse().unwrap()
    }

    fn entry(p: &str, interface: u32, metric: u32) -> RouteEntry {
        RouteEntry::new(prefix(p), None, InterfaceIndex(interface), metric)
    }

    #[test]
    fn test_insert_dedupes() {
        let mut table = RoutingTable::new();
        assert!(table.insert(entry("10.0.0.0/24", 1, 0)));
        assert!(!table.insert(entry("10.0.0.0/24", 1, 0)));
        assert!(table.insert(entry("10.0.0.0/24", 1, 5)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut table = RoutingTable::new();
        table.insert(entry("0.0.0.0/0", 3, 0));
        table.insert(entry("10.0.0.0/8", 2, 0));
        table.insert(entry("10.0.0.0/24", 1, 0));

        let dest = Ipv4Addr::new(10, 0, 0, 5);
        assert_eq!(table.lookup(dest, None, |_| true).unwrap().interface(), InterfaceIndex(1));
        assert_eq!(
            table.lookup(Ipv4Addr::new(10, 9, 0, 5), None, |_| true).unwrap().interface(),
            InterfaceIndex(2)
        );
        assert!(table.lookup(Ipv4Addr::new(8, 8, 8, 8), None, |_| true).unwrap().is_default());
    }

    #[test]
    fn test_metric_then_insertion_order() {
        let mut table = RoutingTable::new();
        table.insert(entry("10.0.0.0/24", 1, 10));
        table.insert(entry("10.0.0.0/24", 2, 5));
        table.insert(entry("10.0.0.0/24", 3, 5));

        let best = table.lookup(Ipv4Addr::new(10, 0, 0, 5), None, |_| true).unwrap();
        assert_eq!(best.interface(), InterfaceIndex(2));
    }

    #[test]
    fn test_lookup_skips_unusable_and_respects_oif() {
        let mut table = RoutingTable::new();
        table.insert(entry("10.0.0.0/24", 1, 0));
        table.insert(entry("10.0.0.0/16", 2, 0));
        let dest = Ipv4Addr::new(10, 0, 0, 5);

        let best = table.lookup(dest, None, |i| i != InterfaceIndex(1)).unwrap();
        assert_eq!(best.interface(), InterfaceIndex(2));

        let best = table.lookup(dest, Some(InterfaceIndex(2)), |_| true).unwrap();
        assert_eq!(best.interface(), InterfaceIndex(2));

        assert!(table.lookup(dest, Some(InterfaceIndex(7)), |_| true).is_none());
    }

    #[test]
    fn test_remove_and_retain() {
        let mut table = RoutingTable::new();
        table.insert(entry("10.0.0.0/24", 1, 0));
        table.insert(entry("10.0.1.0/24", 2, 0));
        table.insert(entry("10.0.2.0/24", 1, 0));

        assert_eq!(table.retain(|e| e.interface() != InterfaceIndex(1)), 2);
        assert_eq!(table.len(), 1);
        assert!(table.remove(5).is_none());
        assert!(table.remove(0).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_flags() {
        let host = RouteEntry::new(prefix("10.0.0.5/32"), Some(Ipv4Addr::new(10, 1, 1, 2)), InterfaceIndex(1), 0);
        assert_eq!(host.flags(), "UGH");
        assert_eq!(entry("10.0.0.0/24", 1, 0).flags(), "U");
    }

    #[test]
    fn test_multicast_wildcards() {
        let group = Ipv4Addr::new(239, 1, 1, 1);
        let any = MulticastRouteEntry::new(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, None, vec![InterfaceIndex(1)]);
        assert!(any.matches(Ipv4Addr::new(10, 0, 0, 1), group, InterfaceIndex(4)));

        let specific = MulticastRouteEntry::new(
            Ipv4Addr::new(10, 0, 0, 1),
            group,
            Some(InterfaceIndex(2)),
            vec![InterfaceIndex(1), InterfaceIndex(3)],
        );
        assert!(specific.matches(Ipv4Addr::new(10, 0, 0, 1), group, InterfaceIndex(2)));
        assert!(!specific.matches(Ipv4Addr::new(10, 0, 0, 1), group, InterfaceIndex(1)));
        assert!(!specific.matches(Ipv4Addr::new(10, 0, 0, 2), group, InterfaceIndex(2)));
    }
}
