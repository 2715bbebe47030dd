//! Per-node interface table
//!
//! The [`Ipv4InterfaceTable`] is owned by a node's network stack. Routing
//! protocols get an [`InterfaceView`], which can read interface state but
//! never change it. The stack mutates the table first and notifies the
//! installed protocol afterwards, so a protocol reacting to a notification
//! always sees the new state.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::address::{Ipv4InterfaceAddress, Ipv4Mask};
use crate::error::InterfaceError;

/// Index of a network interface on one node
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
#[display("{_0}")]
pub struct InterfaceIndex(pub u32);

impl InterfaceIndex {
    /// Every node's interface 0 is the loopback
    pub const LOOPBACK: Self = Self(0);

    pub fn is_loopback(&self) -> bool {
        *self == Self::LOOPBACK
    }
}

/// State of a single interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Interface {
    index: InterfaceIndex,
    up: bool,
    forwarding: bool,
    metric: u16,
    addresses: Vec<Ipv4InterfaceAddress>,
}

impl Ipv4Interface {
    fn new(index: InterfaceIndex) -> Self {
        Self {
            index,
            up: false,
            forwarding: true,
            metric: 1,
            addresses: Vec::new(),
        }
    }

    pub fn index(&self) -> InterfaceIndex {
        self.index
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn is_forwarding(&self) -> bool {
        self.forwarding
    }

    pub fn metric(&self) -> u16 {
        self.metric
    }

    pub fn addresses(&self) -> &[Ipv4InterfaceAddress] {
        &self.addresses
    }

    /// Whether `addr` is one of this interface's own or broadcast addresses
    fn accepts(&self, addr: Ipv4Addr) -> bool {
        self.addresses
            .iter()
            .any(|a| a.local() == addr || (a.mask() != Ipv4Mask::HOST && a.broadcast() == addr))
    }
}

/// All interfaces of one node, loopback first
#[derive(Debug, Clone)]
pub struct Ipv4InterfaceTable {
    interfaces: Vec<Ipv4Interface>,
}

/// Shared handle through which the owning stack mutates the table
pub type SharedInterfaceTable = Rc<RefCell<Ipv4InterfaceTable>>;

impl Ipv4InterfaceTable {
    /// Create a table holding only the loopback interface (127.0.0.1/8, up)
    pub fn new() -> Self {
        let mut loopback = Ipv4Interface::new(InterfaceIndex::LOOPBACK);
        loopback.up = true;
        loopback.addresses.push(Ipv4InterfaceAddress::new(
            Ipv4Addr::LOCALHOST,
            Ipv4Mask(0xff00_0000),
        ));
        Self {
            interfaces: vec![loopback],
        }
    }

    /// Wrap the table for shared ownership between stack and view
    pub fn into_shared(self) -> SharedInterfaceTable {
        Rc::new(RefCell::new(self))
    }

    /// Add a new interface, initially down with no addresses
    pub fn add_interface(&mut self) -> InterfaceIndex {
        let index = InterfaceIndex(self.interfaces.len() as u32);
        self.interfaces.push(Ipv4Interface::new(index));
        index
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn get(&self, index: InterfaceIndex) -> Option<&Ipv4Interface> {
        self.interfaces.get(index.0 as usize)
    }

    fn get_mut(&mut self, index: InterfaceIndex) -> Result<&mut Ipv4Interface, InterfaceError> {
        self.interfaces
            .get_mut(index.0 as usize)
            .ok_or(InterfaceError::NotFound(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ipv4Interface> {
        self.interfaces.iter()
    }

    /// Bring an interface up; returns whether the state changed
    pub fn set_up(&mut self, index: InterfaceIndex) -> Result<bool, InterfaceError> {
        let interface = self.get_mut(index)?;
        let changed = !interface.up;
        interface.up = true;
        Ok(changed)
    }

    /// Take an interface down; returns whether the state changed
    pub fn set_down(&mut self, index: InterfaceIndex) -> Result<bool, InterfaceError> {
        let interface = self.get_mut(index)?;
        let changed = interface.up;
        interface.up = false;
        Ok(changed)
    }

    pub fn set_forwarding(&mut self, index: InterfaceIndex, forwarding: bool) -> Result<(), InterfaceError> {
        self.get_mut(index)?.forwarding = forwarding;
        Ok(())
    }

    pub fn set_metric(&mut self, index: InterfaceIndex, metric: u16) -> Result<(), InterfaceError> {
        self.get_mut(index)?.metric = metric;
        Ok(())
    }

    /// Assign an address to an interface
    pub fn add_address(
        &mut self,
        index: InterfaceIndex,
        address: Ipv4InterfaceAddress,
    ) -> Result<(), InterfaceError> {
        let interface = self.get_mut(index)?;
        if interface.addresses.iter().any(|a| a.local() == address.local()) {
            return Err(InterfaceError::DuplicateAddress {
                interface: index,
                address: address.local(),
            });
        }
        interface.addresses.push(address);
        Ok(())
    }

    /// Remove an address from an interface, returning the removed entry
    pub fn remove_address(
        &mut self,
        index: InterfaceIndex,
        local: Ipv4Addr,
    ) -> Result<Ipv4InterfaceAddress, InterfaceError> {
        let interface = self.get_mut(index)?;
        let position = interface
            .addresses
            .iter()
            .position(|a| a.local() == local)
            .ok_or(InterfaceError::AddressNotFound {
                interface: index,
                address: local,
            })?;
        Ok(interface.addresses.remove(position))
    }
}

impl Default for Ipv4InterfaceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a node's interface table handed to routing protocols
#[derive(Debug, Clone)]
pub struct InterfaceView {
    table: SharedInterfaceTable,
}

impl InterfaceView {
    pub fn new(table: &SharedInterfaceTable) -> Self {
        Self {
            table: Rc::clone(table),
        }
    }

    pub fn n_interfaces(&self) -> usize {
        self.table.borrow().len()
    }

    /// Snapshot of one interface
    pub fn interface(&self, index: InterfaceIndex) -> Option<Ipv4Interface> {
        self.table.borrow().get(index).cloned()
    }

    pub fn is_up(&self, index: InterfaceIndex) -> bool {
        self.table.borrow().get(index).is_some_and(|i| i.is_up())
    }

    pub fn is_forwarding(&self, index: InterfaceIndex) -> bool {
        self.table.borrow().get(index).is_some_and(|i| i.is_forwarding())
    }

    pub fn metric(&self, index: InterfaceIndex) -> Option<u16> {
        self.table.borrow().get(index).map(|i| i.metric())
    }

    pub fn addresses(&self, index: InterfaceIndex) -> Vec<Ipv4InterfaceAddress> {
        self.table
            .borrow()
            .get(index)
            .map(|i| i.addresses().to_vec())
            .unwrap_or_default()
    }

    /// Interfaces that are currently up, loopback excluded
    pub fn up_interfaces(&self) -> Vec<InterfaceIndex> {
        self.table
            .borrow()
            .iter()
            .filter(|i| i.is_up() && !i.index().is_loopback())
            .map(|i| i.index())
            .collect()
    }

    /// Interface owning the given local address
    pub fn interface_for_address(&self, addr: Ipv4Addr) -> Option<InterfaceIndex> {
        self.table
            .borrow()
            .iter()
            .find(|i| i.addresses().iter().any(|a| a.local() == addr))
            .map(|i| i.index())
    }

    /// Up interface with a subnet containing `addr` (an on-link neighbour)
    pub fn interface_for_prefix(&self, addr: Ipv4Addr) -> Option<InterfaceIndex> {
        self.table
            .borrow()
            .iter()
            .filter(|i| i.is_up() && !i.index().is_loopback())
            .find(|i| i.addresses().iter().any(|a| a.contains(addr)))
            .map(|i| i.index())
    }

    /// Whether a packet to `addr` arriving on `iif` is for this node
    ///
    /// Accepts the limited broadcast, the input interface's own and
    /// subnet-broadcast addresses, and any unicast address of the node.
    /// Multicast group membership is not modelled here.
    pub fn is_destination_address(&self, addr: Ipv4Addr, iif: InterfaceIndex) -> bool {
        if addr.is_broadcast() {
            return true;
        }
        let table = self.table.borrow();
        if table.get(iif).is_some_and(|i| i.accepts(addr)) {
            return true;
        }
        table
            .iter()
            .any(|i| i.addresses().iter().any(|a| a.local() == addr))
    }

    /// Pick a source address on `interface` for traffic towards `next_hop`
    ///
    /// Prefers an address in the next hop's subnet, then the first address.
    pub fn source_address_for(&self, interface: InterfaceIndex, next_hop: Ipv4Addr) -> Option<Ipv4Addr> {
        let table = self.table.borrow();
        let addresses = table.get(interface)?.addresses();
        addresses
            .iter()
            .find(|a| a.contains(next_hop))
            .or_else(|| addresses.first())
            .map(|a| a.local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4InterfaceAddress {
        Ipv4InterfaceAddress::parse(s).unwrap()
    }

    fn two_interface_table() -> SharedInterfaceTable {
        let mut table = Ipv4InterfaceTable::new();
        let if1 = table.add_interface();
        let if2 = table.add_interface();
        table.add_address(if1, addr("10.0.0.1/24")).unwrap();
        table.add_address(if2, addr("10.1.1.1/30")).unwrap();
        table.set_up(if1).unwrap();
        table.set_up(if2).unwrap();
        table.into_shared()
    }

    #[test]
    fn test_loopback_present() {
        let table = Ipv4InterfaceTable::new();
        let lo = table.get(InterfaceIndex::LOOPBACK).unwrap();
        assert!(lo.is_up());
        assert_eq!(lo.addresses()[0].local(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_set_up_reports_change() {
        let mut table = Ipv4InterfaceTable::new();
        let if1 = table.add_interface();
        assert!(table.set_up(if1).unwrap());
        assert!(!table.set_up(if1).unwrap());
        assert!(table.set_down(if1).unwrap());
        assert!(!table.set_down(if1).unwrap());
        assert_eq!(
            table.set_up(InterfaceIndex(9)),
            Err(InterfaceError::NotFound(InterfaceIndex(9)))
        );
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut table = Ipv4InterfaceTable::new();
        let if1 = table.add_interface();
        table.add_address(if1, addr("10.0.0.1/24")).unwrap();
        assert!(matches!(
            table.add_address(if1, addr("10.0.0.1/16")),
            Err(InterfaceError::DuplicateAddress { .. })
        ));
    }

    #[test]
    fn test_remove_address() {
        let mut table = Ipv4InterfaceTable::new();
        let if1 = table.add_interface();
        table.add_address(if1, addr("10.0.0.1/24")).unwrap();
        let removed = table.remove_address(if1, Ipv4Addr::new(10, 0, 0, 1)).unwrap();
        assert_eq!(removed.mask().prefix_len(), 24);
        assert!(table.remove_address(if1, Ipv4Addr::new(10, 0, 0, 1)).is_err());
    }

    #[test]
    fn test_view_reads_live_state() {
        let shared = two_interface_table();
        let view = InterfaceView::new(&shared);
        assert!(view.is_up(InterfaceIndex(1)));

        shared.borrow_mut().set_down(InterfaceIndex(1)).unwrap();
        assert!(!view.is_up(InterfaceIndex(1)));
        assert_eq!(view.up_interfaces(), vec![InterfaceIndex(2)]);
    }

    #[test]
    fn test_is_destination_address() {
        let view = InterfaceView::new(&two_interface_table());
        assert!(view.is_destination_address(Ipv4Addr::new(10, 0, 0, 1), InterfaceIndex(1)));
        assert!(view.is_destination_address(Ipv4Addr::new(10, 0, 0, 255), InterfaceIndex(1)));
        assert!(!view.is_destination_address(Ipv4Addr::new(10, 0, 0, 255), InterfaceIndex(2)));
        // weak end system: any local address is accepted on any interface
        assert!(view.is_destination_address(Ipv4Addr::new(10, 1, 1, 1), InterfaceIndex(1)));
        assert!(view.is_destination_address(Ipv4Addr::BROADCAST, InterfaceIndex(2)));
        assert!(!view.is_destination_address(Ipv4Addr::new(10, 0, 0, 5), InterfaceIndex(1)));
    }

    #[test]
    fn test_interface_lookups() {
        let view = InterfaceView::new(&two_interface_table());
        assert_eq!(view.interface_for_address(Ipv4Addr::new(10, 1, 1, 1)), Some(InterfaceIndex(2)));
        assert_eq!(view.interface_for_prefix(Ipv4Addr::new(10, 0, 0, 9)), Some(InterfaceIndex(1)));
        assert_eq!(view.interface_for_prefix(Ipv4Addr::new(172, 16, 0, 1)), None);
        assert_eq!(
            view.source_address_for(InterfaceIndex(2), Ipv4Addr::new(10, 1, 1, 2)),
            Some(Ipv4Addr::new(10, 1, 1, 1))
        );
        assert_eq!(view.source_address_for(InterfaceIndex(7), Ipv4Addr::LOCALHOST), None);
    }
}
