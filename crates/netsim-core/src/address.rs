//! IPv4 masks, prefixes and interface addresses

use std::fmt::{self, Display};
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InterfaceError;

/// An IPv4 network mask stored as a contiguous prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Ipv4Mask(pub(crate) u32);

impl Ipv4Mask {
    /// 0.0.0.0, matches every address
    pub const ANY: Self = Self(0);
    /// 255.255.255.255, matches exactly one address
    pub const HOST: Self = Self(u32::MAX);
    /// 255.255.255.0
    pub const SLASH_24: Self = Self(0xffff_ff00);

    /// Create a mask from a prefix length (0..=32)
    pub fn from_prefix(prefix: u8) -> Result<Self, InterfaceError> {
        match prefix {
            0 => Ok(Self::ANY),
            1..=32 => Ok(Self(u32::MAX << (32 - prefix))),
            _ => Err(InterfaceError::InvalidPrefix(prefix)),
        }
    }

    /// Number of leading one bits
    pub fn prefix_len(&self) -> u8 {
        self.0.leading_ones() as u8
    }

    /// Apply the mask to an address
    pub fn combine(&self, addr: Ipv4Addr) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(addr) & self.0)
    }

    /// Check whether two addresses fall in the same masked network
    pub fn is_match(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        self.combine(a) == self.combine(b)
    }

    /// Raw mask bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// The mask in dotted-quad form
    pub fn to_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.0)
    }
}

impl TryFrom<u32> for Ipv4Mask {
    type Error = InterfaceError;

    /// Accept only masks whose one bits are all leading
    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        if bits.leading_ones() + bits.trailing_zeros() < 32 {
            return Err(InterfaceError::InvalidMask(bits));
        }
        Ok(Self(bits))
    }
}

impl From<Ipv4Mask> for u32 {
    fn from(mask: Ipv4Mask) -> Self {
        mask.0
    }
}

impl Display for Ipv4Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_addr())
    }
}

/// A network prefix such as `10.0.0.0/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Prefix {
    network: Ipv4Addr,
    mask: Ipv4Mask,
}

impl Ipv4Prefix {
    /// Create a prefix, normalising the network address with the mask
    pub fn new(addr: Ipv4Addr, mask: Ipv4Mask) -> Self {
        Self {
            network: mask.combine(addr),
            mask,
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn mask(&self) -> Ipv4Mask {
        self.mask
    }

    /// Check whether the address is inside this prefix
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.mask.combine(addr) == self.network
    }
}

impl Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.mask.prefix_len())
    }
}

impl FromStr for Ipv4Prefix {
    type Err = InterfaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s.split_once('/').unwrap_or((s, "32"));
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| InterfaceError::InvalidAddress(s.to_string()))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| InterfaceError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(addr, Ipv4Mask::from_prefix(prefix)?))
    }
}

impl TryFrom<String> for Ipv4Prefix {
    type Error = InterfaceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Prefix> for String {
    fn from(value: Ipv4Prefix) -> Self {
        value.to_string()
    }
}

/// An address assigned to an interface, together with its network mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv4InterfaceAddress {
    local: Ipv4Addr,
    mask: Ipv4Mask,
}

impl Ipv4InterfaceAddress {
    pub fn new(local: Ipv4Addr, mask: Ipv4Mask) -> Self {
        Self { local, mask }
    }

    /// Parse `"10.1.1.1/24"` style notation, keeping the host part
    pub fn parse(s: &str) -> Result<Self, InterfaceError> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| InterfaceError::InvalidAddress(s.to_string()))?;
        let local: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| InterfaceError::InvalidAddress(s.to_string()))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| InterfaceError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(local, Ipv4Mask::from_prefix(prefix)?))
    }

    pub fn local(&self) -> Ipv4Addr {
        self.local
    }

    pub fn mask(&self) -> Ipv4Mask {
        self.mask
    }

    /// The network this address lives in
    pub fn prefix(&self) -> Ipv4Prefix {
        Ipv4Prefix::new(self.local, self.mask)
    }

    /// Subnet-directed broadcast address
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.local) | !self.mask.bits())
    }

    /// Whether `addr` is on the same subnet as this address
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.mask.is_match(self.local, addr)
    }
}

impl Display for Ipv4InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.local, self.mask.prefix_len())
    }
}

/// Link-local multicast block 224.0.0.0/24, never forwarded
pub fn is_local_multicast(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    octets[0] == 224 && octets[1] == 0 && octets[2] == 0
}
