//! The virtual IPv6 netif (spec §4.G): exposes each Z-Wave node as an
//! address under a routed prefix and periodically advertises that prefix
//! via ICMPv6 Router Advertisement. No real pseudo-interface is out of
//! scope here (the host TUN/TAP setup is external infrastructure, spec
//! §1); this module owns only the address bookkeeping and RA cadence, the
//! same split the teacher draws between protocol logic and its
//! `SerialBinding` I/O boundary (`serial/src/binding.rs`).

use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::time::Duration;

/// `prefix :: hex(nodeid)` (spec §4.G / §6).
pub fn node_address(rio_prefix: Ipv6Addr, nodeid: u16) -> Ipv6Addr {
    let mut segments = rio_prefix.segments();
    segments[7] = nodeid;
    Ipv6Addr::from(segments)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressState {
    Preferred,
    Invalid,
}

/// Sends the periodic ICMPv6 Router Advertisement; abstracted the way
/// [`zwip_serial::binding::SerialBinding`] abstracts the UART so the netif
/// logic can be exercised without a real socket.
pub trait Icmpv6Transport: Send + Sync {
    fn send_router_advertisement(&self, pio_prefix: Ipv6Addr, rio_prefix: Ipv6Addr);
}

pub struct NullIcmpv6Transport;

impl Icmpv6Transport for NullIcmpv6Transport {
    fn send_router_advertisement(&self, _pio_prefix: Ipv6Addr, _rio_prefix: Ipv6Addr) {}
}

/// Per-node address bookkeeping plus the RA cadence, driven by the router
/// loop (spec §4.I).
pub struct VirtualNetif<T: Icmpv6Transport> {
    pio_prefix: Ipv6Addr,
    rio_prefix: Ipv6Addr,
    ra_period: Duration,
    transport: T,
    addresses: BTreeMap<u16, AddressState>,
}

impl<T: Icmpv6Transport> VirtualNetif<T> {
    pub fn new(pio_prefix: Ipv6Addr, rio_prefix: Ipv6Addr, ra_period: Duration, transport: T) -> Self {
        Self {
            pio_prefix,
            rio_prefix,
            ra_period,
            transport,
            addresses: BTreeMap::new(),
        }
    }

    pub fn ra_period(&self) -> Duration {
        self.ra_period
    }

    pub fn send_advertisement(&self) {
        self.transport
            .send_router_advertisement(self.pio_prefix, self.rio_prefix);
    }

    /// Synthesises and marks `nodeid`'s address `Preferred` on RD
    /// transition to `Done`.
    pub fn publish(&mut self, nodeid: u16) -> Ipv6Addr {
        self.addresses.insert(nodeid, AddressState::Preferred);
        node_address(self.rio_prefix, nodeid)
    }

    /// Marks `nodeid`'s address `Invalid` on RD transition to
    /// `Failed`/`Deleted`, without forgetting it existed.
    pub fn retract(&mut self, nodeid: u16) {
        self.addresses.insert(nodeid, AddressState::Invalid);
    }

    pub fn state_of(&self, nodeid: u16) -> Option<AddressState> {
        self.addresses.get(&nodeid).copied()
    }

    /// Resolves an inbound datagram's destination address back to a node
    /// id, ignoring anything outside `rio_prefix` (spec §4.G).
    pub fn resolve(&self, destination: Ipv6Addr) -> Option<u16> {
        let segments = destination.segments();
        let mut prefix_segments = self.rio_prefix.segments();
        prefix_segments[7] = segments[7];
        if Ipv6Addr::from(prefix_segments) != destination {
            return None;
        }
        let nodeid = segments[7];
        matches!(self.addresses.get(&nodeid), Some(AddressState::Preferred)).then_some(nodeid)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rio() -> Ipv6Addr {
        "fd00:bbbb:1::".parse().unwrap()
    }

    #[test]
    fn node_address_embeds_the_node_id_in_the_last_segment() {
        let addr = node_address(rio(), 7);
        assert_eq!(addr, "fd00:bbbb:1::7".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn publish_then_resolve_round_trips() {
        let mut netif = VirtualNetif::new(
            "fd00:bbbb::".parse().unwrap(),
            rio(),
            Duration::from_secs(60),
            NullIcmpv6Transport,
        );
        let addr = netif.publish(7);
        assert_eq!(netif.resolve(addr), Some(7));
    }

    #[test]
    fn retract_makes_the_address_unresolvable() {
        let mut netif = VirtualNetif::new(
            "fd00:bbbb::".parse().unwrap(),
            rio(),
            Duration::from_secs(60),
            NullIcmpv6Transport,
        );
        let addr = netif.publish(7);
        netif.retract(7);
        assert_eq!(netif.resolve(addr), None);
        assert_eq!(netif.state_of(7), Some(AddressState::Invalid));
    }

    #[test]
    fn addresses_outside_the_prefix_do_not_resolve() {
        let mut netif = VirtualNetif::new(
            "fd00:bbbb::".parse().unwrap(),
            rio(),
            Duration::from_secs(60),
            NullIcmpv6Transport,
        );
        netif.publish(7);
        let outside: Ipv6Addr = "fd00:cccc::7".parse().unwrap();
        assert_eq!(netif.resolve(outside), None);
    }
}
