//! IPv4 and UDP.
//!
//! Each node with an internet stack owns an [`Ipv4L3`]: its interface
//! addresses, a routing table filled by [`routing::populate_routing_tables`],
//! a UDP demultiplexer and the probes flow monitors attach. Directly
//! connected networks are routed implicitly; everything else needs a route.
//! There is no ARP: shared-medium devices resolve next hops by asking the
//! stacks of their channel peers.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};

use crate::device::NetDevice;
use crate::node::Node;
use crate::packet::{DEFAULT_TTL, Ipv4Header, Packet, UDP_PROTOCOL};
use crate::{EngineError, Simulator};

pub mod address;
pub mod routing;
pub mod udp;

pub use address::{Ipv4AddressHelper, Ipv4InterfaceAddress};
pub use routing::{Route, populate_routing_tables};
pub use udp::{UdpL4, UdpSocket};

// ============================================================================
// Probes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    NoRoute,
    TtlExpired,
    /// The outgoing device refused the datagram (queue full, oversize).
    DeviceDrop,
}

/// Observer of datagrams passing through an IPv4 layer.
pub trait Ipv4Probe {
    /// A locally originated datagram, before it reaches a device. The probe
    /// may tag it.
    fn on_send(&self, sim: &Simulator, node: u32, packet: &mut Packet);

    fn on_forward(&self, sim: &Simulator, node: u32, packet: &Packet);

    /// A datagram delivered to a local transport protocol.
    fn on_deliver(&self, sim: &Simulator, node: u32, packet: &Packet);

    fn on_drop(&self, sim: &Simulator, node: u32, packet: &Packet, reason: DropReason);
}

// ============================================================================
// IPv4 layer
// ============================================================================

struct Interface {
    device: Rc<dyn NetDevice>,
    addresses: Vec<Ipv4InterfaceAddress>,
}

/// Outgoing device, next hop and source address for a destination.
struct RouteChoice {
    device: Rc<dyn NetDevice>,
    next_hop: Ipv4Addr,
    source: Ipv4Addr,
}

pub struct Ipv4L3 {
    me: Weak<Ipv4L3>,
    node: Weak<Node>,
    node_id: u32,
    /// Keyed by device index.
    interfaces: RefCell<BTreeMap<u32, Interface>>,
    routes: RefCell<Vec<Route>>,
    udp: UdpL4,
    probes: RefCell<Vec<Rc<dyn Ipv4Probe>>>,
    next_identification: Cell<u16>,
}

impl Ipv4L3 {
    pub(crate) fn new(node: &Rc<Node>, ephemeral_port_start: u16) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            node: Rc::downgrade(node),
            node_id: node.id(),
            interfaces: RefCell::new(BTreeMap::new()),
            routes: RefCell::new(Vec::new()),
            udp: UdpL4::new(ephemeral_port_start),
            probes: RefCell::new(Vec::new()),
            next_identification: Cell::new(0),
        })
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn node(&self) -> Option<Rc<Node>> {
        self.node.upgrade()
    }

    // ========================================================================
    // Addresses
    // ========================================================================

    /// Adds an address to the interface bound to `device`.
    pub fn add_address(&self, device: &Rc<dyn NetDevice>, address: Ipv4InterfaceAddress) {
        let mut interfaces = self.interfaces.borrow_mut();
        interfaces
            .entry(device.if_index())
            .or_insert_with(|| Interface {
                device: Rc::clone(device),
                addresses: Vec::new(),
            })
            .addresses
            .push(address);
        tracing::debug!(
            node = self.node_id,
            device = device.if_index(),
            address = %address,
            "IPv4 address assigned"
        );
    }

    /// Addresses on the interface of device `if_index`.
    pub fn addresses(&self, if_index: u32) -> Vec<Ipv4InterfaceAddress> {
        self.interfaces
            .borrow()
            .get(&if_index)
            .map(|interface| interface.addresses.clone())
            .unwrap_or_default()
    }

    /// Every `(device, address)` pair of this stack.
    pub fn interface_addresses(&self) -> Vec<(Rc<dyn NetDevice>, Ipv4InterfaceAddress)> {
        self.interfaces
            .borrow()
            .values()
            .flat_map(|interface| {
                interface
                    .addresses
                    .iter()
                    .map(|address| (Rc::clone(&interface.device), *address))
            })
            .collect()
    }

    pub fn owns_address_on(&self, if_index: u32, address: Ipv4Addr) -> bool {
        self.interfaces
            .borrow()
            .get(&if_index)
            .is_some_and(|interface| interface.addresses.iter().any(|a| a.local == address))
    }

    pub fn owns_address(&self, address: Ipv4Addr) -> bool {
        self.interfaces
            .borrow()
            .values()
            .any(|interface| interface.addresses.iter().any(|a| a.local == address))
    }

    /// Whether a datagram for `address` is delivered locally.
    pub fn is_local(&self, address: Ipv4Addr) -> bool {
        address.is_broadcast()
            || self.interfaces.borrow().values().any(|interface| {
                interface
                    .addresses
                    .iter()
                    .any(|a| a.local == address || a.broadcast() == address)
            })
    }

    // ========================================================================
    // Routing
    // ========================================================================

    pub fn routes(&self) -> Vec<Route> {
        self.routes.borrow().clone()
    }

    pub(crate) fn set_routes(&self, routes: Vec<Route>) {
        *self.routes.borrow_mut() = routes;
    }

    fn route(&self, destination: Ipv4Addr) -> Option<RouteChoice> {
        let interfaces = self.interfaces.borrow();

        if destination.is_broadcast() {
            let interface = interfaces.values().find(|i| !i.addresses.is_empty())?;
            return Some(RouteChoice {
                device: Rc::clone(&interface.device),
                next_hop: Ipv4Addr::BROADCAST,
                source: interface.addresses[0].local,
            });
        }

        let direct = interfaces
            .values()
            .flat_map(|interface| interface.addresses.iter().map(move |a| (interface, a)))
            .filter(|(_, a)| a.contains(destination))
            .max_by_key(|(_, a)| a.prefix_len());
        if let Some((interface, address)) = direct {
            let next_hop = if destination == address.broadcast() {
                Ipv4Addr::BROADCAST
            } else {
                destination
            };
            return Some(RouteChoice {
                device: Rc::clone(&interface.device),
                next_hop,
                source: address.local,
            });
        }

        let routes = self.routes.borrow();
        let route = routes
            .iter()
            .filter(|route| route.matches(destination))
            .max_by_key(|route| route.prefix_len())?;
        let interface = interfaces.get(&route.if_index)?;
        Some(RouteChoice {
            device: Rc::clone(&interface.device),
            next_hop: route.gateway,
            source: interface.addresses.first()?.local,
        })
    }

    // ========================================================================
    // Datapath
    // ========================================================================

    pub fn udp(&self) -> &UdpL4 {
        &self.udp
    }

    /// Opens a UDP socket on `port`; port 0 picks an ephemeral port.
    pub fn udp_bind(&self, port: u16) -> Result<Rc<UdpSocket>, EngineError> {
        self.udp.bind(&self.me, self.node_id, port)
    }

    pub fn add_probe(&self, probe: Rc<dyn Ipv4Probe>) {
        self.probes.borrow_mut().push(probe);
    }

    fn probes(&self) -> Vec<Rc<dyn Ipv4Probe>> {
        self.probes.borrow().clone()
    }

    fn next_identification(&self) -> u16 {
        let id = self.next_identification.get();
        self.next_identification.set(id.wrapping_add(1));
        id
    }

    /// Wraps a transport segment in an IPv4 header and sends it.
    pub fn send(
        &self,
        sim: &Simulator,
        mut packet: Packet,
        destination: Ipv4Addr,
        protocol: u8,
    ) -> Result<(), EngineError> {
        let route = self.route(destination);
        let Some(route) = route else {
            tracing::warn!(node = self.node_id, %destination, "no route, datagram dropped");
            for probe in self.probes() {
                probe.on_drop(sim, self.node_id, &packet, DropReason::NoRoute);
            }
            return Err(EngineError::NoRoute { dst: destination });
        };
        packet.set_ipv4(Ipv4Header {
            source: route.source,
            destination,
            protocol,
            ttl: DEFAULT_TTL,
            identification: self.next_identification(),
        });
        for probe in self.probes() {
            probe.on_send(sim, self.node_id, &mut packet);
        }

        if self.owns_address(destination) {
            if let Some(me) = self.me.upgrade() {
                sim.schedule_now(move |sim| me.local_deliver(sim, packet));
            }
            return Ok(());
        }
        tracing::trace!(
            node = self.node_id,
            uid = packet.uid(),
            %destination,
            next_hop = %route.next_hop,
            "datagram sent"
        );
        self.transmit(sim, &route, packet);
        Ok(())
    }

    fn transmit(&self, sim: &Simulator, route: &RouteChoice, packet: Packet) {
        let probes = self.probes();
        let copy = (!probes.is_empty()).then(|| packet.clone());
        if !route.device.send(sim, packet, route.next_hop) {
            if let Some(copy) = copy {
                for probe in probes {
                    probe.on_drop(sim, self.node_id, &copy, DropReason::DeviceDrop);
                }
            }
        }
    }

    /// Entry point for datagrams arriving on device `if_index`.
    pub(crate) fn receive(&self, sim: &Simulator, mut packet: Packet, if_index: u32) {
        let Some(header) = packet.ipv4().copied() else {
            return;
        };
        if self.is_local(header.destination) {
            self.local_deliver(sim, packet);
            return;
        }

        if header.ttl <= 1 {
            tracing::trace!(node = self.node_id, uid = packet.uid(), "TTL expired");
            for probe in self.probes() {
                probe.on_drop(sim, self.node_id, &packet, DropReason::TtlExpired);
            }
            return;
        }
        let Some(route) = self.route(header.destination) else {
            tracing::warn!(
                node = self.node_id,
                destination = %header.destination,
                "no route, forwarded datagram dropped"
            );
            for probe in self.probes() {
                probe.on_drop(sim, self.node_id, &packet, DropReason::NoRoute);
            }
            return;
        };
        if let Some(ip) = packet.ipv4_mut() {
            ip.ttl -= 1;
        }
        for probe in self.probes() {
            probe.on_forward(sim, self.node_id, &packet);
        }
        tracing::trace!(
            node = self.node_id,
            uid = packet.uid(),
            from_device = if_index,
            next_hop = %route.next_hop,
            "datagram forwarded"
        );
        self.transmit(sim, &route, packet);
    }

    fn local_deliver(&self, sim: &Simulator, packet: Packet) {
        for probe in self.probes() {
            probe.on_deliver(sim, self.node_id, &packet);
        }
        match packet.ipv4().map(|ip| ip.protocol) {
            Some(UDP_PROTOCOL) => self.udp.receive(sim, packet),
            protocol => tracing::trace!(
                node = self.node_id,
                ?protocol,
                "datagram for unsupported protocol discarded"
            ),
        }
    }
}

impl fmt::Debug for Ipv4L3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ipv4L3")
            .field("node", &self.node_id)
            .field("interfaces", &self.interfaces.borrow().len())
            .field("routes", &self.routes.borrow().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Installation
// ============================================================================

/// Aggregates IPv4/UDP onto nodes, skipping nodes it or anyone else already
/// equipped.
#[derive(Debug, Default)]
pub struct InternetStackHelper {
    installed: HashSet<u32>,
}

impl InternetStackHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many nodes received a new stack.
    pub fn install(&mut self, sim: &Simulator, nodes: &[Rc<Node>]) -> usize {
        let mut count = 0;
        for node in nodes {
            if self.installed.contains(&node.id()) || node.ipv4().is_some() {
                tracing::debug!(node = node.id(), "internet stack already installed");
                continue;
            }
            node.set_ipv4(Ipv4L3::new(node, sim.config().udp.ephemeral_port_start));
            self.installed.insert(node.id());
            count += 1;
        }
        tracing::debug!(requested = nodes.len(), installed = count, "internet stack installed");
        count
    }

    pub fn is_installed(&self, node: &Node) -> bool {
        self.installed.contains(&node.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::p2p::PointToPointHelper;

    #[test]
    fn stack_is_installed_once() {
        let sim = Simulator::new();
        let nodes = sim.create_nodes(2);
        let mut helper = InternetStackHelper::new();

        assert_eq!(helper.install(&sim, &nodes), 2);
        let first = nodes[0].ipv4().unwrap();
        assert_eq!(helper.install(&sim, &nodes), 0);
        assert!(Rc::ptr_eq(&first, &nodes[0].ipv4().unwrap()));
        assert!(helper.is_installed(&nodes[1]));

        // A second helper still sees the existing stack.
        assert_eq!(InternetStackHelper::new().install(&sim, &nodes[..1]), 0);
    }

    #[test]
    fn direct_routes_and_local_addresses() {
        let sim = Simulator::new();
        let nodes = sim.create_nodes(2);
        InternetStackHelper::new().install(&sim, &nodes);
        let (a, _) = PointToPointHelper::new("1Mbps".parse().unwrap(), "1ms".parse().unwrap())
            .install(&sim, &nodes[0], &nodes[1]);
        let a: Rc<dyn NetDevice> = a;
        let ipv4 = nodes[0].ipv4().unwrap();
        let address = Ipv4InterfaceAddress::new(
            Ipv4Addr::new(10, 1, 1, 1),
            Ipv4Addr::new(255, 255, 255, 0),
        )
        .unwrap();
        ipv4.add_address(&a, address);

        assert!(ipv4.owns_address_on(0, Ipv4Addr::new(10, 1, 1, 1)));
        assert!(!ipv4.owns_address_on(1, Ipv4Addr::new(10, 1, 1, 1)));
        assert!(ipv4.is_local(Ipv4Addr::new(10, 1, 1, 255)));
        assert!(ipv4.is_local(Ipv4Addr::BROADCAST));
        assert!(!ipv4.is_local(Ipv4Addr::new(10, 1, 1, 2)));

        let route = ipv4.route(Ipv4Addr::new(10, 1, 1, 2)).unwrap();
        assert_eq!(route.next_hop, Ipv4Addr::new(10, 1, 1, 2));
        assert_eq!(route.source, Ipv4Addr::new(10, 1, 1, 1));
        let route = ipv4.route(Ipv4Addr::new(10, 1, 1, 255)).unwrap();
        assert_eq!(route.next_hop, Ipv4Addr::BROADCAST);
        assert!(ipv4.route(Ipv4Addr::new(10, 9, 9, 9)).is_none());
    }

    #[test]
    fn unroutable_send_is_an_error() {
        let sim = Simulator::new();
        let nodes = sim.create_nodes(1);
        InternetStackHelper::new().install(&sim, &nodes);
        let ipv4 = nodes[0].ipv4().unwrap();
        let packet = Packet::new(0, 10);
        assert!(matches!(
            ipv4.send(&sim, packet, Ipv4Addr::new(192, 168, 0, 1), UDP_PROTOCOL),
            Err(EngineError::NoRoute { .. })
        ));
    }
}
