//! Global static routing.
//!
//! [`populate_routing_tables`] computes, for every node with a stack, a
//! shortest-hop route to each network it is not directly attached to. The
//! adjacency graph is derived from channel membership: two interfaces are
//! neighbours when they share a channel and a subnet.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::rc::Rc;

use super::address::Ipv4InterfaceAddress;
use crate::Simulator;

/// A route to `network/mask` through `gateway` on device `if_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub network: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub if_index: u32,
}

impl Route {
    pub fn matches(&self, destination: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(destination) & mask == u32::from(self.network)
    }

    pub fn prefix_len(&self) -> u32 {
        u32::from(self.mask).leading_ones()
    }
}

/// First hop from a node towards a neighbour.
#[derive(Debug, Clone, Copy)]
struct Hop {
    if_index: u32,
    gateway: Ipv4Addr,
}

/// Recomputes the routing table of every node. Returns how many routes
/// were installed in total.
pub fn populate_routing_tables(sim: &Simulator) -> usize {
    let stacks: HashMap<u32, _> = sim
        .nodes()
        .iter()
        .filter_map(|node| node.ipv4().map(|ipv4| (node.id(), ipv4)))
        .collect();

    let mut networks: HashMap<u32, Vec<Ipv4InterfaceAddress>> = HashMap::new();
    let mut adjacency: HashMap<u32, Vec<(u32, Hop)>> = HashMap::new();
    for (&id, ipv4) in &stacks {
        for (device, local) in ipv4.interface_addresses() {
            networks.entry(id).or_default().push(local);
            let Some(channel) = device.channel() else {
                continue;
            };
            for peer in channel.devices() {
                let Some(peer_node) = peer.node() else {
                    continue;
                };
                if peer_node.id() == id {
                    continue;
                }
                let Some(peer_stack) = stacks.get(&peer_node.id()) else {
                    continue;
                };
                let gateway = peer_stack
                    .addresses(peer.if_index())
                    .into_iter()
                    .find(|remote| local.contains(remote.local));
                if let Some(remote) = gateway {
                    adjacency.entry(id).or_default().push((
                        peer_node.id(),
                        Hop {
                            if_index: device.if_index(),
                            gateway: remote.local,
                        },
                    ));
                }
            }
        }
    }

    let mut ids: Vec<u32> = stacks.keys().copied().collect();
    ids.sort_unstable();
    let mut total = 0;
    for source in ids {
        let routes = routes_from(source, &adjacency, &networks);
        total += routes.len();
        tracing::trace!(node = source, routes = routes.len(), "routing table computed");
        if let Some(ipv4) = stacks.get(&source) {
            ipv4.set_routes(routes);
        }
    }
    tracing::debug!(nodes = stacks.len(), routes = total, "routing tables populated");
    total
}

fn routes_from(
    source: u32,
    adjacency: &HashMap<u32, Vec<(u32, Hop)>>,
    networks: &HashMap<u32, Vec<Ipv4InterfaceAddress>>,
) -> Vec<Route> {
    let attached: Vec<Ipv4InterfaceAddress> =
        networks.get(&source).cloned().unwrap_or_default();
    let is_attached = |network: Ipv4Addr, mask: Ipv4Addr| {
        attached
            .iter()
            .any(|a| a.network() == network && a.mask == mask)
    };

    // Breadth-first, so the first time a network is seen is over the
    // fewest hops.
    let mut first_hop: HashMap<u32, Hop> = HashMap::new();
    let mut visited = HashSet::from([source]);
    let mut queue = VecDeque::from([source]);
    let mut seen_networks = HashSet::new();
    let mut routes = Vec::new();

    while let Some(current) = queue.pop_front() {
        if current != source {
            let hop = first_hop[&current];
            for address in networks.get(&current).into_iter().flatten() {
                let key = (address.network(), address.mask);
                if is_attached(key.0, key.1) || !seen_networks.insert(key) {
                    continue;
                }
                routes.push(Route {
                    network: key.0,
                    mask: key.1,
                    gateway: hop.gateway,
                    if_index: hop.if_index,
                });
            }
        }
        for &(neighbour, hop) in adjacency.get(&current).into_iter().flatten() {
            if visited.insert(neighbour) {
                let inherited = if current == source {
                    hop
                } else {
                    first_hop[&current]
                };
                first_hop.insert(neighbour, inherited);
                queue.push_back(neighbour);
            }
        }
    }
    routes
}
