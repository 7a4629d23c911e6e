//! Per-flow statistics.
//!
//! A [`FlowMonitor`] attaches to the IPv4 layer of each node as an
//! [`Ipv4Probe`]. Datagrams are classified by 5-tuple where they originate
//! and tagged with the flow and a per-flow packet number; the tag is
//! matched again on forwarding, delivery and drop.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::Rc;

use crate::Simulator;
use crate::internet::{DropReason, Ipv4Probe};
use crate::node::Node;
use crate::packet::{FlowTag, Packet};
use crate::time::Time;

/// A packet in flight longer than this is counted as lost.
pub const DEFAULT_MAX_PER_HOP_DELAY: Time = Time::from_millis(10_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(u32);

impl FlowId {
    pub const fn new(id: u32) -> Self {
        FlowId(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub source_port: u16,
    pub destination_port: u16,
}

impl FiveTuple {
    fn of(packet: &Packet) -> Option<Self> {
        let ip = packet.ipv4()?;
        let udp = packet.udp()?;
        Some(Self {
            source: ip.source,
            destination: ip.destination,
            protocol: ip.protocol,
            source_port: udp.source_port,
            destination_port: udp.destination_port,
        })
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto {}",
            self.source, self.source_port, self.destination, self.destination_port, self.protocol
        )
    }
}

/// Counters of one flow. Byte counts include the IPv4 header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub delay_sum: Time,
    pub jitter_sum: Time,
    pub last_delay: Option<Time>,
    pub lost_packets: u64,
    pub dropped_packets: u64,
    pub times_forwarded: u64,
    pub time_first_tx_packet: Option<Time>,
    pub time_last_tx_packet: Option<Time>,
    pub time_first_rx_packet: Option<Time>,
    pub time_last_rx_packet: Option<Time>,
}

/// Sums over every flow of a monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlowTotals {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub delay_sum: Time,
    pub jitter_sum: Time,
    pub flow_count: u32,
}

struct Classified {
    flow: FlowId,
    next_packet_id: u32,
}

pub struct FlowMonitor {
    id: u32,
    flows: RefCell<HashMap<FiveTuple, Classified>>,
    tuples: RefCell<BTreeMap<FlowId, FiveTuple>>,
    stats: RefCell<BTreeMap<FlowId, FlowStats>>,
    /// Send time of every tagged packet not yet delivered, dropped or lost.
    in_flight: RefCell<HashMap<(FlowId, u32), Time>>,
    max_per_hop_delay: Cell<Time>,
}

impl FlowMonitor {
    pub(crate) fn new(id: u32) -> Rc<Self> {
        Rc::new(Self {
            id,
            flows: RefCell::new(HashMap::new()),
            tuples: RefCell::new(BTreeMap::new()),
            stats: RefCell::new(BTreeMap::new()),
            in_flight: RefCell::new(HashMap::new()),
            max_per_hop_delay: Cell::new(DEFAULT_MAX_PER_HOP_DELAY),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_max_per_hop_delay(&self, delay: Time) {
        self.max_per_hop_delay.set(delay);
    }

    /// Attaches the monitor to a node's IPv4 layer. Returns `false` when the
    /// node has no internet stack.
    pub fn attach(self: &Rc<Self>, node: &Node) -> bool {
        let Some(ipv4) = node.ipv4() else {
            return false;
        };
        ipv4.add_probe(Rc::clone(self) as Rc<dyn Ipv4Probe>);
        true
    }

    pub fn flow_stats(&self) -> BTreeMap<FlowId, FlowStats> {
        self.stats.borrow().clone()
    }

    pub fn flow_count(&self) -> usize {
        self.stats.borrow().len()
    }

    pub fn find_flow(&self, flow: FlowId) -> Option<FiveTuple> {
        self.tuples.borrow().get(&flow).copied()
    }

    pub fn totals(&self) -> FlowTotals {
        let stats = self.stats.borrow();
        stats.values().fold(
            FlowTotals {
                flow_count: stats.len() as u32,
                ..FlowTotals::default()
            },
            |mut totals, flow| {
                totals.tx_packets += flow.tx_packets;
                totals.rx_packets += flow.rx_packets;
                totals.tx_bytes += flow.tx_bytes;
                totals.rx_bytes += flow.rx_bytes;
                totals.delay_sum += flow.delay_sum;
                totals.jitter_sum += flow.jitter_sum;
                totals
            },
        )
    }

    /// Counts packets in flight for longer than the maximum per-hop delay
    /// as lost.
    pub fn check_for_lost_packets(&self, now: Time) {
        let max = self.max_per_hop_delay.get();
        let mut lost: Vec<FlowId> = Vec::new();
        self.in_flight.borrow_mut().retain(|&(flow, _), sent_at| {
            let expired = now.saturating_sub(*sent_at) > max;
            if expired {
                lost.push(flow);
            }
            !expired
        });
        let mut stats = self.stats.borrow_mut();
        for flow in lost {
            if let Some(entry) = stats.get_mut(&flow) {
                entry.lost_packets += 1;
            }
        }
    }

    fn classify(&self, tuple: FiveTuple) -> (FlowId, u32) {
        let mut flows = self.flows.borrow_mut();
        let next_flow = FlowId::new(flows.len() as u32 + 1);
        let entry = flows.entry(tuple).or_insert_with(|| {
            self.tuples.borrow_mut().insert(next_flow, tuple);
            tracing::trace!(monitor = self.id, flow = %next_flow, %tuple, "new flow");
            Classified {
                flow: next_flow,
                next_packet_id: 0,
            }
        });
        let packet_id = entry.next_packet_id;
        entry.next_packet_id = entry.next_packet_id.wrapping_add(1);
        (entry.flow, packet_id)
    }

    fn tag(&self, packet: &Packet) -> Option<FlowTag> {
        packet.flow_tag(self.id)
    }
}

impl Ipv4Probe for FlowMonitor {
    fn on_send(&self, sim: &Simulator, _node: u32, packet: &mut Packet) {
        if self.tag(packet).is_some() {
            return;
        }
        let Some(tuple) = FiveTuple::of(packet) else {
            return;
        };
        let (flow, packet_id) = self.classify(tuple);
        packet.add_flow_tag(FlowTag {
            monitor: self.id,
            flow,
            packet_id,
        });
        let now = sim.now();
        self.in_flight.borrow_mut().insert((flow, packet_id), now);
        let mut stats = self.stats.borrow_mut();
        let entry = stats.entry(flow).or_default();
        entry.tx_packets += 1;
        entry.tx_bytes += u64::from(packet.ip_size());
        entry.time_first_tx_packet.get_or_insert(now);
        entry.time_last_tx_packet = Some(now);
    }

    fn on_forward(&self, _sim: &Simulator, _node: u32, packet: &Packet) {
        let Some(tag) = self.tag(packet) else {
            return;
        };
        if let Some(entry) = self.stats.borrow_mut().get_mut(&tag.flow) {
            entry.times_forwarded += 1;
        }
    }

    fn on_deliver(&self, sim: &Simulator, _node: u32, packet: &Packet) {
        let Some(tag) = self.tag(packet) else {
            return;
        };
        let sent_at = self.in_flight.borrow_mut().remove(&(tag.flow, tag.packet_id));
        let Some(sent_at) = sent_at else {
            return;
        };
        let now = sim.now();
        let delay = now.saturating_sub(sent_at);
        let mut stats = self.stats.borrow_mut();
        let entry = stats.entry(tag.flow).or_default();
        if let Some(previous) = entry.last_delay {
            entry.jitter_sum += delay.abs_diff(previous);
        }
        entry.last_delay = Some(delay);
        entry.delay_sum += delay;
        entry.rx_packets += 1;
        entry.rx_bytes += u64::from(packet.ip_size());
        entry.time_first_rx_packet.get_or_insert(now);
        entry.time_last_rx_packet = Some(now);
    }

    fn on_drop(&self, _sim: &Simulator, node: u32, packet: &Packet, reason: DropReason) {
        let Some(tag) = self.tag(packet) else {
            return;
        };
        if self
            .in_flight
            .borrow_mut()
            .remove(&(tag.flow, tag.packet_id))
            .is_none()
        {
            return;
        }
        tracing::trace!(monitor = self.id, node, flow = %tag.flow, ?reason, "flow packet dropped");
        if let Some(entry) = self.stats.borrow_mut().get_mut(&tag.flow) {
            entry.dropped_packets += 1;
        }
    }
}

impl fmt::Debug for FlowMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowMonitor")
            .field("id", &self.id)
            .field("flows", &self.flow_count())
            .field("in_flight", &self.in_flight.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Creates a monitor and attaches it to every node that has an internet
/// stack.
pub fn install_all(sim: &Simulator) -> Rc<FlowMonitor> {
    let monitor = FlowMonitor::new(sim.allocate_monitor_id());
    let attached = sim
        .nodes()
        .iter()
        .filter(|node| monitor.attach(node))
        .count();
    tracing::debug!(monitor = monitor.id(), nodes = attached, "flow monitor installed");
    monitor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Ipv4Header, UDP_PROTOCOL, UdpHeader};

    fn datagram(uid: u64, source_port: u16) -> Packet {
        let mut packet = Packet::new(uid, 100);
        packet.set_udp(UdpHeader {
            source_port,
            destination_port: 9,
        });
        packet.set_ipv4(Ipv4Header {
            source: Ipv4Addr::new(10, 1, 1, 1),
            destination: Ipv4Addr::new(10, 1, 1, 2),
            protocol: UDP_PROTOCOL,
            ttl: 64,
            identification: 0,
        });
        packet
    }

    fn at(sim: &Simulator, millis: u64, f: impl FnOnce(&Simulator) + 'static) {
        sim.schedule(Time::from_millis(millis), f);
    }

    #[test]
    fn flows_are_classified_by_five_tuple() {
        let sim = Simulator::new();
        let monitor = FlowMonitor::new(1);
        let mut a = datagram(0, 49153);
        let mut b = datagram(1, 49153);
        let mut c = datagram(2, 49154);
        monitor.on_send(&sim, 0, &mut a);
        monitor.on_send(&sim, 0, &mut b);
        monitor.on_send(&sim, 0, &mut c);

        assert_eq!(a.flow_tag(1).unwrap().flow, FlowId::new(1));
        assert_eq!(b.flow_tag(1).unwrap().flow, FlowId::new(1));
        assert_eq!(b.flow_tag(1).unwrap().packet_id, 1);
        assert_eq!(c.flow_tag(1).unwrap().flow, FlowId::new(2));
        assert_eq!(monitor.flow_count(), 2);
        assert_eq!(monitor.find_flow(FlowId::new(2)).unwrap().source_port, 49154);
        assert!(a.flow_tag(2).is_none());
    }

    #[test]
    fn delay_and_jitter_accumulate_separately() {
        let sim = Simulator::new();
        let monitor = FlowMonitor::new(1);

        // Delays of 10 ms, 30 ms and 20 ms.
        for (send, receive, uid) in [(0, 10, 0), (100, 130, 1), (200, 220, 2)] {
            let sender = Rc::clone(&monitor);
            let receiver = Rc::clone(&monitor);
            let in_transit = Rc::new(RefCell::new(None));
            let slot = Rc::clone(&in_transit);
            at(&sim, send, move |sim| {
                let mut packet = datagram(uid, 49153);
                sender.on_send(sim, 0, &mut packet);
                *slot.borrow_mut() = Some(packet);
            });
            at(&sim, receive, move |sim| {
                let packet = in_transit.borrow_mut().take().unwrap();
                receiver.on_deliver(sim, 1, &packet);
            });
        }
        sim.run().unwrap();

        let totals = monitor.totals();
        assert_eq!(totals.tx_packets, 3);
        assert_eq!(totals.rx_packets, 3);
        assert_eq!(totals.tx_bytes, 3 * 128);
        assert_eq!(totals.delay_sum, Time::from_millis(60));
        assert_eq!(totals.jitter_sum, Time::from_millis(30));
        assert_eq!(totals.flow_count, 1);

        let stats = monitor.flow_stats()[&FlowId::new(1)].clone();
        assert_eq!(stats.time_first_tx_packet, Some(Time::ZERO));
        assert_eq!(stats.time_last_rx_packet, Some(Time::from_millis(220)));
    }

    #[test]
    fn drops_and_losses_are_counted_once() {
        let sim = Simulator::new();
        let monitor = FlowMonitor::new(1);
        let mut dropped = datagram(0, 49153);
        let mut stranded = datagram(1, 49153);
        monitor.on_send(&sim, 0, &mut dropped);
        monitor.on_send(&sim, 0, &mut stranded);

        monitor.on_drop(&sim, 0, &dropped, DropReason::DeviceDrop);
        monitor.on_drop(&sim, 0, &dropped, DropReason::DeviceDrop);
        monitor.on_deliver(&sim, 1, &dropped);

        monitor.check_for_lost_packets(Time::from_millis(5_000));
        monitor.check_for_lost_packets(Time::from_millis(10_001));
        monitor.check_for_lost_packets(Time::from_millis(20_000));

        let stats = monitor.flow_stats()[&FlowId::new(1)].clone();
        assert_eq!(stats.dropped_packets, 1);
        assert_eq!(stats.lost_packets, 1);
        assert_eq!(stats.rx_packets, 0);
    }

    #[test]
    fn untagged_and_non_udp_packets_are_ignored() {
        let sim = Simulator::new();
        let monitor = FlowMonitor::new(1);
        let mut bare = Packet::new(0, 10);
        monitor.on_send(&sim, 0, &mut bare);
        monitor.on_deliver(&sim, 1, &datagram(1, 1));
        monitor.on_forward(&sim, 1, &datagram(2, 1));
        assert_eq!(monitor.flow_count(), 0);
    }
}
